use ulid::Ulid;

use crate::model::{BookingStatus, Minute, PaymentStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Start not before end, or end past midnight.
    InvalidInterval(String),
    /// Out-of-range catalog or payment value.
    InvalidValue(String),
    FieldVenueMismatch {
        field_id: Ulid,
        venue_id: Ulid,
    },
    /// Carries the booking that already holds the overlapping slot.
    SlotUnavailable(Ulid),
    IncompletePricingCoverage {
        requested: Minute,
        covered: Minute,
    },
    /// Flat pricing with no rate on the field or its venue.
    ConfigurationError(Ulid),
    Forbidden(Ulid),
    WrongPaymentVariant(Ulid),
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    BookingNotCompleted {
        id: Ulid,
        status: BookingStatus,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            EngineError::FieldVenueMismatch { field_id, venue_id } => {
                write!(f, "field {field_id} does not belong to venue {venue_id}")
            }
            EngineError::SlotUnavailable(id) => {
                write!(f, "requested time overlaps booking {id}")
            }
            EngineError::IncompletePricingCoverage { requested, covered } => write!(
                f,
                "price rules cover {covered} of {requested} requested minutes"
            ),
            EngineError::ConfigurationError(id) => {
                write!(f, "no hourly rate configured for field {id} or its venue")
            }
            EngineError::Forbidden(id) => write!(f, "not permitted on booking {id}"),
            EngineError::WrongPaymentVariant(id) => {
                write!(f, "booking {id} has a different payment method")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "payment cannot move from {from} to {to}")
            }
            EngineError::BookingNotCompleted { id, status } => {
                write!(f, "booking {id} is {status}, not COMPLETED")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
