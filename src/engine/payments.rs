use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;

use super::allocator::now_ms;
use super::{Engine, EngineError};

/// Gateway redirect for an online payment. Depends only on its inputs, so it
/// can be rebuilt if the stored copy is missing. The amount is sent in whole
/// currency units.
pub fn redirect_url(base: &str, provider: &str, booking_id: Ulid, amount: Money) -> String {
    format!(
        "{base}/{provider}/pay?bookingId={booking_id}&amount={}",
        amount.trunc()
    )
}

/// Gateways report either whole units or minor units (×100).
fn amount_matches(stored: Money, reported: Money) -> bool {
    reported == stored || stored.checked_mul(Money::from(100)) == Some(reported)
}

impl Engine {
    /// Venue owner records the outcome of a cash payment.
    ///
    /// PENDING → SUCCESS stamps `paid_at` and moves a PENDING booking to
    /// CONFIRMED. Repeating SUCCESS changes nothing.
    pub async fn confirm_cash_payment(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
        status: PaymentStatus,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let venue = self
            .get_venue(&booking.venue_id)
            .ok_or(EngineError::NotFound(booking.venue_id))?;
        if venue.owner_id != owner_id {
            return Err(EngineError::Forbidden(booking_id));
        }
        let Payment::Cash(payment) = &booking.payment else {
            return Err(EngineError::WrongPaymentVariant(booking_id));
        };

        match (payment.status, status) {
            (PaymentStatus::Success, PaymentStatus::Pending) => {
                return Err(EngineError::InvalidTransition {
                    from: PaymentStatus::Success,
                    to: PaymentStatus::Pending,
                });
            }
            (current, requested) if current == requested => {
                debug!("cash payment for {booking_id} already {current}");
                return Ok(booking.clone());
            }
            _ => {}
        }

        let customer_id = booking.customer_id;
        let event = Event::CashPaymentUpdated {
            booking_id,
            field_id: guard.id,
            status,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        drop(guard);

        if status == PaymentStatus::Success {
            metrics::counter!(crate::observability::PAYMENTS_CONFIRMED_TOTAL, "method" => "cash")
                .increment(1);
            info!("cash payment for booking {booking_id} confirmed by owner {owner_id}");
            self.notify_best_effort(customer_id, NotificationKind::PaymentConfirmed, booking_id);
        }
        Ok(updated)
    }

    /// The redirect URL prepared at booking time. Read-only.
    pub async fn initiate_online_payment(
        &self,
        booking_id: Ulid,
        customer_id: Ulid,
    ) -> Result<String, EngineError> {
        let guard = self.resolve_booking_read(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.customer_id != customer_id {
            return Err(EngineError::Forbidden(booking_id));
        }
        let Payment::Online(payment) = &booking.payment else {
            return Err(EngineError::WrongPaymentVariant(booking_id));
        };
        Ok(payment.redirect_url.clone().unwrap_or_else(|| {
            redirect_url(
                &self.settings.payment_base_url,
                &payment.provider,
                booking_id,
                payment.amount,
            )
        }))
    }

    /// Gateway callback, after the caller verified the gateway's signature.
    /// A reported amount that matches neither encoding of the stored amount
    /// is logged and counted but does not block confirmation.
    pub async fn confirm_online_payment(
        &self,
        booking_id: Ulid,
        amount: Money,
        transaction_ref: String,
    ) -> Result<Booking, EngineError> {
        if transaction_ref.len() > MAX_TRANSACTION_REF_LEN {
            return Err(EngineError::LimitExceeded("transaction reference too long"));
        }
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let Payment::Online(payment) = &booking.payment else {
            return Err(EngineError::WrongPaymentVariant(booking_id));
        };
        if payment.status == PaymentStatus::Success {
            debug!(
                "online payment for {booking_id} already confirmed (ref {:?}), ignoring {transaction_ref}",
                payment.transaction_ref
            );
            return Ok(booking.clone());
        }
        if !amount_matches(payment.amount, amount) {
            metrics::counter!(crate::observability::PAYMENT_AMOUNT_MISMATCH_TOTAL).increment(1);
            warn!(
                "gateway reported {amount} for booking {booking_id}, stored amount is {}",
                payment.amount
            );
        }

        let customer_id = booking.customer_id;
        let provider = payment.provider.clone();
        let event = Event::OnlinePaymentConfirmed {
            booking_id,
            field_id: guard.id,
            transaction_ref,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        drop(guard);

        metrics::counter!(crate::observability::PAYMENTS_CONFIRMED_TOTAL, "method" => "online")
            .increment(1);
        info!("{provider} payment for booking {booking_id} confirmed");
        self.notify_best_effort(customer_id, NotificationKind::PaymentConfirmed, booking_id);
        Ok(updated)
    }

    /// A review may be written only by the booking's customer, once the
    /// booking is COMPLETED.
    pub async fn check_review_eligibility(
        &self,
        booking_id: Ulid,
        customer_id: Ulid,
    ) -> Result<(), EngineError> {
        let guard = self.resolve_booking_read(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.customer_id != customer_id {
            return Err(EngineError::Forbidden(booking_id));
        }
        if booking.status != BookingStatus::Completed {
            return Err(EngineError::BookingNotCompleted {
                id: booking_id,
                status: booking.status,
            });
        }
        Ok(())
    }
}
