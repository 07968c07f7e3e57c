use chrono::NaiveDate;

use crate::model::*;

use super::pricing::{PricingStrategy, Quote};
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Requested time must be a non-empty interval inside one day.
pub(crate) fn validate_span(start: Minute, end: Minute) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval(format!(
            "start {} is not before end {}",
            format_minute(start),
            format_minute(end)
        )));
    }
    if end > DAY_MINUTES {
        return Err(EngineError::InvalidInterval(format!(
            "end {} is past midnight",
            format_minute(end)
        )));
    }
    Ok(Span::new(start, end))
}

/// Any booked slot overlapping `span` on `date` is a conflict.
pub(crate) fn check_no_conflict(
    field: &FieldState,
    date: NaiveDate,
    span: &Span,
) -> Result<(), EngineError> {
    if let Some(day) = field.day(date)
        && let Some((_, booking_id)) = day.overlapping(span).next()
    {
        return Err(EngineError::SlotUnavailable(*booking_id));
    }
    Ok(())
}

/// Unpersisted slots for one request plus the price of the whole interval.
#[derive(Debug, Clone)]
pub(crate) struct Allocation {
    pub slots: Vec<Slot>,
    pub quote: Quote,
}

/// Check, price and cut `span` into `SLOT_MINUTES` slots; the final slot is
/// clipped to `span.end`. Caller holds the field's write lock.
pub(crate) fn allocate(
    field: &FieldState,
    venue_rate: Option<Money>,
    pricing: PricingStrategy,
    date: NaiveDate,
    span: Span,
) -> Result<Allocation, EngineError> {
    check_no_conflict(field, date, &span)?;

    let quote = pricing.price(field, venue_rate, date, &span)?;
    if !quote.fully_covered() {
        return Err(EngineError::IncompletePricingCoverage {
            requested: quote.requested_minutes,
            covered: quote.covered_minutes,
        });
    }

    let mut slots = Vec::with_capacity(span.duration_minutes().div_ceil(SLOT_MINUTES) as usize);
    let mut cursor = span.start;
    while cursor < span.end {
        let slot_span = Span::new(cursor, (cursor + SLOT_MINUTES).min(span.end));
        slots.push(Slot {
            field_id: field.id,
            date,
            span: slot_span,
            status: SlotStatus::Booked,
            final_price: pricing.price_slot(field, venue_rate, date, &slot_span)?,
        });
        cursor = slot_span.end;
    }

    Ok(Allocation { slots, quote })
}
