use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::unavailable;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let guard = self.resolve_booking_read(&booking_id).await?;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// One page of a customer's bookings, newest first. `size` is clamped to
    /// `1..=MAX_PAGE_SIZE`.
    pub async fn booking_history(
        &self,
        customer_id: Ulid,
        page: usize,
        size: usize,
    ) -> Result<Vec<Booking>, EngineError> {
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let ids: Vec<Ulid> = self
            .indexes
            .customer_bookings
            .get(&customer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            // A booking id in the index always has a field; skip rather than
            // fail the whole page if it does not.
            if let Ok(booking) = self.get_booking(id).await {
                bookings.push(booking);
            }
        }
        bookings.sort_by(|a, b| b.booked_at.cmp(&a.booked_at).then(b.id.cmp(&a.id)));

        Ok(bookings
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect())
    }

    /// Merged booked ranges for display. Unknown fields have none.
    pub async fn unavailable_slots(&self, field_id: Ulid, date: NaiveDate) -> Vec<Span> {
        let Some(fs) = self.get_field(&field_id) else {
            return Vec::new();
        };
        let guard = fs.read().await;
        unavailable(&guard, date)
    }
}
