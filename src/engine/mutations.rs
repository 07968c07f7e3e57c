use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;

use super::allocator::{allocate, now_ms, validate_span};
use super::payments::redirect_url;
use super::{Engine, EngineError, WalCommand};

fn check_rate(rate: Option<Money>) -> Result<(), EngineError> {
    match rate {
        Some(r) if r.is_sign_negative() => Err(EngineError::InvalidValue(format!(
            "hourly rate {r} is negative"
        ))),
        _ => Ok(()),
    }
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────

    pub async fn create_venue(
        &self,
        id: Ulid,
        owner_id: Ulid,
        hourly_rate: Option<Money>,
    ) -> Result<(), EngineError> {
        if self.venues.len() >= MAX_VENUES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many venues"));
        }
        check_rate(hourly_rate)?;
        if self.venues.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let _catalog = self.catalog.read().await;
        let event = Event::VenueCreated { id, owner_id, hourly_rate };
        self.wal_append(&event).await?;
        self.venues.insert(id, Venue { id, owner_id, hourly_rate });
        Ok(())
    }

    pub async fn create_field(
        &self,
        id: Ulid,
        venue_id: Ulid,
        hourly_rate: Option<Money>,
    ) -> Result<(), EngineError> {
        if self.fields.len() >= MAX_FIELDS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many fields"));
        }
        check_rate(hourly_rate)?;
        if self.fields.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.venues.contains_key(&venue_id) {
            return Err(EngineError::NotFound(venue_id));
        }

        let _catalog = self.catalog.read().await;
        let event = Event::FieldCreated { id, venue_id, hourly_rate };
        self.wal_append(&event).await?;
        let fs = FieldState::new(id, venue_id, hourly_rate);
        self.fields.insert(id, Arc::new(RwLock::new(fs)));
        Ok(())
    }

    pub async fn add_price_rule(
        &self,
        id: Ulid,
        field_id: Ulid,
        day_of_week: u8,
        start: Minute,
        end: Minute,
        price_per_hour: Money,
    ) -> Result<(), EngineError> {
        if !(1..=7).contains(&day_of_week) {
            return Err(EngineError::InvalidValue(format!(
                "day_of_week {day_of_week} outside 1..=7"
            )));
        }
        let span = validate_span(start, end)?;
        check_rate(Some(price_per_hour))?;
        if self.field_for_entity(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let fs = self.get_field(&field_id).ok_or(EngineError::NotFound(field_id))?;
        let mut guard = fs.write().await;
        if guard.price_rules.len() >= MAX_PRICE_RULES_PER_FIELD {
            return Err(EngineError::LimitExceeded("too many price rules on field"));
        }

        let rule = PriceRule { id, field_id, day_of_week, span, price_per_hour };
        self.persist_and_apply(&mut guard, &Event::PriceRuleAdded { rule }).await
    }

    pub async fn remove_price_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let field_id = self.field_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let fs = self.get_field(&field_id).ok_or(EngineError::NotFound(field_id))?;
        let mut guard = fs.write().await;
        // The index also holds booking ids.
        if !guard.price_rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::PriceRuleRemoved { id, field_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(field_id)
    }

    // ── Booking aggregate ────────────────────────────────

    /// Allocate, price and durably record a booking with its payment.
    ///
    /// The overlap check and the `BookingCreated` append happen under the
    /// field's write lock, so overlapping requests serialise and exactly one
    /// wins. Online payments then get their redirect URL in a second write,
    /// since the URL embeds the booking id.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let span = validate_span(req.start, req.end)?;
        let provider = req
            .payment_provider
            .as_deref()
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty());
        if provider.as_ref().is_some_and(|p| p.len() > MAX_PROVIDER_LEN) {
            return Err(EngineError::LimitExceeded("payment provider name too long"));
        }

        let fs = self
            .get_field(&req.field_id)
            .ok_or(EngineError::NotFound(req.field_id))?;
        let venue = self
            .get_venue(&req.venue_id)
            .ok_or(EngineError::NotFound(req.venue_id))?;

        let mut guard = fs.write_owned().await;
        if guard.venue_id != req.venue_id {
            return Err(EngineError::FieldVenueMismatch {
                field_id: req.field_id,
                venue_id: req.venue_id,
            });
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_FIELD {
            return Err(EngineError::LimitExceeded("too many bookings on field"));
        }

        let alloc = allocate(&guard, venue.hourly_rate, self.settings.pricing, req.date, span)
            .inspect_err(|e| {
                if matches!(e, EngineError::SlotUnavailable(_)) {
                    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                }
            })?;

        let id = Ulid::new();
        let now = now_ms();
        let total = alloc.quote.total;
        let currency = self.settings.currency.clone();
        let payment = match req.payment_method.unwrap_or(PaymentMethod::Cash) {
            PaymentMethod::Cash => Payment::Cash(CashPayment {
                status: PaymentStatus::Pending,
                amount: total,
                currency,
                paid_at: None,
            }),
            PaymentMethod::Online => Payment::Online(OnlinePayment {
                status: PaymentStatus::Pending,
                amount: total,
                currency,
                provider: provider.unwrap_or_else(|| self.settings.default_provider.clone()),
                redirect_url: None,
                transaction_ref: None,
                paid_at: None,
            }),
        };

        let booking = Booking {
            id,
            customer_id: req.customer_id,
            field_id: req.field_id,
            venue_id: req.venue_id,
            date: req.date,
            slots: alloc.slots,
            payment,
            status: BookingStatus::Pending,
            total_price: total,
            booked_at: now,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &Event::BookingCreated { booking: booking.clone() })
            .await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booking {id} created: field {} {} {}-{} total {total}",
            req.field_id,
            req.date,
            format_minute(span.start),
            format_minute(span.end)
        );

        let booking = if matches!(booking.payment, Payment::Online(_)) {
            self.prepare_redirect(id).await.unwrap_or(booking)
        } else {
            booking
        };

        self.notify_best_effort(req.customer_id, NotificationKind::BookingCreated, id);
        self.notify_best_effort(venue.owner_id, NotificationKind::BookingReceived, id);
        Ok(booking)
    }

    /// Second write of online booking creation: store the redirect URL now
    /// that the booking id is durable. A failure here leaves the booking
    /// valid; initiation rebuilds the same URL on demand.
    async fn prepare_redirect(&self, booking_id: Ulid) -> Option<Booking> {
        match self.store_redirect(booking_id).await {
            Ok(booking) => Some(booking),
            Err(e) => {
                warn!("redirect url for booking {booking_id} not stored: {e}");
                None
            }
        }
    }

    async fn store_redirect(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let Payment::Online(p) = &booking.payment else {
            return Err(EngineError::WrongPaymentVariant(booking_id));
        };
        let event = Event::PaymentRedirectPrepared {
            booking_id,
            field_id: booking.field_id,
            redirect_url: redirect_url(&self.settings.payment_base_url, &p.provider, booking_id, p.amount),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    // ── Completion ───────────────────────────────────────

    /// CONFIRMED bookings whose last slot ended at or before `now`
    /// (venue-local wall clock).
    pub fn collect_due_completions(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut due = Vec::new();
        for entry in self.fields.iter() {
            let fs = entry.value().clone();
            if let Ok(guard) = fs.try_read() {
                for booking in guard.bookings.values() {
                    if booking.status == BookingStatus::Confirmed
                        && booking.ends_at().is_some_and(|end| end <= now)
                    {
                        due.push(booking.id);
                    }
                }
            }
        }
        due
    }

    /// Move a CONFIRMED booking to COMPLETED. Returns `false` when the booking
    /// is in any other state.
    pub async fn complete_booking(&self, booking_id: Ulid) -> Result<bool, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status != BookingStatus::Confirmed {
            debug!("booking {booking_id} is {}, not completing", booking.status);
            return Ok(false);
        }
        let customer_id = booking.customer_id;
        let event = Event::BookingCompleted {
            booking_id,
            field_id: guard.id,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        info!("booking {booking_id} completed");
        self.notify_best_effort(customer_id, NotificationKind::BookingCompleted, booking_id);
        Ok(true)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// Every field stays read-locked, and catalog creation is held off, until
    /// the writer has swapped files, so no acknowledged append is dropped.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.write().await;
        let mut events: Vec<Event> = self
            .venues
            .iter()
            .map(|v| Event::VenueCreated {
                id: v.id,
                owner_id: v.owner_id,
                hourly_rate: v.hourly_rate,
            })
            .collect();

        let fields: Vec<_> = self.fields.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(fields.len());
        for fs in fields {
            let guard = fs.read_owned().await;
            events.push(Event::FieldCreated {
                id: guard.id,
                venue_id: guard.venue_id,
                hourly_rate: guard.hourly_rate,
            });
            for rule in &guard.price_rules {
                events.push(Event::PriceRuleAdded { rule: rule.clone() });
            }
            let mut bookings: Vec<&Booking> = guard.bookings.values().collect();
            bookings.sort_by_key(|b| (b.booked_at, b.id));
            for booking in bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
