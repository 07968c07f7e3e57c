mod allocator;
mod availability;
mod error;
mod mutations;
mod payments;
mod pricing;
mod queries;

pub use availability::{merge_intervals, unavailable};
pub use error::EngineError;
pub use payments::redirect_url;
pub use pricing::{PricingStrategy, Quote};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::config::EngineSettings;
use crate::model::*;
use crate::notify::{Notification, NotificationKind, NotifyHub};
use crate::wal::Wal;

pub type SharedFieldState = Arc<RwLock<FieldState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = result {
        // Every caller in the batch sees the error, so none of it may replay.
        if let Err(rollback_err) = wal.rollback() {
            tracing::error!("WAL rollback after failed batch: {rollback_err}");
        }
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Secondary indexes kept beside the per-field state.
#[derive(Default)]
pub(super) struct Indexes {
    /// Booking or price rule id → owning field id.
    pub entity_to_field: DashMap<Ulid, Ulid>,
    /// Customer id → booking ids in creation order.
    pub customer_bookings: DashMap<Ulid, Vec<Ulid>>,
}

pub struct Engine {
    pub fields: DashMap<Ulid, SharedFieldState>,
    pub venues: DashMap<Ulid, Venue>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub settings: EngineSettings,
    pub(super) indexes: Indexes,
    /// Held shared by venue/field creation, exclusively by compaction.
    pub(super) catalog: RwLock<()>,
}

/// Apply an event to one field's state. Caller holds the field's lock.
fn apply_to_field(fs: &mut FieldState, event: &Event, indexes: &Indexes) {
    match event {
        Event::PriceRuleAdded { rule } => {
            indexes.entity_to_field.insert(rule.id, fs.id);
            fs.price_rules.push(rule.clone());
        }
        Event::PriceRuleRemoved { id, .. } => {
            fs.remove_rule(*id);
            indexes.entity_to_field.remove(id);
        }
        Event::BookingCreated { booking } => {
            indexes.entity_to_field.insert(booking.id, fs.id);
            indexes
                .customer_bookings
                .entry(booking.customer_id)
                .or_default()
                .push(booking.id);
            fs.insert_booking(booking.clone());
        }
        Event::PaymentRedirectPrepared {
            booking_id,
            redirect_url,
            ..
        } => {
            if let Some(b) = fs.bookings.get_mut(booking_id)
                && let Payment::Online(p) = &mut b.payment
            {
                p.redirect_url = Some(redirect_url.clone());
            }
        }
        Event::CashPaymentUpdated {
            booking_id,
            status,
            at,
            ..
        } => {
            if let Some(b) = fs.bookings.get_mut(booking_id)
                && let Payment::Cash(p) = &mut b.payment
            {
                p.status = *status;
                if *status == PaymentStatus::Success {
                    p.paid_at = Some(*at);
                    if b.status == BookingStatus::Pending {
                        b.status = BookingStatus::Confirmed;
                    }
                }
                b.updated_at = *at;
            }
        }
        Event::OnlinePaymentConfirmed {
            booking_id,
            transaction_ref,
            at,
            ..
        } => {
            if let Some(b) = fs.bookings.get_mut(booking_id)
                && let Payment::Online(p) = &mut b.payment
            {
                p.status = PaymentStatus::Success;
                p.paid_at = Some(*at);
                p.transaction_ref = Some(transaction_ref.clone());
                if b.status == BookingStatus::Pending {
                    b.status = BookingStatus::Confirmed;
                }
                b.updated_at = *at;
            }
        }
        Event::BookingCompleted { booking_id, at, .. } => {
            if let Some(b) = fs.bookings.get_mut(booking_id) {
                b.status = BookingStatus::Completed;
                b.updated_at = *at;
            }
        }
        // Catalog creation is handled at the DashMap level, not here
        Event::VenueCreated { .. } | Event::FieldCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            fields: DashMap::new(),
            venues: DashMap::new(),
            wal_tx,
            notify,
            settings,
            indexes: Indexes::default(),
            catalog: RwLock::new(()),
        };

        // Sole owner of these Arcs during replay, so try_write never contends.
        // Blocking lock calls are off limits: this can run inside the runtime
        // (lazy tenant creation).
        for event in &events {
            match event {
                Event::VenueCreated {
                    id,
                    owner_id,
                    hourly_rate,
                } => {
                    engine.venues.insert(
                        *id,
                        Venue {
                            id: *id,
                            owner_id: *owner_id,
                            hourly_rate: *hourly_rate,
                        },
                    );
                }
                Event::FieldCreated {
                    id,
                    venue_id,
                    hourly_rate,
                } => {
                    let fs = FieldState::new(*id, *venue_id, *hourly_rate);
                    engine.fields.insert(*id, Arc::new(RwLock::new(fs)));
                }
                other => {
                    if let Some(field_id) = event_field_id(other)
                        && let Some(fs) = engine.get_field(&field_id)
                        && let Ok(mut guard) = fs.try_write()
                    {
                        apply_to_field(&mut guard, other, &engine.indexes);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_field(&self, id: &Ulid) -> Option<SharedFieldState> {
        self.fields.get(id).map(|e| e.value().clone())
    }

    pub fn get_venue(&self, id: &Ulid) -> Option<Venue> {
        self.venues.get(id).map(|e| e.value().clone())
    }

    pub fn field_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.indexes.entity_to_field.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append, then apply. State never runs ahead of the log.
    pub(super) async fn persist_and_apply(
        &self,
        fs: &mut FieldState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_field(fs, event, &self.indexes);
        Ok(())
    }

    /// Lookup booking → field, acquire the field's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<FieldState>, EngineError> {
        let fs = self.resolve_booking_field(booking_id)?;
        Ok(fs.write_owned().await)
    }

    pub(super) async fn resolve_booking_read(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockReadGuard<FieldState>, EngineError> {
        let fs = self.resolve_booking_field(booking_id)?;
        Ok(fs.read_owned().await)
    }

    fn resolve_booking_field(&self, booking_id: &Ulid) -> Result<SharedFieldState, EngineError> {
        let field_id = self
            .field_for_entity(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        self.get_field(&field_id).ok_or(EngineError::NotFound(field_id))
    }

    /// Deliver a notification without letting delivery failure reach the caller.
    pub(super) fn notify_best_effort(&self, recipient: Ulid, kind: NotificationKind, booking_id: Ulid) {
        let notification = Notification {
            recipient,
            kind,
            booking_id,
            at: allocator::now_ms(),
        };
        if let Err(e) = self.notify.send(&notification) {
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            warn!("notification {kind:?} for booking {booking_id} to {recipient} failed: {e}");
        }
    }
}

/// Owning field of a per-field event.
fn event_field_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::PriceRuleAdded { rule } => Some(rule.field_id),
        Event::BookingCreated { booking } => Some(booking.field_id),
        Event::PriceRuleRemoved { field_id, .. }
        | Event::PaymentRedirectPrepared { field_id, .. }
        | Event::CashPaymentUpdated { field_id, .. }
        | Event::OnlinePaymentConfirmed { field_id, .. }
        | Event::BookingCompleted { field_id, .. } => Some(*field_id),
        Event::VenueCreated { .. } | Event::FieldCreated { .. } => None,
    }
}
