use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Audit timestamps only; booked time is `Minute`s on a date.
pub type Ms = i64;

/// Minutes since midnight, `0..=DAY_MINUTES`.
pub type Minute = u32;

pub type Money = Decimal;

pub const DAY_MINUTES: Minute = 24 * 60;

/// Allocation granularity. The last slot of a request may be shorter.
pub const SLOT_MINUTES: Minute = 30;

// ── Time interval utilities ──────────────────────────────────────

/// Half-open time-of-day interval `[start, end)` on a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn overlap_minutes(&self, other: &Span) -> Minute {
        overlap_minutes(self.start, self.end, other.start, other.end)
    }
}

/// Touching endpoints do not overlap.
pub fn overlaps(a_start: Minute, a_end: Minute, b_start: Minute, b_end: Minute) -> bool {
    a_start < b_end && b_start < a_end
}

/// Length of `[max(starts), min(ends))`, zero when disjoint.
pub fn overlap_minutes(a_start: Minute, a_end: Minute, b_start: Minute, b_end: Minute) -> Minute {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    end.saturating_sub(start)
}

pub fn format_minute(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse `HH:MM` or `HH:MM:SS` with zero seconds. `24:00` is accepted so a
/// booking can run to the end of the day.
pub fn parse_minute(s: &str) -> Option<Minute> {
    let mut parts = s.trim().split(':');
    let hours: Minute = parts.next()?.parse().ok()?;
    let minutes: Minute = parts.next()?.parse().ok()?;
    if let Some(seconds) = parts.next()
        && seconds.parse::<u32>().ok()? != 0
    {
        return None;
    }
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }
    let total = hours.checked_mul(60)?.checked_add(minutes)?;
    (total <= DAY_MINUTES).then_some(total)
}

/// Wall-clock instant `minute` minutes after midnight of `date`.
pub fn at_minute(date: NaiveDate, minute: Minute) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + TimeDelta::minutes(i64::from(minute))
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Ulid,
    pub owner_id: Ulid,
    /// Flat hourly rate for every field of the venue.
    pub hourly_rate: Option<Money>,
}

/// Day-of-week pricing segment. Rules may leave gaps and may overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRule {
    pub id: Ulid,
    pub field_id: Ulid,
    /// 1 = Monday … 7 = Sunday.
    pub day_of_week: u8,
    pub span: Span,
    pub price_per_hour: Money,
}

impl PriceRule {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        u32::from(self.day_of_week) == date.weekday().number_from_monday()
    }
}

// ── Booking aggregate ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Booked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Success,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(PaymentStatus::Pending),
            "SUCCESS" => Some(PaymentStatus::Success),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Online => "ONLINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CASH" => Some(PaymentMethod::Cash),
            "ONLINE" => Some(PaymentMethod::Online),
            _ => None,
        }
    }
}

/// One allocated chunk of a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub field_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub status: SlotStatus,
    pub final_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashPayment {
    pub status: PaymentStatus,
    pub amount: Money,
    pub currency: String,
    pub paid_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePayment {
    pub status: PaymentStatus,
    pub amount: Money,
    pub currency: String,
    pub provider: String,
    /// Filled by the second write of booking creation, once the id is durable.
    pub redirect_url: Option<String>,
    pub transaction_ref: Option<String>,
    pub paid_at: Option<Ms>,
}

/// The variant is fixed when the booking is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payment {
    Cash(CashPayment),
    Online(OnlinePayment),
}

impl Payment {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Payment::Cash(_) => PaymentMethod::Cash,
            Payment::Online(_) => PaymentMethod::Online,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        match self {
            Payment::Cash(p) => p.status,
            Payment::Online(p) => p.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub field_id: Ulid,
    pub venue_id: Ulid,
    pub date: NaiveDate,
    /// Ordered by start time.
    pub slots: Vec<Slot>,
    pub payment: Payment,
    pub status: BookingStatus,
    /// Priced once over the whole interval; slot prices are itemisation.
    pub total_price: Money,
    pub booked_at: Ms,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// First slot start to last slot end.
    pub fn span(&self) -> Option<Span> {
        let first = self.slots.first()?;
        let last = self.slots.last()?;
        Some(Span::new(first.span.start, last.span.end))
    }

    pub fn ends_at(&self) -> Option<NaiveDateTime> {
        self.span().map(|s| at_minute(self.date, s.end))
    }
}

/// Input to booking creation. Identity fields arrive already authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub customer_id: Ulid,
    pub field_id: Ulid,
    pub venue_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub end: Minute,
    /// `None` books with cash.
    pub payment_method: Option<PaymentMethod>,
    pub payment_provider: Option<String>,
}

// ── Per-field state ──────────────────────────────────────────────

/// Booked slot spans of one date, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    booked: Vec<(Span, Ulid)>,
}

impl DaySchedule {
    pub fn insert(&mut self, span: Span, booking_id: Ulid) {
        let pos = self
            .booked
            .binary_search_by_key(&span.start, |(s, _)| s.start)
            .unwrap_or_else(|e| e);
        self.booked.insert(pos, (span, booking_id));
    }

    /// Booked spans overlapping `query`, with their owning booking.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &(Span, Ulid)> {
        let right_bound = self.booked.partition_point(|(s, _)| s.start < query.end);
        self.booked[..right_bound]
            .iter()
            .filter(move |(s, _)| s.end > query.start)
    }

    pub fn spans(&self) -> impl Iterator<Item = Span> + '_ {
        self.booked.iter().map(|(s, _)| *s)
    }

    pub fn len(&self) -> usize {
        self.booked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.booked.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FieldState {
    pub id: Ulid,
    pub venue_id: Ulid,
    /// Overrides the venue's flat rate under flat pricing.
    pub hourly_rate: Option<Money>,
    pub price_rules: Vec<PriceRule>,
    pub days: BTreeMap<NaiveDate, DaySchedule>,
    pub bookings: HashMap<Ulid, Booking>,
}

impl FieldState {
    pub fn new(id: Ulid, venue_id: Ulid, hourly_rate: Option<Money>) -> Self {
        Self {
            id,
            venue_id,
            hourly_rate,
            price_rules: Vec::new(),
            days: BTreeMap::new(),
            bookings: HashMap::new(),
        }
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DaySchedule> {
        self.days.get(&date)
    }

    /// Index the booking's slots into the day schedule and take ownership.
    pub fn insert_booking(&mut self, booking: Booking) {
        let day = self.days.entry(booking.date).or_default();
        for slot in &booking.slots {
            day.insert(slot.span, booking.id);
        }
        self.bookings.insert(booking.id, booking);
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Option<PriceRule> {
        let pos = self.price_rules.iter().position(|r| r.id == id)?;
        Some(self.price_rules.remove(pos))
    }
}

/// WAL record format. One event per state change; a booking with its slots
/// and payment is a single event so it commits or fails as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VenueCreated {
        id: Ulid,
        owner_id: Ulid,
        hourly_rate: Option<Money>,
    },
    FieldCreated {
        id: Ulid,
        venue_id: Ulid,
        hourly_rate: Option<Money>,
    },
    PriceRuleAdded {
        rule: PriceRule,
    },
    PriceRuleRemoved {
        id: Ulid,
        field_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    PaymentRedirectPrepared {
        booking_id: Ulid,
        field_id: Ulid,
        redirect_url: String,
    },
    CashPaymentUpdated {
        booking_id: Ulid,
        field_id: Ulid,
        status: PaymentStatus,
        at: Ms,
    },
    OnlinePaymentConfirmed {
        booking_id: Ulid,
        field_id: Ulid,
        transaction_ref: String,
        at: Ms,
    },
    BookingCompleted {
        booking_id: Ulid,
        field_id: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub final_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInfo {
    /// `CASH`, or the online provider name.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<Ms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub field_id: Ulid,
    pub venue_id: Ulid,
    pub date: NaiveDate,
    pub status: String,
    pub total_price: Money,
    pub booked_at: Ms,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub slots: Vec<SlotInfo>,
    pub payment: PaymentInfo,
}

impl From<&Payment> for PaymentInfo {
    fn from(payment: &Payment) -> Self {
        match payment {
            Payment::Cash(p) => PaymentInfo {
                method: PaymentMethod::Cash.as_str().to_string(),
                provider: None,
                redirect_url: None,
                amount: p.amount.normalize(),
                currency: p.currency.clone(),
                status: p.status.as_str().to_string(),
                paid_at: p.paid_at,
                transaction_ref: None,
            },
            Payment::Online(p) => PaymentInfo {
                method: p.provider.clone(),
                provider: Some(p.provider.clone()),
                redirect_url: p.redirect_url.clone(),
                amount: p.amount.normalize(),
                currency: p.currency.clone(),
                status: p.status.as_str().to_string(),
                paid_at: p.paid_at,
                transaction_ref: p.transaction_ref.clone(),
            },
        }
    }
}

impl From<&Booking> for BookingInfo {
    fn from(b: &Booking) -> Self {
        BookingInfo {
            id: b.id,
            customer_id: b.customer_id,
            field_id: b.field_id,
            venue_id: b.venue_id,
            date: b.date,
            status: b.status.as_str().to_string(),
            total_price: b.total_price.normalize(),
            booked_at: b.booked_at,
            created_at: b.created_at,
            updated_at: b.updated_at,
            slots: b
                .slots
                .iter()
                .map(|s| SlotInfo {
                    date: s.date,
                    start_time: format_minute(s.span.start),
                    end_time: format_minute(s.span.end),
                    final_price: s.final_price.normalize(),
                })
                .collect(),
            payment: PaymentInfo::from(&b.payment),
        }
    }
}
