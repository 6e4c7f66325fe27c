use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use validator::{Validate, ValidationError};

/// Money in the currency's minor unit. Always positive on a stored booking.
pub type Amount = i64;

pub type BookingId = Ulid;

/// Half-open date range `[start, end)`. The end date is the checkout / release day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Span {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Number of whole days (nights for a stay) covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingType {
    Homestay,
    Guide,
}

impl BookingType {
    pub fn unit_kind(self) -> UnitKind {
        match self {
            BookingType::Homestay => UnitKind::Night,
            BookingType::Guide => UnitKind::Day,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingType::Homestay => "homestay",
            BookingType::Guide => "guide",
        }
    }
}

impl fmt::Display for BookingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pricing granularity of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Night,
    Day,
}

/// Identifies one reservable resource: the catalog partition plus the id inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: BookingType,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(kind: BookingType, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.resource_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Edges of the lifecycle graph. Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Whether a booking in this state occupies its interval in the availability index.
    pub fn holds_interval(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn phone_chars(value: &str) -> Result<(), ValidationError> {
    let digits = value.chars().filter(char::is_ascii_digit).count();
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    if !allowed || digits < 6 {
        return Err(ValidationError::new("phone"));
    }
    Ok(())
}

/// Contact details captured at booking time. A snapshot, not a link to the user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ContactInfo {
    #[validate(length(min = 1, max = 120), custom(function = "non_blank"))]
    pub name: String,
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 32), custom(function = "phone_chars"))]
    pub phone: String,
}

fn default_guests() -> u32 {
    1
}

/// Input of `create_booking`. `user_id` is the already-authenticated caller.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub booking_type: BookingType,
    #[validate(length(min = 1, max = 64), custom(function = "non_blank"))]
    pub resource_id: String,
    #[validate(length(min = 1, max = 64), custom(function = "non_blank"))]
    pub user_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_guests")]
    #[validate(range(min = 1))]
    pub guests: u32,
    #[validate(nested)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub special_requests: Option<String>,
}

impl NewBooking {
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(self.booking_type, self.resource_id.clone())
    }
}

/// A reservation record. Only the lifecycle manager constructs or mutates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub booking_type: BookingType,
    pub resource_id: String,
    pub user_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub guests: u32,
    pub total_price: Amount,
    pub status: BookingStatus,
    pub contact_info: ContactInfo,
    pub special_requests: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start_date, self.end_date)
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(self.booking_type, self.resource_id.clone())
    }

    /// Confirmed stays whose end date has arrived are complete.
    pub fn is_elapsed(&self, today: NaiveDate) -> bool {
        self.status == BookingStatus::Confirmed && self.end_date <= today
    }
}

/// An occupied range on one resource, owned by a live booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub booking_id: BookingId,
    pub span: Span,
}

/// Occupied intervals of one resource, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct ResourceSchedule {
    pub intervals: Vec<Interval>,
}

impl ResourceSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, booking_id: BookingId) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.booking_id == booking_id)?;
        Some(self.intervals.remove(pos))
    }

    /// Drop intervals that ended on or before `today`. Returns how many went.
    pub fn prune_ended(&mut self, today: NaiveDate) -> usize {
        let before = self.intervals.len();
        self.intervals.retain(|i| i.span.end > today);
        before - self.intervals.len()
    }

    /// Intervals overlapping the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }
}

/// Caller role as resolved by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Host,
    Guide,
    Admin,
}

/// The identity acting on a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub role: Role,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn customer(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Customer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFilter {
    pub user_id: Option<String>,
    pub resource_id: Option<String>,
    pub booking_type: Option<BookingType>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == b.user_id)
            && self.resource_id.as_ref().is_none_or(|r| *r == b.resource_id)
            && self.booking_type.is_none_or(|t| t == b.booking_type)
            && self.status.is_none_or(|s| s == b.status)
    }

    pub fn with_status(&self, status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_results: usize,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    StatusChanged {
        id: BookingId,
        status: BookingStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn iv(start: NaiveDate, end: NaiveDate) -> Interval {
        Interval {
            booking_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    fn contact() -> ContactInfo {
        ContactInfo {
            name: "Asha Munda".into(),
            email: "asha@example.com".into(),
            phone: "+91 98765 43210".into(),
        }
    }

    fn new_booking() -> NewBooking {
        NewBooking {
            booking_type: BookingType::Homestay,
            resource_id: "hs-1".into(),
            user_id: "user-1".into(),
            start_date: d(2025, 6, 1),
            end_date: d(2025, 6, 4),
            guests: 2,
            contact_info: contact(),
            special_requests: None,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(d(2025, 6, 1), d(2025, 6, 5));
        assert_eq!(s.days(), 4);
        assert_eq!(s.to_string(), "[2025-06-01, 2025-06-05)");
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(d(2025, 6, 1), d(2025, 6, 5));
        let b = Span::new(d(2025, 6, 4), d(2025, 6, 6));
        let c = Span::new(d(2025, 6, 5), d(2025, 6, 8));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // checkout day == next check-in
    }

    #[test]
    fn status_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Confirmed.can_transition_to(Pending));
        for terminal in [Cancelled, Completed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Confirmed, Cancelled, Completed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn schedule_keeps_start_order() {
        let mut rs = ResourceSchedule::new();
        rs.insert_interval(iv(d(2025, 6, 10), d(2025, 6, 12)));
        rs.insert_interval(iv(d(2025, 6, 1), d(2025, 6, 3)));
        rs.insert_interval(iv(d(2025, 6, 5), d(2025, 6, 8)));
        let starts: Vec<_> = rs.intervals.iter().map(|i| i.span.start).collect();
        assert_eq!(starts, vec![d(2025, 6, 1), d(2025, 6, 5), d(2025, 6, 10)]);
    }

    #[test]
    fn schedule_remove() {
        let mut rs = ResourceSchedule::new();
        let first = iv(d(2025, 6, 1), d(2025, 6, 2));
        let id = first.booking_id;
        rs.insert_interval(first);
        rs.insert_interval(iv(d(2025, 6, 3), d(2025, 6, 4)));
        assert_eq!(rs.remove_interval(id).map(|i| i.booking_id), Some(id));
        assert!(rs.remove_interval(id).is_none());
        assert_eq!(rs.intervals.len(), 1);
    }

    #[test]
    fn prune_drops_only_finished_intervals() {
        let mut rs = ResourceSchedule::new();
        rs.insert_interval(iv(d(2025, 5, 1), d(2025, 5, 3)));
        rs.insert_interval(iv(d(2025, 5, 30), d(2025, 6, 1)));
        rs.insert_interval(iv(d(2025, 5, 31), d(2025, 6, 2)));
        rs.insert_interval(iv(d(2025, 6, 3), d(2025, 6, 7)));

        assert_eq!(rs.prune_ended(d(2025, 6, 1)), 2);
        let starts: Vec<_> = rs.intervals.iter().map(|i| i.span.start).collect();
        assert_eq!(starts, vec![d(2025, 5, 31), d(2025, 6, 3)]);
        assert_eq!(rs.prune_ended(d(2025, 6, 1)), 0);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = ResourceSchedule::new();
        rs.insert_interval(iv(d(2025, 5, 1), d(2025, 5, 3)));
        rs.insert_interval(iv(d(2025, 6, 3), d(2025, 6, 7)));
        rs.insert_interval(iv(d(2025, 7, 1), d(2025, 7, 2)));

        let query = Span::new(d(2025, 6, 5), d(2025, 6, 20));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span.start, d(2025, 6, 3));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = ResourceSchedule::new();
        rs.insert_interval(iv(d(2025, 6, 1), d(2025, 6, 5)));
        let query = Span::new(d(2025, 6, 5), d(2025, 6, 8));
        assert_eq!(rs.overlapping(&query).count(), 0);
    }

    #[test]
    fn new_booking_validates() {
        assert!(new_booking().validate().is_ok());

        let mut bad = new_booking();
        bad.guests = 0;
        bad.contact_info.email = "not-an-email".into();
        let errs = bad.validate().unwrap_err();
        let fields: Vec<String> = errs.errors().keys().map(|k| k.to_string()).collect();
        assert!(fields.contains(&"guests".to_string()));
        assert!(fields.contains(&"contact_info".to_string()));
    }

    #[test]
    fn blank_name_and_phone_rejected() {
        let mut bad = new_booking();
        bad.contact_info.name = "   ".into();
        bad.contact_info.phone = "call me".into();
        assert!(bad.contact_info.validate().is_err());

        let mut empty_resource = new_booking();
        empty_resource.resource_id = String::new();
        assert!(empty_resource.validate().is_err());
    }

    #[test]
    fn new_booking_json_defaults() {
        let json = r#"{
            "bookingType": "guide",
            "resourceId": "g-7",
            "userId": "u-1",
            "startDate": "2025-06-01",
            "endDate": "2025-06-03",
            "contactInfo": {"name": "Ravi", "email": "ravi@example.com", "phone": "9876543210"}
        }"#;
        let input: NewBooking = serde_json::from_str(json).unwrap();
        assert_eq!(input.booking_type, BookingType::Guide);
        assert_eq!(input.guests, 1);
        assert!(input.special_requests.is_none());
        assert_eq!(input.resource_key().to_string(), "guide/g-7");
    }

    #[test]
    fn booking_serializes_camel_case() {
        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            booking_type: BookingType::Homestay,
            resource_id: "hs-1".into(),
            user_id: "u-1".into(),
            start_date: d(2025, 6, 1),
            end_date: d(2025, 6, 4),
            guests: 2,
            total_price: 4500,
            status: BookingStatus::Pending,
            contact_info: contact(),
            special_requests: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&booking).unwrap();
        assert_eq!(value["bookingType"], "homestay");
        assert_eq!(value["totalPrice"], 4500);
        assert_eq!(value["status"], "pending");
        assert_eq!(value["startDate"], "2025-06-01");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::StatusChanged {
            id: Ulid::new(),
            status: BookingStatus::Cancelled,
            reason: Some("plans changed".into()),
            at: Utc::now(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn filter_matches() {
        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            booking_type: BookingType::Guide,
            resource_id: "g-1".into(),
            user_id: "u-1".into(),
            start_date: d(2025, 6, 1),
            end_date: d(2025, 6, 3),
            guests: 1,
            total_price: 4000,
            status: BookingStatus::Confirmed,
            contact_info: contact(),
            special_requests: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        assert!(BookingFilter::default().matches(&booking));
        let by_user = BookingFilter {
            user_id: Some("u-1".into()),
            ..Default::default()
        };
        assert!(by_user.matches(&booking));
        assert!(!by_user.with_status(BookingStatus::Cancelled).matches(&booking));
        let by_type = BookingFilter {
            booking_type: Some(BookingType::Homestay),
            ..Default::default()
        };
        assert!(!by_type.matches(&booking));
    }
}
