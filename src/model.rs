use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type inside the engine.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// A booking as held inside its room's state. Cancelled bookings stay in the
/// list with a flipped status — they are never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub title: String,
    pub organizer_email: String,
    pub span: Span,
    pub status: BookingStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    /// Seats, not concurrency — a room hosts one meeting at a time.
    pub capacity: u32,
    pub floor: i32,
    pub amenities: Vec<String>,
    /// All bookings for this room, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, capacity: u32, floor: i32, amenities: Vec<String>) -> Self {
        Self {
            id,
            name,
            capacity,
            floor,
            amenities,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn find_booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    /// Flip a booking to cancelled. No-op if absent or already cancelled.
    pub fn cancel_booking(&mut self, id: Ulid) {
        if let Some(b) = self.bookings.iter_mut().find(|b| b.id == id) {
            b.status = BookingStatus::Cancelled;
        }
    }

    /// Bookings whose span overlaps the query window, any status.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// First confirmed booking overlapping `span`, if any. Cancelled bookings
    /// never conflict.
    pub fn first_conflict(&self, span: &Span) -> Option<Ulid> {
        self.overlapping(span)
            .find(|b| b.status == BookingStatus::Confirmed)
            .map(|b| b.id)
    }
}

/// Scope of an idempotency record: the same key from different organizers is
/// a different record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdemKey {
    pub key: String,
    pub organizer_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdemState {
    /// A creation attempt holds the claim. `claimed_at` feeds the reaper.
    InProgress { claimed_at: Ms },
    /// The attempt committed; replays return this booking.
    Done { booking_id: Ulid },
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        floor: i32,
        amenities: Vec<String>,
    },
    BookingCreated {
        id: Ulid,
        room_id: Ulid,
        title: String,
        organizer_email: String,
        span: Span,
        created_at: Ms,
        /// Present when the creation went through the idempotent path; replay
        /// rebuilds the `done` ledger record from it.
        idempotency_key: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub floor: i32,
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub title: String,
    pub organizer_email: String,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl BookingInfo {
    pub fn from_booking(b: &Booking, room_id: Ulid) -> Self {
        Self {
            id: b.id,
            room_id,
            title: b.title.clone(),
            organizer_email: b.organizer_email.clone(),
            start: b.span.start,
            end: b.span.end,
            status: b.status,
            created_at: b.created_at,
        }
    }
}

/// Result of an admission: the booking plus whether this call actually
/// created it or replayed a prior idempotent creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub booking: BookingInfo,
    pub replayed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub room_id: Option<Ulid>,
    /// Matches bookings with `end >= from`.
    pub from: Option<Ms>,
    /// Matches bookings with `start <= to`.
    pub to: Option<Ms>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPage {
    pub items: Vec<BookingInfo>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationRow {
    pub room_id: Ulid,
    pub room_name: String,
    /// Booked business time in hours, rounded to 2 decimal places.
    pub total_booking_hours: f64,
    /// Fraction of available business time, rounded to 4 decimal places.
    pub utilization_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            title: "standup".into(),
            organizer_email: "a@example.com".into(),
            span: Span::new(start, end),
            status: BookingStatus::Confirmed,
            created_at: 0,
        }
    }

    fn room(bookings: Vec<Booking>) -> RoomState {
        let mut rs = RoomState::new(Ulid::new(), "Aurora".into(), 4, 0, vec![]);
        for b in bookings {
            rs.insert_booking(b);
        }
        rs
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
    }

    #[test]
    fn span_overlap_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn bookings_kept_sorted() {
        let rs = room(vec![
            booking(300, 400),
            booking(100, 200),
            booking(200, 300),
        ]);
        assert_eq!(rs.bookings[0].span.start, 100);
        assert_eq!(rs.bookings[1].span.start, 200);
        assert_eq!(rs.bookings[2].span.start, 300);
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let rs = room(vec![
            booking(100, 200),
            booking(450, 600),
            booking(1000, 1100),
        ]);
        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let rs = room(vec![booking(100, 200)]);
        let hits: Vec<_> = rs.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn cancelled_booking_stays_but_never_conflicts() {
        let b = booking(100, 200);
        let id = b.id;
        let mut rs = room(vec![b]);
        assert_eq!(rs.first_conflict(&Span::new(150, 250)), Some(id));

        rs.cancel_booking(id);
        assert_eq!(rs.bookings.len(), 1);
        assert_eq!(rs.bookings[0].status, BookingStatus::Cancelled);
        assert_eq!(rs.first_conflict(&Span::new(150, 250)), None);
    }

    #[test]
    fn first_conflict_single_ms_overlap() {
        let rs = room(vec![booking(100, 201)]);
        assert!(rs.first_conflict(&Span::new(200, 300)).is_some());
    }

    #[test]
    fn cancel_unknown_booking_is_noop() {
        let mut rs = room(vec![booking(100, 200)]);
        rs.cancel_booking(Ulid::new());
        assert_eq!(rs.bookings[0].status, BookingStatus::Confirmed);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            room_id: Ulid::new(),
            title: "retro".into(),
            organizer_email: "b@example.com".into(),
            span: Span::new(1000, 2000),
            created_at: 500,
            idempotency_key: Some("retry-1".into()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
