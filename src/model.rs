use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RoomId = i64;
pub type ReservationId = i64;
pub type RestrictionId = i64;
pub type UserId = i64;

/// Wire and storage format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Half-open night range `[start, end)`: `end` is the checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    /// Returns `None` unless `start < end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// A single night starting at `date`.
    pub fn night(date: NaiveDate) -> Option<Self> {
        Self::new(date, date.checked_add_days(Days::new(1))?)
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Each occupied night, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d < self.end)
    }
}

/// Why a room is unavailable for a stay. The discriminants match the
/// `restrictions` seed rows of the schema this store replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    Reservation = 1,
    OwnerBlock = 2,
}

impl RestrictionKind {
    pub fn name(self) -> &'static str {
        match self {
            RestrictionKind::Reservation => "Reservation",
            RestrictionKind::OwnerBlock => "Owner Block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// A reservation as persisted. The room name is joined in at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub guest: Guest,
    pub stay: Stay,
    pub room_id: RoomId,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub stay: Stay,
    pub kind: RestrictionKind,
    pub reservation_id: Option<ReservationId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub access_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-room state: the room row plus every restriction on it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `stay.start`.
    pub restrictions: Vec<Restriction>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
        }
    }

    pub fn insert_restriction(&mut self, restriction: Restriction) {
        let pos = self
            .restrictions
            .partition_point(|r| r.stay.start <= restriction.stay.start);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<Restriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    pub fn remove_for_reservation(&mut self, reservation_id: ReservationId) -> Vec<Restriction> {
        let (gone, kept) = std::mem::take(&mut self.restrictions)
            .into_iter()
            .partition(|r| r.reservation_id == Some(reservation_id));
        self.restrictions = kept;
        gone
    }

    /// Restrictions whose stay overlaps `query`. Everything from the first
    /// restriction starting at or after `query.end` onward is skipped.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Restriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.stay.start < query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.stay.end > query.start)
    }
}

/// WAL record. Each variant is a complete row-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    UserCreated {
        user: UserRecord,
    },
    UserUpdated {
        id: UserId,
        first_name: String,
        last_name: String,
        email: String,
        access_level: i32,
        at: DateTime<Utc>,
    },
    /// A reservation and the restriction that claims its nights.
    ReservationInserted {
        record: ReservationRecord,
        restriction_id: RestrictionId,
    },
    ReservationUpdated {
        id: ReservationId,
        guest: Guest,
        at: DateTime<Utc>,
    },
    ReservationProcessed {
        id: ReservationId,
        processed: bool,
        at: DateTime<Utc>,
    },
    ReservationDeleted {
        id: ReservationId,
        room_id: RoomId,
    },
    RestrictionAdded {
        restriction: Restriction,
    },
    RestrictionRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
    /// Written at the head of a compacted log so ids are never reused.
    SequencesAdvanced {
        next_room: RoomId,
        next_reservation: ReservationId,
        next_restriction: RestrictionId,
        next_user: UserId,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub room_id: RoomId,
    pub room_name: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn from_record(record: &ReservationRecord, room_name: String) -> Self {
        Self {
            id: record.id,
            first_name: record.guest.first_name.clone(),
            last_name: record.guest.last_name.clone(),
            email: record.guest.email.clone(),
            phone: record.guest.phone.clone(),
            start_date: record.stay.start,
            end_date: record.stay.end,
            room_id: record.room_id,
            room_name,
            processed: record.processed,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub access_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&UserRecord> for User {
    fn from(u: &UserRecord) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            email: u.email.clone(),
            access_level: u.access_level,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// The reservation a guest is building across requests; lives in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub id: Option<ReservationId>,
    pub room_id: Option<RoomId>,
    pub room_name: String,
    pub stay: Stay,
    pub guest: Guest,
}

impl ReservationDraft {
    pub fn new(stay: Stay) -> Self {
        Self {
            id: None,
            room_id: None,
            room_name: String::new(),
            stay,
            guest: Guest::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn stay(a: &str, b: &str) -> Stay {
        Stay::new(d(a), d(b)).unwrap()
    }

    fn restriction(id: RestrictionId, a: &str, b: &str) -> Restriction {
        Restriction {
            id,
            room_id: 1,
            stay: stay(a, b),
            kind: RestrictionKind::OwnerBlock,
            reservation_id: None,
            created_at: Utc::now(),
        }
    }

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: 1,
            name: "General's Quarters".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn stay_requires_start_before_end() {
        assert!(Stay::new(d("2050-01-02"), d("2050-01-01")).is_none());
        assert!(Stay::new(d("2050-01-01"), d("2050-01-01")).is_none());
        assert_eq!(stay("2050-01-01", "2050-01-04").nights(), 3);
    }

    #[test]
    fn stay_overlap_is_half_open() {
        let a = stay("2050-01-01", "2050-01-05");
        let b = stay("2050-01-04", "2050-01-08");
        let c = stay("2050-01-05", "2050-01-07");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // checkout day is free
    }

    #[test]
    fn stay_days_excludes_checkout() {
        let days: Vec<_> = stay("2050-02-27", "2050-03-02").days().collect();
        assert_eq!(days, vec![d("2050-02-27"), d("2050-02-28"), d("2050-03-01")]);
    }

    #[test]
    fn night_spans_one_day() {
        let n = Stay::night(d("2050-12-31")).unwrap();
        assert_eq!(n.end, d("2051-01-01"));
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("invalid").is_none());
        assert!(parse_date("2050-13-01").is_none());
        assert_eq!(format_date(d(" 2050-01-09 ")), "2050-01-09");
    }

    #[test]
    fn restrictions_stay_sorted() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2050-03-01", "2050-03-02"));
        rs.insert_restriction(restriction(2, "2050-01-01", "2050-01-02"));
        rs.insert_restriction(restriction(3, "2050-02-01", "2050-02-02"));
        let ids: Vec<_> = rs.restrictions.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn overlapping_skips_before_and_after() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2050-01-01", "2050-01-03"));
        rs.insert_restriction(restriction(2, "2050-01-10", "2050-01-12"));
        rs.insert_restriction(restriction(3, "2050-01-20", "2050-01-21"));

        let hits: Vec<_> = rs
            .overlapping(&stay("2050-01-03", "2050-01-11"))
            .map(|r| r.id)
            .collect();
        assert_eq!(hits, vec![2]);
    }

    #[test]
    fn overlapping_long_restriction_spanning_query() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2050-01-01", "2050-12-31"));
        assert_eq!(rs.overlapping(&stay("2050-06-01", "2050-06-02")).count(), 1);
    }

    #[test]
    fn remove_for_reservation_keeps_blocks() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(1, "2050-01-01", "2050-01-02"));
        let mut owned = restriction(2, "2050-01-05", "2050-01-07");
        owned.kind = RestrictionKind::Reservation;
        owned.reservation_id = Some(9);
        rs.insert_restriction(owned);

        let gone = rs.remove_for_reservation(9);
        assert_eq!(gone.len(), 1);
        assert_eq!(rs.restrictions.len(), 1);
        assert_eq!(rs.restrictions[0].id, 1);
        assert!(rs.remove_restriction(42).is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RestrictionAdded {
            restriction: restriction(7, "2050-01-01", "2050-01-02"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
