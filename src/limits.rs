/// Longest stay a single reservation may cover.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest window the calendar or availability search may scan.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Max length, in characters, for guest and user text fields (names, e-mail, phone).
pub const MAX_FIELD_LEN: usize = 255;

pub const MAX_ROOM_NAME_LEN: usize = 128;

pub const MAX_ROOMS: usize = 1_000;

pub const MAX_RESERVATIONS: usize = 1_000_000;

/// Restrictions (reservations + blocks) on one room.
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;

/// Buffered request body for the CSRF check.
pub const MAX_FORM_BODY_BYTES: usize = 1024 * 1024;

/// Queued outgoing mail before senders wait.
pub const MAIL_QUEUE_CAPACITY: usize = 256;

/// Largest WAL record payload. A length prefix above this is a torn tail.
pub const MAX_WAL_RECORD_BYTES: usize = 1024 * 1024;
