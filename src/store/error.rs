use crate::model::RestrictionId;

#[derive(Debug)]
pub enum StoreError {
    NotFound { entity: &'static str, id: i64 },
    /// The stay overlaps an existing restriction on the room.
    Conflict(RestrictionId),
    InvalidStay,
    /// A restriction whose kind and reservation link do not fit together.
    InvalidRestriction(&'static str),
    DuplicateEmail(String),
    InvalidCredentials,
    LimitExceeded(&'static str),
    PasswordHash(String),
    WalError(String),
}

impl StoreError {
    pub fn room(id: i64) -> Self {
        StoreError::NotFound { entity: "room", id }
    }

    pub fn reservation(id: i64) -> Self {
        StoreError::NotFound { entity: "reservation", id }
    }

    pub fn restriction(id: i64) -> Self {
        StoreError::NotFound { entity: "restriction", id }
    }

    pub fn user(id: i64) -> Self {
        StoreError::NotFound { entity: "user", id }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            StoreError::Conflict(id) => write!(f, "dates overlap restriction {id}"),
            StoreError::InvalidStay => write!(f, "end date must be after start date"),
            StoreError::InvalidRestriction(msg) => write!(f, "invalid restriction: {msg}"),
            StoreError::DuplicateEmail(email) => write!(f, "email already registered: {email}"),
            StoreError::InvalidCredentials => write!(f, "invalid login credentials"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::PasswordHash(e) => write!(f, "password hashing failed: {e}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
