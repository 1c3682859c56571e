use tracing::warn;

use crate::store::StoreError;

/// Access level granted to the seeded owner account.
pub const ADMIN_ACCESS_LEVEL: i32 = 3;

pub fn hash_password(password: &str, cost: u32) -> Result<String, StoreError> {
    bcrypt::hash(password, cost).map_err(|e| StoreError::PasswordHash(e.to_string()))
}

/// Mismatches and malformed hashes both count as a failed check.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(matched) => matched,
        Err(e) => {
            warn!("password hash check failed: {e}");
            false
        }
    }
}
