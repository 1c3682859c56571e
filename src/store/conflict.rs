use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::StoreError;

pub(crate) fn validate_stay(stay: &Stay) -> Result<(), StoreError> {
    if stay.start >= stay.end {
        return Err(StoreError::InvalidStay);
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(StoreError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Inclusive `[start, end]` scan window used by availability and calendar reads.
pub(crate) fn validate_window(start: NaiveDate, end: NaiveDate) -> Result<(), StoreError> {
    if end < start {
        return Err(StoreError::InvalidStay);
    }
    if (end - start).num_days() > MAX_QUERY_WINDOW_DAYS {
        return Err(StoreError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_guest(guest: &Guest) -> Result<(), StoreError> {
    let fields = [&guest.first_name, &guest.last_name, &guest.email, &guest.phone];
    if fields.iter().any(|f| f.chars().count() > MAX_FIELD_LEN) {
        return Err(StoreError::LimitExceeded("field too long"));
    }
    Ok(())
}

/// Any restriction on the room that shares a night with `stay` is a conflict.
pub(crate) fn check_no_overlap(rs: &RoomState, stay: &Stay) -> Result<(), StoreError> {
    match rs.overlapping(stay).next() {
        Some(existing) => Err(StoreError::Conflict(existing.id)),
        None => Ok(()),
    }
}
