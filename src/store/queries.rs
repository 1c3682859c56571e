use std::collections::HashMap;

use chrono::NaiveDate;

use crate::auth::verify_password;
use crate::model::*;

use super::conflict::validate_window;
use super::{Store, StoreError};

impl Store {
    /// All rooms, ordered by name.
    pub async fn all_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for rs in self.room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    pub async fn room_by_id(&self, id: RoomId) -> Result<Room, StoreError> {
        let rs = self.get_room(&id).ok_or(StoreError::room(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// True when no restriction on the room overlaps `[start, end)`.
    pub async fn search_availability_by_dates_by_room_id(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        room_id: RoomId,
    ) -> Result<bool, StoreError> {
        let stay = Stay::new(start, end).ok_or(StoreError::InvalidStay)?;
        validate_window(start, end)?;
        let rs = self.get_room(&room_id).ok_or(StoreError::room(room_id))?;
        let guard = rs.read().await;
        Ok(guard.overlapping(&stay).next().is_none())
    }

    /// Rooms with no restriction overlapping `[start, end)`, ordered by id.
    pub async fn search_availability_for_all_rooms(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Room>, StoreError> {
        let stay = Stay::new(start, end).ok_or(StoreError::InvalidStay)?;
        validate_window(start, end)?;
        let mut free = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if guard.overlapping(&stay).next().is_none() {
                free.push(guard.room.clone());
            }
        }
        free.sort_by_key(|r| r.id);
        Ok(free)
    }

    pub async fn all_reservations(&self) -> Vec<Reservation> {
        self.collect_reservations(|_| true).await
    }

    /// Reservations the owner has not yet marked as processed.
    pub async fn all_new_reservations(&self) -> Vec<Reservation> {
        self.collect_reservations(|r| !r.processed).await
    }

    pub async fn reservation_by_id(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        let record = self
            .reservations
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::reservation(id))?;
        let room_name = self.room_name(record.room_id).await;
        Ok(Reservation::from_record(&record, room_name))
    }

    /// Restrictions on a room touching the inclusive range `[start, end]`:
    /// `start < r.end AND end >= r.start`.
    pub async fn restrictions_for_room_by_date(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Restriction>, StoreError> {
        validate_window(start, end)?;
        let rs = self.get_room(&room_id).ok_or(StoreError::room(room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .restrictions
            .iter()
            .take_while(|r| r.stay.start <= end)
            .filter(|r| start < r.stay.end)
            .cloned()
            .collect())
    }

    pub fn user_by_id(&self, id: UserId) -> Result<User, StoreError> {
        self.users
            .get(&id)
            .map(|u| User::from(u.value()))
            .ok_or(StoreError::user(id))
    }

    /// Check an e-mail/password pair. Returns the user id and stored hash.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(UserId, String), StoreError> {
        let user_id = self
            .user_by_email
            .get(&email.trim().to_lowercase())
            .map(|e| *e.value())
            .ok_or(StoreError::InvalidCredentials)?;
        let hash = self
            .users
            .get(&user_id)
            .map(|u| u.password_hash.clone())
            .ok_or(StoreError::InvalidCredentials)?;

        // bcrypt is deliberately slow; keep it off the async workers.
        let password = password.to_string();
        let candidate = hash.clone();
        let matched = tokio::task::spawn_blocking(move || verify_password(&password, &candidate))
            .await
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?;

        if matched {
            Ok((user_id, hash))
        } else {
            Err(StoreError::InvalidCredentials)
        }
    }

    pub(super) fn room_states(&self) -> Vec<super::SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    async fn room_name(&self, room_id: RoomId) -> String {
        match self.get_room(&room_id) {
            Some(rs) => rs.read().await.room.name.clone(),
            None => String::new(),
        }
    }

    /// Matching reservations joined with their room names, ordered by start date.
    async fn collect_reservations(
        &self,
        keep: impl Fn(&ReservationRecord) -> bool,
    ) -> Vec<Reservation> {
        let names: HashMap<RoomId, String> = self
            .all_rooms()
            .await
            .into_iter()
            .map(|r| (r.id, r.name))
            .collect();

        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| {
                let record = e.value();
                let name = names.get(&record.room_id).cloned().unwrap_or_default();
                Reservation::from_record(record, name)
            })
            .collect();
        out.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        out
    }
}
