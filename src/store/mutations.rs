use std::sync::atomic::Ordering;

use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::auth::hash_password;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, validate_guest, validate_stay};
use super::{Sequences, Store, StoreError};

/// Rooms a fresh store starts with.
pub const DEFAULT_ROOMS: [&str; 2] = ["General's Quarters", "Colonel's Suite"];

impl Store {
    pub async fn create_room(&self, name: &str) -> Result<RoomId, StoreError> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN {
            return Err(StoreError::LimitExceeded("room name length"));
        }
        let _barrier = self.barrier.read().await;
        let slot = self
            .room_slots
            .claim(MAX_ROOMS)
            .ok_or(StoreError::LimitExceeded("too many rooms"))?;

        let now = Utc::now();
        let room = Room {
            id: Sequences::next(&self.seq.room),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let id = room.id;
        self.persist_and_apply(None, &Event::RoomCreated { room })
            .await?;
        slot.keep();
        Ok(id)
    }

    /// Create the default rooms on an empty store. Returns how many were created.
    pub async fn seed_defaults(&self) -> Result<usize, StoreError> {
        if !self.rooms.is_empty() {
            return Ok(0);
        }
        for name in DEFAULT_ROOMS {
            self.create_room(name).await?;
        }
        info!("seeded {} rooms", DEFAULT_ROOMS.len());
        Ok(DEFAULT_ROOMS.len())
    }

    pub async fn create_user(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
        access_level: i32,
        bcrypt_cost: u32,
    ) -> Result<UserId, StoreError> {
        let email = email.trim().to_string();
        if [first_name, last_name, email.as_str()]
            .iter()
            .any(|f| f.len() > MAX_FIELD_LEN)
        {
            return Err(StoreError::LimitExceeded("field too long"));
        }
        if self.user_by_email.contains_key(&email.to_lowercase()) {
            return Err(StoreError::DuplicateEmail(email));
        }

        let password = password.to_string();
        let password_hash =
            tokio::task::spawn_blocking(move || hash_password(&password, bcrypt_cost))
                .await
                .map_err(|e| StoreError::PasswordHash(e.to_string()))??;

        let _barrier = self.barrier.read().await;
        // Re-check under the barrier; hashing above can take a while.
        if self.user_by_email.contains_key(&email.to_lowercase()) {
            return Err(StoreError::DuplicateEmail(email));
        }
        let now = Utc::now();
        let user = UserRecord {
            id: Sequences::next(&self.seq.user),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email,
            password_hash,
            access_level,
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        self.persist_and_apply(None, &Event::UserCreated { user })
            .await?;
        Ok(id)
    }

    /// Update a user's profile fields. The password is not touched.
    pub async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        if [&user.first_name, &user.last_name, &user.email]
            .iter()
            .any(|f| f.len() > MAX_FIELD_LEN)
        {
            return Err(StoreError::LimitExceeded("field too long"));
        }
        let _barrier = self.barrier.read().await;
        if !self.users.contains_key(&user.id) {
            return Err(StoreError::user(user.id));
        }
        if let Some(owner) = self.user_by_email.get(&user.email.to_lowercase())
            && *owner.value() != user.id
        {
            return Err(StoreError::DuplicateEmail(user.email.clone()));
        }

        let event = Event::UserUpdated {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            access_level: user.access_level,
            at: Utc::now(),
        };
        self.persist_and_apply(None, &event).await
    }

    /// Record a reservation and claim its nights on the room in one write.
    /// Fails with `Conflict` if any restriction already covers one of them.
    pub async fn insert_reservation(
        &self,
        room_id: RoomId,
        guest: Guest,
        stay: Stay,
    ) -> Result<ReservationId, StoreError> {
        validate_stay(&stay)?;
        validate_guest(&guest)?;
        let _barrier = self.barrier.read().await;
        let rs = self.get_room(&room_id).ok_or(StoreError::room(room_id))?;
        let mut guard = rs.write().await;
        let slot = self
            .reservation_slots
            .claim(MAX_RESERVATIONS)
            .ok_or(StoreError::LimitExceeded("too many reservations"))?;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }
        check_no_overlap(&guard, &stay)?;

        let now = Utc::now();
        let record = ReservationRecord {
            id: Sequences::next(&self.seq.reservation),
            guest,
            stay,
            room_id,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        let id = record.id;
        let event = Event::ReservationInserted {
            record,
            restriction_id: Sequences::next(&self.seq.restriction),
        };
        self.persist_and_apply(Some(&mut guard), &event).await?;
        slot.keep();
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(id)
    }

    /// Add a restriction to a room. Owner blocks may sit on top of other
    /// restrictions. A reservation restriction must point at a reservation in
    /// the same room that does not own one yet, and must not overlap anything.
    /// `insert_reservation` creates that owned restriction itself, so a second
    /// one is refused with `Conflict`.
    pub async fn insert_room_restriction(
        &self,
        room_id: RoomId,
        stay: Stay,
        kind: RestrictionKind,
        reservation_id: Option<ReservationId>,
    ) -> Result<RestrictionId, StoreError> {
        validate_stay(&stay)?;
        let _barrier = self.barrier.read().await;
        let rs = self.get_room(&room_id).ok_or(StoreError::room(room_id))?;
        let mut guard = rs.write().await;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }
        if let Some(res_id) = reservation_id {
            let same_room = self
                .reservations
                .get(&res_id)
                .is_some_and(|r| r.room_id == room_id);
            if !same_room {
                return Err(StoreError::reservation(res_id));
            }
        }
        if kind == RestrictionKind::Reservation {
            if reservation_id.is_none() {
                return Err(StoreError::InvalidRestriction(
                    "reservation restriction without a reservation",
                ));
            }
            let owned = guard.restrictions.iter().find(|r| {
                r.kind == RestrictionKind::Reservation && r.reservation_id == reservation_id
            });
            if let Some(owned) = owned {
                return Err(StoreError::Conflict(owned.id));
            }
            check_no_overlap(&guard, &stay)?;
        }

        let restriction = Restriction {
            id: Sequences::next(&self.seq.restriction),
            room_id,
            stay,
            kind,
            reservation_id,
            created_at: Utc::now(),
        };
        let id = restriction.id;
        self.persist_and_apply(Some(&mut guard), &Event::RestrictionAdded { restriction })
            .await?;
        Ok(id)
    }

    pub async fn update_reservation(
        &self,
        id: ReservationId,
        guest: Guest,
    ) -> Result<(), StoreError> {
        validate_guest(&guest)?;
        let _barrier = self.barrier.read().await;
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::reservation(id));
        }
        let event = Event::ReservationUpdated {
            id,
            guest,
            at: Utc::now(),
        };
        self.persist_and_apply(None, &event).await
    }

    pub async fn update_processed_for_reservation(
        &self,
        id: ReservationId,
        processed: bool,
    ) -> Result<(), StoreError> {
        let _barrier = self.barrier.read().await;
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::reservation(id));
        }
        let event = Event::ReservationProcessed {
            id,
            processed,
            at: Utc::now(),
        };
        self.persist_and_apply(None, &event).await
    }

    /// Remove a reservation together with the restriction it owns.
    pub async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        let _barrier = self.barrier.read().await;
        let room_id = self
            .reservations
            .get(&id)
            .map(|r| r.room_id)
            .ok_or(StoreError::reservation(id))?;
        let rs = self.get_room(&room_id).ok_or(StoreError::room(room_id))?;
        let mut guard = rs.write().await;
        // A concurrent delete may have won the room lock first.
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::reservation(id));
        }
        self.persist_and_apply(Some(&mut guard), &Event::ReservationDeleted { id, room_id })
            .await?;
        self.reservation_slots.release();
        Ok(())
    }

    /// Block the night starting at `date`. Blocking an already blocked night
    /// returns the existing block.
    pub async fn insert_block_for_room(
        &self,
        room_id: RoomId,
        date: NaiveDate,
    ) -> Result<RestrictionId, StoreError> {
        let stay = Stay::night(date).ok_or(StoreError::InvalidStay)?;
        let _barrier = self.barrier.read().await;
        let rs = self.get_room(&room_id).ok_or(StoreError::room(room_id))?;
        let mut guard = rs.write().await;
        if let Some(existing) = guard
            .overlapping(&stay)
            .find(|r| r.kind == RestrictionKind::OwnerBlock && r.stay == stay)
        {
            return Ok(existing.id);
        }
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many restrictions on room"));
        }

        let restriction = Restriction {
            id: Sequences::next(&self.seq.restriction),
            room_id,
            stay,
            kind: RestrictionKind::OwnerBlock,
            reservation_id: None,
            created_at: Utc::now(),
        };
        let id = restriction.id;
        self.persist_and_apply(Some(&mut guard), &Event::RestrictionAdded { restriction })
            .await?;
        metrics::counter!(crate::observability::BLOCKS_ADDED_TOTAL).increment(1);
        Ok(id)
    }

    /// Delete an owner block. Reservation restrictions are only removed
    /// through `delete_reservation`, so their ids report `NotFound` here.
    pub async fn delete_block_by_id(&self, id: RestrictionId) -> Result<(), StoreError> {
        let _barrier = self.barrier.read().await;
        let room_id = self
            .restriction_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::restriction(id))?;
        let rs = self.get_room(&room_id).ok_or(StoreError::room(room_id))?;
        let mut guard = rs.write().await;
        let is_block = guard
            .restrictions
            .iter()
            .any(|r| r.id == id && r.kind == RestrictionKind::OwnerBlock);
        if !is_block {
            return Err(StoreError::restriction(id));
        }
        self.persist_and_apply(Some(&mut guard), &Event::RestrictionRemoved { id, room_id })
            .await?;
        metrics::counter!(crate::observability::BLOCKS_REMOVED_TOTAL).increment(1);
        Ok(())
    }

    /// The shortest event list that rebuilds the current state.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = vec![Event::SequencesAdvanced {
            next_room: self.seq.room.load(Ordering::SeqCst),
            next_reservation: self.seq.reservation.load(Ordering::SeqCst),
            next_restriction: self.seq.restriction.load(Ordering::SeqCst),
            next_user: self.seq.user.load(Ordering::SeqCst),
        }];

        let mut users: Vec<UserRecord> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        events.extend(users.into_iter().map(|user| Event::UserCreated { user }));

        let mut room_states = Vec::with_capacity(self.rooms.len());
        for rs in self.room_states() {
            room_states.push(rs.read().await.clone());
        }
        room_states.sort_by_key(|rs| rs.room.id);

        for rs in &room_states {
            events.push(Event::RoomCreated {
                room: rs.room.clone(),
            });
        }
        // A reservation's own restriction carries the record.
        for rs in &room_states {
            for restriction in &rs.restrictions {
                let record = restriction
                    .reservation_id
                    .filter(|_| restriction.kind == RestrictionKind::Reservation)
                    .and_then(|id| self.reservations.get(&id).map(|r| r.value().clone()));
                match record {
                    Some(record) => events.push(Event::ReservationInserted {
                        record,
                        restriction_id: restriction.id,
                    }),
                    None => events.push(Event::RestrictionAdded {
                        restriction: restriction.clone(),
                    }),
                }
            }
        }
        events
    }

    /// Rewrite the WAL as a snapshot of the current state.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _exclusive = self.barrier.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();
        self.wal_rewrite(events).await?;
        Ok(count)
    }
}
