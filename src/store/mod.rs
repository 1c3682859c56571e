mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::StoreError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Waits for one append, drains whatever else is already
/// queued, then commits the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            control => {
                handle_control(&mut wal, control);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes are not
    // attributed to the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Next-id counters. Each holds the id the next insert will get.
pub(super) struct Sequences {
    pub room: AtomicI64,
    pub reservation: AtomicI64,
    pub restriction: AtomicI64,
    pub user: AtomicI64,
}

impl Sequences {
    fn new() -> Self {
        Self {
            room: AtomicI64::new(1),
            reservation: AtomicI64::new(1),
            restriction: AtomicI64::new(1),
            user: AtomicI64::new(1),
        }
    }

    pub(super) fn next(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst)
    }

    fn observe(counter: &AtomicI64, used: i64) {
        counter.fetch_max(used + 1, Ordering::SeqCst);
    }

    fn advance_to(counter: &AtomicI64, next: i64) {
        counter.fetch_max(next, Ordering::SeqCst);
    }
}

/// Occupied plus claimed entries of a capped collection. An insert claims
/// its slot up front and keeps it once the event is applied; a dropped claim
/// gives the slot back.
#[derive(Default)]
pub(super) struct Slots(AtomicUsize);

impl Slots {
    pub(super) fn reset(&self, used: usize) {
        self.0.store(used, Ordering::SeqCst);
    }

    pub(super) fn claim(&self, max: usize) -> Option<SlotClaim<'_>> {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < max).then_some(used + 1)
            })
            .ok()?;
        Some(SlotClaim {
            slots: &self.0,
            kept: false,
        })
    }

    /// Free the slot of an entry that was removed.
    pub(super) fn release(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    pub(super) fn used(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub(super) struct SlotClaim<'a> {
    slots: &'a AtomicUsize,
    kept: bool,
}

impl SlotClaim<'_> {
    pub(super) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.slots.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// The bookings database: rooms, restrictions, reservations, users.
///
/// Every mutation is appended to the WAL before it is applied in memory, so
/// replaying the log on startup rebuilds the same state.
pub struct Store {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) reservations: DashMap<ReservationId, ReservationRecord>,
    pub(super) users: DashMap<UserId, UserRecord>,
    /// Lower-cased e-mail → user id.
    pub(super) user_by_email: DashMap<String, UserId>,
    /// Restriction id → owning room.
    pub(super) restriction_to_room: DashMap<RestrictionId, RoomId>,
    pub(super) seq: Sequences,
    /// Mutations hold it shared; compaction holds it exclusively so no write
    /// lands between the snapshot and the file swap.
    pub(super) barrier: RwLock<()>,
    pub(super) room_slots: Slots,
    pub(super) reservation_slots: Slots,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Restriction-level effects of an event on one room. The caller holds the
/// room's write lock.
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<RestrictionId, RoomId>) {
    match event {
        Event::ReservationInserted {
            record,
            restriction_id,
        } => {
            rs.insert_restriction(Restriction {
                id: *restriction_id,
                room_id: record.room_id,
                stay: record.stay,
                kind: RestrictionKind::Reservation,
                reservation_id: Some(record.id),
                created_at: record.created_at,
            });
            index.insert(*restriction_id, record.room_id);
        }
        Event::ReservationDeleted { id, .. } => {
            for gone in rs.remove_for_reservation(*id) {
                index.remove(&gone.id);
            }
        }
        Event::RestrictionAdded { restriction } => {
            rs.insert_restriction(restriction.clone());
            index.insert(restriction.id, restriction.room_id);
        }
        Event::RestrictionRemoved { id, .. } => {
            rs.remove_restriction(*id);
            index.remove(id);
        }
        _ => {}
    }
}

/// The room whose restriction list an event touches, if any.
fn event_room_id(event: &Event) -> Option<RoomId> {
    match event {
        Event::ReservationInserted { record, .. } => Some(record.room_id),
        Event::ReservationDeleted { room_id, .. } | Event::RestrictionRemoved { room_id, .. } => {
            Some(*room_id)
        }
        Event::RestrictionAdded { restriction } => Some(restriction.room_id),
        _ => None,
    }
}

impl Store {
    /// Replay the WAL at `wal_path` and start the background writer.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            users: DashMap::new(),
            user_by_email: DashMap::new(),
            restriction_to_room: DashMap::new(),
            seq: Sequences::new(),
            barrier: RwLock::new(()),
            room_slots: Slots::default(),
            reservation_slots: Slots::default(),
            wal_tx,
        };

        // Sole owner of every lock during replay, so try_write never waits.
        for event in &events {
            store.apply_rows(event);
            if let Some(room_id) = event_room_id(event)
                && let Some(rs) = store.get_room(&room_id)
                && let Ok(mut guard) = rs.try_write()
            {
                apply_to_room(&mut guard, event, &store.restriction_to_room);
            }
        }
        store.room_slots.reset(store.rooms.len());
        store.reservation_slots.reset(store.reservations.len());

        tracing::info!(
            events = events.len(),
            rooms = store.rooms.len(),
            reservations = store.reservations.len(),
            "store replayed"
        );
        Ok(store)
    }

    /// Row-level effects of an event (everything except room restriction lists).
    fn apply_rows(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => {
                Sequences::observe(&self.seq.room, room.id);
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::UserCreated { user } => {
                Sequences::observe(&self.seq.user, user.id);
                self.user_by_email
                    .insert(user.email.to_lowercase(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::UserUpdated {
                id,
                first_name,
                last_name,
                email,
                access_level,
                at,
            } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    if user.email.to_lowercase() != email.to_lowercase() {
                        self.user_by_email.remove(&user.email.to_lowercase());
                        self.user_by_email.insert(email.to_lowercase(), *id);
                    }
                    user.first_name = first_name.clone();
                    user.last_name = last_name.clone();
                    user.email = email.clone();
                    user.access_level = *access_level;
                    user.updated_at = *at;
                }
            }
            Event::ReservationInserted {
                record,
                restriction_id,
            } => {
                Sequences::observe(&self.seq.reservation, record.id);
                Sequences::observe(&self.seq.restriction, *restriction_id);
                self.reservations.insert(record.id, record.clone());
            }
            Event::ReservationUpdated { id, guest, at } => {
                if let Some(mut record) = self.reservations.get_mut(id) {
                    record.guest = guest.clone();
                    record.updated_at = *at;
                }
            }
            Event::ReservationProcessed { id, processed, at } => {
                if let Some(mut record) = self.reservations.get_mut(id) {
                    record.processed = *processed;
                    record.updated_at = *at;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                self.reservations.remove(id);
            }
            Event::RestrictionAdded { restriction } => {
                Sequences::observe(&self.seq.restriction, restriction.id);
            }
            Event::RestrictionRemoved { .. } => {}
            Event::SequencesAdvanced {
                next_room,
                next_reservation,
                next_restriction,
                next_user,
            } => {
                Sequences::advance_to(&self.seq.room, *next_room);
                Sequences::advance_to(&self.seq.reservation, *next_reservation);
                Sequences::advance_to(&self.seq.restriction, *next_restriction);
                Sequences::advance_to(&self.seq.user, *next_user);
            }
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub(super) async fn wal_rewrite(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Rewrite {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub(super) fn get_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// WAL-append, then apply. `rs` is the write-locked room the event
    /// touches, if it touches one.
    pub(super) async fn persist_and_apply(
        &self,
        rs: Option<&mut RoomState>,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        self.apply_rows(event);
        if let Some(rs) = rs {
            apply_to_room(rs, event, &self.restriction_to_room);
        }
        Ok(())
    }
}
