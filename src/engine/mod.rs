mod admission;
mod error;
mod queries;
mod rooms;
mod utilization;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(WalCommand::Append { event, response }) = rx.recv().await {
        let mut batch = vec![(event, response)];
        while let Ok(WalCommand::Append { event, response }) = rx.try_recv() {
            batch.push((event, response));
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(
    batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// One tenant's reservation engine: rooms, their bookings, and the
/// idempotency ledger, all rebuilt from the WAL at startup.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Case-folded room name → room id. The entry API enforces uniqueness.
    room_names: DashMap<String, Ulid>,
    /// Booking id → room id, for O(1) cancellation and lookup.
    booking_index: DashMap<Ulid, Ulid>,
    /// (idempotency key, organizer) → claim state. The entry API is the
    /// uniqueness constraint that makes concurrent identical-key
    /// submissions safe.
    ledger: DashMap<IdemKey, IdemState>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            room_names: DashMap::new(),
            booking_index: DashMap::new(),
            ledger: DashMap::new(),
            wal_tx,
            notify,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::RoomCreated {
                    id,
                    name,
                    capacity,
                    floor,
                    amenities,
                } => {
                    let rs = RoomState::new(
                        *id,
                        name.clone(),
                        *capacity,
                        *floor,
                        amenities.clone(),
                    );
                    engine.room_names.insert(name.to_lowercase(), *id);
                    engine.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = engine.rooms.get(&room_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard =
                            rs_arc.try_write().expect("replay: uncontended write");
                        engine.apply_to_room(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    pub fn room_id_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// Apply an event to a RoomState (no locking — caller holds the lock).
    /// A BookingCreated event carrying an idempotency key also records the
    /// `done` ledger entry, which is what flips an in-progress claim to done
    /// on the keyed admission path and rebuilds the ledger on replay.
    fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingCreated {
                id,
                room_id,
                title,
                organizer_email,
                span,
                created_at,
                idempotency_key,
            } => {
                rs.insert_booking(Booking {
                    id: *id,
                    title: title.clone(),
                    organizer_email: organizer_email.clone(),
                    span: *span,
                    status: BookingStatus::Confirmed,
                    created_at: *created_at,
                });
                self.booking_index.insert(*id, *room_id);
                if let Some(key) = idempotency_key {
                    self.ledger.insert(
                        IdemKey {
                            key: key.clone(),
                            organizer_email: organizer_email.clone(),
                        },
                        IdemState::Done { booking_id: *id },
                    );
                }
            }
            Event::BookingCancelled { id, .. } => {
                rs.cancel_booking(*id);
            }
            // RoomCreated is handled at the map level, not here
            Event::RoomCreated { .. } => {}
        }
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        room_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_room(rs, event);
        self.notify.send(room_id, event);
        Ok(())
    }
}

/// Extract the room id from an event (for non-RoomCreated events).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { room_id, .. } | Event::BookingCancelled { room_id, .. } => {
            Some(*room_id)
        }
        Event::RoomCreated { .. } => None,
    }
}
