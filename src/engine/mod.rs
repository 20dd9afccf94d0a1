mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;
pub use mutations::PackageSession;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::policy::ClassPolicy;
use crate::wal::Wal;

pub type SharedCoachState = Arc<RwLock<CoachState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
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

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedCoachState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → coach id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    /// Per-user copies of completed-session history.
    pub(super) user_histories: DashMap<Ulid, Vec<HistoryEntry>>,
    pub policy: Arc<ClassPolicy>,
}

/// Apply an event directly to a CoachState (no locking — caller holds the lock).
fn apply_to_coach(
    rs: &mut CoachState,
    event: &Event,
    booking_index: &DashMap<Ulid, Ulid>,
    user_histories: &DashMap<Ulid, Vec<HistoryEntry>>,
) {
    match event {
        Event::SlotAdded { slot, .. } => {
            rs.insert_slot(slot.clone());
        }
        Event::SlotRemoved {
            date,
            time,
            class_type,
            ..
        } => {
            rs.remove_slot(*date, time, class_type);
        }
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, booking.coach_id);
            rs.bookings.push(booking.clone());
        }
        Event::ProofSubmitted { id, proof_ref, .. } => {
            if let Some(b) = rs.find_booking_mut(*id) {
                b.status = PaymentStatus::Pending;
                b.proof_ref = Some(proof_ref.clone());
            }
        }
        Event::PaymentVerified { id, .. } => {
            if let Some(b) = rs.find_booking_mut(*id) {
                b.status = PaymentStatus::Verified;
            }
        }
        Event::PaymentRejected { id, .. } => {
            if let Some(b) = rs.find_booking_mut(*id) {
                b.status = PaymentStatus::Rejected;
            }
        }
        Event::BookingCancelled { id, cancelled_at, .. } => {
            if let Some(b) = rs.remove_booking(*id) {
                booking_index.remove(id);
                rs.cancellations.push(CancellationNote {
                    user_id: b.user_id,
                    date: b.date,
                    time: b.time,
                    class_type: b.class_type,
                    status_at_cancel: b.status,
                    cancelled_at: *cancelled_at,
                });
            }
        }
        Event::BookingCompleted { id, completed_at, .. } => {
            if let Some(b) = rs.remove_booking(*id) {
                booking_index.remove(id);
                let entry = HistoryEntry::from_booking(&b, *completed_at);
                user_histories
                    .entry(b.user_id)
                    .or_default()
                    .push(entry.clone());
                rs.class_history.push(entry);
            }
        }
        Event::HistoryRecorded { entry, .. } => {
            user_histories
                .entry(entry.user_id)
                .or_default()
                .push(entry.clone());
            rs.class_history.push(entry.clone());
        }
        Event::CancellationRecorded { note, .. } => {
            rs.cancellations.push(note.clone());
        }
        // CoachCreated/Deleted are handled at the DashMap level, not here
        Event::CoachCreated { .. } | Event::CoachDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        policy: Arc<ClassPolicy>,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_index: DashMap::new(),
            user_histories: DashMap::new(),
            policy,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy gym creation).
        for event in &events {
            match event {
                Event::CoachCreated { id, name } => {
                    let rs = CoachState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::CoachDeleted { id } => {
                    if let Some((_, arc)) = engine.state.remove(id) {
                        let rs = arc.try_read().expect("replay: uncontended read");
                        for b in &rs.bookings {
                            engine.booking_index.remove(&b.id);
                        }
                    }
                }
                other => {
                    if let Some(coach_id) = event_coach_id(other)
                        && let Some(entry) = engine.state.get(&coach_id) {
                            let rs_arc = entry.clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_coach(
                                &mut guard,
                                other,
                                &engine.booking_index,
                                &engine.user_histories,
                            );
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
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_coach(&self, id: &Ulid) -> Option<SharedCoachState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_coach_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        coach_id: Ulid,
        rs: &mut CoachState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_coach(rs, event, &self.booking_index, &self.user_histories);
        self.notify.send(coach_id, event);
        Ok(())
    }

    /// Lookup booking → coach, get coach, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CoachState>), EngineError> {
        let coach_id = self
            .get_coach_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_coach(&coach_id)
            .ok_or(EngineError::NotFound(coach_id))?;
        let guard = rs.write_owned().await;
        // The coach may have been deleted while we waited for the lock.
        if !self.state.contains_key(&coach_id) {
            return Err(EngineError::NotFound(coach_id));
        }
        Ok((coach_id, guard))
    }
}
