mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;

pub use error::EngineError;
pub use slots::enumerate_slots;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedDaySchedule = Arc<RwLock<DaySchedule>>;
pub type SharedTrainerState = Arc<RwLock<TrainerState>>;

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

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
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

// ── Engine ───────────────────────────────────────────────

/// The scheduling engine. Booking state is sharded per (trainer, date) so a
/// creation's check-then-insert holds exactly one day's write lock and never
/// contends with unrelated trainers or days.
pub struct Engine {
    /// Per-trainer-per-day appointment state.
    pub days: DashMap<DayKey, SharedDaySchedule>,
    /// Trainer directory: profile, qualifications, working shifts.
    pub trainers: DashMap<Ulid, SharedTrainerState>,
    /// Service directory.
    pub services: DashMap<Ulid, Service>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: appointment id → its day key.
    pub(super) appointment_days: DashMap<Ulid, DayKey>,
    /// Reverse lookup: shift id → trainer id.
    pub(super) shift_trainers: DashMap<Ulid, Ulid>,
}

/// Apply an appointment event to a DaySchedule (no locking — caller holds the lock).
fn apply_to_day(day: &mut DaySchedule, event: &Event, index: &DashMap<Ulid, DayKey>) {
    match event {
        Event::AppointmentBooked { appointment } => {
            index.insert(appointment.id, day.key);
            day.insert_appointment(appointment.clone());
        }
        Event::AppointmentApproved { id, approved_by, at, .. } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Approved;
                a.approved_by = Some(approved_by.clone());
                a.approved_at = Some(*at);
            }
        }
        Event::AppointmentCancelled { id, reason, at, .. } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Cancelled;
                a.cancellation_reason = reason.clone();
                a.updated_at = Some(*at);
            }
        }
        Event::AppointmentCompleted { id, at, .. } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Completed;
                a.updated_at = Some(*at);
            }
        }
        Event::AppointmentNoShow { id, at, .. } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::NoShow;
                a.updated_at = Some(*at);
            }
        }
        // Directory events are handled at the Engine maps, not here
        _ => {}
    }
}

/// Apply a shift event to a TrainerState (caller holds the lock).
fn apply_to_trainer(ts: &mut TrainerState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::TrainerUpdated { name, active, service_ids, .. } => {
            ts.name = name.clone();
            ts.active = *active;
            ts.services = service_ids.iter().copied().collect();
        }
        Event::ShiftAdded { id, trainer_id, weekday, slot, active } => {
            ts.shifts.push(Shift {
                id: *id,
                weekday: *weekday,
                slot: *slot,
                active: *active,
            });
            index.insert(*id, *trainer_id);
        }
        Event::ShiftDeactivated { id, .. } => {
            if let Some(shift) = ts.shifts.iter_mut().find(|s| s.id == *id) {
                shift.active = false;
            }
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            days: DashMap::new(),
            trainers: DashMap::new(),
            services: DashMap::new(),
            wal_tx,
            appointment_days: DashMap::new(),
            shift_trainers: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this runs inside an async context.
        for event in &events {
            match event {
                Event::ServiceDefined { id, name, duration_minutes, price_cents, active }
                | Event::ServiceUpdated { id, name, duration_minutes, price_cents, active } => {
                    engine.services.insert(
                        *id,
                        Service {
                            id: *id,
                            name: name.clone(),
                            duration_minutes: *duration_minutes,
                            price_cents: *price_cents,
                            active: *active,
                        },
                    );
                }
                Event::TrainerRegistered { id, name, active, service_ids } => {
                    let mut ts =
                        TrainerState::new(*id, name.clone(), service_ids.iter().copied().collect());
                    ts.active = *active;
                    engine.trainers.insert(*id, Arc::new(RwLock::new(ts)));
                }
                Event::TrainerUpdated { id, .. }
                | Event::ShiftAdded { trainer_id: id, .. }
                | Event::ShiftDeactivated { trainer_id: id, .. } => {
                    if let Some(entry) = engine.trainers.get(id) {
                        let ts_arc = entry.value().clone();
                        let mut guard = ts_arc.try_write().expect("replay: uncontended write");
                        apply_to_trainer(&mut guard, event, &engine.shift_trainers);
                    }
                }
                Event::AppointmentBooked { appointment } => {
                    let key = DayKey {
                        trainer_id: appointment.trainer_id,
                        date: appointment.date,
                    };
                    let day_arc = engine.day_entry(key);
                    let mut guard = day_arc.try_write().expect("replay: uncontended write");
                    apply_to_day(&mut guard, event, &engine.appointment_days);
                }
                Event::AppointmentApproved { day, .. }
                | Event::AppointmentCancelled { day, .. }
                | Event::AppointmentCompleted { day, .. }
                | Event::AppointmentNoShow { day, .. } => {
                    if let Some(entry) = engine.days.get(day) {
                        let day_arc = entry.value().clone();
                        let mut guard = day_arc.try_write().expect("replay: uncontended write");
                        apply_to_day(&mut guard, event, &engine.appointment_days);
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

    /// Get or lazily create the schedule for one (trainer, date).
    pub(super) fn day_entry(&self, key: DayKey) -> SharedDaySchedule {
        self.days
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new(key))))
            .value()
            .clone()
    }

    pub fn day_schedule(&self, key: &DayKey) -> Option<SharedDaySchedule> {
        self.days.get(key).map(|e| e.value().clone())
    }

    pub fn get_trainer(&self, id: &Ulid) -> Option<SharedTrainerState> {
        self.trainers.get(id).map(|e| e.value().clone())
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply in one call for appointment events.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DaySchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event, &self.appointment_days);
        Ok(())
    }

    /// WAL-append + apply in one call for trainer/shift events.
    pub(super) async fn persist_and_apply_trainer(
        &self,
        ts: &mut TrainerState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_trainer(ts, event, &self.shift_trainers);
        Ok(())
    }

    /// Lookup appointment → day key, get the day, acquire its write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        id: &Ulid,
    ) -> Result<(DayKey, tokio::sync::OwnedRwLockWriteGuard<DaySchedule>), EngineError> {
        let key = self
            .appointment_days
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*id))?;
        let day = self
            .day_schedule(&key)
            .ok_or(EngineError::NotFound(*id))?;
        let guard = day.write_owned().await;
        Ok((key, guard))
    }
}
