use time::{Date, OffsetDateTime, Weekday};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::identity::CurrentUser;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_slot};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Appointment lifecycle ────────────────────────────

    /// Book an appointment. The end time is computed from the service
    /// duration, never taken from the caller. Conflict checking and the
    /// insert run under one (trainer, date) write lock, so two racing
    /// requests for the same slot resolve to exactly one winner.
    pub async fn book_appointment(
        &self,
        id: Ulid,
        trainer_id: Ulid,
        member_id: Ulid,
        service_id: Ulid,
        date: Date,
        start: Minutes,
        now: OffsetDateTime,
    ) -> Result<Appointment, EngineError> {
        let service = self
            .get_service(&service_id)
            .ok_or(EngineError::NotFound(service_id))?;
        if !service.active {
            return Err(EngineError::InvalidInput("service is not active"));
        }

        let trainer = self
            .get_trainer(&trainer_id)
            .ok_or(EngineError::NotFound(trainer_id))?;
        {
            let ts = trainer.read().await;
            if !ts.active {
                return Err(EngineError::InvalidInput("trainer is not active"));
            }
        }

        let slot = validate_slot(start, start + service.duration_minutes)?;

        let key = DayKey { trainer_id, date };
        let day_arc = self.day_entry(key);
        let mut day = day_arc.write().await;

        if day.appointments.len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this day"));
        }
        if day.get(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Err(e) = check_no_conflict(&day, &slot, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let appointment = Appointment {
            id,
            trainer_id,
            member_id,
            service_id,
            date,
            slot,
            status: AppointmentStatus::Pending,
            total_price_cents: service.price_cents,
            created_at: now,
            updated_at: None,
            approved_by: None,
            approved_at: None,
            cancellation_reason: None,
        };

        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut day, &event).await?;

        metrics::counter!(observability::BOOKINGS_TOTAL).increment(1);
        tracing::info!(%id, %trainer_id, %member_id, start, "appointment booked");
        Ok(appointment)
    }

    /// Administrator sign-off on a pending appointment. Records who
    /// approved it and when.
    pub async fn approve_appointment(
        &self,
        id: Ulid,
        actor: &CurrentUser,
        now: OffsetDateTime,
    ) -> Result<Appointment, EngineError> {
        actor.require_admin()?;

        let (key, mut day) = self.resolve_appointment_write(&id).await?;
        let appointment = day.get(id).ok_or(EngineError::NotFound(id))?;
        if appointment.status != AppointmentStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: appointment.status,
                action: "approve",
            });
        }

        let event = Event::AppointmentApproved {
            id,
            day: key,
            approved_by: actor.display_name.clone(),
            at: now,
        };
        self.persist_and_apply(&mut day, &event).await?;

        tracing::info!(%id, approved_by = %actor.display_name, "appointment approved");
        Ok(day.get(id).ok_or(EngineError::NotFound(id))?.clone())
    }

    /// Cancel a pending or approved appointment. The record stays in the
    /// schedule (it no longer blocks the slot); the reason is truncated
    /// to a bounded length rather than rejected.
    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        reason: Option<String>,
        now: OffsetDateTime,
    ) -> Result<Appointment, EngineError> {
        let (key, mut day) = self.resolve_appointment_write(&id).await?;
        let appointment = day.get(id).ok_or(EngineError::NotFound(id))?;
        match appointment.status {
            AppointmentStatus::Pending | AppointmentStatus::Approved => {}
            from => {
                return Err(EngineError::InvalidTransition { from, action: "cancel" });
            }
        }

        let reason = reason.map(|r| {
            if r.chars().count() > MAX_CANCELLATION_REASON_CHARS {
                r.chars().take(MAX_CANCELLATION_REASON_CHARS).collect()
            } else {
                r
            }
        });

        let event = Event::AppointmentCancelled { id, day: key, reason, at: now };
        self.persist_and_apply(&mut day, &event).await?;

        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        tracing::info!(%id, "appointment cancelled");
        Ok(day.get(id).ok_or(EngineError::NotFound(id))?.clone())
    }

    /// Mark an approved appointment completed. Only allowed once its
    /// scheduled end has passed.
    pub async fn complete_appointment(
        &self,
        id: Ulid,
        now: OffsetDateTime,
    ) -> Result<Appointment, EngineError> {
        let (key, mut day) = self.resolve_appointment_write(&id).await?;
        Self::check_elapsed_approved(day.get(id).ok_or(EngineError::NotFound(id))?, "complete", now)?;

        let event = Event::AppointmentCompleted { id, day: key, at: now };
        self.persist_and_apply(&mut day, &event).await?;

        tracing::info!(%id, "appointment completed");
        Ok(day.get(id).ok_or(EngineError::NotFound(id))?.clone())
    }

    /// Mark an approved appointment as a no-show. Same elapsed-time rule
    /// as completion.
    pub async fn mark_no_show(
        &self,
        id: Ulid,
        now: OffsetDateTime,
    ) -> Result<Appointment, EngineError> {
        let (key, mut day) = self.resolve_appointment_write(&id).await?;
        Self::check_elapsed_approved(day.get(id).ok_or(EngineError::NotFound(id))?, "mark no-show", now)?;

        let event = Event::AppointmentNoShow { id, day: key, at: now };
        self.persist_and_apply(&mut day, &event).await?;

        tracing::info!(%id, "appointment marked no-show");
        Ok(day.get(id).ok_or(EngineError::NotFound(id))?.clone())
    }

    fn check_elapsed_approved(
        appointment: &Appointment,
        action: &'static str,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        if appointment.status != AppointmentStatus::Approved {
            return Err(EngineError::InvalidTransition {
                from: appointment.status,
                action,
            });
        }
        if appointment.end_instant() > now {
            return Err(EngineError::InvalidInput(
                "appointment has not finished yet",
            ));
        }
        Ok(())
    }

    // ── Service directory ────────────────────────────────

    pub async fn define_service(
        &self,
        id: Ulid,
        name: String,
        duration_minutes: Minutes,
        price_cents: i64,
    ) -> Result<Service, EngineError> {
        Self::check_name(&name)?;
        if duration_minutes <= 0 || duration_minutes > MINUTES_PER_DAY {
            return Err(EngineError::InvalidInput("service duration out of range"));
        }
        if price_cents < 0 {
            return Err(EngineError::InvalidInput("price must not be negative"));
        }
        if self.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }

        let event = Event::ServiceDefined {
            id,
            name: name.clone(),
            duration_minutes,
            price_cents,
            active: true,
        };
        self.wal_append(&event).await?;

        let service = Service { id, name, duration_minutes, price_cents, active: true };
        self.services.insert(id, service.clone());
        tracing::info!(%id, name = %service.name, "service defined");
        Ok(service)
    }

    pub async fn update_service(
        &self,
        id: Ulid,
        name: String,
        duration_minutes: Minutes,
        price_cents: i64,
        active: bool,
    ) -> Result<Service, EngineError> {
        Self::check_name(&name)?;
        if duration_minutes <= 0 || duration_minutes > MINUTES_PER_DAY {
            return Err(EngineError::InvalidInput("service duration out of range"));
        }
        if price_cents < 0 {
            return Err(EngineError::InvalidInput("price must not be negative"));
        }
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ServiceUpdated {
            id,
            name: name.clone(),
            duration_minutes,
            price_cents,
            active,
        };
        self.wal_append(&event).await?;

        let service = Service { id, name, duration_minutes, price_cents, active };
        self.services.insert(id, service.clone());
        tracing::info!(%id, "service updated");
        Ok(service)
    }

    // ── Trainer directory ────────────────────────────────

    pub async fn register_trainer(
        &self,
        id: Ulid,
        name: String,
        service_ids: Vec<Ulid>,
    ) -> Result<(), EngineError> {
        Self::check_name(&name)?;
        Self::check_qualifications(&service_ids, self)?;
        if self.trainers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.trainers.len() >= MAX_TRAINERS {
            return Err(EngineError::LimitExceeded("too many trainers"));
        }

        let event = Event::TrainerRegistered {
            id,
            name: name.clone(),
            active: true,
            service_ids: service_ids.clone(),
        };
        self.wal_append(&event).await?;

        let ts = TrainerState::new(id, name, service_ids.into_iter().collect());
        self.trainers
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(ts)));
        tracing::info!(%id, "trainer registered");
        Ok(())
    }

    pub async fn update_trainer(
        &self,
        id: Ulid,
        name: String,
        active: bool,
        service_ids: Vec<Ulid>,
    ) -> Result<(), EngineError> {
        Self::check_name(&name)?;
        Self::check_qualifications(&service_ids, self)?;
        let trainer = self.get_trainer(&id).ok_or(EngineError::NotFound(id))?;
        let mut ts = trainer.write().await;

        let event = Event::TrainerUpdated { id, name, active, service_ids };
        self.persist_and_apply_trainer(&mut ts, &event).await?;

        tracing::info!(%id, "trainer updated");
        Ok(())
    }

    /// Attach a weekly working window to a trainer.
    pub async fn add_shift(
        &self,
        id: Ulid,
        trainer_id: Ulid,
        weekday: Weekday,
        start: Minutes,
        end: Minutes,
    ) -> Result<Shift, EngineError> {
        let slot = validate_slot(start, end)?;
        let trainer = self
            .get_trainer(&trainer_id)
            .ok_or(EngineError::NotFound(trainer_id))?;
        let mut ts = trainer.write().await;

        if ts.shifts.iter().filter(|s| s.active).count() >= MAX_SHIFTS_PER_TRAINER {
            return Err(EngineError::LimitExceeded("too many shifts for this trainer"));
        }
        if ts.shifts.iter().any(|s| s.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ShiftAdded { id, trainer_id, weekday, slot, active: true };
        self.persist_and_apply_trainer(&mut ts, &event).await?;

        tracing::info!(%id, %trainer_id, ?weekday, "shift added");
        Ok(Shift { id, weekday, slot, active: true })
    }

    /// Retire a shift. Existing appointments are untouched; the window
    /// simply stops producing candidate slots.
    pub async fn deactivate_shift(&self, shift_id: Ulid) -> Result<(), EngineError> {
        let trainer_id = self
            .shift_trainers
            .get(&shift_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(shift_id))?;
        let trainer = self
            .get_trainer(&trainer_id)
            .ok_or(EngineError::NotFound(trainer_id))?;
        let mut ts = trainer.write().await;

        if !ts.shifts.iter().any(|s| s.id == shift_id && s.active) {
            return Err(EngineError::NotFound(shift_id));
        }

        let event = Event::ShiftDeactivated { id: shift_id, trainer_id };
        self.persist_and_apply_trainer(&mut ts, &event).await?;

        tracing::info!(%shift_id, %trainer_id, "shift deactivated");
        Ok(())
    }

    fn check_name(name: &str) -> Result<(), EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidInput("name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::InvalidInput("name too long"));
        }
        Ok(())
    }

    fn check_qualifications(service_ids: &[Ulid], engine: &Engine) -> Result<(), EngineError> {
        if service_ids.len() > MAX_SERVICES_PER_TRAINER {
            return Err(EngineError::LimitExceeded("too many services for one trainer"));
        }
        for sid in service_ids {
            if !engine.services.contains_key(sid) {
                return Err(EngineError::NotFound(*sid));
            }
        }
        Ok(())
    }

    // ── WAL compaction ───────────────────────────────────

    /// Rewrite the WAL as a snapshot of current state: directory events
    /// first, then one booked event per appointment carrying its current
    /// status. Replaying the compacted log reproduces today's state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.services.iter() {
            let s = entry.value();
            events.push(Event::ServiceDefined {
                id: s.id,
                name: s.name.clone(),
                duration_minutes: s.duration_minutes,
                price_cents: s.price_cents,
                active: s.active,
            });
        }

        let trainer_arcs: Vec<_> = self
            .trainers
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for arc in trainer_arcs {
            let ts = arc.read().await;
            let mut service_ids: Vec<Ulid> = ts.services.iter().copied().collect();
            service_ids.sort();
            events.push(Event::TrainerRegistered {
                id: ts.id,
                name: ts.name.clone(),
                active: ts.active,
                service_ids,
            });
            for shift in &ts.shifts {
                events.push(Event::ShiftAdded {
                    id: shift.id,
                    trainer_id: ts.id,
                    weekday: shift.weekday,
                    slot: shift.slot,
                    active: shift.active,
                });
            }
        }

        let day_arcs: Vec<_> = self.days.iter().map(|e| e.value().clone()).collect();
        for arc in day_arcs {
            let day = arc.read().await;
            for appointment in &day.appointments {
                events.push(Event::AppointmentBooked {
                    appointment: appointment.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        tracing::info!("WAL compacted");
        Ok(())
    }

    /// Number of appends since the last compaction (or since startup).
    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
