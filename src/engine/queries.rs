use time::Date;
use ulid::Ulid;

use crate::identity::CurrentUser;
use crate::model::*;

use super::conflict::{slot_is_free, validate_slot};
use super::{Engine, EngineError};

impl Engine {
    // ── Availability ─────────────────────────────────────

    /// Candidate slots for one trainer, service, and date. Unknown or
    /// unqualified combinations yield an empty list, not an error: the
    /// caller asked "when could I book?" and the answer is "never".
    pub async fn available_slots(
        &self,
        trainer_id: Ulid,
        service_id: Ulid,
        date: Date,
    ) -> Vec<SlotStatus> {
        let Some(service) = self.get_service(&service_id) else {
            return Vec::new();
        };
        if !service.active {
            return Vec::new();
        }
        let Some(trainer) = self.get_trainer(&trainer_id) else {
            return Vec::new();
        };

        let shifts = {
            let ts = trainer.read().await;
            if !ts.active || !ts.services.contains(&service_id) {
                return Vec::new();
            }
            ts.shifts_for(date.weekday())
        };
        if shifts.is_empty() {
            return Vec::new();
        }

        let booked = self.booked_hours(trainer_id, date).await;
        metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL).increment(1);
        super::enumerate_slots(&shifts, service.duration_minutes, &booked)
    }

    /// Slot-blocking bookings for one trainer on one date, ascending.
    pub async fn booked_hours(&self, trainer_id: Ulid, date: Date) -> Vec<TimeSlot> {
        let key = DayKey { trainer_id, date };
        match self.day_schedule(&key) {
            Some(day) => day.read().await.booked_slots(),
            None => Vec::new(),
        }
    }

    /// Would `[start, end)` be bookable for this trainer on this date?
    /// `exclude` lets a reschedule ignore the appointment being moved.
    pub async fn is_free(
        &self,
        trainer_id: Ulid,
        date: Date,
        start: Minutes,
        end: Minutes,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let slot = validate_slot(start, end)?;
        let key = DayKey { trainer_id, date };
        match self.day_schedule(&key) {
            Some(day) => Ok(slot_is_free(&*day.read().await, &slot, exclude)),
            None => Ok(true),
        }
    }

    // ── Appointments ─────────────────────────────────────

    pub async fn find_appointment(&self, id: Ulid) -> Option<Appointment> {
        let key = *self.appointment_days.get(&id)?.value();
        let day = self.day_schedule(&key)?;
        let guard = day.read().await;
        guard.get(id).cloned()
    }

    /// Appointments visible to the caller: administrators see everything,
    /// members see their own. Newest first (date, then start time).
    pub async fn list_appointments(&self, actor: &CurrentUser) -> Vec<AppointmentView> {
        let day_arcs: Vec<_> = self.days.iter().map(|e| e.value().clone()).collect();

        let mut out = Vec::new();
        for arc in day_arcs {
            let day = arc.read().await;
            for appointment in &day.appointments {
                if !actor.is_admin() && appointment.member_id != actor.id {
                    continue;
                }
                out.push(appointment.clone());
            }
        }
        out.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(b.slot.start.cmp(&a.slot.start))
        });

        let mut views = Vec::with_capacity(out.len());
        for appointment in out {
            let trainer_name = match self.get_trainer(&appointment.trainer_id) {
                Some(t) => t.read().await.name.clone(),
                None => String::new(),
            };
            let service_name = self
                .get_service(&appointment.service_id)
                .map(|s| s.name)
                .unwrap_or_default();
            views.push(AppointmentView { appointment, trainer_name, service_name });
        }
        views
    }

    // ── Directory reads ──────────────────────────────────

    pub fn list_services(&self) -> Vec<Service> {
        let mut services: Vec<Service> =
            self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Active trainers qualified for a service, sorted by name.
    pub async fn trainers_for_service(&self, service_id: Ulid) -> Vec<TrainerInfo> {
        let trainer_arcs: Vec<_> = self.trainers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for arc in trainer_arcs {
            let ts = arc.read().await;
            if ts.active && ts.services.contains(&service_id) {
                out.push(TrainerInfo { id: ts.id, name: ts.name.clone(), active: ts.active });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn list_trainers(&self) -> Vec<TrainerInfo> {
        let trainer_arcs: Vec<_> = self.trainers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for arc in trainer_arcs {
            let ts = arc.read().await;
            out.push(TrainerInfo { id: ts.id, name: ts.name.clone(), active: ts.active });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
