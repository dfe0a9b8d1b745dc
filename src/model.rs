use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, Weekday};
use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;

/// Minutes since midnight — the only time-of-day type.
pub type Minutes = i32;

/// Half-open interval `[start, end)` within a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: Minutes,
    pub end: Minutes,
}

impl TimeSlot {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end - self.start
    }

    /// The one overlap predicate. Back-to-back slots ([9:00,10:00) and
    /// [10:00,11:00)) do NOT overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Format minutes-since-midnight as `HH:MM`.
pub fn format_hhmm(m: Minutes) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse `HH:MM` into minutes-since-midnight. Rejects out-of-day values.
pub fn parse_hhmm(s: &str) -> Option<Minutes> {
    let (h, m) = s.split_once(':')?;
    let h: Minutes = h.parse().ok()?;
    let m: Minutes = m.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

/// The instant (UTC) at which `minutes` on `date` occurs. Handles the
/// `end == 24:00` boundary by rolling into the next day.
pub fn instant_at(date: Date, minutes: Minutes) -> OffsetDateTime {
    let (date, minutes) = if minutes >= MINUTES_PER_DAY {
        (date.next_day().unwrap_or(date), minutes - MINUTES_PER_DAY)
    } else {
        (date, minutes)
    };
    let time = Time::from_hms((minutes / 60) as u8, (minutes % 60) as u8, 0)
        .expect("minutes already bounded to a day");
    PrimitiveDateTime::new(date, time).assume_utc()
}

// ── Directory records ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: Minutes,
    pub price_cents: i64,
    pub active: bool,
}

/// A contiguous working interval for a trainer on a given weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: Ulid,
    pub weekday: Weekday,
    pub slot: TimeSlot,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct TrainerState {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
    /// Services this trainer is qualified to deliver.
    pub services: HashSet<Ulid>,
    /// Declared working shifts, in arrival order. Ordering is applied on read.
    pub shifts: Vec<Shift>,
}

impl TrainerState {
    pub fn new(id: Ulid, name: String, services: HashSet<Ulid>) -> Self {
        Self {
            id,
            name,
            active: true,
            services,
            shifts: Vec::new(),
        }
    }

    /// Active shifts for a weekday, ordered by start time ascending.
    /// Empty means "does not work that day", not an error.
    pub fn shifts_for(&self, weekday: Weekday) -> Vec<Shift> {
        let mut shifts: Vec<Shift> = self
            .shifts
            .iter()
            .filter(|s| s.active && s.weekday == weekday)
            .copied()
            .collect();
        shifts.sort_by_key(|s| s.slot.start);
        shifts
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::NoShow)
    }

    /// Whether an appointment in this status occupies its time slot.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub trainer_id: Ulid,
    pub member_id: Ulid,
    pub service_id: Ulid,
    pub date: Date,
    pub slot: TimeSlot,
    pub status: AppointmentStatus,
    pub total_price_cents: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
    pub approved_by: Option<String>,
    pub approved_at: Option<OffsetDateTime>,
    pub cancellation_reason: Option<String>,
}

impl Appointment {
    /// The instant the appointment ends, for the "date has elapsed" guards.
    pub fn end_instant(&self) -> OffsetDateTime {
        instant_at(self.date, self.slot.end)
    }
}

/// Lock key for one trainer's schedule on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub trainer_id: Ulid,
    pub date: Date,
}

/// All appointments for one (trainer, date), sorted by `slot.start`.
/// Cancelled appointments stay for history but never block a slot.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub key: DayKey,
    pub appointments: Vec<Appointment>,
}

impl DaySchedule {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by slot.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.slot.start, |a| a.slot.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Non-cancelled appointments whose slot overlaps the query.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn blocking_overlaps(&self, query: &TimeSlot) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.slot.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.status.blocks_slot() && a.slot.end > query.start)
    }

    /// Snapshot of occupied slots, sorted by start.
    pub fn booked_slots(&self) -> Vec<TimeSlot> {
        self.appointments
            .iter()
            .filter(|a| a.status.blocks_slot())
            .map(|a| a.slot)
            .collect()
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ServiceDefined {
        id: Ulid,
        name: String,
        duration_minutes: Minutes,
        price_cents: i64,
        active: bool,
    },
    ServiceUpdated {
        id: Ulid,
        name: String,
        duration_minutes: Minutes,
        price_cents: i64,
        active: bool,
    },
    TrainerRegistered {
        id: Ulid,
        name: String,
        active: bool,
        service_ids: Vec<Ulid>,
    },
    TrainerUpdated {
        id: Ulid,
        name: String,
        active: bool,
        service_ids: Vec<Ulid>,
    },
    ShiftAdded {
        id: Ulid,
        trainer_id: Ulid,
        weekday: Weekday,
        slot: TimeSlot,
        active: bool,
    },
    ShiftDeactivated {
        id: Ulid,
        trainer_id: Ulid,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentApproved {
        id: Ulid,
        day: DayKey,
        approved_by: String,
        at: OffsetDateTime,
    },
    AppointmentCancelled {
        id: Ulid,
        day: DayKey,
        reason: Option<String>,
        at: OffsetDateTime,
    },
    AppointmentCompleted {
        id: Ulid,
        day: DayKey,
        at: OffsetDateTime,
    },
    AppointmentNoShow {
        id: Ulid,
        day: DayKey,
        at: OffsetDateTime,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One candidate slot from the generator: start plus booked flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    pub start: Minutes,
    pub is_full: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerInfo {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
}

/// Appointment joined with directory display names for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentView {
    pub appointment: Appointment,
    pub trainer_name: String,
    pub service_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn test_appointment(start: Minutes, end: Minutes, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            trainer_id: Ulid::new(),
            member_id: Ulid::new(),
            service_id: Ulid::new(),
            date: date!(2026 - 09 - 07),
            slot: TimeSlot::new(start, end),
            status,
            total_price_cents: 5_000,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: None,
            approved_by: None,
            approved_at: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn slot_basics() {
        let s = TimeSlot::new(9 * 60, 10 * 60);
        assert_eq!(s.duration_minutes(), 60);
    }

    #[test]
    fn slot_overlap() {
        let a = TimeSlot::new(9 * 60, 10 * 60);
        let b = TimeSlot::new(9 * 60 + 30, 10 * 60 + 30);
        let c = TimeSlot::new(10 * 60, 11 * 60);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn slot_overlap_containment() {
        let outer = TimeSlot::new(9 * 60, 11 * 60);
        let inner = TimeSlot::new(9 * 60 + 30, 10 * 60 + 30);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(outer.overlaps(&outer)); // identical intervals overlap
    }

    #[test]
    fn hhmm_roundtrip() {
        assert_eq!(format_hhmm(9 * 60), "09:00");
        assert_eq!(format_hhmm(14 * 60 + 5), "14:05");
        assert_eq!(parse_hhmm("09:00"), Some(9 * 60));
        assert_eq!(parse_hhmm("23:59"), Some(23 * 60 + 59));
    }

    #[test]
    fn hhmm_rejects_garbage() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("09:60"), None);
        assert_eq!(parse_hhmm("0900"), None);
        assert_eq!(parse_hhmm("ab:cd"), None);
        assert_eq!(parse_hhmm(""), None);
    }

    #[test]
    fn instant_at_end_of_day_rolls_over() {
        let d = date!(2026 - 09 - 07);
        let midnight_next = instant_at(d, MINUTES_PER_DAY);
        assert_eq!(midnight_next.date(), date!(2026 - 09 - 08));
        assert_eq!(midnight_next.time(), Time::MIDNIGHT);
    }

    #[test]
    fn status_transitions_metadata() {
        assert!(!AppointmentStatus::Pending.is_terminal());
        assert!(!AppointmentStatus::Approved.is_terminal());
        assert!(AppointmentStatus::Cancelled.is_terminal());
        assert!(AppointmentStatus::Completed.is_terminal());
        assert!(AppointmentStatus::NoShow.is_terminal());

        assert!(AppointmentStatus::Pending.blocks_slot());
        assert!(AppointmentStatus::NoShow.blocks_slot());
        assert!(!AppointmentStatus::Cancelled.blocks_slot());
    }

    #[test]
    fn day_schedule_insert_ordering() {
        let key = DayKey {
            trainer_id: Ulid::new(),
            date: date!(2026 - 09 - 07),
        };
        let mut day = DaySchedule::new(key);
        day.insert_appointment(test_appointment(11 * 60, 12 * 60, AppointmentStatus::Pending));
        day.insert_appointment(test_appointment(9 * 60, 10 * 60, AppointmentStatus::Pending));
        day.insert_appointment(test_appointment(10 * 60, 11 * 60, AppointmentStatus::Pending));
        let starts: Vec<Minutes> = day.appointments.iter().map(|a| a.slot.start).collect();
        assert_eq!(starts, vec![9 * 60, 10 * 60, 11 * 60]);
    }

    #[test]
    fn blocking_overlaps_skips_cancelled() {
        let key = DayKey {
            trainer_id: Ulid::new(),
            date: date!(2026 - 09 - 07),
        };
        let mut day = DaySchedule::new(key);
        day.insert_appointment(test_appointment(9 * 60, 10 * 60, AppointmentStatus::Cancelled));
        day.insert_appointment(test_appointment(10 * 60, 11 * 60, AppointmentStatus::Approved));

        let query = TimeSlot::new(9 * 60, 11 * 60);
        let hits: Vec<_> = day.blocking_overlaps(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slot.start, 10 * 60);
    }

    #[test]
    fn blocking_overlaps_adjacent_not_included() {
        let key = DayKey {
            trainer_id: Ulid::new(),
            date: date!(2026 - 09 - 07),
        };
        let mut day = DaySchedule::new(key);
        day.insert_appointment(test_appointment(9 * 60, 10 * 60, AppointmentStatus::Pending));
        // Query starting exactly where the booking ends — half-open, no hit.
        let query = TimeSlot::new(10 * 60, 11 * 60);
        assert_eq!(day.blocking_overlaps(&query).count(), 0);
    }

    #[test]
    fn shifts_for_orders_and_filters() {
        let mut trainer = TrainerState::new(Ulid::new(), "Ayşe".into(), HashSet::new());
        trainer.shifts.push(Shift {
            id: Ulid::new(),
            weekday: Weekday::Monday,
            slot: TimeSlot::new(14 * 60, 18 * 60),
            active: true,
        });
        trainer.shifts.push(Shift {
            id: Ulid::new(),
            weekday: Weekday::Monday,
            slot: TimeSlot::new(9 * 60, 12 * 60),
            active: true,
        });
        trainer.shifts.push(Shift {
            id: Ulid::new(),
            weekday: Weekday::Monday,
            slot: TimeSlot::new(6 * 60, 8 * 60),
            active: false,
        });
        trainer.shifts.push(Shift {
            id: Ulid::new(),
            weekday: Weekday::Tuesday,
            slot: TimeSlot::new(9 * 60, 12 * 60),
            active: true,
        });

        let monday = trainer.shifts_for(Weekday::Monday);
        let starts: Vec<Minutes> = monday.iter().map(|s| s.slot.start).collect();
        assert_eq!(starts, vec![9 * 60, 14 * 60]);

        assert!(trainer.shifts_for(Weekday::Sunday).is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentBooked {
            appointment: test_appointment(9 * 60, 10 * 60, AppointmentStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
