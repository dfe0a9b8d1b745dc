use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;
use crate::model::*;

use super::EngineError;

/// Validate raw time bounds and build the slot. Rejects inverted or
/// out-of-day ranges before any `TimeSlot` exists.
pub(crate) fn validate_slot(start: Minutes, end: Minutes) -> Result<TimeSlot, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInput("start time must be before end time"));
    }
    if start < 0 || end > MINUTES_PER_DAY {
        return Err(EngineError::InvalidInput("time range falls outside the day"));
    }
    Ok(TimeSlot::new(start, end))
}

/// Commit-time conflict guard. Must run under the day write lock so the
/// check and the insert form one atomic section.
pub(crate) fn check_no_conflict(
    day: &DaySchedule,
    slot: &TimeSlot,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for existing in day.blocking_overlaps(slot) {
        if exclude == Some(existing.id) {
            continue;
        }
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}

/// Read-side variant: true iff the slot overlaps no non-cancelled booking.
/// `exclude` lets a reschedule ignore the appointment being moved.
pub(crate) fn slot_is_free(day: &DaySchedule, slot: &TimeSlot, exclude: Option<Ulid>) -> bool {
    check_no_conflict(day, slot, exclude).is_ok()
}
