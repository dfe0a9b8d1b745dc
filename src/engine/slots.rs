use crate::model::*;

// ── Slot Generator ────────────────────────────────────────────────

/// Tile each shift with fixed-size candidate slots and mark the booked ones.
///
/// Slots are contiguous, exactly `duration` minutes wide, and never cross a
/// shift boundary: the last slot of a shift ends at or before `shift.end`.
/// `shifts` must already be in start order (the availability contract);
/// output order follows shift order, ascending within each shift.
///
/// Pure function of its inputs — calling it twice with the same arguments
/// yields identical output.
pub fn enumerate_slots(shifts: &[Shift], duration: Minutes, booked: &[TimeSlot]) -> Vec<SlotStatus> {
    let mut slots = Vec::new();
    if duration <= 0 {
        return slots;
    }

    for shift in shifts {
        let mut t = shift.slot.start;
        while t + duration <= shift.slot.end {
            let candidate = TimeSlot::new(t, t + duration);
            let is_full = booked.iter().any(|b| b.overlaps(&candidate));
            slots.push(SlotStatus { start: t, is_full });
            t += duration;
        }
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Weekday;
    use ulid::Ulid;

    const H: Minutes = 60;

    fn shift(start: Minutes, end: Minutes) -> Shift {
        Shift {
            id: Ulid::new(),
            weekday: Weekday::Monday,
            slot: TimeSlot::new(start, end),
            active: true,
        }
    }

    #[test]
    fn morning_shift_tiles_cleanly() {
        let shifts = [shift(9 * H, 12 * H)];
        let slots = enumerate_slots(&shifts, 60, &[]);
        assert_eq!(
            slots,
            vec![
                SlotStatus { start: 9 * H, is_full: false },
                SlotStatus { start: 10 * H, is_full: false },
                SlotStatus { start: 11 * H, is_full: false },
            ]
        );
    }

    #[test]
    fn booked_slot_marked_full() {
        let shifts = [shift(9 * H, 12 * H)];
        let booked = [TimeSlot::new(10 * H, 11 * H)];
        let slots = enumerate_slots(&shifts, 60, &booked);
        assert_eq!(
            slots,
            vec![
                SlotStatus { start: 9 * H, is_full: false },
                SlotStatus { start: 10 * H, is_full: true },
                SlotStatus { start: 11 * H, is_full: false },
            ]
        );
    }

    #[test]
    fn partial_overlap_marks_full() {
        let shifts = [shift(9 * H, 12 * H)];
        // A 30-minute booking straddling two candidate slots blocks both.
        let booked = [TimeSlot::new(9 * H + 30, 10 * H + 30)];
        let slots = enumerate_slots(&shifts, 60, &booked);
        assert_eq!(
            slots,
            vec![
                SlotStatus { start: 9 * H, is_full: true },
                SlotStatus { start: 10 * H, is_full: true },
                SlotStatus { start: 11 * H, is_full: false },
            ]
        );
    }

    #[test]
    fn slots_never_cross_shift_end() {
        // 90-minute shift, 60-minute service: only one slot fits.
        let shifts = [shift(9 * H, 10 * H + 30)];
        let slots = enumerate_slots(&shifts, 60, &[]);
        assert_eq!(slots, vec![SlotStatus { start: 9 * H, is_full: false }]);
    }

    #[test]
    fn exact_fit_shift() {
        let shifts = [shift(9 * H, 10 * H)];
        let slots = enumerate_slots(&shifts, 60, &[]);
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn shift_too_short_yields_nothing() {
        let shifts = [shift(9 * H, 9 * H + 45)];
        assert!(enumerate_slots(&shifts, 60, &[]).is_empty());
    }

    #[test]
    fn multiple_shifts_concatenate_in_order() {
        let shifts = [shift(9 * H, 11 * H), shift(14 * H, 16 * H)];
        let slots = enumerate_slots(&shifts, 60, &[]);
        let starts: Vec<Minutes> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![9 * H, 10 * H, 14 * H, 15 * H]);
    }

    #[test]
    fn nonstandard_duration() {
        let shifts = [shift(9 * H, 11 * H)];
        let slots = enumerate_slots(&shifts, 45, &[]);
        let starts: Vec<Minutes> = slots.iter().map(|s| s.start).collect();
        // 9:00, 9:45, 10:30 fit; 11:15 would end past the shift.
        assert_eq!(starts, vec![9 * H, 9 * H + 45, 10 * H + 30]);
    }

    #[test]
    fn back_to_back_booking_does_not_leak() {
        let shifts = [shift(9 * H, 12 * H)];
        // Booking ends exactly where the 10:00 slot starts.
        let booked = [TimeSlot::new(9 * H, 10 * H)];
        let slots = enumerate_slots(&shifts, 60, &booked);
        assert_eq!(
            slots,
            vec![
                SlotStatus { start: 9 * H, is_full: true },
                SlotStatus { start: 10 * H, is_full: false },
                SlotStatus { start: 11 * H, is_full: false },
            ]
        );
    }

    #[test]
    fn no_shifts_no_slots() {
        assert!(enumerate_slots(&[], 60, &[]).is_empty());
    }

    #[test]
    fn nonpositive_duration_yields_nothing() {
        let shifts = [shift(9 * H, 12 * H)];
        assert!(enumerate_slots(&shifts, 0, &[]).is_empty());
        assert!(enumerate_slots(&shifts, -15, &[]).is_empty());
    }
}
