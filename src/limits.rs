use crate::model::Minutes;

/// Upper bound (exclusive) for any time-of-day value.
pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Cancellation reasons longer than this are truncated, not rejected.
pub const MAX_CANCELLATION_REASON_CHARS: usize = 100;

pub const MAX_NAME_LEN: usize = 128;

pub const MAX_SERVICES: usize = 1_000;
pub const MAX_TRAINERS: usize = 10_000;
pub const MAX_SHIFTS_PER_TRAINER: usize = 64;
pub const MAX_APPOINTMENTS_PER_DAY: usize = 256;
pub const MAX_SERVICES_PER_TRAINER: usize = 64;
