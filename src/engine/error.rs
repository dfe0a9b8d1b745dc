use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidInput(&'static str),
    InvalidTransition {
        from: AppointmentStatus,
        action: &'static str,
    },
    /// Slot taken by an existing non-cancelled appointment.
    Conflict(Ulid),
    Unauthorized(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} an appointment in status {}", from.label())
            }
            EngineError::Conflict(id) => {
                write!(f, "time slot conflicts with appointment {id}")
            }
            EngineError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
