use ulid::Ulid;

use crate::model::DateRange;

#[derive(Debug)]
pub enum EngineError {
    EventNotFound(Ulid),
    TeamNotFound(String),
    UserNotFound(String),
    AlreadyExists(String),
    TeamNotEmpty(String),
    CapacityExceeded {
        team: String,
        range: DateRange,
        capacity: usize,
    },
    UnknownRole(String),
    InvalidRange,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::EventNotFound(id) => write!(f, "event not found: {id}"),
            EngineError::TeamNotFound(slug) => write!(f, "team not found: {slug}"),
            EngineError::UserNotFound(name) => write!(f, "user not found: {name}"),
            EngineError::AlreadyExists(key) => write!(f, "already exists: {key}"),
            EngineError::TeamNotEmpty(slug) => {
                write!(f, "cannot delete team {slug}: it still has users or events")
            }
            EngineError::CapacityExceeded {
                team,
                range,
                capacity,
            } => write!(
                f,
                "team {team} already has {capacity} events on a day in {range}"
            ),
            EngineError::UnknownRole(role) => write!(f, "unknown role: {role}"),
            EngineError::InvalidRange => write!(f, "end date is before start date"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
