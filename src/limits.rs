//! Hard input limits. Anything past these is rejected with `LimitExceeded`.

pub const MAX_TEAMS: usize = 10_000;
pub const MAX_USERS_PER_TEAM: usize = 10_000;
pub const MAX_EVENTS_PER_TEAM: usize = 100_000;

pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_USERNAME_LEN: usize = 64;

/// Widest range a single event or query may cover (about ten years).
pub const MAX_RANGE_DAYS: i64 = 3_660;

/// Largest single WAL entry replay will accept.
pub const MAX_RECORD_BYTES: usize = 1 << 20;
