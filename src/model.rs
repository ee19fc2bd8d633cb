use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Inclusive calendar range `[start, end]`. Days only, no time or timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange end must not be before start");
        Self { start, end }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Build a range where a missing end means a one-day range.
    /// Returns `None` when `end` falls before `start`.
    pub fn from_parts(start: NaiveDate, end: Option<NaiveDate>) -> Option<Self> {
        let end = end.unwrap_or(start);
        (start <= end).then_some(Self { start, end })
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Two ranges overlap when they share at least one calendar day.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Every day of the range, in order.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..={}", self.start, self.end)
        }
    }
}

/// The ordered pair of role names a team fills each day.
///
/// Capacity per day equals the number of roles. Swapping to "the other role"
/// is only meaningful for a pair, so construction rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSet {
    roles: [String; 2],
}

impl Default for RoleSet {
    fn default() -> Self {
        Self {
            roles: ["Primary".to_string(), "Secondary".to_string()],
        }
    }
}

impl RoleSet {
    pub fn new(names: Vec<String>) -> Result<Self, &'static str> {
        let names: Vec<String> = names.into_iter().map(|n| n.trim().to_string()).collect();
        if names.iter().any(|n| n.is_empty()) {
            return Err("role names must not be empty");
        }
        let roles: [String; 2] = names
            .try_into()
            .map_err(|_| "exactly two roles are supported")?;
        if roles[0] == roles[1] {
            return Err("role names must be distinct");
        }
        Ok(Self { roles })
    }

    /// Parse a comma-separated list such as `Primary,Secondary`.
    pub fn parse(list: &str) -> Result<Self, &'static str> {
        Self::new(list.split(',').map(str::to_string).collect())
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// The role a fresh event gets when nothing overlaps it.
    pub fn first(&self) -> &str {
        &self.roles[0]
    }

    pub fn names(&self) -> &[String] {
        &self.roles
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// The role that is not `role`. A name outside the set maps to the first role.
    pub fn other(&self, role: &str) -> &str {
        if role == self.roles[0] {
            &self.roles[1]
        } else {
            &self.roles[0]
        }
    }
}

/// One on-call shift: a user holding a role for a team over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub team: String,
    pub user: String,
    pub role: String,
    pub range: DateRange,
}

/// Everything the engine keeps for one team. Events are sorted by `range.start`.
#[derive(Debug, Clone)]
pub struct TeamState {
    pub slug: String,
    pub name: Option<String>,
    pub members: BTreeSet<String>,
    pub events: Vec<Event>,
}

impl TeamState {
    pub fn new(slug: String, name: Option<String>) -> Self {
        Self {
            slug,
            name,
            members: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    /// Insert keeping start order. Events with equal starts keep insertion order.
    pub fn insert_event(&mut self, event: Event) {
        let pos = self
            .events
            .partition_point(|e| e.range.start <= event.range.start);
        self.events.insert(pos, event);
    }

    pub fn remove_event(&mut self, id: Ulid) -> Option<Event> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }

    pub fn get_event(&self, id: Ulid) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Events sharing at least one day with `query`.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Event> {
        let right_bound = self.events.partition_point(|e| e.range.start <= query.end);
        let start = query.start;
        self.events[..right_bound]
            .iter()
            .filter(move |e| e.range.end >= start)
    }
}

/// WAL record format. Replaying these in order rebuilds the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    TeamCreated {
        slug: String,
        name: Option<String>,
    },
    TeamDeleted {
        slug: String,
    },
    UserAdded {
        username: String,
        team: String,
    },
    UserRemoved {
        username: String,
        team: String,
    },
    EventCreated {
        event: Event,
    },
    EventUpdated {
        event: Event,
    },
    EventDeleted {
        id: Ulid,
        team: String,
    },
}

impl Record {
    /// Team whose state this record touches.
    pub fn team(&self) -> &str {
        match self {
            Record::TeamCreated { slug, .. } | Record::TeamDeleted { slug } => slug,
            Record::UserAdded { team, .. }
            | Record::UserRemoved { team, .. }
            | Record::EventDeleted { team, .. } => team,
            Record::EventCreated { event } | Record::EventUpdated { event } => &event.team,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamInfo {
    pub slug: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub username: String,
    pub team: String,
}
