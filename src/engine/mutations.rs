use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{can_add_event, initial_role, is_role_valid, validate_range};
use super::{Engine, EngineError, WalCommand};

/// Optional changes to one event. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventUpdate {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub role: Option<String>,
    pub user: Option<String>,
}

/// What happened to one requested sub-change of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    NotRequested,
    Applied,
    /// Some day of the new range already holds one event per role.
    SkippedCapacity,
    /// Neither the current nor the other role is free over the range.
    SkippedRoleConflict,
}

impl ChangeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeOutcome::NotRequested => "not_requested",
            ChangeOutcome::Applied => "applied",
            ChangeOutcome::SkippedCapacity => "skipped_capacity",
            ChangeOutcome::SkippedRoleConflict => "skipped_role_conflict",
        }
    }
}

/// Result of `update_event`. Skipped sub-changes do not fail the update;
/// callers that only need success/failure can ignore the outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub event: Event,
    pub dates: ChangeOutcome,
    pub role: ChangeOutcome,
    pub user: ChangeOutcome,
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.is_empty() || value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn record_outcome(field: &'static str, outcome: ChangeOutcome) {
    if outcome != ChangeOutcome::NotRequested {
        metrics::counter!(
            crate::observability::UPDATE_CHANGES_TOTAL,
            "field" => field,
            "outcome" => outcome.label()
        )
        .increment(1);
    }
}

impl Engine {
    // ── Teams and users ──────────────────────────────────────

    pub async fn create_team(&self, slug: &str, name: Option<String>) -> Result<(), EngineError> {
        check_len(slug, MAX_SLUG_LEN, "team slug must be 1..=64 bytes")?;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("team name too long"));
        }
        let _catalog = self.catalog.lock().await;
        if self.state.len() >= MAX_TEAMS {
            return Err(EngineError::LimitExceeded("too many teams"));
        }
        if self.state.contains_key(slug) {
            return Err(EngineError::AlreadyExists(format!("team {slug}")));
        }

        let record = Record::TeamCreated { slug: slug.to_string(), name: name.clone() };
        self.wal_append(&record).await?;
        let ts = TeamState::new(slug.to_string(), name);
        self.state.insert(slug.to_string(), Arc::new(RwLock::new(ts)));
        info!("team {slug} created");
        Ok(())
    }

    /// Delete an empty team. Users and events are never removed implicitly.
    pub async fn delete_team(&self, slug: &str) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let ts = self
            .get_team(slug)
            .ok_or_else(|| EngineError::TeamNotFound(slug.to_string()))?;
        let guard = ts.write().await;
        if !guard.members.is_empty() || !guard.events.is_empty() {
            return Err(EngineError::TeamNotEmpty(slug.to_string()));
        }

        let record = Record::TeamDeleted { slug: slug.to_string() };
        self.wal_append(&record).await?;
        self.state.remove(slug);
        info!("team {slug} deleted");
        Ok(())
    }

    pub async fn add_user(&self, username: &str, team: &str) -> Result<(), EngineError> {
        check_len(username, MAX_USERNAME_LEN, "username must be 1..=64 bytes")?;
        let _catalog = self.catalog.lock().await;
        if let Some(existing) = self.get_team_for_user(username) {
            return Err(EngineError::AlreadyExists(format!("user {username} (team {existing})")));
        }
        let ts = self
            .get_team(team)
            .ok_or_else(|| EngineError::TeamNotFound(team.to_string()))?;
        let mut guard = ts.write().await;
        if guard.members.len() >= MAX_USERS_PER_TEAM {
            return Err(EngineError::LimitExceeded("too many users on team"));
        }

        let record = Record::UserAdded { username: username.to_string(), team: team.to_string() };
        self.persist_and_apply(&mut guard, &record).await?;
        info!("user {username} added to team {team}");
        Ok(())
    }

    /// Remove a user. Events naming the user stay as they are.
    pub async fn remove_user(&self, username: &str) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let team = self
            .get_team_for_user(username)
            .ok_or_else(|| EngineError::UserNotFound(username.to_string()))?;
        let ts = self
            .get_team(&team)
            .ok_or_else(|| EngineError::TeamNotFound(team.clone()))?;
        let mut guard = ts.write().await;

        let record = Record::UserRemoved { username: username.to_string(), team: team.clone() };
        self.persist_and_apply(&mut guard, &record).await?;
        info!("user {username} removed from team {team}");
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────

    /// Book a new on-call event. The role is chosen by the engine: the first
    /// role if the range is free, else the counterpart of the first
    /// overlapping event's role.
    pub async fn create_event(
        &self,
        team: &str,
        user: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Event, EngineError> {
        check_len(user, MAX_USERNAME_LEN, "username must be 1..=64 bytes")?;
        let range = DateRange::from_parts(start, end).ok_or(EngineError::InvalidRange)?;
        validate_range(&range)?;
        let ts = self
            .get_team(team)
            .ok_or_else(|| EngineError::TeamNotFound(team.to_string()))?;
        let mut guard = ts.write().await;
        // delete_team may have won the lock and detached this state.
        if !self.get_team(team).is_some_and(|current| Arc::ptr_eq(&current, &ts)) {
            return Err(EngineError::TeamNotFound(team.to_string()));
        }
        if guard.events.len() >= MAX_EVENTS_PER_TEAM {
            return Err(EngineError::LimitExceeded("too many events on team"));
        }

        let capacity = self.roles.len();
        if !can_add_event(&guard, &range, None, capacity) {
            metrics::counter!(crate::observability::EVENTS_REJECTED_TOTAL).increment(1);
            debug!("event for {user} on team {team} rejected: {range} is full");
            return Err(EngineError::CapacityExceeded {
                team: team.to_string(),
                range,
                capacity,
            });
        }

        let role = initial_role(&guard, &range, &self.roles).to_string();
        let event = Event {
            id: Ulid::new(),
            team: team.to_string(),
            user: user.to_string(),
            role,
            range,
        };
        let record = Record::EventCreated { event: event.clone() };
        self.persist_and_apply(&mut guard, &record).await?;
        metrics::gauge!(crate::observability::EVENTS_ACTIVE).increment(1.0);
        info!(
            "event {} created: {} as {} on team {} for {}",
            event.id, event.user, event.role, event.team, event.range
        );
        Ok(event)
    }

    /// Apply an update in three independent branches, committed once:
    ///
    /// - dates: only when `start` is given (`end` defaults to `start`). Needs
    ///   capacity on every day of the new range; keeps the role if it is still
    ///   free there, else swaps to the other role if that one is free.
    /// - role: checked against the event after the date branch.
    /// - user: always applied, no membership check.
    ///
    /// Failed checks skip their branch and are reported in the outcome only.
    pub async fn update_event(&self, id: Ulid, update: EventUpdate) -> Result<UpdateReport, EngineError> {
        if let Some(ref role) = update.role
            && !self.roles.contains(role)
        {
            return Err(EngineError::UnknownRole(role.clone()));
        }
        if let Some(ref user) = update.user {
            check_len(user, MAX_USERNAME_LEN, "username must be 1..=64 bytes")?;
        }
        let new_range = match update.start {
            Some(start) => {
                let range = DateRange::from_parts(start, update.end).ok_or(EngineError::InvalidRange)?;
                validate_range(&range)?;
                Some(range)
            }
            None => None,
        };

        let mut guard = self.resolve_event_write(&id).await?;
        let current = guard
            .get_event(id)
            .cloned()
            .ok_or(EngineError::EventNotFound(id))?;
        let mut next = current.clone();

        let dates = match new_range {
            None => ChangeOutcome::NotRequested,
            Some(range) if !can_add_event(&guard, &range, Some(id), self.roles.len()) => {
                ChangeOutcome::SkippedCapacity
            }
            Some(range) => {
                if is_role_valid(&guard, id, &next.role, &range) {
                    next.range = range;
                    ChangeOutcome::Applied
                } else {
                    let other = self.roles.other(&next.role);
                    if is_role_valid(&guard, id, other, &range) {
                        next.range = range;
                        next.role = other.to_string();
                        ChangeOutcome::Applied
                    } else {
                        ChangeOutcome::SkippedRoleConflict
                    }
                }
            }
        };

        let role = match update.role {
            None => ChangeOutcome::NotRequested,
            Some(role) if is_role_valid(&guard, id, &role, &next.range) => {
                next.role = role;
                ChangeOutcome::Applied
            }
            Some(_) => ChangeOutcome::SkippedRoleConflict,
        };

        let user = match update.user {
            None => ChangeOutcome::NotRequested,
            Some(user) => {
                next.user = user;
                ChangeOutcome::Applied
            }
        };

        if next != current {
            let record = Record::EventUpdated { event: next.clone() };
            self.persist_and_apply(&mut guard, &record).await?;
        }

        record_outcome("dates", dates);
        record_outcome("role", role);
        record_outcome("user", user);
        debug!(
            "event {id} updated: dates={} role={} user={}",
            dates.label(),
            role.label(),
            user.label()
        );

        Ok(UpdateReport { event: next, dates, role, user })
    }

    pub async fn delete_event(&self, id: Ulid) -> Result<Event, EngineError> {
        let mut guard = self.resolve_event_write(&id).await?;
        let event = guard
            .get_event(id)
            .cloned()
            .ok_or(EngineError::EventNotFound(id))?;
        let record = Record::EventDeleted { id, team: event.team.clone() };
        self.persist_and_apply(&mut guard, &record).await?;
        metrics::gauge!(crate::observability::EVENTS_ACTIVE).decrement(1.0);
        info!("event {id} deleted from team {}", event.team);
        Ok(event)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the records needed to recreate the current state.
    ///
    /// Holds the catalog lock and every team's read lock until the swap is
    /// done, so no write can land between the snapshot and the new file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;

        let mut slugs: Vec<String> = self.state.iter().map(|e| e.key().clone()).collect();
        slugs.sort();

        let mut guards = Vec::with_capacity(slugs.len());
        for slug in &slugs {
            if let Some(ts) = self.get_team(slug) {
                guards.push(ts.read_owned().await);
            }
        }

        let mut records = Vec::new();
        for guard in &guards {
            records.push(Record::TeamCreated {
                slug: guard.slug.clone(),
                name: guard.name.clone(),
            });
            for username in &guard.members {
                records.push(Record::UserAdded {
                    username: username.clone(),
                    team: guard.slug.clone(),
                });
            }
            for event in &guard.events {
                records.push(Record::EventCreated { event: event.clone() });
            }
        }
        let count = records.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);

        info!("WAL compacted to {count} records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
