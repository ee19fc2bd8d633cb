use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{self, effective_range, validate_range};
use super::{Engine, EngineError};

fn query_range(start: NaiveDate, end: Option<NaiveDate>) -> Result<DateRange, EngineError> {
    let range = DateRange::from_parts(start, end).ok_or(EngineError::InvalidRange)?;
    validate_range(&range)?;
    Ok(range)
}

impl Engine {
    /// Events of `team` sharing a day with `[start, end]` (`end` defaults to
    /// `start`), minus `exclude`. An unknown team has no events.
    pub async fn find_overlapping(
        &self,
        team: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Event>, EngineError> {
        let range = query_range(start, end)?;
        let ts = match self.get_team(team) {
            Some(ts) => ts,
            None => return Ok(vec![]),
        };
        let guard = ts.read().await;
        Ok(conflict::find_overlapping(&guard, &range, exclude)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Whether one more event fits on every day of `[start, end]`.
    pub async fn can_add_event(
        &self,
        team: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let range = query_range(start, end)?;
        let ts = match self.get_team(team) {
            Some(ts) => ts,
            None => return Ok(true),
        };
        let guard = ts.read().await;
        Ok(conflict::can_add_event(&guard, &range, exclude, self.roles.len()))
    }

    /// Whether `event_id` could hold `role` over its current range, or over
    /// the override dates when given.
    pub async fn is_role_valid(
        &self,
        event_id: Ulid,
        role: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<bool, EngineError> {
        if !self.roles.contains(role) {
            return Err(EngineError::UnknownRole(role.to_string()));
        }
        let guard = self.resolve_event_read(&event_id).await?;
        let event = guard
            .get_event(event_id)
            .ok_or(EngineError::EventNotFound(event_id))?;
        let range = effective_range(event, start, end)?;
        validate_range(&range)?;
        Ok(conflict::is_role_valid(&guard, event_id, role, &range))
    }

    pub fn other_role<'a>(&'a self, role: &str) -> &'a str {
        self.roles.other(role)
    }

    pub fn list_roles(&self) -> Vec<String> {
        self.roles.names().to_vec()
    }

    pub async fn get_event(&self, event_id: Ulid) -> Option<Event> {
        let guard = self.resolve_event_read(&event_id).await.ok()?;
        guard.get_event(event_id).cloned()
    }

    /// Events of one team, or of every team when `team` is `None`.
    pub async fn list_events(&self, team: Option<&str>) -> Vec<Event> {
        let slugs = match team {
            Some(slug) => vec![slug.to_string()],
            None => self.sorted_slugs(),
        };
        let mut events = Vec::new();
        for slug in slugs {
            if let Some(ts) = self.get_team(&slug) {
                let guard = ts.read().await;
                events.extend(guard.events.iter().cloned());
            }
        }
        events
    }

    pub async fn list_teams(&self) -> Vec<TeamInfo> {
        let mut teams = Vec::new();
        for slug in self.sorted_slugs() {
            if let Some(ts) = self.get_team(&slug) {
                let guard = ts.read().await;
                teams.push(TeamInfo {
                    slug: guard.slug.clone(),
                    name: guard.name.clone(),
                });
            }
        }
        teams
    }

    pub async fn list_members(&self, team: &str) -> Vec<UserInfo> {
        let ts = match self.get_team(team) {
            Some(ts) => ts,
            None => return vec![],
        };
        let guard = ts.read().await;
        guard
            .members
            .iter()
            .map(|username| UserInfo {
                username: username.clone(),
                team: guard.slug.clone(),
            })
            .collect()
    }

    fn sorted_slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.state.iter().map(|e| e.key().clone()).collect();
        slugs.sort();
        slugs
    }
}
