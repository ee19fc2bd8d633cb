use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    use crate::limits::MAX_RANGE_DAYS;
    if range.num_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

/// Every event of the team sharing a day with `range`, except `exclude`.
///
/// One overlap predicate covers all three cases: events containing the start,
/// events containing the end, and events inside the range. Each event appears
/// once. Order is by event start, ties in insertion order.
pub(crate) fn find_overlapping<'a>(
    ts: &'a TeamState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Vec<&'a Event> {
    ts.overlapping(range)
        .filter(|e| Some(e.id) != exclude)
        .collect()
}

/// Number of events covering each day of `range`, in day order.
pub(crate) fn daily_load(overlapping: &[&Event], range: &DateRange) -> Vec<(NaiveDate, usize)> {
    range
        .days()
        .map(|day| {
            let count = overlapping
                .iter()
                .filter(|e| e.range.contains_day(day))
                .count();
            (day, count)
        })
        .collect()
}

/// False as soon as one day of `range` already holds `capacity` events.
pub(crate) fn can_add_event(
    ts: &TeamState,
    range: &DateRange,
    exclude: Option<Ulid>,
    capacity: usize,
) -> bool {
    let overlapping = find_overlapping(ts, range, exclude);
    daily_load(&overlapping, range)
        .iter()
        .all(|(_, count)| *count < capacity)
}

/// False iff another event overlapping `range` already holds `role`.
pub(crate) fn is_role_valid(ts: &TeamState, event_id: Ulid, role: &str, range: &DateRange) -> bool {
    !find_overlapping(ts, range, Some(event_id))
        .iter()
        .any(|e| e.role == role)
}

/// Role a new event gets: the first role when the range is free, otherwise
/// the counterpart of the first overlapping event's role.
pub(crate) fn initial_role<'r>(ts: &TeamState, range: &DateRange, roles: &'r RoleSet) -> &'r str {
    match find_overlapping(ts, range, None).first() {
        None => roles.first(),
        Some(first) => roles.other(&first.role),
    }
}

/// Range a role check runs over. Overrides win; a lone start means one day,
/// a lone end keeps the event's current start.
pub(crate) fn effective_range(
    event: &Event,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DateRange, EngineError> {
    let range = match (start, end) {
        (None, None) => Some(event.range),
        (Some(s), e) => DateRange::from_parts(s, e),
        (None, Some(e)) => DateRange::from_parts(event.range.start, Some(e)),
    };
    range.ok_or(EngineError::InvalidRange)
}
