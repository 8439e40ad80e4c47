//! Diff engine — compares two snapshot maps and reports transitions.
//!
//! Pure functions, no I/O. Each job contributes at most one event per call.
//! Events come out sorted by job name.

use chrono::{DateTime, Utc};
use jobwatch_core::types::{SnapshotMap, StatusChangeEvent};

/// Transitions from `old` to `new`, stamped with the current time.
pub fn diff(old: &SnapshotMap, new: &SnapshotMap) -> Vec<StatusChangeEvent> {
    diff_at(old, new, Utc::now())
}

/// Transitions from `old` to `new`:
/// - job absent from `old` → `NEW → status`
/// - status differs (case-insensitive) → `old → new`
/// - same status → nothing
///
/// Jobs that disappeared are not reported; see [`diff_with_removals`].
pub fn diff_at(old: &SnapshotMap, new: &SnapshotMap, timestamp: DateTime<Utc>) -> Vec<StatusChangeEvent> {
    let mut names: Vec<&String> = new.keys().collect();
    names.sort();

    names
        .into_iter()
        .filter_map(|name| {
            let current = &new[name];
            match old.get(name) {
                None => Some(StatusChangeEvent::transition(None, current, timestamp)),
                Some(prev) if !prev.status.same_as(&current.status) => {
                    Some(StatusChangeEvent::transition(Some(prev), current, timestamp))
                }
                Some(_) => None,
            }
        })
        .collect()
}

/// Like [`diff_at`], plus an `old → REMOVED` event for every job present in
/// `old` but missing from `new`.
pub fn diff_with_removals(
    old: &SnapshotMap,
    new: &SnapshotMap,
    timestamp: DateTime<Utc>,
) -> Vec<StatusChangeEvent> {
    let mut events = diff_at(old, new, timestamp);

    let mut gone: Vec<&String> = old.keys().filter(|name| !new.contains_key(*name)).collect();
    gone.sort();
    events.extend(
        gone.into_iter()
            .map(|name| StatusChangeEvent::removed(&old[name], timestamp)),
    );
    events
}
