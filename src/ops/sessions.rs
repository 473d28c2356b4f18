//! Session registry operations: register, heartbeat, end, stale reclaim.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use crate::config::chrono_duration;
use crate::error::{CoreError, Result};
use crate::model::{normalize_labels, Event, EventKind, Session, SessionRole, TaskStatus};
use crate::store::Snapshot;

/// Idempotent registration: an already-known id keeps its `started_at` and
/// current claim, only the metadata and heartbeat are refreshed.
pub fn register(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    role: SessionRole,
    context: String,
    labels: Vec<String>,
) -> Session {
    let labels = normalize_labels(&labels);
    // A claim can outlive its session (graceful hand-off); a session
    // registering under that id adopts the in-flight task.
    let adopted = snap
        .tasks
        .values()
        .find(|t| t.assignee.as_deref() == Some(session_id))
        .map(|t| t.id.clone());
    snap.dirty.sessions = true;
    let session = match snap.sessions.get_mut(session_id) {
        Some(existing) => {
            existing.role = role;
            existing.context = context;
            existing.labels = labels;
            existing.last_heartbeat = now;
            existing.working_on = adopted;
            existing.clone()
        }
        None => {
            let mut session = Session::new(session_id, role, context, labels, now);
            session.working_on = adopted;
            snap.sessions
                .insert(session_id.to_string(), session.clone());
            session
        }
    };
    snap.record(Event::new(
        now,
        EventKind::SessionRegistered,
        session_id,
        json!({ "role": role.as_str() }),
    ));
    session
}

/// Refresh the liveness signal. `last_heartbeat` is monotonic within a
/// session; late-arriving beats never move it backwards. Heartbeats are
/// not history events.
pub fn heartbeat(snap: &mut Snapshot, now: DateTime<Utc>, session_id: &str) -> Result<()> {
    let session = snap.session_mut(session_id)?;
    if now > session.last_heartbeat {
        session.last_heartbeat = now;
    }
    Ok(())
}

/// Remove a session. With `release_tasks` (the default) its claim returns
/// to `open`; without, the task stays `in_progress` for a graceful
/// hand-off.
pub fn end(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    release_tasks: bool,
) -> Result<Vec<String>> {
    if !snap.sessions.contains_key(session_id) {
        return Err(CoreError::NotFound(format!(
            "session '{session_id}' is not registered"
        )));
    }

    let mut released = Vec::new();
    if release_tasks {
        released = release_claims(snap, now, session_id, "Released on session end")?;
    }

    snap.dirty.sessions = true;
    snap.sessions.remove(session_id);
    snap.record(Event::new(
        now,
        EventKind::SessionEnded,
        session_id,
        json!({ "released": released }),
    ));
    Ok(released)
}

/// Sessions whose heartbeat age exceeds `threshold`. This reads the
/// persisted wall-clock timestamps, which is all single mode has; the
/// coordinator detects staleness against monotonic instants and calls
/// [`reclaim`] directly.
pub fn stale_ids(snap: &Snapshot, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
    let threshold = chrono_duration(threshold);
    snap.sessions
        .values()
        .filter(|s| now - s.last_heartbeat > threshold)
        .map(|s| s.session_id.clone())
        .collect()
}

/// End the given sessions and return their claims to the backlog.
pub fn reclaim(snap: &mut Snapshot, now: DateTime<Utc>, ids: &[String]) -> Vec<String> {
    let mut reclaimed = Vec::new();
    for session_id in ids {
        if !snap.sessions.contains_key(session_id) {
            continue;
        }
        warn!(session_id = %session_id, "reclaiming stale session");
        let released = match release_claims(
            snap,
            now,
            session_id,
            &format!("Released from stale session {session_id}"),
        ) {
            Ok(released) => released,
            Err(e) => {
                warn!(session_id = %session_id, err = %e, "failed to release claims");
                continue;
            }
        };
        snap.dirty.sessions = true;
        snap.sessions.remove(session_id);
        snap.record(Event::new(
            now,
            EventKind::SessionReclaimed,
            "system",
            json!({ "session_id": session_id, "released": released }),
        ));
        reclaimed.push(session_id.clone());
    }
    reclaimed
}

/// Detect and reclaim in one pass (single mode and the administrative CLI).
pub fn cleanup(snap: &mut Snapshot, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
    let ids = stale_ids(snap, now, threshold);
    reclaim(snap, now, &ids)
}

fn release_claims(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    note: &str,
) -> Result<Vec<String>> {
    let assigned: Vec<String> = snap
        .tasks
        .values()
        .filter(|t| t.assignee.as_deref() == Some(session_id))
        .map(|t| t.id.clone())
        .collect();
    for task_id in &assigned {
        let task = snap.task_mut(task_id)?;
        task.assignee = None;
        if task.status == TaskStatus::InProgress {
            task.status = TaskStatus::Open;
        }
        task.push_note("system", note, now);
        task.updated_at = now;
    }
    if let Some(session) = snap.sessions.get_mut(session_id) {
        if session.working_on.is_some() {
            session.working_on = None;
            snap.dirty.sessions = true;
        }
    }
    Ok(assigned)
}

/// The operation requires a registered, live session; refreshes its beat.
pub(crate) fn require_live(
    snap: &mut Snapshot,
    session_id: &str,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Result<()> {
    let session = snap.session(session_id)?;
    check_age(session, now, threshold)?;
    heartbeat(snap, now, session_id)
}

/// Sessions unknown to the registry pass (a completion does not require
/// prior registration); known-but-expired sessions fail `Stale`.
pub(crate) fn check_not_stale(
    snap: &Snapshot,
    session_id: &str,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Result<()> {
    match snap.sessions.get(session_id) {
        Some(session) => check_age(session, now, threshold),
        None => Ok(()),
    }
}

/// Refresh the heartbeat of a session if it is registered.
pub(crate) fn touch(snap: &mut Snapshot, session_id: &str, now: DateTime<Utc>) {
    if snap.sessions.contains_key(session_id) {
        let _ = heartbeat(snap, now, session_id);
    }
}

fn check_age(session: &Session, now: DateTime<Utc>, threshold: Duration) -> Result<()> {
    let age = now - session.last_heartbeat;
    if age > chrono_duration(threshold) {
        return Err(CoreError::Stale(format!(
            "session '{}' heartbeat expired {}s ago; re-register to continue",
            session.session_id,
            age.num_seconds()
        )));
    }
    Ok(())
}
