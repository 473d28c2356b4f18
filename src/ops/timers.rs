//! Per-task time tracking. Double starts and stray stops are no-ops that
//! return the current state rather than errors.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::Result;
use crate::model::{Event, EventKind, Task};
use crate::store::Snapshot;

use super::TaskTime;

pub fn start_timer(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_id: &str,
) -> Result<Task> {
    {
        let task = snap.task(task_id)?;
        if task.time_tracking.is_running {
            return Ok(task.clone());
        }
    }
    let task = snap.task_mut(task_id)?;
    let tt = &mut task.time_tracking;
    tt.is_running = true;
    tt.is_paused = false;
    tt.started_at = Some(now);
    task.updated_at = now;

    snap.record(Event::new(
        now,
        EventKind::TimerStarted,
        session_id,
        json!({ "task_id": task_id }),
    ));
    Ok(snap.task(task_id)?.clone())
}

pub fn stop_timer(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_id: &str,
) -> Result<Task> {
    {
        let task = snap.task(task_id)?;
        let tt = &task.time_tracking;
        if !tt.is_running && !tt.is_paused {
            return Ok(task.clone());
        }
    }
    let task = snap.task_mut(task_id)?;
    let tt = &mut task.time_tracking;
    let elapsed = elapsed_seconds(tt.started_at, now);
    tt.total_seconds += elapsed;
    tt.is_running = false;
    tt.is_paused = false;
    tt.started_at = None;
    task.updated_at = now;

    snap.record(Event::new(
        now,
        EventKind::TimerStopped,
        session_id,
        json!({ "task_id": task_id, "elapsed_seconds": elapsed }),
    ));
    Ok(snap.task(task_id)?.clone())
}

pub fn pause_timer(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    task_id: &str,
) -> Result<Task> {
    {
        let task = snap.task(task_id)?;
        if !task.time_tracking.is_running {
            return Ok(task.clone());
        }
    }
    let task = snap.task_mut(task_id)?;
    let tt = &mut task.time_tracking;
    let elapsed = elapsed_seconds(tt.started_at, now);
    tt.total_seconds += elapsed;
    tt.is_running = false;
    tt.is_paused = true;
    tt.started_at = None;
    task.updated_at = now;

    snap.record(Event::new(
        now,
        EventKind::TimerPaused,
        session_id,
        json!({ "task_id": task_id, "elapsed_seconds": elapsed }),
    ));
    Ok(snap.task(task_id)?.clone())
}

pub fn task_time(snap: &Snapshot, now: DateTime<Utc>, task_id: &str) -> Result<TaskTime> {
    let task = snap.task(task_id)?;
    let tt = &task.time_tracking;
    Ok(TaskTime {
        total_seconds: tt.total_seconds,
        is_running: tt.is_running,
        is_paused: tt.is_paused,
        current_elapsed_seconds: if tt.is_running {
            elapsed_seconds(tt.started_at, now)
        } else {
            0
        },
    })
}

fn elapsed_seconds(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
    match started_at {
        Some(started) => (now - started).num_seconds().max(0) as u64,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tasks::create_task;
    use crate::ops::NewTask;
    use chrono::Duration;

    fn fixture() -> (Snapshot, String) {
        let mut snap = Snapshot::empty();
        let task = create_task(
            &mut snap,
            Utc::now(),
            "w1",
            NewTask {
                title: "timed".to_string(),
                ..NewTask::default()
            },
        )
        .unwrap();
        (snap, task.id)
    }

    #[test]
    fn double_start_is_a_noop() {
        let (mut snap, id) = fixture();
        let t0 = Utc::now();
        let started = start_timer(&mut snap, t0, "w1", &id).unwrap();
        let again = start_timer(&mut snap, t0 + Duration::seconds(5), "w1", &id).unwrap();
        assert_eq!(again.time_tracking, started.time_tracking);
        // Only one timer event was recorded.
        let timer_events = snap
            .take_events()
            .into_iter()
            .filter(|e| e.kind == EventKind::TimerStarted)
            .count();
        assert_eq!(timer_events, 1);
    }

    #[test]
    fn stop_accumulates_elapsed_time() {
        let (mut snap, id) = fixture();
        let t0 = Utc::now();
        start_timer(&mut snap, t0, "w1", &id).unwrap();
        let stopped = stop_timer(&mut snap, t0 + Duration::seconds(90), "w1", &id).unwrap();
        let tt = &stopped.time_tracking;
        assert_eq!(tt.total_seconds, 90);
        assert!(!tt.is_running);
        assert!(!tt.is_paused);
        assert!(tt.started_at.is_none());
    }

    #[test]
    fn pause_and_resume_keep_the_total() {
        let (mut snap, id) = fixture();
        let t0 = Utc::now();
        start_timer(&mut snap, t0, "w1", &id).unwrap();
        let paused = pause_timer(&mut snap, t0 + Duration::seconds(30), "w1", &id).unwrap();
        assert!(paused.time_tracking.is_paused);
        assert_eq!(paused.time_tracking.total_seconds, 30);

        let resumed = start_timer(&mut snap, t0 + Duration::seconds(60), "w1", &id).unwrap();
        assert!(resumed.time_tracking.is_running);
        assert!(!resumed.time_tracking.is_paused);

        let stopped = stop_timer(&mut snap, t0 + Duration::seconds(100), "w1", &id).unwrap();
        assert_eq!(stopped.time_tracking.total_seconds, 70);
        snap.validate().unwrap();
    }

    #[test]
    fn stop_without_timer_is_a_noop() {
        let (mut snap, id) = fixture();
        let before = snap.tasks[&id].clone();
        let after = stop_timer(&mut snap, Utc::now(), "w1", &id).unwrap();
        assert_eq!(after.time_tracking, before.time_tracking);
    }

    #[test]
    fn task_time_reports_running_elapsed() {
        let (mut snap, id) = fixture();
        let t0 = Utc::now();
        start_timer(&mut snap, t0, "w1", &id).unwrap();
        let report = task_time(&snap, t0 + Duration::seconds(42), &id).unwrap();
        assert!(report.is_running);
        assert_eq!(report.current_elapsed_seconds, 42);
        assert_eq!(report.total_seconds, 0);
    }
}
