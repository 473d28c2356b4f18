//! End-to-end tests of the agent API against the file-backed store.
//! The same scenarios run over HTTP in `parallel_mode.rs`.

use std::time::Duration;

use claudia::model::{SessionRole, TaskStatus};
use claudia::ops::NewTask;
use claudia::ops::TaskPatch;
use claudia::{Agent, AgentOptions, CoreError, Mode};
use tempfile::TempDir;

async fn worker(dir: &TempDir, session_id: &str, labels: &[&str]) -> Agent {
    let mut agent = Agent::with_options(
        dir.path(),
        AgentOptions {
            session_id: Some(session_id.to_string()),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            ..AgentOptions::default()
        },
    )
    .await
    .unwrap();
    agent
        .register(
            "test session",
            labels.iter().map(|s| s.to_string()).collect(),
            SessionRole::Worker,
        )
        .await
        .unwrap();
    agent
}

fn task(title: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        ..NewTask::default()
    }
}

fn history_lines(dir: &TempDir) -> Vec<serde_json::Value> {
    let path = dir.path().join("history.jsonl");
    if !path.exists() {
        return vec![];
    }
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn connects_in_single_mode_without_sentinel() {
    let dir = TempDir::new().unwrap();
    let agent = Agent::connect(dir.path()).await.unwrap();
    assert_eq!(agent.mode(), Mode::Single);
}

#[tokio::test]
async fn stale_sentinel_falls_back_to_single_mode() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(".parallel-mode"),
        r#"{"port": 1, "main_session": "gone"}"#,
    )
    .unwrap();
    let agent = Agent::connect(dir.path()).await.unwrap();
    assert_eq!(agent.mode(), Mode::Single);
}

#[tokio::test]
async fn create_edit_round_trip() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let created = agent
        .create_task(NewTask {
            title: "write parser".to_string(),
            description: "tokenize input".to_string(),
            priority: Some(1),
            labels: vec!["Backend".to_string()],
            ..NewTask::default()
        })
        .await
        .unwrap();
    assert_eq!(created.id, "task-001");
    assert!(created.labels.contains("backend"));

    let edited = agent
        .edit_task(
            &created.id,
            TaskPatch {
                title: Some("write tokenizer".to_string()),
                priority: Some(0),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();

    let fetched = agent
        .get_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.id == created.id)
        .unwrap();
    assert_eq!(fetched.title, "write tokenizer");
    assert_eq!(fetched.priority, 0);
    assert_eq!(fetched.description, "tokenize input");
    assert_eq!(fetched.updated_at, edited.updated_at);
}

#[tokio::test]
async fn create_with_empty_title_is_invalid() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;
    let err = agent.create_task(task("   ")).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn priority_wins_over_age() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    agent
        .create_task(NewTask {
            priority: Some(2),
            ..task("older")
        })
        .await
        .unwrap();
    agent
        .create_task(NewTask {
            priority: Some(0),
            ..task("newer but critical")
        })
        .await
        .unwrap();

    let claimed = agent.get_next_task(None).await.unwrap().unwrap();
    assert_eq!(claimed.id, "task-002");
}

#[tokio::test]
async fn affinity_breaks_priority_tie() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &["backend"]).await;

    agent
        .create_task(NewTask {
            priority: Some(1),
            labels: vec!["frontend".to_string()],
            ..task("frontend work")
        })
        .await
        .unwrap();
    let backend = agent
        .create_task(NewTask {
            priority: Some(1),
            labels: vec!["backend".to_string()],
            ..task("backend work")
        })
        .await
        .unwrap();

    let claimed = agent.get_next_task(None).await.unwrap().unwrap();
    assert_eq!(claimed.id, backend.id);
}

#[tokio::test]
async fn blocked_by_gates_readiness() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let a = agent.create_task(task("a")).await.unwrap();
    let b = agent
        .create_task(NewTask {
            blocked_by: vec![a.id.clone()],
            ..task("b")
        })
        .await
        .unwrap();

    let first = agent.get_next_task(None).await.unwrap().unwrap();
    assert_eq!(first.id, a.id);
    agent.complete_task(&a.id, "done", None, false).await.unwrap();

    let second = agent.get_next_task(None).await.unwrap().unwrap();
    assert_eq!(second.id, b.id);
}

#[tokio::test]
async fn claim_on_empty_backlog_returns_none() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;
    assert!(agent.get_next_task(None).await.unwrap().is_none());
}

#[tokio::test]
async fn claim_on_fully_blocked_backlog_returns_none() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;
    let a = agent.create_task(task("a")).await.unwrap();
    agent
        .edit_task(
            &a.id,
            TaskPatch {
                status: Some("blocked".to_string()),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(agent.get_next_task(None).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_single_mode_claims_get_distinct_tasks() {
    let dir = TempDir::new().unwrap();
    let a = worker(&dir, "wa", &[]).await;
    let b = worker(&dir, "wb", &[]).await;

    a.create_task(task("only one")).await.unwrap();

    let (ra, rb) = tokio::join!(a.get_next_task(None), b.get_next_task(None));
    let ra = ra.unwrap();
    let rb = rb.unwrap();

    assert!(ra.is_some() != rb.is_some(), "exactly one claim must win");
    let winner = ra.or(rb).unwrap();
    let on_disk = a
        .get_tasks(Some(TaskStatus::InProgress))
        .await
        .unwrap();
    assert_eq!(on_disk.len(), 1);
    assert_eq!(on_disk[0].assignee, winner.assignee);
}

#[tokio::test]
async fn complete_then_reopen_clears_assignee_and_branch() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    agent.create_task(task("a")).await.unwrap();
    let claimed = agent.get_next_task(None).await.unwrap().unwrap();
    agent
        .complete_task(&claimed.id, "shipped", Some("feature/a".to_string()), false)
        .await
        .unwrap();

    let reopened = agent.reopen_task(&claimed.id, None).await.unwrap();
    assert_eq!(reopened.status, TaskStatus::Open);
    assert!(reopened.assignee.is_none());
    assert!(reopened.branch.is_none());
}

#[tokio::test]
async fn every_mutation_appends_one_history_record() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;
    assert_eq!(history_lines(&dir).len(), 1); // registration

    agent.create_task(task("a")).await.unwrap();
    assert_eq!(history_lines(&dir).len(), 2);

    let claimed = agent.get_next_task(None).await.unwrap().unwrap();
    assert_eq!(history_lines(&dir).len(), 3);

    agent
        .complete_task(&claimed.id, "done", None, false)
        .await
        .unwrap();
    assert_eq!(history_lines(&dir).len(), 4);
}

#[tokio::test]
async fn undo_complete_restores_task_and_appends_compensation() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let created = agent.create_task(task("t")).await.unwrap();
    agent
        .complete_task(&created.id, "x", None, false)
        .await
        .unwrap();

    let report = agent.undo_last_action().await.unwrap();
    assert_eq!(report.action, "undo_complete");
    assert_eq!(report.task_id, created.id);

    let restored = agent
        .get_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.id == created.id)
        .unwrap();
    assert_eq!(restored.status, TaskStatus::Open);
    assert!(restored.assignee.is_none());
    assert!(!restored.notes.iter().any(|n| n.note.contains("x")));

    let history = history_lines(&dir);
    assert_eq!(history.last().unwrap()["kind"], "action_undone");
}

#[tokio::test]
async fn undo_with_empty_history_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let agent = Agent::connect(dir.path()).await.unwrap();
    let err = agent.undo_last_action().await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn edit_introducing_cycle_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let a = agent.create_task(task("a")).await.unwrap();
    let b = agent
        .create_task(NewTask {
            blocked_by: vec![a.id.clone()],
            ..task("b")
        })
        .await
        .unwrap();

    let err = agent
        .edit_task(
            &a.id,
            TaskPatch {
                blocked_by: Some(vec![b.id.clone()]),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // The rejected edit must not have been persisted.
    let on_disk = agent
        .get_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.id == a.id)
        .unwrap();
    assert!(on_disk.blocked_by.is_empty());
}

#[tokio::test]
async fn double_start_timer_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let t = agent.create_task(task("timed")).await.unwrap();
    let first = agent.start_timer(&t.id).await.unwrap();
    let second = agent.start_timer(&t.id).await.unwrap();
    assert_eq!(
        first.time_tracking.started_at,
        second.time_tracking.started_at
    );

    let time = agent.get_task_time(&t.id).await.unwrap();
    assert!(time.is_running);
    assert!(!time.is_paused);
}

#[tokio::test]
async fn bulk_complete_reports_mixed_outcomes() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let a = agent.create_task(task("a")).await.unwrap();
    let report = agent
        .bulk_complete(
            vec![a.id.clone(), "task-404".to_string()],
            Some("sweep".to_string()),
            None,
            false,
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![a.id]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "task-404");
    assert_eq!(report.failed[0].kind, "not_found");
}

#[tokio::test]
async fn heartbeat_reclaim_returns_task_to_backlog() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    agent.create_task(task("t")).await.unwrap();
    let claimed = agent.get_next_task(None).await.unwrap().unwrap();

    // Administrative cleanup with a zero threshold reclaims everything.
    let admin = Agent::with_options(
        dir.path(),
        AgentOptions {
            session_id: Some("admin".to_string()),
            ..AgentOptions::default()
        },
    )
    .await
    .unwrap();
    let reclaimed = admin
        .cleanup_stale_sessions(Duration::ZERO)
        .await
        .unwrap();
    assert!(reclaimed.contains(&"w1".to_string()));

    let released = admin
        .get_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.id == claimed.id)
        .unwrap();
    assert_eq!(released.status, TaskStatus::Open);
    assert!(released.assignee.is_none());

    // A fresh session can now claim the released task.
    let next = worker(&dir, "w2", &[]).await;
    let reclaimed_task = next.get_next_task(None).await.unwrap().unwrap();
    assert_eq!(reclaimed_task.id, claimed.id);
}

#[tokio::test]
async fn subtasks_and_progress() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let parent = agent.create_task(task("parent")).await.unwrap();
    let s1 = agent
        .create_subtask(&parent.id, task("step one"))
        .await
        .unwrap();
    agent
        .create_subtask(&parent.id, task("step two"))
        .await
        .unwrap();

    // Parent cannot complete over open subtasks without force.
    let err = agent
        .complete_task(&parent.id, "", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    agent.complete_task(&s1.id, "done", None, false).await.unwrap();
    let progress = agent.get_subtask_progress(&parent.id).await.unwrap();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.done, 1);
    assert_eq!(progress.percentage, 50);

    let children = agent.get_subtasks(&parent.id).await.unwrap();
    assert_eq!(children.len(), 2);
}

#[tokio::test]
async fn delete_with_subtasks_requires_force_and_is_undoable() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let parent = agent.create_task(task("parent")).await.unwrap();
    let child = agent
        .create_subtask(&parent.id, task("child"))
        .await
        .unwrap();

    let err = agent.delete_task(&parent.id, false).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let report = agent.delete_task(&parent.id, true).await.unwrap();
    assert_eq!(report.deleted_subtasks, vec![child.id.clone()]);
    assert!(agent.get_tasks(None).await.unwrap().is_empty());

    let undo = agent.undo_last_action().await.unwrap();
    assert_eq!(undo.action, "undo_delete");
    let ids: Vec<String> = agent
        .get_tasks(None)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert!(ids.contains(&parent.id) && ids.contains(&child.id));
}

#[tokio::test]
async fn template_instantiation_creates_parent_and_subtasks() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let template = agent
        .create_template(
            "release checklist",
            "standard release steps",
            Some(1),
            vec!["release".to_string()],
            vec![
                claudia::model::TemplateSubtask {
                    title: "tag the build".to_string(),
                    description: String::new(),
                },
                claudia::model::TemplateSubtask {
                    title: "update changelog".to_string(),
                    description: String::new(),
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(template.id, "template-001");

    let parent = agent
        .create_from_template(&template.id, "ship v2", None, None, None)
        .await
        .unwrap();
    assert_eq!(parent.priority, 1);
    assert!(parent.labels.contains("release"));
    assert_eq!(parent.subtasks.len(), 2);

    let progress = agent.get_subtask_progress(&parent.id).await.unwrap();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.done, 0);
}

#[tokio::test]
async fn archive_and_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    let t = agent.create_task(task("ancient work")).await.unwrap();
    agent.complete_task(&t.id, "done", None, false).await.unwrap();

    // Nothing is old enough yet.
    let none = agent.archive_tasks(30, false).await.unwrap();
    assert_eq!(none.archived, 0);

    // With a zero-day cutoff the completed task qualifies.
    let report = agent.archive_tasks(-1, false).await.unwrap();
    assert_eq!(report.archived, 1);
    assert!(agent.get_tasks(None).await.unwrap().is_empty());

    let archived = agent.list_archived(10).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].task.id, t.id);

    let restored = agent.restore_from_archive(&t.id).await.unwrap();
    assert_eq!(restored.status, TaskStatus::Open);
    assert_eq!(agent.list_archived(10).await.unwrap().len(), 0);
    assert_eq!(agent.get_tasks(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reloaded_store_equals_in_memory_state() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    agent.create_task(task("a")).await.unwrap();
    let claimed = agent.get_next_task(None).await.unwrap().unwrap();
    agent.add_note(&claimed.id, "progress").await.unwrap();
    let before = agent.get_tasks(None).await.unwrap();

    // A brand-new agent re-reads everything from disk.
    let fresh = Agent::connect(dir.path()).await.unwrap();
    let after = fresh.get_tasks(None).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn status_reports_counts_and_sessions() {
    let dir = TempDir::new().unwrap();
    let agent = worker(&dir, "w1", &[]).await;

    agent.create_task(task("a")).await.unwrap();
    agent.create_task(task("b")).await.unwrap();
    agent.get_next_task(None).await.unwrap().unwrap();

    let status = agent.get_status().await.unwrap();
    assert_eq!(status.mode, "single");
    assert_eq!(status.total_tasks, 2);
    assert_eq!(status.tasks_by_status["in_progress"], 1);
    assert_eq!(status.tasks_by_status["open"], 1);
    assert_eq!(status.ready_tasks, 1);
    assert_eq!(status.active_sessions, 1);
    assert_eq!(status.sessions[0].session_id, "w1");
}
