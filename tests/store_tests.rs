mod common;

use std::sync::Arc;

use serde_json::json;

use common::*;
use flowq::error::QueueError;
use flowq::ident::{JobId, TaskUid};
use flowq::model::{Acl, Job, JobInfo, JobState, Task, TaskSpec};
use flowq::store::gateway::Gateway;
use flowq::store::memory::MemStore;
use flowq::store::{Cond, Query, Sort};

fn gateway() -> Gateway {
    let config = test_config();
    Gateway::new(Arc::new(MemStore::new()), &config)
}

fn job_with_task(name: &str) -> Job {
    let id = JobId::generate();
    let task = Task::new(
        TaskUid::new(id.clone(), "", name),
        TaskSpec {
            name: name.to_string(),
            ..TaskSpec::default()
        },
        3,
    );
    Job::new(id, 1, JobInfo::default(), Acl::default(), vec![task])
}

#[tokio::test]
async fn job_round_trips_through_the_store() {
    let gw = gateway();
    let mut job = job_with_task("align");
    job.info.name = "round-trip".to_string();
    gw.upsert_job(&job).await.unwrap();

    let loaded = gw.load_job(&job.id).await.unwrap();
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.info.name, "round-trip");
    assert_eq!(loaded.tasks.len(), 1);
    assert_eq!(loaded.tasks[0].taskid, job.tasks[0].taskid);
}

#[tokio::test]
async fn missing_job_is_not_found() {
    let gw = gateway();
    let err = gw.load_job(&JobId::generate()).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn positional_task_updates_hit_the_right_element() {
    let gw = gateway();
    let job = job_with_task("align");
    let uid = job.tasks[0].taskid.clone();
    gw.upsert_job(&job).await.unwrap();

    gw.update_task_field(&job.id, &uid, "state", json!("queued"))
        .await
        .unwrap();
    gw.increment_task_field(&job.id, &uid, "attempts", 2)
        .await
        .unwrap();

    let state = gw.get_task_field(&job.id, &uid, "state").await.unwrap();
    assert_eq!(state, json!("queued"));
    let attempts = gw.get_task_field(&job.id, &uid, "attempts").await.unwrap();
    assert_eq!(attempts, json!(2));

    let loaded = gw.load_job(&job.id).await.unwrap();
    assert_eq!(loaded.tasks[0].attempts, 2);
}

#[tokio::test]
async fn oversized_documents_are_rejected() {
    let gw = gateway();
    let mut job = job_with_task("big");
    job.notes = "x".repeat(17 * 1024 * 1024);
    let err = gw.upsert_job(&job).await.unwrap_err();
    assert!(matches!(err, QueueError::DocTooLarge(_)));
}

#[tokio::test]
async fn find_jobs_filters_sorts_and_pages() {
    let gw = gateway();
    for (name, jid) in [("a", 3u64), ("b", 1), ("c", 2)] {
        let mut job = job_with_task("t");
        job.jid = jid;
        job.info.name = name.to_string();
        job.state = JobState::Queueing;
        gw.upsert_job(&job).await.unwrap();
    }
    let mut deleted = job_with_task("t");
    deleted.state = JobState::Deleted;
    gw.upsert_job(&deleted).await.unwrap();

    let query = Query::new().with("state", Cond::Eq(json!("queueing")));
    let (page, total) = gw
        .find_jobs(&query, Some(&Sort::asc("jid")), Some(2), 1)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].jid, 2);
    assert_eq!(page[1].jid, 3);
}

#[tokio::test]
async fn admin_snapshot_projects_a_fixed_field_set() {
    let gw = gateway();

    let mut recent = job_with_task("t");
    recent.state = JobState::Completed;
    recent.info.name = "fresh".to_string();
    recent.info.completedtime = Some(chrono::Utc::now());
    gw.upsert_job(&recent).await.unwrap();

    let mut ancient = job_with_task("t");
    ancient.state = JobState::Completed;
    ancient.info.completedtime = Some(chrono::Utc::now() - chrono::Duration::days(90));
    gw.upsert_job(&ancient).await.unwrap();

    let mut live = job_with_task("t");
    live.state = JobState::InProgress;
    gw.upsert_job(&live).await.unwrap();

    let mut gone = job_with_task("t");
    gone.state = JobState::Deleted;
    gw.upsert_job(&gone).await.unwrap();

    let rows = gw.admin_snapshot("info.user").await.unwrap();
    // One recent completion plus one live job; old completions and
    // deleted jobs are excluded.
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert!(row.get("state").is_some());
        assert!(row.get("info").is_some());
        assert!(row.get("id").is_none(), "id is not part of the projection");
        assert!(row.get("acl").is_none());
        let tasks = row.get("tasks").and_then(|t| t.as_array()).unwrap();
        assert!(tasks[0].get("state").is_some());
        assert!(tasks[0].get("cmd").is_none());
    }
}

#[tokio::test]
async fn pushed_tasks_and_workflow_instances_land_in_the_arrays() {
    let gw = gateway();
    let mut job = job_with_task("first");
    gw.upsert_job(&job).await.unwrap();

    let second = Task::new(
        TaskUid::new(job.id.clone(), "sub", "second"),
        TaskSpec {
            name: "second".to_string(),
            ..TaskSpec::default()
        },
        3,
    );
    gw.push_task(&job.id, &second).await.unwrap();

    let wi = flowq::model::WorkflowInstance {
        id: "sub".to_string(),
        remaintasks: 1,
    };
    gw.push_workflow_instance(&job.id, &wi).await.unwrap();
    gw.update_workflow_instance_field(&job.id, "sub", "remaintasks", json!(0))
        .await
        .unwrap();

    job = gw.load_job(&job.id).await.unwrap();
    assert_eq!(job.tasks.len(), 2);
    assert_eq!(job.tasks[1].taskid, second.taskid);
    assert_eq!(job.workflow_instances.len(), 1);
    assert_eq!(job.workflow_instances[0].remaintasks, 0);

    let state = gw
        .get_task_field(&job.id, &second.taskid, "state")
        .await
        .unwrap();
    assert_eq!(state, json!("init"));
}

#[tokio::test]
async fn update_job_state_stamps_completion_time() {
    let gw = gateway();
    let mut job = job_with_task("t");
    job.state = JobState::InProgress;
    gw.upsert_job(&job).await.unwrap();

    gw.update_job_state(&job.id, JobState::Completed, "")
        .await
        .unwrap();
    let loaded = gw.load_job(&job.id).await.unwrap();
    assert_eq!(loaded.state, JobState::Completed);
    assert!(loaded.info.completedtime.is_some());
}

#[tokio::test]
async fn delete_and_perf_cleanup() {
    let gw = gateway();
    let job = job_with_task("t");
    gw.upsert_job(&job).await.unwrap();
    gw.upsert_perf(&flowq::model::JobPerf::new(job.id.clone()))
        .await
        .unwrap();

    let removed = gw
        .delete_jobs(&Query::new().with("id", Cond::Eq(json!(job.id.as_str()))))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(gw.delete_perf(&job.id).await.unwrap(), 1);
    assert!(gw.load_job(&job.id).await.is_err());
}
