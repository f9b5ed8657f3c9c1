//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flowq::config::Config;
use flowq::error::QueueError;
use flowq::model::{Client, JobInfo, JobSpec, TaskIo, TaskSpec, Workunit};
use flowq::qmgr::QMgr;
use flowq::store::gateway::Gateway;
use flowq::store::memory::MemStore;

/// Short timeouts so sweep tests run fast.
pub fn test_config() -> Config {
    Config {
        client_ttl: Duration::from_millis(200),
        checkout_timeout: Duration::from_secs(60),
        max_attempts: 3,
        request_deadline: Duration::from_secs(5),
        ..Config::default()
    }
}

pub async fn new_qmgr() -> (Arc<QMgr>, Arc<MemStore>) {
    new_qmgr_with(test_config()).await
}

pub async fn new_qmgr_with(config: Config) -> (Arc<QMgr>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let gateway = Gateway::new(store.clone(), &config);
    gateway.ensure_indexes().await.unwrap();
    (Arc::new(QMgr::new(gateway, config)), store)
}

/// Attach a second queue manager to the same store, as a restarted
/// process would.
pub fn attach_qmgr(store: Arc<MemStore>) -> Arc<QMgr> {
    let config = test_config();
    let gateway = Gateway::new(store, &config);
    Arc::new(QMgr::new(gateway, config))
}

/// One task depending on the named upstream tasks via input origins.
pub fn task(name: &str, origins: &[&str]) -> TaskSpec {
    TaskSpec {
        name: name.to_string(),
        inputs: origins
            .iter()
            .map(|origin| TaskIo {
                filename: format!("{}.out", origin),
                origin: origin.to_string(),
                ..TaskIo::default()
            })
            .collect(),
        ..TaskSpec::default()
    }
}

/// A linear pipeline: each stage consumes the previous one's output.
pub fn linear_job(name: &str, stages: &[&str]) -> JobSpec {
    let mut tasks = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        let origins: Vec<&str> = if i == 0 { vec![] } else { vec![stages[i - 1]] };
        tasks.push(task(stage, &origins));
    }
    JobSpec {
        info: JobInfo {
            name: name.to_string(),
            user: "tester".to_string(),
            ..JobInfo::default()
        },
        tasks,
        ..JobSpec::default()
    }
}

pub async fn worker(qmgr: &QMgr, group: &str) -> Client {
    qmgr.register_client("worker".to_string(), group.to_string(), Vec::new())
        .await
        .unwrap()
}

/// Checkout that treats an empty queue as `None`.
pub async fn try_checkout(qmgr: &QMgr, client: &Client) -> Option<Workunit> {
    match qmgr.checkout_work(&client.id).await {
        Ok(wu) => Some(wu),
        Err(QueueError::NotFound(_)) => None,
        Err(err) => panic!("checkout failed: {}", err),
    }
}

/// Run every dispatchable workunit to success and return how many
/// were executed.
pub async fn drain(qmgr: &QMgr, client: &Client) -> usize {
    let mut done = 0;
    while let Some(wu) = try_checkout(qmgr, client).await {
        qmgr.notify_work(&wu.wuid, &client.id, true).await.unwrap();
        done += 1;
    }
    done
}
