//! Typed operations on the job, perf and clientgroup collections.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{QueueError, Result};
use crate::ident::{JobId, TaskUid};
use crate::model::{ClientGroup, Job, JobPerf, JobState, Task, WorkflowInstance};
use crate::store::{Cond, DocStore, Query, Sort};

/// Hard document-size cap enforced on every upsert.
pub const DOCUMENT_MAX_BYTES: usize = 16 * 1024 * 1024;

/// Searchable `info.*` fields; one index each.
pub const JOB_INFO_INDEXES: &[&str] = &[
    "name",
    "submittime",
    "completedtime",
    "pipeline",
    "clientgroups",
    "project",
    "user",
    "priority",
];

/// Field set projected by the admin snapshot.
const ADMIN_FIELDS: &[&str] = &[
    "state",
    "info.name",
    "info.submittime",
    "info.startedtime",
    "info.completedtime",
    "info.pipeline",
    "tasks.createddate",
    "tasks.starteddate",
    "tasks.completeddate",
    "tasks.state",
    "tasks.inputs.size",
    "tasks.outputs.size",
];

#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn DocStore>,
    coll_jobs: String,
    coll_perf: String,
    coll_cgs: String,
}

impl Gateway {
    pub fn new(store: Arc<dyn DocStore>, config: &Config) -> Self {
        Self {
            store,
            coll_jobs: config.db_coll_jobs.clone(),
            coll_perf: config.db_coll_perf.clone(),
            coll_cgs: config.db_coll_cgs.clone(),
        }
    }

    /// Create the collection indexes. Called once at startup.
    pub async fn ensure_indexes(&self) -> Result<()> {
        for field in ["acl.owner", "acl.read", "acl.write", "acl.delete"] {
            self.store.ensure_index(&self.coll_jobs, field, false).await?;
        }
        self.store.ensure_index(&self.coll_jobs, "id", true).await?;
        for field in ["state", "expiration", "updatetime"] {
            self.store.ensure_index(&self.coll_jobs, field, false).await?;
        }
        for field in JOB_INFO_INDEXES {
            self.store
                .ensure_index(&self.coll_jobs, &format!("info.{}", field), false)
                .await?;
        }
        self.store.ensure_index(&self.coll_perf, "id", true).await?;
        for field in ["id", "name", "token"] {
            self.store.ensure_index(&self.coll_cgs, field, true).await?;
        }
        Ok(())
    }

    pub async fn upsert_job(&self, job: &Job) -> Result<()> {
        let doc = to_doc(job)?;
        self.store.upsert(&self.coll_jobs, job.id.as_str(), doc).await
    }

    pub async fn upsert_perf(&self, perf: &JobPerf) -> Result<()> {
        let doc = to_doc(perf)?;
        self.store.upsert(&self.coll_perf, perf.id.as_str(), doc).await
    }

    pub async fn upsert_client_group(&self, cg: &ClientGroup) -> Result<()> {
        let doc = to_doc(cg)?;
        self.store.upsert(&self.coll_cgs, &cg.id, doc).await
    }

    pub async fn load_job(&self, id: &JobId) -> Result<Job> {
        let doc = self
            .store
            .find_one(&self.coll_jobs, &by_id(id.as_str()))
            .await?
            .ok_or_else(|| QueueError::not_found(format!("job {}", id)))?;
        from_doc(doc)
    }

    pub async fn load_perf(&self, id: &JobId) -> Result<JobPerf> {
        let doc = self
            .store
            .find_one(&self.coll_perf, &by_id(id.as_str()))
            .await?
            .ok_or_else(|| QueueError::not_found(format!("perf {}", id)))?;
        from_doc(doc)
    }

    pub async fn find_jobs(
        &self,
        query: &Query,
        sort: Option<&Sort>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<(Vec<Job>, usize)> {
        let (docs, total) = self
            .store
            .find(&self.coll_jobs, query, sort, limit, offset)
            .await?;
        let jobs = docs.into_iter().map(from_doc).collect::<Result<_>>()?;
        Ok((jobs, total))
    }

    pub async fn update_job_fields(&self, id: &JobId, set: Vec<(String, Value)>) -> Result<()> {
        let n = self
            .store
            .update_fields(&self.coll_jobs, &by_id(id.as_str()), set)
            .await?;
        if n == 0 {
            return Err(QueueError::not_found(format!("job {}", id)));
        }
        Ok(())
    }

    pub async fn update_job_state(&self, id: &JobId, state: JobState, notes: &str) -> Result<()> {
        let mut set = vec![
            ("state".to_string(), json!(state.as_str())),
            ("notes".to_string(), json!(notes)),
            ("updatetime".to_string(), json!(Utc::now())),
        ];
        if state == JobState::Completed {
            set.push(("info.completedtime".to_string(), json!(Utc::now())));
        }
        self.update_job_fields(id, set).await
    }

    pub async fn update_task_field(
        &self,
        job: &JobId,
        task: &TaskUid,
        field: &str,
        value: Value,
    ) -> Result<()> {
        self.store
            .update_array_element(
                &self.coll_jobs,
                job.as_str(),
                "tasks",
                "taskid",
                &task.to_string(),
                field,
                value,
            )
            .await
    }

    pub async fn increment_task_field(
        &self,
        job: &JobId,
        task: &TaskUid,
        field: &str,
        delta: i64,
    ) -> Result<()> {
        self.store
            .increment_array_element(
                &self.coll_jobs,
                job.as_str(),
                "tasks",
                "taskid",
                &task.to_string(),
                field,
                delta,
            )
            .await
    }

    pub async fn get_task_field(&self, job: &JobId, task: &TaskUid, field: &str) -> Result<Value> {
        self.store
            .get_array_element_field(
                &self.coll_jobs,
                job.as_str(),
                "tasks",
                "taskid",
                &task.to_string(),
                field,
            )
            .await
    }

    pub async fn push_task(&self, job: &JobId, task: &Task) -> Result<()> {
        let doc = to_doc(task)?;
        self.store
            .push(&self.coll_jobs, job.as_str(), "tasks", doc)
            .await
    }

    pub async fn push_workflow_instance(&self, job: &JobId, wi: &WorkflowInstance) -> Result<()> {
        let doc = to_doc(wi)?;
        self.store
            .push(&self.coll_jobs, job.as_str(), "workflow_instances", doc)
            .await
    }

    pub async fn update_workflow_instance_field(
        &self,
        job: &JobId,
        wi_id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        self.store
            .update_array_element(
                &self.coll_jobs,
                job.as_str(),
                "workflow_instances",
                "id",
                wi_id,
                field,
                value,
            )
            .await
    }

    pub async fn delete_jobs(&self, query: &Query) -> Result<u64> {
        self.store.delete_many(&self.coll_jobs, query).await
    }

    pub async fn delete_perf(&self, id: &JobId) -> Result<u64> {
        self.store
            .delete_many(&self.coll_perf, &by_id(id.as_str()))
            .await
    }

    /// Minimal job subset for an admin overview: completed jobs from
    /// the last month plus everything still live, projected to a
    /// fixed field set (optionally extended by `special`).
    pub async fn admin_snapshot(&self, special: &str) -> Result<Vec<Value>> {
        let month_ago = Utc::now() - ChronoDuration::days(30);
        let completed = Query::new()
            .with("state", Cond::Eq(json!("completed")))
            .with("info.completedtime", Cond::Gt(json!(month_ago)));
        let live = Query::new().with(
            "state",
            Cond::NotIn(vec![json!("completed"), json!("deleted")]),
        );

        let (mut docs, _) = self.store.find(&self.coll_jobs, &completed, None, None, 0).await?;
        let (live_docs, _) = self.store.find(&self.coll_jobs, &live, None, None, 0).await?;
        docs.extend(live_docs);

        let mut fields: Vec<&str> = ADMIN_FIELDS.to_vec();
        if !special.is_empty() {
            fields.push(special);
        }
        Ok(docs.iter().map(|doc| project(doc, &fields)).collect())
    }
}

fn by_id(id: &str) -> Query {
    Query::new().with("id", Cond::Eq(json!(id)))
}

fn to_doc<T: Serialize>(value: &T) -> Result<Value> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| QueueError::persistence(format!("serialize: {}", e)))?;
    if bytes.len() >= DOCUMENT_MAX_BYTES {
        return Err(QueueError::DocTooLarge(bytes.len()));
    }
    serde_json::from_slice(&bytes).map_err(|e| QueueError::persistence(format!("decode: {}", e)))
}

fn from_doc<T: DeserializeOwned>(doc: Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| QueueError::persistence(format!("document: {}", e)))
}

/// Copy the named dotted paths out of a document. A path segment that
/// lands on an array is applied to each element, preserving shape.
fn project(doc: &Value, fields: &[&str]) -> Value {
    let mut out = Value::Object(serde_json::Map::new());
    for field in fields {
        let parts: Vec<&str> = field.split('.').collect();
        copy_path(doc, &parts, &mut out);
    }
    out
}

fn copy_path(src: &Value, parts: &[&str], out: &mut Value) {
    let Some((key, rest)) = parts.split_first() else {
        return;
    };
    let Some(value) = src.get(*key) else {
        return;
    };
    let out_map = match out {
        Value::Object(map) => map,
        _ => return,
    };
    if rest.is_empty() {
        out_map.insert(key.to_string(), value.clone());
        return;
    }
    match value {
        Value::Array(elems) => {
            let slot = out_map
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(vec![Value::Object(Default::default()); elems.len()]));
            if let Value::Array(out_elems) = slot {
                for (elem, out_elem) in elems.iter().zip(out_elems.iter_mut()) {
                    copy_path(elem, rest, out_elem);
                }
            }
        }
        Value::Object(_) => {
            let slot = out_map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            copy_path(value, rest, slot);
        }
        _ => {}
    }
}
