use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::JobId;
use crate::model::task::{Task, TaskSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "queueing")]
    Queueing,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "suspend")]
    Suspend,
    #[serde(rename = "deleted")]
    Deleted,
}

impl JobState {
    /// Terminal states are never registered in the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Init => "init",
            JobState::Queueing => "queueing",
            JobState::InProgress => "in-progress",
            JobState::Completed => "completed",
            JobState::Suspend => "suspend",
            JobState::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow metadata carried by every job. The field names double as
/// the searchable `info.*` index set in the job collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pipeline: String,
    #[serde(default)]
    pub description: String,
    /// Scheduling priority, 0 (lowest) through 3 (highest).
    #[serde(default)]
    pub priority: u8,
    /// Client groups this job may be dispatched to. Empty means any.
    #[serde(default)]
    pub clientgroups: Vec<String>,
    pub submittime: Option<DateTime<Utc>>,
    pub startedtime: Option<DateTime<Utc>>,
    pub completedtime: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
}

/// Record of one expanded subworkflow within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    #[serde(default)]
    pub remaintasks: i64,
}

/// A user-submitted workflow execution request: metadata, ACL and an
/// ordered task DAG. The in-memory copy held by the registry is the
/// authoritative one while the job is live; the document store holds
/// a write-through mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Numeric submission index, monotonic per process.
    pub jid: u64,
    pub info: JobInfo,
    #[serde(default)]
    pub acl: Acl,
    pub state: JobState,
    /// Whether the job is currently held by the in-memory registry.
    #[serde(default)]
    pub registered: bool,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub workflow_instances: Vec<WorkflowInstance>,
    /// Opaque data token echoed to workers for payload I/O.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatoken: Option<String>,
    #[serde(default)]
    pub remaintasks: usize,
    #[serde(default)]
    pub notes: String,
    pub expiration: Option<DateTime<Utc>>,
    pub updatetime: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, jid: u64, info: JobInfo, acl: Acl, tasks: Vec<Task>) -> Self {
        let remaintasks = tasks.len();
        Self {
            id,
            jid,
            info,
            acl,
            state: JobState::Init,
            registered: false,
            tasks,
            workflow_instances: Vec::new(),
            datatoken: None,
            remaintasks,
            notes: String::new(),
            expiration: None,
            updatetime: Utc::now(),
        }
    }

    /// Look a task up by its path-qualified name.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.qualified_name() == name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.qualified_name() == name)
    }

    pub fn set_data_token(&mut self, token: String) {
        self.datatoken = Some(token);
    }

    pub fn touch(&mut self) {
        self.updatetime = Utc::now();
    }
}

/// Submission document accepted by the control surface, either with
/// an explicit task list or with a workflow document to lower.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub info: JobInfo,
    #[serde(default)]
    pub acl: Acl,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub workflow: Option<crate::model::cwl::CwlNode>,
}
