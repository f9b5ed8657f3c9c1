use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::TaskUid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "suspend")]
    Suspend,
    #[serde(rename = "skipped")]
    Skipped,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Init => "init",
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Queued => "queued",
            TaskState::InProgress => "in-progress",
            TaskState::Completed => "completed",
            TaskState::Suspend => "suspend",
            TaskState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command template executed for each workunit of the task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One input or output file of a task. An input whose `origin` is
/// empty is externally available; otherwise `origin` names the task
/// that produces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskIo {
    pub filename: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub size: i64,
}

/// How a task is split into workunits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    /// Number of workunits the task decomposes into (>= 1).
    pub totalwork: u32,
}

impl Default for PartInfo {
    fn default() -> Self {
        Self { totalwork: 1 }
    }
}

/// A named node in the workflow DAG. Tasks reference their owning job
/// only through the embedded [`TaskUid`]; there is no back-pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub taskid: TaskUid,
    pub cmd: Command,
    #[serde(default)]
    pub inputs: Vec<TaskIo>,
    #[serde(default)]
    pub outputs: Vec<TaskIo>,
    #[serde(default)]
    pub partinfo: PartInfo,
    /// Capabilities a client must declare to run this task's work.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Unfinished workunits of this task.
    pub remainwork: u32,
    pub state: TaskState,
    /// Total checkouts consumed by this task's workunits, across
    /// retries.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub maxattempts: u32,
    /// Seconds a checkout may be held before the sweep reclaims it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub createddate: Option<DateTime<Utc>>,
    pub starteddate: Option<DateTime<Utc>>,
    pub completeddate: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(taskid: TaskUid, spec: TaskSpec, default_max_attempts: u32) -> Self {
        let totalwork = spec.totalwork.max(1);
        Self {
            taskid,
            cmd: spec.cmd,
            inputs: spec.inputs,
            outputs: spec.outputs,
            partinfo: PartInfo { totalwork },
            requirements: spec.requirements,
            remainwork: totalwork,
            state: TaskState::Init,
            attempts: 0,
            maxattempts: if spec.maxattempts == 0 {
                default_max_attempts
            } else {
                spec.maxattempts
            },
            timeout_secs: spec.timeout_secs,
            createddate: Some(Utc::now()),
            starteddate: None,
            completeddate: None,
        }
    }

    /// Path-qualified task name, the form input origins refer to.
    pub fn qualified_name(&self) -> String {
        if self.taskid.path.is_empty() {
            self.taskid.name.clone()
        } else {
            format!("{}/{}", self.taskid.path, self.taskid.name)
        }
    }

    /// Names of the tasks this one depends on, derived from input
    /// origins. Duplicates are collapsed.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .inputs
            .iter()
            .filter(|io| !io.origin.is_empty())
            .map(|io| io.origin.as_str())
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Reset to the initial state with all work outstanding, keeping
    /// the template fields. Used by resubmit and recompute.
    pub fn reset(&mut self) {
        self.state = TaskState::Init;
        self.remainwork = self.partinfo.totalwork;
        self.attempts = 0;
        self.starteddate = None;
        self.completeddate = None;
    }
}

/// Per-task portion of a submission document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub cmd: Command,
    #[serde(default)]
    pub inputs: Vec<TaskIo>,
    #[serde(default)]
    pub outputs: Vec<TaskIo>,
    #[serde(default)]
    pub totalwork: u32,
    #[serde(default)]
    pub maxattempts: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub requirements: Vec<String>,
}
