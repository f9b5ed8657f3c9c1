use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::{ClientId, WuId};
use crate::model::task::{Command, Task, TaskIo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkunitState {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "checked-out")]
    CheckedOut,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "suspend")]
    Suspend,
}

impl WorkunitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkunitState::Queued => "queued",
            WorkunitState::CheckedOut => "checked-out",
            WorkunitState::Completed => "completed",
            WorkunitState::Failed => "failed",
            WorkunitState::Suspend => "suspend",
        }
    }
}

impl std::fmt::Display for WorkunitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atom of dispatch: a single schedulable execution derived from
/// a task's partition. Carries a snapshot of the scheduling fields
/// (priority, client groups) so the queue can order and match without
/// reaching back into the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workunit {
    pub wuid: WuId,
    pub cmd: Command,
    #[serde(default)]
    pub inputs: Vec<TaskIo>,
    #[serde(default)]
    pub outputs: Vec<TaskIo>,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub priority: u8,
    #[serde(default)]
    pub clientgroups: Vec<String>,
    pub state: WorkunitState,
    pub attempts: u32,
    pub maxattempts: u32,
    /// Seconds a checkout may be held before it is reclaimed.
    pub timeout_secs: u64,
    pub client: Option<ClientId>,
    pub checkout_time: Option<DateTime<Utc>>,
    pub submit_time: DateTime<Utc>,
}

impl Workunit {
    /// Derive the workunit of `rank` from a task, snapshotting the
    /// job-level scheduling fields.
    pub fn from_task(
        task: &Task,
        rank: u32,
        priority: u8,
        clientgroups: Vec<String>,
        default_timeout_secs: u64,
    ) -> Self {
        Self {
            wuid: WuId::new(task.taskid.clone(), rank),
            cmd: task.cmd.clone(),
            inputs: task.inputs.clone(),
            outputs: task.outputs.clone(),
            requirements: task.requirements.clone(),
            priority,
            clientgroups,
            state: WorkunitState::Queued,
            attempts: 0,
            maxattempts: task.maxattempts,
            timeout_secs: task.timeout_secs.unwrap_or(default_timeout_secs),
            client: None,
            checkout_time: None,
            submit_time: Utc::now(),
        }
    }
}
