use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::JobId;

/// Queued/started/ended timing triple for one task or workunit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfStat {
    pub queued: Option<DateTime<Utc>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Per-job timing record, persisted in the perf collection and
/// finalized when the job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPerf {
    pub id: JobId,
    pub queued: DateTime<Utc>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Keyed by task id string form.
    #[serde(default)]
    pub ptasks: BTreeMap<String, PerfStat>,
    /// Keyed by workunit id string form.
    #[serde(default)]
    pub pworks: BTreeMap<String, PerfStat>,
}

impl JobPerf {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            queued: Utc::now(),
            start: None,
            end: None,
            ptasks: BTreeMap::new(),
            pworks: BTreeMap::new(),
        }
    }

    pub fn task_stat(&mut self, taskid: &str) -> &mut PerfStat {
        self.ptasks.entry(taskid.to_string()).or_default()
    }

    pub fn work_stat(&mut self, wuid: &str) -> &mut PerfStat {
        self.pworks.entry(wuid.to_string()).or_default()
    }
}
