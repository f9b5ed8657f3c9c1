use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::{ClientId, WuId};

/// A remote worker process that checks out workunits and reports
/// results. Liveness is tracked through `last_seen` heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    #[serde(default)]
    pub name: String,
    pub group: String,
    /// Application names this worker can execute.
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub busy: bool,
    pub suspended: bool,
    pub last_seen: DateTime<Utc>,
    /// Workunits currently checked out to this worker.
    #[serde(default)]
    pub current_work: BTreeSet<WuId>,
    pub total_checkout: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}

impl Client {
    pub fn new(name: String, group: String, capabilities: Vec<String>) -> Self {
        Self {
            id: ClientId::generate(),
            name,
            group,
            capabilities,
            busy: false,
            suspended: false,
            last_seen: Utc::now(),
            current_work: BTreeSet::new(),
            total_checkout: 0,
            total_completed: 0,
            total_failed: 0,
        }
    }

    pub fn heartbeat(&mut self) {
        self.last_seen = Utc::now();
    }

    pub fn is_alive(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_seen);
        age.num_milliseconds() < ttl.as_millis() as i64
    }

    /// Capability check used by the scheduler eligibility predicate.
    pub fn supports(&self, requirements: &[String]) -> bool {
        requirements
            .iter()
            .all(|r| self.capabilities.iter().any(|c| c == r))
    }
}

/// A named pool of clients. Jobs target one or more groups; the group
/// token authenticates workers that enroll under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientGroup {
    pub id: String,
    pub name: String,
    pub token: String,
}

impl ClientGroup {
    pub fn new(name: String, token: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name,
            token,
        }
    }
}
