//! Composite identifiers for jobs, tasks and workunits.
//!
//! String forms are stable wire contracts: `Display` and `FromStr`
//! are exact inverses for every well-formed identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Opaque server-allocated job identifier, stable across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh id. The simple uuid form contains no `_`,
    /// which task and workunit identifier parsing relies on.
    pub fn generate() -> Self {
        JobId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.contains('_') {
            return Err(QueueError::MalformedId(format!("job id: {:?}", s)));
        }
        Ok(JobId(s.to_string()))
    }
}

/// Task identifier: owning job, workflow path and task name.
///
/// String form is `<job>_<path>/<name>`, where `path` is the
/// `/`-separated chain of subworkflow steps and is omitted (together
/// with its slash) for tasks of the root workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskUid {
    pub job: JobId,
    pub path: String,
    pub name: String,
}

impl TaskUid {
    pub fn new(job: JobId, path: impl Into<String>, name: impl Into<String>) -> Self {
        TaskUid {
            job,
            path: path.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}_{}", self.job, self.name)
        } else {
            write!(f, "{}_{}/{}", self.job, self.path, self.name)
        }
    }
}

impl FromStr for TaskUid {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (job, rest) = s
            .split_once('_')
            .ok_or_else(|| QueueError::MalformedId(format!("task id: {:?}", s)))?;
        if rest.is_empty() {
            return Err(QueueError::MalformedId(format!("task id: {:?}", s)));
        }
        let job: JobId = job.parse()?;
        match rest.rsplit_once('/') {
            Some((path, name)) if !name.is_empty() => Ok(TaskUid::new(job, path, name)),
            Some(_) => Err(QueueError::MalformedId(format!("task id: {:?}", s))),
            None => Ok(TaskUid::new(job, "", rest)),
        }
    }
}

impl Serialize for TaskUid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskUid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Workunit identifier: a task plus the 0-based intra-task rank.
///
/// String form is `<taskuid>_<rank>`; parsing splits on the rightmost
/// `_` to isolate the rank and delegates the remainder to [`TaskUid`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WuId {
    pub task: TaskUid,
    pub rank: u32,
}

impl WuId {
    pub fn new(task: TaskUid, rank: u32) -> Self {
        WuId { task, rank }
    }
}

impl fmt::Display for WuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.task, self.rank)
    }
}

impl FromStr for WuId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rank) = s
            .rsplit_once('_')
            .ok_or_else(|| QueueError::MalformedId(format!("workunit id: {:?}", s)))?;
        let rank: u32 = rank
            .parse()
            .map_err(|_| QueueError::MalformedId(format!("workunit rank: {:?}", s)))?;
        let task: TaskUid = prefix.parse()?;
        Ok(WuId::new(task, rank))
    }
}

impl Serialize for WuId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WuId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Client identifier, allocated by the registry at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        ClientId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(QueueError::MalformedId("client id is empty".to_string()));
        }
        Ok(ClientId(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_uid_round_trip_with_path() {
        let uid = TaskUid::new("job1".parse().unwrap(), "main/align", "bwa");
        let parsed: TaskUid = uid.to_string().parse().unwrap();
        assert_eq!(parsed, uid);
    }

    #[test]
    fn task_uid_round_trip_root() {
        let uid = TaskUid::new("job1".parse().unwrap(), "", "bwa");
        assert_eq!(uid.to_string(), "job1_bwa");
        let parsed: TaskUid = "job1_bwa".parse().unwrap();
        assert_eq!(parsed, uid);
    }

    #[test]
    fn wuid_rank_must_be_integer() {
        let err = "job1_bwa_x".parse::<WuId>().unwrap_err();
        assert!(matches!(err, QueueError::MalformedId(_)));
    }
}
