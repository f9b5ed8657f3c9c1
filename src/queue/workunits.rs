use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::{QueueError, Result};
use crate::ident::{ClientId, JobId, TaskUid, WuId};
use crate::model::{Workunit, WorkunitState};

/// Dispatch ordering: higher priority first, FIFO within a priority
/// band, workunit id as the final tie-break so order is total.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKey {
    priority: u8,
    submitted: DateTime<Utc>,
    wuid: WuId,
}

impl QueueKey {
    fn of(wu: &Workunit) -> Self {
        Self {
            priority: wu.priority,
            submitted: wu.submit_time,
            wuid: wu.wuid.clone(),
        }
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.submitted.cmp(&other.submitted))
            .then_with(|| self.wuid.cmp(&other.wuid))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of a completion/failure notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Workunit done; `attempts` is the total checkouts it took.
    Completed { attempts: u32 },
    /// Failed below the attempt cap and went back into the queue.
    Requeued { attempts: u32 },
    /// Failed at the attempt cap; the owning task must be suspended.
    FailedMax { attempts: u32 },
    /// Stale report from a client that no longer owns the workunit.
    Discarded,
}

/// The dispatch queue. Tracks every live workunit by id and keeps the
/// dispatch structures (`queued` order, checkout table, per-client and
/// per-job sets) consistent; all access runs under the QMgr lock.
#[derive(Debug, Default)]
pub struct WorkunitQueue {
    by_id: HashMap<WuId, Workunit>,
    queued: BTreeSet<QueueKey>,
    checked_out: HashMap<WuId, (ClientId, DateTime<Utc>)>,
    by_client: HashMap<ClientId, HashSet<WuId>>,
    by_job: HashMap<JobId, HashSet<WuId>>,
}

impl WorkunitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly partitioned workunit into all indices.
    pub fn enqueue(&mut self, wu: Workunit) -> Result<()> {
        if wu.state != WorkunitState::Queued {
            return Err(QueueError::conflict(format!(
                "cannot enqueue workunit {} in state {}",
                wu.wuid, wu.state
            )));
        }
        self.queued.insert(QueueKey::of(&wu));
        self.by_job
            .entry(wu.wuid.task.job.clone())
            .or_default()
            .insert(wu.wuid.clone());
        self.by_id.insert(wu.wuid.clone(), wu);
        Ok(())
    }

    /// Scan the queue head-first and hand the first workunit passing
    /// the eligibility predicate to `client`.
    pub fn checkout<F>(&mut self, client: &ClientId, eligible: F) -> Option<Workunit>
    where
        F: Fn(&Workunit) -> bool,
    {
        let key = self
            .queued
            .iter()
            .find(|key| {
                self.by_id
                    .get(&key.wuid)
                    .map(|wu| eligible(wu))
                    .unwrap_or(false)
            })?
            .clone();
        self.queued.remove(&key);

        let now = Utc::now();
        let wu = self.by_id.get_mut(&key.wuid).expect("queued index out of sync");
        wu.state = WorkunitState::CheckedOut;
        wu.client = Some(client.clone());
        wu.checkout_time = Some(now);
        wu.attempts += 1;

        self.checked_out
            .insert(key.wuid.clone(), (client.clone(), now));
        self.by_client
            .entry(client.clone())
            .or_default()
            .insert(key.wuid.clone());
        Some(wu.clone())
    }

    /// Apply a worker's completion/failure report. Reports from
    /// clients that no longer own the workunit are discarded, not
    /// errors: the queue may have legitimately reclaimed the work.
    pub fn notify_done(
        &mut self,
        wuid: &WuId,
        client: &ClientId,
        success: bool,
    ) -> Result<NotifyOutcome> {
        if !self.by_id.contains_key(wuid) {
            return Err(QueueError::not_found(format!("workunit {}", wuid)));
        }
        match self.checked_out.get(wuid) {
            Some((owner, _)) if owner == client => {}
            _ => return Ok(NotifyOutcome::Discarded),
        }

        self.checked_out.remove(wuid);
        if let Some(set) = self.by_client.get_mut(client) {
            set.remove(wuid);
        }

        let wu = self.by_id.get_mut(wuid).expect("checked with contains_key");
        let attempts = wu.attempts;
        if success {
            let job = wu.wuid.task.job.clone();
            self.by_id.remove(wuid);
            if let Some(set) = self.by_job.get_mut(&job) {
                set.remove(wuid);
                if set.is_empty() {
                    self.by_job.remove(&job);
                }
            }
            return Ok(NotifyOutcome::Completed { attempts });
        }

        if attempts < wu.maxattempts {
            wu.state = WorkunitState::Queued;
            wu.client = None;
            wu.checkout_time = None;
            let key = QueueKey::of(wu);
            self.queued.insert(key);
            Ok(NotifyOutcome::Requeued { attempts })
        } else {
            wu.state = WorkunitState::Failed;
            wu.client = None;
            wu.checkout_time = None;
            Ok(NotifyOutcome::FailedMax { attempts })
        }
    }

    /// Return every workunit a departed client held to the queue.
    pub fn requeue_from_client(&mut self, client: &ClientId) -> Vec<WuId> {
        let wuids: Vec<WuId> = self
            .by_client
            .remove(client)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for wuid in &wuids {
            self.checked_out.remove(wuid);
            if let Some(wu) = self.by_id.get_mut(wuid) {
                wu.state = WorkunitState::Queued;
                wu.client = None;
                wu.checkout_time = None;
                self.queued.insert(QueueKey::of(wu));
            }
        }
        wuids
    }

    /// Checkouts held longer than their declared timeout.
    pub fn stale_checkouts(&self, now: DateTime<Utc>) -> Vec<(WuId, ClientId)> {
        self.checked_out
            .iter()
            .filter(|(wuid, (_, since))| {
                let timeout = self
                    .by_id
                    .get(wuid)
                    .map(|wu| wu.timeout_secs)
                    .unwrap_or(0);
                now.signed_duration_since(*since).num_seconds() >= timeout as i64
            })
            .map(|(wuid, (client, _))| (wuid.clone(), client.clone()))
            .collect()
    }

    /// Reclaim one stale checkout. Returns the former owner if the
    /// workunit was indeed checked out.
    pub fn requeue_workunit(&mut self, wuid: &WuId) -> Option<ClientId> {
        let (owner, _) = self.checked_out.remove(wuid)?;
        if let Some(set) = self.by_client.get_mut(&owner) {
            set.remove(wuid);
        }
        if let Some(wu) = self.by_id.get_mut(wuid) {
            wu.state = WorkunitState::Queued;
            wu.client = None;
            wu.checkout_time = None;
            self.queued.insert(QueueKey::of(wu));
        }
        Some(owner)
    }

    /// Mark every workunit of a job suspended and pull it out of the
    /// dispatch structures. Checked-out entries are reclaimed
    /// immediately; late reports for them are discarded.
    pub fn suspend_job(&mut self, job: &JobId) -> usize {
        let wuids: Vec<WuId> = self
            .by_job
            .get(job)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut suspended = 0;
        for wuid in wuids {
            let Some(wu) = self.by_id.get_mut(&wuid) else {
                continue;
            };
            match wu.state {
                WorkunitState::Queued => {
                    self.queued.remove(&QueueKey::of(wu));
                }
                WorkunitState::CheckedOut => {
                    if let Some((owner, _)) = self.checked_out.remove(&wuid) {
                        if let Some(set) = self.by_client.get_mut(&owner) {
                            set.remove(&wuid);
                        }
                    }
                }
                WorkunitState::Failed => {}
                _ => continue,
            }
            wu.state = WorkunitState::Suspend;
            wu.client = None;
            wu.checkout_time = None;
            suspended += 1;
        }
        suspended
    }

    /// Put a suspended job's workunits back into dispatch. Previously
    /// failed ones start over with a clean attempt counter.
    pub fn resume_job(&mut self, job: &JobId) -> usize {
        let wuids: Vec<WuId> = self
            .by_job
            .get(job)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut resumed = 0;
        for wuid in wuids {
            let Some(wu) = self.by_id.get_mut(&wuid) else {
                continue;
            };
            if wu.state != WorkunitState::Suspend {
                continue;
            }
            wu.state = WorkunitState::Queued;
            wu.attempts = 0;
            self.queued.insert(QueueKey::of(wu));
            resumed += 1;
        }
        resumed
    }

    /// Remove one task's workunits from every index (recompute
    /// resets the task and re-partitions later).
    pub fn delete_task(&mut self, task: &TaskUid) -> usize {
        let wuids: Vec<WuId> = self
            .by_job
            .get(&task.job)
            .map(|set| set.iter().filter(|w| &w.task == task).cloned().collect())
            .unwrap_or_default();
        for wuid in &wuids {
            if let Some(wu) = self.by_id.remove(wuid) {
                self.queued.remove(&QueueKey::of(&wu));
            }
            if let Some((owner, _)) = self.checked_out.remove(wuid) {
                if let Some(set) = self.by_client.get_mut(&owner) {
                    set.remove(wuid);
                }
            }
            if let Some(set) = self.by_job.get_mut(&task.job) {
                set.remove(wuid);
            }
        }
        wuids.len()
    }

    /// Remove all traces of a job from every index.
    pub fn delete_job(&mut self, job: &JobId) -> usize {
        let wuids: Vec<WuId> = self
            .by_job
            .remove(job)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for wuid in &wuids {
            if let Some(wu) = self.by_id.remove(wuid) {
                self.queued.remove(&QueueKey::of(&wu));
            }
            if let Some((owner, _)) = self.checked_out.remove(wuid) {
                if let Some(set) = self.by_client.get_mut(&owner) {
                    set.remove(wuid);
                }
            }
        }
        wuids.len()
    }

    /// Apply a new job priority to every workunit of the job,
    /// re-keying the queued ones. In-flight checkouts are unaffected.
    pub fn reprioritize_job(&mut self, job: &JobId, priority: u8) -> usize {
        let wuids: Vec<WuId> = self
            .by_job
            .get(job)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut changed = 0;
        for wuid in wuids {
            let Some(wu) = self.by_id.get_mut(&wuid) else {
                continue;
            };
            if wu.state == WorkunitState::Queued {
                self.queued.remove(&QueueKey::of(wu));
                wu.priority = priority;
                self.queued.insert(QueueKey::of(wu));
            } else {
                wu.priority = priority;
            }
            changed += 1;
        }
        changed
    }

    /// Apply a new client-group target to every workunit of the job.
    pub fn regroup_job(&mut self, job: &JobId, groups: &[String]) {
        let wuids: Vec<WuId> = self
            .by_job
            .get(job)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for wuid in wuids {
            if let Some(wu) = self.by_id.get_mut(&wuid) {
                wu.clientgroups = groups.to_vec();
            }
        }
    }

    pub fn get(&self, wuid: &WuId) -> Option<&Workunit> {
        self.by_id.get(wuid)
    }

    pub fn job_workunits(&self, job: &JobId) -> Vec<&Workunit> {
        self.by_job
            .get(job)
            .map(|set| set.iter().filter_map(|w| self.by_id.get(w)).collect())
            .unwrap_or_default()
    }

    pub fn client_workunits(&self, client: &ClientId) -> Vec<&WuId> {
        self.by_client
            .get(client)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// Is the reporting client the current owner of the checkout?
    pub fn owns(&self, client: &ClientId, wuid: &WuId) -> bool {
        matches!(self.checked_out.get(wuid), Some((owner, _)) if owner == client)
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn checked_out_len(&self) -> usize {
        self.checked_out.len()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
