use std::collections::{HashMap, HashSet};

use crate::ident::JobId;
use crate::model::{Job, JobState};

/// In-memory index of jobs the queue currently owns, i.e. jobs in
/// states {queueing, in-progress, suspend}. The copy held here is
/// authoritative while the job is live; callers flush changes through
/// the persistence gateway within the same critical section.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
    active: HashSet<JobId>,
    suspended: HashSet<JobId>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job, maintaining the secondary sets from
    /// its state.
    pub fn put(&mut self, job: Job) {
        let id = job.id.clone();
        match job.state {
            JobState::Suspend => {
                self.active.remove(&id);
                self.suspended.insert(id.clone());
            }
            JobState::Queueing | JobState::InProgress => {
                self.suspended.remove(&id);
                self.active.insert(id.clone());
            }
            _ => {
                self.active.remove(&id);
                self.suspended.remove(&id);
            }
        }
        self.jobs.insert(id, job);
    }

    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        self.active.remove(id);
        self.suspended.remove(id);
        self.jobs.remove(id)
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Re-derive the secondary sets after a state change done through
    /// `get_mut`.
    pub fn reindex(&mut self, id: &JobId) {
        if let Some(job) = self.jobs.get(id).cloned() {
            self.put(job);
        }
    }

    pub fn is_registered(&self, id: &JobId) -> bool {
        self.active.contains(id) || self.suspended.contains(id)
    }

    pub fn active_jobs(&self) -> &HashSet<JobId> {
        &self.active
    }

    pub fn suspended_jobs(&self) -> &HashSet<JobId> {
        &self.suspended
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }
}
