//! Job and task state machines.
//!
//! Every transition persists through the gateway inside the QMgr
//! critical section before the in-memory change is applied, so a
//! failed write leaves memory on the pre-transition state.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde_json::json;

use crate::error::{QueueError, Result};
use crate::ident::{ClientId, JobId, TaskUid, WuId};
use crate::model::{Job, JobPerf, JobSpec, JobState, Task, TaskSpec, TaskState, Workunit};
use crate::qmgr::{QMgr, QmgrState};
use crate::queue::NotifyOutcome;
use crate::store::{Cond, Query};

fn qualified(task: &TaskUid) -> String {
    if task.path.is_empty() {
        task.name.clone()
    } else {
        format!("{}/{}", task.path, task.name)
    }
}

/// Reject duplicate task names, unknown input origins and dependency
/// cycles before anything is persisted.
fn check_dag(specs: &[TaskSpec]) -> Result<()> {
    let mut names: HashSet<&str> = HashSet::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(QueueError::bad_request(format!(
                "duplicate task name: {}",
                spec.name
            )));
        }
    }

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    for spec in specs {
        indegree.entry(spec.name.as_str()).or_insert(0);
        let deps: HashSet<&str> = spec
            .inputs
            .iter()
            .filter(|io| !io.origin.is_empty())
            .map(|io| io.origin.as_str())
            .collect();
        for dep in deps {
            if !names.contains(dep) {
                return Err(QueueError::bad_request(format!(
                    "task {} input origin references unknown task {}",
                    spec.name, dep
                )));
            }
            dependents.entry(dep).or_default().push(spec.name.as_str());
            *indegree.entry(spec.name.as_str()).or_insert(0) += 1;
        }
    }

    let mut frontier: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut seen = 0;
    while let Some(name) = frontier.pop_front() {
        seen += 1;
        for dependent in dependents.get(name).into_iter().flatten() {
            let d = indegree.get_mut(dependent).expect("indegree has all tasks");
            *d -= 1;
            if *d == 0 {
                frontier.push_back(dependent);
            }
        }
    }
    if seen != specs.len() {
        return Err(QueueError::bad_request("task dependency graph has a cycle"));
    }
    Ok(())
}

impl QMgr {
    /// Best-effort perf bookkeeping: jobs submitted before the perf
    /// collection existed just skip it.
    async fn update_perf<F>(&self, job_id: &JobId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut JobPerf),
    {
        match self.gateway().load_perf(job_id).await {
            Ok(mut perf) => {
                apply(&mut perf);
                self.gateway().upsert_perf(&perf).await
            }
            Err(QueueError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Register a new job: persist the initial document, allocate the
    /// submission index, transition to queueing and enqueue whatever
    /// is immediately runnable.
    pub async fn submit(&self, spec: JobSpec) -> Result<Job> {
        let JobSpec {
            mut info,
            acl,
            tasks,
            workflow,
        } = spec;

        let task_specs = match workflow {
            Some(node) => node.lower()?,
            None => tasks,
        };
        if task_specs.is_empty() {
            return Err(QueueError::bad_request("job has no tasks"));
        }
        if info.priority > 3 {
            return Err(QueueError::bad_request("priority must be within 0..=3"));
        }
        check_dag(&task_specs)?;

        let id = JobId::generate();
        let jid = self.allocate_jid();
        info.submittime = Some(Utc::now());

        let tasks = task_specs
            .into_iter()
            .map(|spec| {
                let (path, name) = match spec.name.rsplit_once('/') {
                    Some((path, name)) => (path.to_string(), name.to_string()),
                    None => (String::new(), spec.name.clone()),
                };
                Task::new(
                    TaskUid::new(id.clone(), path, name),
                    spec,
                    self.config().max_attempts,
                )
            })
            .collect();

        let mut job = Job::new(id.clone(), jid, info, acl, tasks);
        self.gateway().upsert_job(&job).await?;
        self.gateway().upsert_perf(&JobPerf::new(id.clone())).await?;

        let mut state = self.lock().await?;
        self.gateway()
            .update_job_state(&id, JobState::Queueing, "")
            .await?;
        job.state = JobState::Queueing;
        job.registered = true;
        state.registry.put(job);
        self.activate_ready_tasks(&mut state, &id).await?;

        let job = state.registry.get(&id).expect("registered above").clone();
        tracing::info!(
            job = %job.id, jid = job.jid, name = %job.info.name,
            project = %job.info.project, user = %job.info.user,
            tasks = job.tasks.len(), "job submitted"
        );
        Ok(job)
    }

    /// Move every pending task whose inputs are satisfied into the
    /// dispatch queue, partitioning it into workunits. Tasks that are
    /// waiting on dependencies advance from init to pending.
    pub(crate) async fn activate_ready_tasks(
        &self,
        state: &mut QmgrState,
        job_id: &JobId,
    ) -> Result<usize> {
        let (priority, groups, ready, waiting) = {
            let job = state
                .registry
                .get(job_id)
                .ok_or_else(|| QueueError::not_found(format!("job {} not registered", job_id)))?;
            let finished: HashSet<String> = job
                .tasks
                .iter()
                .filter(|t| t.state.is_finished())
                .map(|t| t.qualified_name())
                .collect();
            let mut ready = Vec::new();
            let mut waiting = Vec::new();
            for task in &job.tasks {
                if !matches!(task.state, TaskState::Init | TaskState::Pending) {
                    continue;
                }
                if task.dependencies().iter().all(|d| finished.contains(*d)) {
                    ready.push(task.clone());
                } else if task.state == TaskState::Init {
                    waiting.push(task.taskid.clone());
                }
            }
            (
                job.info.priority,
                job.info.clientgroups.clone(),
                ready,
                waiting,
            )
        };

        for taskid in waiting {
            self.gateway()
                .update_task_field(job_id, &taskid, "state", json!(TaskState::Pending.as_str()))
                .await?;
            if let Some(task) = state
                .registry
                .get_mut(job_id)
                .and_then(|j| j.tasks.iter_mut().find(|t| t.taskid == taskid))
            {
                task.state = TaskState::Pending;
            }
        }

        let activated = ready.len();
        for task in ready {
            self.gateway()
                .update_task_field(
                    job_id,
                    &task.taskid,
                    "state",
                    json!(TaskState::Queued.as_str()),
                )
                .await?;
            if let Some(t) = state
                .registry
                .get_mut(job_id)
                .and_then(|j| j.tasks.iter_mut().find(|t| t.taskid == task.taskid))
            {
                t.state = TaskState::Queued;
            }
            for rank in 0..task.partinfo.totalwork {
                let wu = Workunit::from_task(
                    &task,
                    rank,
                    priority,
                    groups.clone(),
                    self.config().checkout_timeout.as_secs(),
                );
                state.queue.enqueue(wu)?;
            }
            let now = Utc::now();
            self.update_perf(job_id, |perf| {
                perf.task_stat(&task.taskid.to_string()).queued = Some(now);
            })
            .await?;
            tracing::debug!(task = %task.taskid, total = task.partinfo.totalwork, "task enqueued");
        }
        Ok(activated)
    }

    /// Write-through for a successful checkout: first dispatch of a
    /// job starts it, first dispatch of a task does the same.
    pub(crate) async fn on_checkout(&self, state: &mut QmgrState, wu: &Workunit) -> Result<()> {
        let job_id = wu.wuid.task.job.clone();
        let name = qualified(&wu.wuid.task);
        let now = Utc::now();

        let (job_starts, task_starts) = match state.registry.get(&job_id) {
            Some(job) => (
                job.state == JobState::Queueing,
                job.task(&name).map(|t| t.state == TaskState::Queued).unwrap_or(false),
            ),
            None => return Ok(()),
        };

        if job_starts {
            self.gateway()
                .update_job_fields(
                    &job_id,
                    vec![
                        ("state".to_string(), json!(JobState::InProgress.as_str())),
                        ("info.startedtime".to_string(), json!(now)),
                        ("updatetime".to_string(), json!(now)),
                    ],
                )
                .await?;
        }
        if task_starts {
            self.gateway()
                .update_task_field(
                    &job_id,
                    &wu.wuid.task,
                    "state",
                    json!(TaskState::InProgress.as_str()),
                )
                .await?;
            self.gateway()
                .update_task_field(&job_id, &wu.wuid.task, "starteddate", json!(now))
                .await?;
        }

        if let Some(job) = state.registry.get_mut(&job_id) {
            if job_starts {
                job.state = JobState::InProgress;
                job.info.startedtime = Some(now);
                job.touch();
            }
            if task_starts {
                if let Some(task) = job.task_mut(&name) {
                    task.state = TaskState::InProgress;
                    task.starteddate = Some(now);
                }
            }
        }
        if job_starts {
            state.registry.reindex(&job_id);
        }
        let wuid = wu.wuid.to_string();
        let task = wu.wuid.task.to_string();
        self.update_perf(&job_id, |perf| {
            if job_starts && perf.start.is_none() {
                perf.start = Some(now);
            }
            if task_starts {
                perf.task_stat(&task).start = Some(now);
            }
            perf.work_stat(&wuid).start = Some(now);
        })
        .await
    }

    /// Apply a worker's report. Stale reports (the queue reclaimed or
    /// reassigned the workunit in the meantime) are absorbed.
    pub(crate) async fn handle_notify(
        &self,
        state: &mut QmgrState,
        wuid: &WuId,
        client_id: &ClientId,
        success: bool,
    ) -> Result<()> {
        if state.queue.get(wuid).is_none() {
            return Err(QueueError::not_found(format!("workunit {}", wuid)));
        }
        if !state.queue.owns(client_id, wuid) {
            tracing::warn!(wuid = %wuid, client = %client_id, "discarding stale workunit report");
            state.clients.unassign(client_id, wuid);
            return Ok(());
        }

        let job_id = wuid.task.job.clone();
        if state.registry.get(&job_id).is_none() {
            // Job vanished (deleted mid-flight); drop the leftovers.
            state.queue.delete_job(&job_id);
            state.clients.finish(client_id, wuid, success);
            return Ok(());
        }

        self.gateway()
            .increment_task_field(&job_id, &wuid.task, "attempts", 1)
            .await?;
        if success {
            self.gateway()
                .increment_task_field(&job_id, &wuid.task, "remainwork", -1)
                .await?;
        }

        let outcome = state.queue.notify_done(wuid, client_id, success)?;
        state.clients.finish(client_id, wuid, success);

        let name = qualified(&wuid.task);
        let remain_after = {
            let job = state.registry.get_mut(&job_id).expect("checked above");
            job.touch();
            let task = job
                .task_mut(&name)
                .ok_or_else(|| QueueError::conflict(format!("task {} not in job", name)))?;
            task.attempts += 1;
            if success {
                task.remainwork = task.remainwork.saturating_sub(1);
            }
            task.remainwork
        };

        match outcome {
            NotifyOutcome::Completed { attempts } => {
                tracing::info!(wuid = %wuid, client = %client_id, attempts, "workunit completed");
                let done = wuid.to_string();
                self.update_perf(&job_id, |perf| {
                    perf.work_stat(&done).end = Some(Utc::now());
                })
                .await?;
                if remain_after == 0 {
                    self.finish_task(state, &job_id, wuid.task.clone()).await?;
                }
                Ok(())
            }
            NotifyOutcome::Requeued { attempts } => {
                tracing::info!(wuid = %wuid, client = %client_id, attempts, "workunit failed, requeued");
                Ok(())
            }
            NotifyOutcome::FailedMax { attempts } => {
                tracing::warn!(wuid = %wuid, client = %client_id, attempts, "workunit failed at attempt cap");
                let reason = format!("workunit {} failed {} times", wuid, attempts);
                self.suspend_inner(state, &job_id, &reason).await
            }
            NotifyOutcome::Discarded => Ok(()),
        }
    }

    /// A task ran out of work: complete it, wake its dependents and,
    /// if it was the last one, finalize the job.
    async fn finish_task(&self, state: &mut QmgrState, job_id: &JobId, task: TaskUid) -> Result<()> {
        let now = Utc::now();
        self.gateway()
            .update_task_field(job_id, &task, "state", json!(TaskState::Completed.as_str()))
            .await?;
        self.gateway()
            .update_task_field(job_id, &task, "completeddate", json!(now))
            .await?;

        let name = qualified(&task);
        let remaining = {
            let job = state
                .registry
                .get_mut(job_id)
                .ok_or_else(|| QueueError::not_found(format!("job {}", job_id)))?;
            if let Some(t) = job.task_mut(&name) {
                t.state = TaskState::Completed;
                t.completeddate = Some(now);
            }
            job.remaintasks = job.remaintasks.saturating_sub(1);
            job.remaintasks
        };
        self.gateway()
            .update_job_fields(job_id, vec![("remaintasks".to_string(), json!(remaining))])
            .await?;
        let finished = task.to_string();
        self.update_perf(job_id, |perf| {
            perf.task_stat(&finished).end = Some(now);
        })
        .await?;
        tracing::info!(task = %task, job = %job_id, remaining, "task completed");

        self.activate_ready_tasks(state, job_id).await?;
        if remaining == 0 {
            self.complete_job(state, job_id).await?;
        }
        Ok(())
    }

    async fn complete_job(&self, state: &mut QmgrState, job_id: &JobId) -> Result<()> {
        let expiration = Utc::now() + chrono::Duration::from_std(self.config().expire_wait)
            .unwrap_or_else(|_| chrono::Duration::days(30));
        self.gateway()
            .update_job_state(job_id, JobState::Completed, "")
            .await?;
        self.gateway()
            .update_job_fields(job_id, vec![("expiration".to_string(), json!(expiration))])
            .await?;
        if let Ok(mut perf) = self.gateway().load_perf(job_id).await {
            perf.end = Some(Utc::now());
            self.gateway().upsert_perf(&perf).await?;
        }

        state.queue.delete_job(job_id);
        state.registry.remove(job_id);
        tracing::info!(job = %job_id, "job completed");
        Ok(())
    }

    /// Suspend a live job: idempotent, reason kept in the notes.
    pub async fn suspend_job(&self, id: &JobId, reason: &str) -> Result<()> {
        let mut state = self.lock().await?;
        self.suspend_inner(&mut state, id, reason).await
    }

    pub(crate) async fn suspend_inner(
        &self,
        state: &mut QmgrState,
        id: &JobId,
        reason: &str,
    ) -> Result<()> {
        let job = state
            .registry
            .get(id)
            .ok_or_else(|| QueueError::not_found(format!("job {} not registered", id)))?;
        if job.state == JobState::Suspend {
            return Ok(());
        }

        let live_tasks: Vec<TaskUid> = job
            .tasks
            .iter()
            .filter(|t| {
                matches!(
                    t.state,
                    TaskState::Ready | TaskState::Queued | TaskState::InProgress
                )
            })
            .map(|t| t.taskid.clone())
            .collect();

        self.gateway().update_job_state(id, JobState::Suspend, reason).await?;
        for task in &live_tasks {
            self.gateway()
                .update_task_field(id, task, "state", json!(TaskState::Suspend.as_str()))
                .await?;
        }

        let reclaimed = state.queue.suspend_job(id);
        let job = state.registry.get_mut(id).expect("checked above");
        job.state = JobState::Suspend;
        job.notes = reason.to_string();
        job.touch();
        for task in &live_tasks {
            let name = qualified(task);
            if let Some(t) = job.task_mut(&name) {
                t.state = TaskState::Suspend;
            }
        }
        state.registry.reindex(id);
        tracing::info!(job = %id, reclaimed, reason, "job suspended");
        Ok(())
    }

    /// Resume a suspended job back into dispatch. Resuming a job that
    /// is already running is a no-op.
    pub async fn resume_job(&self, id: &JobId) -> Result<()> {
        let mut state = self.lock().await?;
        self.resume_inner(&mut state, id).await
    }

    pub(crate) async fn resume_inner(&self, state: &mut QmgrState, id: &JobId) -> Result<()> {
        let job = state
            .registry
            .get(id)
            .ok_or_else(|| QueueError::not_found(format!("job {} not registered", id)))?;
        match job.state {
            JobState::Suspend => {}
            JobState::Queueing | JobState::InProgress => return Ok(()),
            other => {
                return Err(QueueError::conflict(format!(
                    "cannot resume job in state {}",
                    other
                )))
            }
        }

        // Suspended tasks whose workunits survived in the queue go
        // straight back to queued; the rest re-enter the readiness
        // scan.
        let mut requeue = Vec::new();
        let mut pending = Vec::new();
        for task in &job.tasks {
            if task.state != TaskState::Suspend {
                continue;
            }
            let has_work = state
                .queue
                .job_workunits(id)
                .iter()
                .any(|wu| wu.wuid.task == task.taskid);
            if has_work {
                requeue.push(task.taskid.clone());
            } else {
                pending.push(task.taskid.clone());
            }
        }

        self.gateway().update_job_state(id, JobState::InProgress, "").await?;
        for task in &requeue {
            self.gateway()
                .update_task_field(id, task, "state", json!(TaskState::Queued.as_str()))
                .await?;
        }
        for task in &pending {
            self.gateway()
                .update_task_field(id, task, "state", json!(TaskState::Pending.as_str()))
                .await?;
        }

        let resumed = state.queue.resume_job(id);
        {
            let job = state.registry.get_mut(id).expect("checked above");
            job.state = JobState::InProgress;
            job.touch();
            for task in requeue.iter().chain(pending.iter()) {
                let target = if requeue.contains(task) {
                    TaskState::Queued
                } else {
                    TaskState::Pending
                };
                let name = qualified(task);
                if let Some(t) = job.task_mut(&name) {
                    t.state = target;
                }
            }
        }
        state.registry.reindex(id);
        self.activate_ready_tasks(state, id).await?;
        tracing::info!(job = %id, workunits = resumed, "job resumed");
        Ok(())
    }

    /// Rebuild a job from its durable document and re-enter it into
    /// the queue, resetting every non-completed task.
    pub async fn resubmit_job(&self, id: &JobId) -> Result<()> {
        let mut state = self.lock().await?;
        if state.registry.is_registered(id) {
            return Err(QueueError::conflict(format!(
                "job {} is registered; suspend and delete it first",
                id
            )));
        }
        let mut job = self.gateway().load_job(id).await?;
        if job.state == JobState::Deleted {
            return Err(QueueError::conflict(format!("job {} is deleted", id)));
        }

        for task in &mut job.tasks {
            if !task.state.is_finished() {
                task.reset();
            }
        }
        job.remaintasks = job.tasks.iter().filter(|t| !t.state.is_finished()).count();
        job.state = JobState::Queueing;
        job.registered = true;
        job.notes.clear();
        job.expiration = None;
        job.touch();

        self.gateway().upsert_job(&job).await?;
        state.registry.put(job);
        self.activate_ready_tasks(&mut state, id).await?;
        tracing::info!(job = %id, "job resubmitted");
        Ok(())
    }

    /// Reset one task and every task downstream of it, preserving
    /// completed upstream work, then re-enqueue what became ready.
    pub async fn recompute_job(&self, id: &JobId, stage: &str) -> Result<()> {
        if stage.is_empty() {
            return Err(QueueError::bad_request(
                "lacking stage from which the recompute starts",
            ));
        }
        let mut state = self.lock().await?;

        let registered = state.registry.get(id).cloned();
        let mut job = match registered {
            Some(job) => job,
            None => self.gateway().load_job(id).await?,
        };
        if job.state == JobState::Deleted {
            return Err(QueueError::conflict(format!("job {} is deleted", id)));
        }
        if job.task(stage).is_none() {
            return Err(QueueError::bad_request(format!(
                "job {} has no task named {}",
                id, stage
            )));
        }

        // Downstream closure over the dependency DAG.
        let mut reset: HashSet<String> = HashSet::new();
        reset.insert(stage.to_string());
        loop {
            let before = reset.len();
            for task in &job.tasks {
                if task.dependencies().iter().any(|d| reset.contains(*d)) {
                    reset.insert(task.qualified_name());
                }
            }
            if reset.len() == before {
                break;
            }
        }

        for task in &mut job.tasks {
            if reset.contains(&task.qualified_name()) {
                state.queue.delete_task(&task.taskid);
                task.reset();
            }
        }
        job.remaintasks = job.tasks.iter().filter(|t| !t.state.is_finished()).count();
        if !matches!(job.state, JobState::InProgress | JobState::Queueing) {
            job.state = JobState::Queueing;
        }
        job.registered = true;
        job.expiration = None;
        job.touch();

        self.gateway().upsert_job(&job).await?;
        state.registry.put(job);
        self.activate_ready_tasks(&mut state, id).await?;
        tracing::info!(job = %id, stage, tasks = reset.len(), "job recompute started");
        Ok(())
    }

    /// Soft-delete: the durable document stays, flagged deleted; the
    /// queue forgets the job entirely.
    pub async fn delete_job(&self, id: &JobId) -> Result<()> {
        let mut state = self.lock().await?;
        self.delete_inner(&mut state, id).await
    }

    pub(crate) async fn delete_inner(&self, state: &mut QmgrState, id: &JobId) -> Result<()> {
        if !state.registry.is_registered(id) {
            // Verify the job exists durably before flagging it.
            self.gateway().load_job(id).await?;
        }
        self.gateway().update_job_state(id, JobState::Deleted, "").await?;
        state.queue.delete_job(id);
        state.registry.remove(id);
        tracing::info!(job = %id, "job deleted");
        Ok(())
    }

    /// Resume every suspended job; returns how many came back.
    pub async fn resume_all_suspended(&self) -> Result<usize> {
        let mut state = self.lock().await?;
        let ids: Vec<JobId> = state.registry.suspended_jobs().iter().cloned().collect();
        let mut resumed = 0;
        for id in ids {
            match self.resume_inner(&mut state, &id).await {
                Ok(()) => resumed += 1,
                Err(err) => tracing::error!(job = %id, error = %err, "resume failed"),
            }
        }
        Ok(resumed)
    }

    /// Delete every suspended job; returns how many went away.
    pub async fn delete_suspended_jobs(&self) -> Result<usize> {
        let mut state = self.lock().await?;
        let ids: Vec<JobId> = state.registry.suspended_jobs().iter().cloned().collect();
        let mut deleted = 0;
        for id in ids {
            match self.delete_inner(&mut state, &id).await {
                Ok(()) => deleted += 1,
                Err(err) => tracing::error!(job = %id, error = %err, "delete failed"),
            }
        }
        Ok(deleted)
    }

    /// A zombie is a durable job in a non-terminal state that the
    /// registry does not hold; flag each one deleted.
    pub async fn delete_zombie_jobs(&self) -> Result<usize> {
        let mut state = self.lock().await?;
        let query = Query::new().with(
            "state",
            Cond::NotIn(vec![
                json!(JobState::Completed.as_str()),
                json!(JobState::Deleted.as_str()),
            ]),
        );
        let (jobs, _) = self.gateway().find_jobs(&query, None, None, 0).await?;
        let mut deleted = 0;
        for job in jobs {
            if state.registry.is_registered(&job.id) {
                continue;
            }
            self.gateway()
                .update_job_state(&job.id, JobState::Deleted, "zombie")
                .await?;
            state.queue.delete_job(&job.id);
            deleted += 1;
        }
        if deleted > 0 {
            tracing::info!(deleted, "zombie jobs removed");
        }
        Ok(deleted)
    }

    /// Point the job at a different client group. Queued workunits
    /// pick the change up immediately.
    pub async fn update_group(&self, id: &JobId, group: &str) -> Result<()> {
        if group.is_empty() {
            return Err(QueueError::bad_request("lacking group name"));
        }
        let mut state = self.lock().await?;
        if !state.registry.is_registered(id) {
            self.gateway().load_job(id).await?;
        }
        let groups = vec![group.to_string()];
        self.gateway()
            .update_job_fields(
                id,
                vec![("info.clientgroups".to_string(), json!(groups.clone()))],
            )
            .await?;
        state.queue.regroup_job(id, &groups);
        if let Some(job) = state.registry.get_mut(id) {
            job.info.clientgroups = groups;
            job.touch();
        }
        Ok(())
    }

    /// Change the job priority; queued workunits are re-sorted,
    /// in-flight ones are unaffected.
    pub async fn update_priority(&self, id: &JobId, priority: u8) -> Result<()> {
        if priority > 3 {
            return Err(QueueError::bad_request("priority must be within 0..=3"));
        }
        let mut state = self.lock().await?;
        if !state.registry.is_registered(id) {
            self.gateway().load_job(id).await?;
        }
        self.gateway()
            .update_job_fields(id, vec![("info.priority".to_string(), json!(priority))])
            .await?;
        state.queue.reprioritize_job(id, priority);
        if let Some(job) = state.registry.get_mut(id) {
            job.info.priority = priority;
            job.touch();
        }
        Ok(())
    }

    /// Store the opaque data token workers use for payload I/O.
    pub async fn set_data_token(&self, id: &JobId, token: &str) -> Result<()> {
        let mut state = self.lock().await?;
        if !state.registry.is_registered(id) {
            self.gateway().load_job(id).await?;
        }
        self.gateway()
            .update_job_fields(id, vec![("datatoken".to_string(), json!(token))])
            .await?;
        if let Some(job) = state.registry.get_mut(id) {
            job.set_data_token(token.to_string());
        }
        Ok(())
    }

    /// Rebuild the in-memory queue from durable state at startup.
    /// Workunits that were checked out when the process died re-enter
    /// the queue (dispatch is at-least-once).
    pub async fn reconcile(&self) -> Result<usize> {
        let mut state = self.lock().await?;
        let query = Query::new().with(
            "state",
            Cond::In(vec![
                json!(JobState::Queueing.as_str()),
                json!(JobState::InProgress.as_str()),
                json!(JobState::Suspend.as_str()),
            ]),
        );
        let (jobs, _) = self.gateway().find_jobs(&query, None, None, 0).await?;
        let mut recovered = 0;
        for mut job in jobs {
            let id = job.id.clone();
            let suspended = job.state == JobState::Suspend;
            let priority = job.info.priority;
            let groups = job.info.clientgroups.clone();

            let mut workunits = Vec::new();
            for task in &mut job.tasks {
                let interrupted = matches!(
                    task.state,
                    TaskState::Ready | TaskState::Queued | TaskState::InProgress
                ) || (suspended && task.state == TaskState::Suspend);
                if !interrupted {
                    continue;
                }
                // Per-rank completion is not durable, so the whole
                // partition runs again.
                task.remainwork = task.partinfo.totalwork;
                if !suspended {
                    task.state = TaskState::Queued;
                }
                for rank in 0..task.partinfo.totalwork {
                    workunits.push(Workunit::from_task(
                        task,
                        rank,
                        priority,
                        groups.clone(),
                        self.config().checkout_timeout.as_secs(),
                    ));
                }
            }
            job.remaintasks = job.tasks.iter().filter(|t| !t.state.is_finished()).count();
            job.registered = true;

            self.gateway().upsert_job(&job).await?;
            state.registry.put(job);
            state.queue.delete_job(&id);
            for wu in workunits {
                state.queue.enqueue(wu)?;
            }
            if suspended {
                state.queue.suspend_job(&id);
            } else {
                self.activate_ready_tasks(&mut state, &id).await?;
            }
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!(recovered, "jobs reconciled from durable store");
        }
        Ok(recovered)
    }
}
