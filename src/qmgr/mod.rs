//! The queue manager: the in-memory authority over active jobs,
//! their workunits and the worker pool.
//!
//! All mutable state sits behind one coarse lock held for the full
//! duration of each top-level operation; persistence writes happen
//! inside the critical section so memory and the durable mirror never
//! diverge across a suspension point. Operations are brief, so coarse
//! locking beats fine-grained here and keeps every transition atomic
//! with its write-through.

pub mod lifecycle;
pub mod sweep;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::error::{QueueError, Result};
use crate::ident::{ClientId, JobId, WuId};
use crate::model::{Client, ClientGroup, Job, JobPerf, Workunit};
use crate::queue::{ClientRegistry, JobRegistry, WorkunitQueue};
use crate::store::gateway::Gateway;
use crate::store::{Cond, Direction, Query, Sort};

/// Everything mutable, guarded by the single QMgr lock.
pub struct QmgrState {
    pub registry: JobRegistry,
    pub queue: WorkunitQueue,
    pub clients: ClientRegistry,
}

pub struct QMgr {
    state: Mutex<QmgrState>,
    gateway: Gateway,
    config: Config,
    next_jid: AtomicU64,
}

/// Job-list selectors accepted by the control surface.
#[derive(Debug, Default)]
pub struct ListParams {
    pub active: bool,
    pub suspend: bool,
    pub registered: bool,
    /// Field -> comma-separated values, matched with set inclusion.
    pub query: HashMap<String, String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub order: Option<String>,
    pub descending: bool,
}

/// Counters served by the queue status endpoint.
#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub jobs: usize,
    pub active_jobs: usize,
    pub suspended_jobs: usize,
    pub queued_workunits: usize,
    pub checked_out_workunits: usize,
    pub clients: usize,
}

impl QMgr {
    pub fn new(gateway: Gateway, config: Config) -> Self {
        Self {
            state: Mutex::new(QmgrState {
                registry: JobRegistry::new(),
                queue: WorkunitQueue::new(),
                clients: ClientRegistry::new(),
            }),
            gateway,
            config,
            next_jid: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub(crate) fn allocate_jid(&self) -> u64 {
        self.next_jid.fetch_add(1, Ordering::SeqCst)
    }

    /// Acquire the QMgr lock within the request deadline. Expiry
    /// makes no state change.
    pub(crate) async fn lock(&self) -> Result<MutexGuard<'_, QmgrState>> {
        tokio::time::timeout(self.config.request_deadline, self.state.lock())
            .await
            .map_err(|_| QueueError::Timeout("queue manager lock".to_string()))
    }

    pub async fn is_job_registered(&self, id: &JobId) -> Result<bool> {
        let state = self.lock().await?;
        Ok(state.registry.is_registered(id))
    }

    /// Load a job from durable storage, annotating whether the queue
    /// currently holds it.
    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        let mut job = self.gateway.load_job(id).await?;
        let state = self.lock().await?;
        job.registered = state.registry.is_registered(id);
        Ok(job)
    }

    pub async fn get_perf(&self, id: &JobId) -> Result<JobPerf> {
        self.gateway.load_perf(id).await
    }

    /// Paginated job listing. The `active`, `suspend` and
    /// `registered` selectors intersect the durable result with the
    /// in-memory registry, so jobs present in the store but lost to
    /// the queue do not masquerade as live.
    pub async fn list_jobs(&self, params: &ListParams) -> Result<(Vec<Job>, usize)> {
        let mut query = Query::new();
        for (field, value) in &params.query {
            let values: Vec<Value> = value.split(',').map(|v| json!(v)).collect();
            query = query.with(field.clone(), Cond::In(values));
        }
        if params.active {
            query = query.with(
                "state",
                Cond::In(vec![json!("queueing"), json!("in-progress")]),
            );
        } else if params.suspend {
            query = query.with("state", Cond::Eq(json!("suspend")));
        }

        let order = params.order.clone().unwrap_or_else(|| "updatetime".to_string());
        let sort = Sort {
            field: order,
            direction: if params.descending {
                Direction::Desc
            } else {
                Direction::Asc
            },
        };
        let limit = params.limit.unwrap_or(self.config.default_page_size);

        if params.active || params.suspend || params.registered {
            // Filter against the registry, paging in memory.
            let (all, _) = self.gateway.find_jobs(&query, Some(&sort), None, 0).await?;
            let state = self.lock().await?;
            let keep: Vec<Job> = all
                .into_iter()
                .filter(|job| {
                    if params.active {
                        state.registry.active_jobs().contains(&job.id)
                    } else if params.suspend {
                        state.registry.suspended_jobs().contains(&job.id)
                    } else {
                        state.registry.is_registered(&job.id)
                    }
                })
                .map(|mut job| {
                    job.registered = true;
                    job
                })
                .collect();
            let total = keep.len();
            let page = keep.into_iter().skip(params.offset).take(limit).collect();
            return Ok((page, total));
        }

        let (mut jobs, total) = self
            .gateway
            .find_jobs(&query, Some(&sort), Some(limit), params.offset)
            .await?;
        let state = self.lock().await?;
        for job in &mut jobs {
            job.registered = state.registry.is_registered(&job.id);
        }
        Ok((jobs, total))
    }

    /// Register a worker. First sight of a group name also creates
    /// the durable clientgroup record.
    pub async fn register_client(
        &self,
        name: String,
        group: String,
        capabilities: Vec<String>,
    ) -> Result<Client> {
        if group.is_empty() {
            return Err(QueueError::bad_request("client group must not be empty"));
        }
        let known = {
            let state = self.lock().await?;
            state.clients.all().iter().any(|c| c.group == group)
        };
        if !known {
            let cg = ClientGroup::new(group.clone(), uuid::Uuid::new_v4().simple().to_string());
            self.gateway.upsert_client_group(&cg).await?;
        }

        let client = Client::new(name, group, capabilities);
        let mut state = self.lock().await?;
        state.clients.register(client.clone());
        Ok(client)
    }

    pub async fn client_heartbeat(&self, id: &ClientId) -> Result<()> {
        let mut state = self.lock().await?;
        state.clients.heartbeat(id)
    }

    pub async fn set_client_suspended(&self, id: &ClientId, suspended: bool) -> Result<()> {
        let mut state = self.lock().await?;
        state.clients.set_suspended(id, suspended)
    }

    /// Explicit worker departure: drop it and requeue its checkouts.
    pub async fn deregister_client(&self, id: &ClientId) -> Result<usize> {
        let mut state = self.lock().await?;
        if state.clients.deregister(id).is_none() {
            return Err(QueueError::not_found(format!("client {}", id)));
        }
        let requeued = state.queue.requeue_from_client(id);
        if !requeued.is_empty() {
            tracing::info!(client = %id, count = requeued.len(), "requeued work from departed client");
        }
        Ok(requeued.len())
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>> {
        let state = self.lock().await?;
        Ok(state.clients.all().into_iter().cloned().collect())
    }

    /// Dispatch decision: hand the head-most eligible workunit to the
    /// calling worker. The eligibility predicate closes over the
    /// locked snapshot, which keeps dispatch deterministic given a
    /// frozen queue.
    pub async fn checkout_work(&self, client_id: &ClientId) -> Result<Workunit> {
        let mut state = self.lock().await?;
        let client = state
            .clients
            .get(client_id)
            .ok_or_else(|| QueueError::not_found(format!("client {}", client_id)))?
            .clone();
        if client.suspended {
            return Err(QueueError::conflict("client is suspended"));
        }
        state.clients.heartbeat(client_id)?;

        let wu = state
            .queue
            .checkout(client_id, |wu| {
                (wu.clientgroups.is_empty() || wu.clientgroups.iter().any(|g| *g == client.group))
                    && client.supports(&wu.requirements)
            })
            .ok_or_else(|| QueueError::not_found("no eligible workunit"))?;

        state.clients.assign(client_id, wu.wuid.clone());
        if let Err(err) = self.on_checkout(&mut state, &wu).await {
            // Undo the dispatch if the write-through failed.
            state.queue.requeue_workunit(&wu.wuid);
            state.clients.unassign(client_id, &wu.wuid);
            return Err(err);
        }
        tracing::info!(wuid = %wu.wuid, client = %client_id, "workunit checked out");
        Ok(wu)
    }

    /// Apply a worker's completion or failure report.
    pub async fn notify_work(&self, wuid: &WuId, client_id: &ClientId, success: bool) -> Result<()> {
        let mut state = self.lock().await?;
        self.handle_notify(&mut state, wuid, client_id, success).await
    }

    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let state = self.lock().await?;
        Ok(QueueStatus {
            jobs: state.registry.len(),
            active_jobs: state.registry.active_jobs().len(),
            suspended_jobs: state.registry.suspended_jobs().len(),
            queued_workunits: state.queue.queued_len(),
            checked_out_workunits: state.queue.checked_out_len(),
            clients: state.clients.len(),
        })
    }

    pub async fn admin_overview(&self, special: &str) -> Result<Vec<Value>> {
        self.gateway.admin_snapshot(special).await
    }
}

