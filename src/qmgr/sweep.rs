//! Periodic background sweeps: stale clients, stale checkouts and
//! expired jobs. Each runs as its own interval loop and drains when
//! the shutdown token fires.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::JobState;
use crate::qmgr::QMgr;
use crate::store::{Cond, Query};

impl QMgr {
    /// Evict clients silent beyond the TTL and requeue whatever they
    /// held. Worker disappearance is not an error to anyone; the
    /// affected workunits simply go back into dispatch.
    pub async fn sweep_stale_clients(&self) -> Result<usize> {
        let mut state = self.lock().await?;
        let evicted = state.clients.evict_stale(self.config().client_ttl);
        for client in &evicted {
            let requeued = state.queue.requeue_from_client(&client.id);
            tracing::warn!(
                client = %client.id,
                group = %client.group,
                requeued = requeued.len(),
                "client evicted after missed heartbeats"
            );
        }
        Ok(evicted.len())
    }

    /// Reclaim checkouts held longer than their task's timeout.
    pub async fn sweep_stale_checkouts(&self) -> Result<usize> {
        let mut state = self.lock().await?;
        let stale = state.queue.stale_checkouts(Utc::now());
        let count = stale.len();
        for (wuid, client) in stale {
            state.queue.requeue_workunit(&wuid);
            state.clients.unassign(&client, &wuid);
            tracing::warn!(wuid = %wuid, client = %client, "checkout timed out, requeued");
        }
        Ok(count)
    }

    /// Purge completed jobs past their expiration, along with their
    /// perf documents.
    pub async fn sweep_expired_jobs(&self) -> Result<usize> {
        let query = Query::new()
            .with("state", Cond::Eq(json!(JobState::Completed.as_str())))
            .with("expiration", Cond::Lt(json!(Utc::now())));
        let (expired, _) = self.gateway().find_jobs(&query, None, None, 0).await?;
        let mut purged = 0;
        for job in expired {
            self.gateway()
                .delete_jobs(&Query::new().with("id", Cond::Eq(json!(job.id.as_str()))))
                .await?;
            self.gateway().delete_perf(&job.id).await?;
            purged += 1;
        }
        if purged > 0 {
            tracing::info!(purged, "expired jobs purged");
        }
        Ok(purged)
    }
}

/// Spawn the three sweep loops. Each stops when the token cancels.
pub fn spawn_sweepers(qmgr: Arc<QMgr>, shutdown: CancellationToken) {
    let intervals = [
        (qmgr.config().client_sweep_interval, Sweep::Clients),
        (qmgr.config().workunit_sweep_interval, Sweep::Checkouts),
        (qmgr.config().expire_sweep_interval, Sweep::Expired),
    ];
    for (period, kind) in intervals {
        let qmgr = qmgr.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let result = match kind {
                    Sweep::Clients => qmgr.sweep_stale_clients().await,
                    Sweep::Checkouts => qmgr.sweep_stale_checkouts().await,
                    Sweep::Expired => qmgr.sweep_expired_jobs().await,
                };
                if let Err(err) = result {
                    tracing::error!(sweep = ?kind, error = %err, "sweep failed");
                }
            }
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum Sweep {
    Clients,
    Checkouts,
    Expired,
}
