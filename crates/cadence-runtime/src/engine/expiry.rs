//! Confirmation deadlines.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::InvocationId;
use cadence_events::{
    AppendEvent, EventPayload, InvocationRecord, InvocationStatus, SessionStatus, StoreError,
};
use cadence_hooks::{LifecycleEvent, LifecyclePoint};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ENGINE_ACTOR, InvocationEngine};
use crate::errors::Result;

impl InvocationEngine {
    /// Expire every invocation whose confirmation deadline is at or before
    /// `now`. Returns the ids this call expired.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<InvocationId>> {
        let due = self.store.expired_confirmations(now)?;
        let mut expired = Vec::with_capacity(due.len());
        for record in due {
            let id = record.id.clone();
            match self.expire(record).await {
                Ok(true) => expired.push(id),
                Ok(false) => debug!(invocation = %id, "already moved on, not expired"),
                Err(e) => warn!(invocation = %id, error = %e, "expiry failed"),
            }
        }
        Ok(expired)
    }

    /// Move one suspended invocation to `Expired` and free its session.
    /// Returns `false` if it left `AwaitingConfirmation` concurrently.
    ///
    /// The `Expired` event is committed while the invocation still holds
    /// the session. The status CAS that releases it comes last.
    pub(super) async fn expire(&self, record: InvocationRecord) -> Result<bool> {
        let node = record
            .pending
            .as_ref()
            .map(|p| p.node.clone())
            .unwrap_or_default();

        let mut attempt = 0;
        loop {
            let current = self.store.get_invocation(&record.id)?;
            if current.status != InvocationStatus::AwaitingConfirmation {
                return Ok(false);
            }
            let tail = self.store.last_sequence(&record.session)?;
            let append =
                AppendEvent::new(tail + 1, ENGINE_ACTOR, EventPayload::Expired { node: node.clone() })
                    .invocation(&record.id)
                    .node(node.clone())
                    .status(SessionStatus::Active);
            match self.store.append_event(&record.session, append) {
                Ok(_) => break,
                Err(StoreError::Conflict { expected, actual })
                    if attempt < self.settings.invocation.conflict_retries =>
                {
                    attempt += 1;
                    debug!(invocation = %record.id, expected, actual, attempt, "expiry append conflict");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut updated = self.store.get_invocation(&record.id)?;
        updated.status = InvocationStatus::Expired;
        updated.pending = None;
        updated.updated_at = Utc::now();
        match self
            .store
            .update_invocation(&updated, InvocationStatus::AwaitingConfirmation)
        {
            Ok(()) => {}
            Err(StoreError::StaleInvocation(_)) => {
                warn!(invocation = %record.id, "resumed after expiry was recorded");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        info!(session = %record.session, invocation = %record.id, node = %node, "confirmation expired");
        self.emit(
            LifecycleEvent::new(LifecyclePoint::InvocationExpired, record.session)
                .invocation(&record.id)
                .node(node)
                .detail(json!({ "createdAt": record.created_at })),
        )
        .await;
        Ok(true)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until
    /// `shutdown` fires.
    pub fn spawn_expiry_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => match engine.sweep_expired(Utc::now()).await {
                        Ok(ids) if !ids.is_empty() => info!(count = ids.len(), "expired pending confirmations"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "expiry sweep failed"),
                    },
                }
            }
            debug!("expiry sweeper stopped");
        })
    }
}
