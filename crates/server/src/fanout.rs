use std::sync::Arc;

use server_api::{summary, ApiContext};
use shared::{
    error::ApiError,
    protocol::{CeremonySnapshot, EventEnvelope, GraduatePayload, Overview, ServerEvent},
};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// One state change as seen by displays. Revisions only ever grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub revision: u64,
    pub called: Option<GraduatePayload>,
    pub snapshot: CeremonySnapshot,
    pub overview: Option<Overview>,
}

impl Publication {
    pub fn events(&self) -> Vec<ServerEvent> {
        let mut events = Vec::with_capacity(3);
        if let Some(called) = &self.called {
            events.push(ServerEvent::GraduateCalled(EventEnvelope::success(
                self.revision,
                called.clone(),
            )));
        }
        events.push(ServerEvent::GraduateSummary(EventEnvelope::success(
            self.revision,
            self.snapshot.clone(),
        )));
        events.push(ServerEvent::GraduateOverview(EventEnvelope::success(
            self.revision,
            self.overview.clone(),
        )));
        events
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Arc<Publication>>,
    revision: Arc<Mutex<u64>>,
    upcoming_limit: usize,
}

impl Notifier {
    pub fn new(capacity: usize, upcoming_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            revision: Arc::new(Mutex::new(0)),
            upcoming_limit,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Publication>> {
        self.sender.subscribe()
    }

    /// Snapshot for one subscriber's resync. Takes its own revision, so any
    /// broadcast built before it still queued for that subscriber is stale.
    pub async fn current(&self, api: &ApiContext) -> Result<Publication, ApiError> {
        let mut revision = self.revision.lock().await;
        *revision += 1;
        self.build(api, *revision, None).await
    }

    /// Recomputes the display state and pushes it to every subscriber.
    pub async fn publish(
        &self,
        api: &ApiContext,
        called: Option<GraduatePayload>,
    ) -> Result<u64, ApiError> {
        let mut revision = self.revision.lock().await;
        *revision += 1;
        let publication = self.build(api, *revision, called).await?;
        let receivers = self.sender.send(Arc::new(publication)).unwrap_or(0);
        debug!(revision = *revision, receivers, "published ceremony state");
        Ok(*revision)
    }

    async fn build(
        &self,
        api: &ApiContext,
        revision: u64,
        called: Option<GraduatePayload>,
    ) -> Result<Publication, ApiError> {
        let snapshot = summary::snapshot(api, self.upcoming_limit).await?;
        let overview = summary::overview(api).await?;
        Ok(Publication {
            revision,
            called,
            snapshot,
            overview,
        })
    }
}

/// Per-connection filter: each publication revision is delivered at most
/// once, and never after a newer one.
#[derive(Debug, Default)]
pub struct RevisionGate {
    delivered: Option<u64>,
}

impl RevisionGate {
    pub fn admit(&mut self, revision: u64) -> bool {
        if self.delivered.is_some_and(|delivered| revision <= delivered) {
            return false;
        }
        self.delivered = Some(revision);
        true
    }
}

#[cfg(test)]
#[path = "tests/fanout_tests.rs"]
mod tests;
