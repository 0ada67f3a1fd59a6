use crate::backend::{RecordBackend, RecordSnapshot};
use crate::error::Result;
use crate::pending::RecordRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Re-fetches one record after a completed purchase so views show the new owner
#[async_trait]
pub trait ViewRefresher: Send + Sync {
    async fn refresh(&self, record: &RecordRef) -> Result<()>;
}

/// Re-reads the record from the backend and broadcasts the fresh snapshot
pub struct BackendRefresher {
    backend: Arc<dyn RecordBackend>,
    updates: broadcast::Sender<RecordSnapshot>,
}

impl BackendRefresher {
    pub fn new(backend: Arc<dyn RecordBackend>) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self { backend, updates }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordSnapshot> {
        self.updates.subscribe()
    }
}

#[async_trait]
impl ViewRefresher for BackendRefresher {
    async fn refresh(&self, record: &RecordRef) -> Result<()> {
        let snapshot = self.backend.get_record(record).await?;
        debug!("Refreshed {}: status {:?}", record, snapshot.status);
        // No subscribers is fine
        let _ = self.updates.send(snapshot);
        Ok(())
    }
}
