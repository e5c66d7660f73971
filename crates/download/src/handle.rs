use lectern_catalog::{Progress, Resource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Stops a run and waits for it to wind down.
///
/// Stopping is cooperative: every resource's stop flag is raised and the
/// cancellation token fires, then [`RunHandle::wait`] polls until each
/// resource reports completion. Workers always finish the chunk they are
/// writing.
#[derive(Debug, Clone)]
pub struct RunHandle {
    cancel: CancellationToken,
    registry: Arc<RwLock<Vec<Arc<Progress>>>>,
    poll: Duration,
}

impl RunHandle {
    pub(crate) fn new(cancel: CancellationToken, poll: Duration) -> Self {
        Self { cancel, registry: Arc::default(), poll }
    }

    /// Track the resources of a new run. Progress of earlier runs that has
    /// already completed is forgotten.
    pub(crate) async fn register<'a>(&self, resources: impl IntoIterator<Item = &'a Resource>) {
        let mut registry = self.registry.write().await;
        registry.retain(|p| !p.is_done());
        registry.extend(resources.into_iter().map(|r| Arc::clone(&r.progress)));
        if self.cancel.is_cancelled() {
            registry.iter().for_each(|p| p.request_stop());
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let registry = self.registry.read().await;
        registry.iter().for_each(|p| p.request_stop());
        info!(target: "download", resources = registry.len(), "stop requested");
    }

    /// Every registered resource has reached a terminal state.
    pub async fn is_complete(&self) -> bool {
        self.registry.read().await.iter().all(|p| p.is_done())
    }

    pub async fn wait(&self) {
        while !self.is_complete().await {
            tokio::time::sleep(self.poll).await;
        }
        debug!(target: "download", "all resources complete");
    }

    pub async fn shutdown(&self) {
        self.stop().await;
        self.wait().await;
    }
}
