use std::sync::{Arc, RwLock};
use std::time::Duration;

use armada_domain::Node;
use armada_store::ClusterStore;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ClusterError;

/// Lease granted by the storage's atomic conditional update.
const LOCK_LEASE: Duration = Duration::from_secs(3 * 60);
/// While a handler runs, the lease is extended this often.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Policy object deciding what to do with a failing node.
#[async_trait]
pub trait Healer: Send + Sync + 'static {
    /// Returns how long the node should stay disabled. Zero leaves it enabled.
    async fn handle_error(&self, node: &Node) -> Duration;
}

/// Disables any failing node for a fixed time.
#[derive(Debug, Clone)]
pub struct DefaultHealer {
    disable_for: Duration,
}

impl DefaultHealer {
    pub fn new(disable_for: Duration) -> Self {
        Self { disable_for }
    }
}

impl Default for DefaultHealer {
    fn default() -> Self {
        Self {
            disable_for: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl Healer for DefaultHealer {
    async fn handle_error(&self, _node: &Node) -> Duration {
        self.disable_for
    }
}

// ── Lock guard ────────────────────────────────────────────────────────────────

/// A held healing lease plus its keep-alive task. Must be released
/// explicitly; the keep-alive stops and the storage record is zeroed.
pub(crate) struct HealingLock {
    storage: Arc<dyn ClusterStore>,
    address: String,
    stop_keepalive: Option<oneshot::Sender<()>>,
}

impl HealingLock {
    pub(crate) async fn release(mut self) {
        if let Some(stop) = self.stop_keepalive.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.storage.unlock_node(&self.address).await {
            warn!(address = %self.address, error = %e, "failed to release healing lock");
        }
    }
}

// ── Healing component ─────────────────────────────────────────────────────────

/// Drives the per-node state machine: acquires the advisory lease, applies
/// the error/success mutators, asks the [`Healer`] for a disablement, and
/// persists the node. Every persistence step is best-effort — failures are
/// logged, never retried.
pub(crate) struct NodeHealing {
    storage: Arc<dyn ClusterStore>,
    healer: RwLock<Arc<dyn Healer>>,
}

impl NodeHealing {
    pub(crate) fn new(storage: Arc<dyn ClusterStore>) -> Self {
        Self {
            storage,
            healer: RwLock::new(Arc::new(DefaultHealer::default())),
        }
    }

    pub(crate) fn set_healer(&self, healer: Arc<dyn Healer>) {
        *self.healer.write().expect("healer lock poisoned") = healer;
    }

    fn current_healer(&self) -> Arc<dyn Healer> {
        self.healer.read().expect("healer lock poisoned").clone()
    }

    /// Acquire the lease or report `HealerInProgress`. On success a
    /// keep-alive task extends the lease until the lock is released.
    async fn lock_with_keepalive(
        &self,
        address: &str,
        is_failure: bool,
    ) -> Result<HealingLock, ClusterError> {
        let acquired = self
            .storage
            .lock_node_for_healing(address, is_failure, LOCK_LEASE)
            .await?;
        if !acquired {
            return Err(ClusterError::HealerInProgress(address.to_string()));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let storage = self.storage.clone();
        let addr = address.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                        // a failed extension is only logged; the lease expires on its own
                        if let Err(e) = storage.extend_node_lock(&addr, LOCK_LEASE).await {
                            debug!(address = %addr, error = %e, "healing lock keep-alive failed");
                        }
                    }
                }
            }
        });

        Ok(HealingLock {
            storage: self.storage.clone(),
            address: address.to_string(),
            stop_keepalive: Some(stop_tx),
        })
    }

    /// Failure path. Returns as soon as the lease is held; the node update
    /// itself runs in its own task.
    pub(crate) async fn handle_node_error(
        &self,
        address: String,
        failure: String,
        increment_failures: bool,
    ) -> Result<(), ClusterError> {
        let lock = self.lock_with_keepalive(&address, true).await?;
        let storage = self.storage.clone();
        let healer = self.current_healer();
        tokio::spawn(async move {
            match storage.retrieve_node(&address).await {
                Ok(mut node) => {
                    node.update_error(failure, increment_failures);
                    let disable_for = healer.handle_error(&node).await;
                    if !disable_for.is_zero() {
                        match chrono::Duration::from_std(disable_for) {
                            Ok(delta) => node.update_disabled(Utc::now() + delta),
                            Err(e) => {
                                warn!(address = %node.address, error = %e, "disable duration out of range")
                            }
                        }
                    }
                    if let Err(e) = storage.update_node(&node).await {
                        warn!(address = %node.address, error = %e, "failed to persist node after failure");
                    }
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "failed to retrieve node for healing")
                }
            }
            lock.release().await;
        });
        Ok(())
    }

    /// Success path. Synchronous: retrieve, clear the failure bookkeeping,
    /// persist, release.
    pub(crate) async fn handle_node_success(&self, address: &str) -> Result<(), ClusterError> {
        let lock = self.lock_with_keepalive(address, false).await?;
        let result = match self.storage.retrieve_node(address).await {
            Ok(mut node) => {
                node.update_success();
                self.storage.update_node(&node).await.map_err(ClusterError::from)
            }
            Err(e) => Err(e.into()),
        };
        lock.release().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_store::MemoryStore;
    use std::collections::HashMap;

    fn healing() -> (Arc<dyn ClusterStore>, NodeHealing) {
        let store: Arc<dyn ClusterStore> = Arc::new(MemoryStore::new());
        let healing = NodeHealing::new(store.clone());
        (store, healing)
    }

    #[tokio::test]
    async fn success_handler_clears_failures() {
        let (store, healing) = healing();
        let mut node = Node::new("http://h1:2375", HashMap::new());
        node.update_error("boom".into(), true);
        store.store_node(node).await.unwrap();

        healing.handle_node_success("http://h1:2375").await.unwrap();

        let node = store.retrieve_node("http://h1:2375").await.unwrap();
        assert_eq!(node.failure_count(), 0);
        assert!(node.last_error().is_none());
        assert!(!node.healing.is_locked(), "lease must be released");
    }

    #[tokio::test]
    async fn error_handler_disables_via_default_healer() {
        let (store, healing) = healing();
        store
            .store_node(Node::new("http://h1:2375", HashMap::new()))
            .await
            .unwrap();

        healing
            .handle_node_error("http://h1:2375".into(), "connection refused".into(), true)
            .await
            .unwrap();

        // the update runs in its own task after lock acquisition
        let mut node = store.retrieve_node("http://h1:2375").await.unwrap();
        for _ in 0..100 {
            if node.failure_count() > 0 && !node.healing.is_locked() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            node = store.retrieve_node("http://h1:2375").await.unwrap();
        }
        assert_eq!(node.failure_count(), 1);
        assert_eq!(node.last_error(), Some("connection refused"));
        assert_eq!(node.status(), armada_domain::NodeStatus::Disabled);
    }

    #[tokio::test]
    async fn contended_lock_reports_healer_in_progress() {
        let (store, healing) = healing();
        store
            .store_node(Node::new("http://h1:2375", HashMap::new()))
            .await
            .unwrap();
        assert!(store
            .lock_node_for_healing("http://h1:2375", true, Duration::from_secs(60))
            .await
            .unwrap());

        let err = healing.handle_node_success("http://h1:2375").await.unwrap_err();
        assert!(matches!(err, ClusterError::HealerInProgress(_)));
    }

    #[tokio::test]
    async fn custom_healer_with_zero_duration_keeps_node_enabled() {
        struct NoDisable;
        #[async_trait]
        impl Healer for NoDisable {
            async fn handle_error(&self, _node: &Node) -> Duration {
                Duration::ZERO
            }
        }

        let (store, healing) = healing();
        store
            .store_node(Node::new("http://h1:2375", HashMap::new()))
            .await
            .unwrap();
        healing.set_healer(Arc::new(NoDisable));

        healing
            .handle_node_error("http://h1:2375".into(), "boom".into(), true)
            .await
            .unwrap();

        let mut node = store.retrieve_node("http://h1:2375").await.unwrap();
        for _ in 0..100 {
            if node.failure_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            node = store.retrieve_node("http://h1:2375").await.unwrap();
        }
        assert_eq!(node.status(), armada_domain::NodeStatus::Retry);
        assert!(node.is_enabled());
    }
}
