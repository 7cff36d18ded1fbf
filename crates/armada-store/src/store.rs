use std::collections::HashMap;
use std::time::Duration;

use armada_domain::{ContainerMapping, ImageHistory, Node};
use async_trait::async_trait;

use crate::error::StoreError;

/// Persistence contract for the cluster: nodes keyed by address,
/// container→host mappings keyed by container id, and per-repository image
/// histories. Every method must be safe for concurrent invocation.
///
/// The one requirement that goes beyond plain CRUD is
/// [`lock_node_for_healing`](ClusterStore::lock_node_for_healing): it must be
/// an atomic conditional update (compare-and-set), never read-then-write.
#[async_trait]
pub trait ClusterStore: Send + Sync + 'static {
    // ── Nodes ─────────────────────────────────────────────────────────────────

    /// Persist a new node. Fails with [`StoreError::DuplicatedNodeAddress`]
    /// when the address already exists.
    async fn store_node(&self, node: Node) -> Result<(), StoreError>;

    async fn retrieve_node(&self, address: &str) -> Result<Node, StoreError>;

    /// Every stored node, in no particular order.
    async fn retrieve_nodes(&self) -> Result<Vec<Node>, StoreError>;

    /// Nodes whose metadata matches every key/value pair in `filter` exactly.
    async fn retrieve_nodes_by_metadata(
        &self,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<Node>, StoreError>;

    /// Replace the persisted node with the same address.
    async fn update_node(&self, node: &Node) -> Result<(), StoreError>;

    async fn remove_node(&self, address: &str) -> Result<(), StoreError>;

    // ── Containers ────────────────────────────────────────────────────────────

    async fn store_container(&self, id: &str, host: &str) -> Result<(), StoreError>;

    async fn retrieve_container(&self, id: &str) -> Result<String, StoreError>;

    async fn remove_container(&self, id: &str) -> Result<(), StoreError>;

    async fn retrieve_containers(&self) -> Result<Vec<ContainerMapping>, StoreError>;

    // ── Images ────────────────────────────────────────────────────────────────

    /// Append a `(host, image_id)` tuple to the repository's history.
    /// Duplicate tuples are a no-op.
    async fn store_image(&self, repo: &str, image_id: &str, host: &str)
        -> Result<(), StoreError>;

    async fn retrieve_image(&self, repo: &str) -> Result<ImageHistory, StoreError>;

    /// Remove one tuple; the whole record goes away with its last tuple.
    async fn remove_image(&self, repo: &str, image_id: &str, host: &str)
        -> Result<(), StoreError>;

    async fn retrieve_images(&self) -> Result<Vec<ImageHistory>, StoreError>;

    // ── Healing lock ──────────────────────────────────────────────────────────

    /// Try to acquire the advisory healing lease on a node. Acquires iff the
    /// current `locked_until` is absent or in the past; on success sets
    /// `locked_until = now + timeout` and `is_failure` in the same atomic
    /// update. Returns whether the lock was acquired.
    async fn lock_node_for_healing(
        &self,
        address: &str,
        is_failure: bool,
        timeout: Duration,
    ) -> Result<bool, StoreError>;

    /// Unconditionally push `locked_until` to `now + timeout` for the
    /// current holder.
    async fn extend_node_lock(&self, address: &str, timeout: Duration)
        -> Result<(), StoreError>;

    /// Zero the healing record.
    async fn unlock_node(&self, address: &str) -> Result<(), StoreError>;
}
