use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use armada_client::{ClientError, NodeClient};
use armada_domain::Node;
use armada_store::{ClusterStore, MemoryStore, StoreError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ClusterError;
use crate::healing::{Healer, NodeHealing};
use crate::monitor::MonitorHandle;
use crate::scheduler::{RoundRobin, Scheduler};

/// How a fan-out collects its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FanoutMode {
    /// Every task finishes before a result is chosen. Used where the caller
    /// wants all nodes to have completed (pull, import).
    WaitAll,
    /// Return on the first success or first real error; stragglers run to
    /// completion into discarded channel slots.
    FirstArrival,
}

/// Client-side cluster over a fleet of container-host daemons.
///
/// All shared state lives in the pluggable storage; the only long-lived task
/// is the optional active monitor. Everything here is safe to call from
/// concurrent tasks through a shared reference.
pub struct Cluster {
    pub(crate) storage: Arc<dyn ClusterStore>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) healing: Arc<NodeHealing>,
    pub(crate) monitor: Mutex<Option<MonitorHandle>>,
}

impl Cluster {
    /// Build a cluster on top of `storage`, registering `initial_nodes`.
    /// Without a scheduler the round-robin reference implementation is used.
    pub async fn new(
        scheduler: Option<Arc<dyn Scheduler>>,
        storage: Arc<dyn ClusterStore>,
        initial_nodes: Vec<Node>,
    ) -> Result<Self, ClusterError> {
        let cluster = Cluster {
            healing: Arc::new(NodeHealing::new(storage.clone())),
            scheduler: scheduler.unwrap_or_else(|| Arc::new(RoundRobin::new())),
            storage,
            monitor: Mutex::new(None),
        };
        for node in initial_nodes {
            cluster.storage.store_node(node).await?;
        }
        Ok(cluster)
    }

    // ── Node lifecycle ────────────────────────────────────────────────────────

    pub async fn register(
        &self,
        address: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Node, ClusterError> {
        if address.trim().is_empty() {
            return Err(ClusterError::InvalidAddress);
        }
        let node = Node::new(address, metadata);
        self.storage.store_node(node.clone()).await?;
        Ok(node)
    }

    pub async fn unregister(&self, address: &str) -> Result<(), ClusterError> {
        Ok(self.storage.remove_node(address).await?)
    }

    /// Ping `address` with 100 ms back-off until it answers, then register.
    pub async fn wait_and_register(
        &self,
        address: &str,
        metadata: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Node, ClusterError> {
        if address.trim().is_empty() {
            return Err(ClusterError::InvalidAddress);
        }
        let client = NodeClient::new(address).map_err(|_| ClusterError::InvalidAddress)?;
        tokio::time::timeout(timeout, async {
            loop {
                match client.ping().await {
                    Ok(()) => break,
                    Err(e) => debug!(address, error = %e, "node not ready yet"),
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .map_err(|_| ClusterError::WaitNodeTimeout)?;
        self.register(address, metadata).await
    }

    /// Enabled nodes only: disabled and failure-locked nodes are filtered out.
    pub async fn nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let nodes = self.storage.retrieve_nodes().await?;
        Ok(nodes.into_iter().filter(|n| n.is_enabled()).collect())
    }

    /// Every registered node, regardless of status.
    pub async fn unfiltered_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        Ok(self.storage.retrieve_nodes().await?)
    }

    /// Enabled nodes whose metadata matches every pair in `filter`.
    pub async fn nodes_for_metadata(
        &self,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<Node>, ClusterError> {
        let nodes = self.storage.retrieve_nodes_by_metadata(filter).await?;
        Ok(nodes.into_iter().filter(|n| n.is_enabled()).collect())
    }

    pub fn set_healer(&self, healer: Arc<dyn Healer>) {
        self.healing.set_healer(healer);
    }

    /// A cluster sharing this one's scheduler but backed by an in-memory
    /// copy of the current state. Mutations never reach the real storage.
    pub async fn dry_mode(&self) -> Result<Cluster, ClusterError> {
        let mem: Arc<dyn ClusterStore> = Arc::new(MemoryStore::new());
        for node in self.storage.retrieve_nodes().await? {
            mem.store_node(node).await?;
        }
        for mapping in self.storage.retrieve_containers().await? {
            mem.store_container(&mapping.id, &mapping.host).await?;
        }
        for history in self.storage.retrieve_images().await? {
            for entry in &history.entries {
                mem.store_image(&history.repository, &entry.image_id, &entry.node)
                    .await?;
            }
        }
        Ok(Cluster {
            healing: Arc::new(NodeHealing::new(mem.clone())),
            scheduler: self.scheduler.clone(),
            storage: mem,
            monitor: Mutex::new(None),
        })
    }

    // ── Dispatch helpers ──────────────────────────────────────────────────────

    pub(crate) fn node_error(address: &str, cmd: &'static str, source: ClientError) -> ClusterError {
        ClusterError::Node {
            address: address.to_string(),
            cmd,
            source,
        }
    }

    pub(crate) async fn enabled_addresses(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self.nodes().await?.into_iter().map(|n| n.address).collect())
    }

    /// Classify the outcome of a targeted call and feed the node state
    /// machine: a success clears the node's failure bookkeeping, a real
    /// error records it (without moving the failure counter), and a remote
    /// not-found becomes the routing sentinel.
    pub(crate) async fn settle<T>(
        &self,
        address: &str,
        cmd: &'static str,
        sentinel: StoreError,
        result: Result<T, ClientError>,
    ) -> Result<T, ClusterError> {
        match result {
            Ok(value) => {
                if let Err(e) = self.healing.handle_node_success(address).await {
                    debug!(address, error = %e, "success handler skipped");
                }
                Ok(value)
            }
            Err(e) if e.is_not_found() => Err(sentinel.into()),
            Err(e) => {
                let failure = e.to_string();
                let err = Self::node_error(address, cmd, e);
                if let Err(he) = self
                    .healing
                    .handle_node_error(address.to_string(), failure, false)
                    .await
                {
                    debug!(address, error = %he, "error handler skipped");
                }
                Err(err)
            }
        }
    }

    /// Launch one task per address. Each outcome is classified: successes
    /// and real errors land on their channels, remote not-founds are
    /// discarded. Channels are sized to the task count so no sender ever
    /// blocks after the reader has returned.
    fn spawn_node_tasks<T, F, Fut>(
        &self,
        addresses: Vec<String>,
        cmd: &'static str,
        op: F,
    ) -> (mpsc::Receiver<T>, mpsc::Receiver<ClusterError>)
    where
        T: Send + 'static,
        F: Fn(NodeClient) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let (ok_tx, ok_rx) = mpsc::channel::<T>(addresses.len());
        let (err_tx, err_rx) = mpsc::channel::<ClusterError>(addresses.len());
        for address in addresses {
            let op = op.clone();
            let ok_tx = ok_tx.clone();
            let err_tx = err_tx.clone();
            let healing = self.healing.clone();
            tokio::spawn(async move {
                let client = match NodeClient::new(&address) {
                    Ok(client) => client,
                    Err(e) => {
                        let _ = err_tx.send(Cluster::node_error(&address, cmd, e)).await;
                        return;
                    }
                };
                match op(client).await {
                    Ok(value) => {
                        let _ = ok_tx.send(value).await;
                        if let Err(e) = healing.handle_node_success(&address).await {
                            debug!(address = %address, error = %e, "success handler skipped");
                        }
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(address = %address, cmd, "node does not have the resource");
                    }
                    Err(e) => {
                        let failure = e.to_string();
                        let _ = err_tx.send(Cluster::node_error(&address, cmd, e)).await;
                        if let Err(he) =
                            healing.handle_node_error(address.clone(), failure, false).await
                        {
                            debug!(address = %address, error = %he, "error handler skipped");
                        }
                    }
                }
            });
        }
        (ok_rx, err_rx)
    }

    /// Fan out `op` over `addresses` and reduce to one result.
    ///
    /// Wait-all drains every task, then prefers the first success over the
    /// first error. First-arrival returns as soon as either appears, with
    /// success preferred when both are pending at the same select. When
    /// nothing but not-founds came back, `sentinel` is the answer.
    pub(crate) async fn run_on_nodes<T, F, Fut>(
        &self,
        addresses: Vec<String>,
        cmd: &'static str,
        mode: FanoutMode,
        sentinel: StoreError,
        op: F,
    ) -> Result<T, ClusterError>
    where
        T: Send + 'static,
        F: Fn(NodeClient) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        if addresses.is_empty() {
            return Err(sentinel.into());
        }
        let (mut ok_rx, mut err_rx) = self.spawn_node_tasks(addresses, cmd, op);

        match mode {
            FanoutMode::FirstArrival => {
                let mut ok_open = true;
                let mut err_open = true;
                loop {
                    tokio::select! {
                        biased;
                        value = ok_rx.recv(), if ok_open => match value {
                            Some(value) => return Ok(value),
                            None => ok_open = false,
                        },
                        err = err_rx.recv(), if err_open => match err {
                            Some(err) => return Err(err),
                            None => err_open = false,
                        },
                        else => return Err(sentinel.into()),
                    }
                }
            }
            FanoutMode::WaitAll => {
                let mut first_ok = None;
                while let Some(value) = ok_rx.recv().await {
                    if first_ok.is_none() {
                        first_ok = Some(value);
                    }
                }
                let mut first_err = None;
                while let Some(err) = err_rx.recv().await {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                match (first_ok, first_err) {
                    (Some(value), _) => Ok(value),
                    (None, Some(err)) => Err(err),
                    (None, None) => Err(sentinel.into()),
                }
            }
        }
    }

    /// Fan out an enumeration and concatenate every node's items. Waits for
    /// all tasks; any real error fails the aggregation.
    pub(crate) async fn gather_on_nodes<T, F, Fut>(
        &self,
        addresses: Vec<String>,
        cmd: &'static str,
        op: F,
    ) -> Result<Vec<T>, ClusterError>
    where
        T: Send + 'static,
        F: Fn(NodeClient) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<Vec<T>, ClientError>> + Send + 'static,
    {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let (mut ok_rx, mut err_rx) = self.spawn_node_tasks(addresses, cmd, op);
        let mut items = Vec::new();
        while let Some(batch) = ok_rx.recv().await {
            items.extend(batch);
        }
        if let Some(err) = err_rx.recv().await {
            return Err(err);
        }
        Ok(items)
    }
}
