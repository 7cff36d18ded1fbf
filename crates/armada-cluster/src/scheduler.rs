use std::sync::atomic::{AtomicUsize, Ordering};

use armada_domain::Node;
use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::container::CreateContainerOptions;
use crate::error::ClusterError;

/// Picks the node a new container should land on.
///
/// Implementations may consult the cluster for the enabled node list,
/// inspect node metadata, or read the opaque `scheduler_opts` the caller
/// attached to the create options.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    async fn schedule(
        &self,
        cluster: &Cluster,
        opts: &CreateContainerOptions,
    ) -> Result<Node, ClusterError>;

    /// Candidate nodes for the given options. The create workflow walks this
    /// list when the scheduled node fails. Defaults to every enabled node.
    async fn candidates(
        &self,
        cluster: &Cluster,
        _opts: &CreateContainerOptions,
    ) -> Result<Vec<Node>, ClusterError> {
        cluster.nodes().await
    }
}

/// Reference scheduler: rotates over the enabled nodes.
///
/// The counter is not an offset into a fixed list — the node list is
/// re-fetched on every call and may have changed size — but a rotating
/// cursor taken modulo whatever length the call observed. The list is
/// ordered by address so the rotation is stable across calls.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Scheduler for RoundRobin {
    async fn schedule(
        &self,
        cluster: &Cluster,
        _opts: &CreateContainerOptions,
    ) -> Result<Node, ClusterError> {
        let mut nodes = cluster.nodes().await?;
        if nodes.is_empty() {
            return Err(ClusterError::NoNodesAvailable);
        }
        nodes.sort_by(|a, b| a.address.cmp(&b.address));
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % nodes.len();
        Ok(nodes.swap_remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn two_node_cluster() -> Cluster {
        let cluster = Cluster::new(None, Arc::new(MemoryStore::new()), Vec::new())
            .await
            .unwrap();
        cluster.register("http://h1:2375", HashMap::new()).await.unwrap();
        cluster.register("http://h2:2375", HashMap::new()).await.unwrap();
        cluster
    }

    #[tokio::test]
    async fn rotates_over_enabled_nodes() {
        let cluster = two_node_cluster().await;
        let scheduler = RoundRobin::new();
        let opts = CreateContainerOptions::default();

        let first = scheduler.schedule(&cluster, &opts).await.unwrap();
        let second = scheduler.schedule(&cluster, &opts).await.unwrap();
        let third = scheduler.schedule(&cluster, &opts).await.unwrap();

        assert_eq!(first.address, "http://h1:2375");
        assert_eq!(second.address, "http://h2:2375");
        assert_eq!(third.address, "http://h1:2375");
    }

    #[tokio::test]
    async fn empty_cluster_has_no_nodes_available() {
        let cluster = Cluster::new(None, Arc::new(MemoryStore::new()), Vec::new())
            .await
            .unwrap();
        let err = RoundRobin::new()
            .schedule(&cluster, &CreateContainerOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NoNodesAvailable));
    }

    #[tokio::test]
    async fn concurrent_callers_get_distinct_indexes() {
        let cluster = Arc::new(two_node_cluster().await);
        let scheduler = Arc::new(RoundRobin::new());

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let cluster = cluster.clone();
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .schedule(&cluster, &CreateContainerOptions::default())
                    .await
                    .unwrap()
                    .address
            }));
        }
        let mut per_node: HashMap<String, usize> = HashMap::new();
        for t in tasks {
            *per_node.entry(t.await.unwrap()).or_default() += 1;
        }
        // ten schedules over two nodes split evenly
        assert_eq!(per_node.get("http://h1:2375"), Some(&5));
        assert_eq!(per_node.get("http://h2:2375"), Some(&5));
    }
}
