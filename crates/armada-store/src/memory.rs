use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use armada_domain::{ContainerMapping, HealingRecord, ImageHistory, Node};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::ClusterStore;

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    containers: HashMap<String, String>,
    images: HashMap<String, ImageHistory>,
}

/// In-memory implementation of [`ClusterStore`].
///
/// All data is lost on process exit. Suitable for tests and dry-run mode.
/// The healing-lock check-and-set runs under a single write guard, which
/// makes it atomic with respect to every other store operation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_deadline(timeout: Duration) -> Result<chrono::DateTime<Utc>, StoreError> {
    let delta = chrono::Duration::from_std(timeout)
        .map_err(|e| StoreError::Internal(format!("lock timeout out of range: {}", e)))?;
    Ok(Utc::now() + delta)
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn store_node(&self, node: Node) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.nodes.contains_key(&node.address) {
            return Err(StoreError::DuplicatedNodeAddress(node.address));
        }
        guard.nodes.insert(node.address.clone(), node);
        Ok(())
    }

    async fn retrieve_node(&self, address: &str) -> Result<Node, StoreError> {
        let guard = self.inner.read().await;
        guard
            .nodes
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchNode(address.to_string()))
    }

    async fn retrieve_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.nodes.values().cloned().collect())
    }

    async fn retrieve_nodes_by_metadata(
        &self,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<Node>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .nodes
            .values()
            .filter(|n| {
                filter
                    .iter()
                    .all(|(k, v)| n.metadata.get(k).map_or(false, |nv| nv == v))
            })
            .cloned()
            .collect())
    }

    async fn update_node(&self, node: &Node) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.nodes.contains_key(&node.address) {
            return Err(StoreError::NoSuchNode(node.address.clone()));
        }
        guard.nodes.insert(node.address.clone(), node.clone());
        Ok(())
    }

    async fn remove_node(&self, address: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .nodes
            .remove(address)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchNode(address.to_string()))
    }

    async fn store_container(&self, id: &str, host: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.containers.insert(id.to_string(), host.to_string());
        Ok(())
    }

    async fn retrieve_container(&self, id: &str) -> Result<String, StoreError> {
        let guard = self.inner.read().await;
        guard
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchContainer(id.to_string()))
    }

    async fn remove_container(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchContainer(id.to_string()))
    }

    async fn retrieve_containers(&self) -> Result<Vec<ContainerMapping>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .containers
            .iter()
            .map(|(id, host)| ContainerMapping {
                id: id.clone(),
                host: host.clone(),
            })
            .collect())
    }

    async fn store_image(
        &self,
        repo: &str,
        image_id: &str,
        host: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .images
            .entry(repo.to_string())
            .or_insert_with(|| ImageHistory::new(repo))
            .record(host, image_id);
        Ok(())
    }

    async fn retrieve_image(&self, repo: &str) -> Result<ImageHistory, StoreError> {
        let guard = self.inner.read().await;
        guard
            .images
            .get(repo)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchImage(repo.to_string()))
    }

    async fn remove_image(
        &self,
        repo: &str,
        image_id: &str,
        host: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let history = guard
            .images
            .get_mut(repo)
            .ok_or_else(|| StoreError::NoSuchImage(repo.to_string()))?;
        if !history.remove(host, image_id) {
            return Err(StoreError::NoSuchImage(repo.to_string()));
        }
        if history.is_empty() {
            guard.images.remove(repo);
        }
        Ok(())
    }

    async fn retrieve_images(&self) -> Result<Vec<ImageHistory>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.images.values().cloned().collect())
    }

    async fn lock_node_for_healing(
        &self,
        address: &str,
        is_failure: bool,
        timeout: Duration,
    ) -> Result<bool, StoreError> {
        let deadline = lock_deadline(timeout)?;
        let mut guard = self.inner.write().await;
        let node = guard
            .nodes
            .get_mut(address)
            .ok_or_else(|| StoreError::NoSuchNode(address.to_string()))?;
        if node.healing.is_locked() {
            return Ok(false);
        }
        node.healing = HealingRecord {
            locked_until: Some(deadline),
            is_failure,
        };
        Ok(true)
    }

    async fn extend_node_lock(&self, address: &str, timeout: Duration) -> Result<(), StoreError> {
        let deadline = lock_deadline(timeout)?;
        let mut guard = self.inner.write().await;
        let node = guard
            .nodes
            .get_mut(address)
            .ok_or_else(|| StoreError::NoSuchNode(address.to_string()))?;
        node.healing.locked_until = Some(deadline);
        Ok(())
    }

    async fn unlock_node(&self, address: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let node = guard
            .nodes
            .get_mut(address)
            .ok_or_else(|| StoreError::NoSuchNode(address.to_string()))?;
        node.healing = HealingRecord::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_node(address: &str) -> Node {
        Node::new(address, HashMap::new())
    }

    #[tokio::test]
    async fn store_and_retrieve_node() {
        let store = MemoryStore::new();
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();
        let got = store.retrieve_node("http://h1:2375").await.unwrap();
        assert_eq!(got.address, "http://h1:2375");
    }

    #[tokio::test]
    async fn duplicate_address_is_rejected() {
        let store = MemoryStore::new();
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();
        let err = store.store_node(dummy_node("http://h1:2375")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicatedNodeAddress(_)));
        assert_eq!(store.retrieve_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_missing_node_fails() {
        let store = MemoryStore::new();
        let err = store.update_node(&dummy_node("http://h1:2375")).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchNode(_)));
    }

    #[tokio::test]
    async fn metadata_filter_matches_every_pair() {
        let store = MemoryStore::new();
        let mut n1 = dummy_node("http://h1:2375");
        n1.metadata.insert("pool".into(), "prod".into());
        n1.metadata.insert("zone".into(), "a".into());
        let mut n2 = dummy_node("http://h2:2375");
        n2.metadata.insert("pool".into(), "prod".into());
        n2.metadata.insert("zone".into(), "b".into());
        store.store_node(n1).await.unwrap();
        store.store_node(n2).await.unwrap();

        let filter = HashMap::from([("pool".to_string(), "prod".to_string())]);
        assert_eq!(store.retrieve_nodes_by_metadata(&filter).await.unwrap().len(), 2);

        let filter = HashMap::from([
            ("pool".to_string(), "prod".to_string()),
            ("zone".to_string(), "a".to_string()),
        ]);
        let matched = store.retrieve_nodes_by_metadata(&filter).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].address, "http://h1:2375");
    }

    #[tokio::test]
    async fn container_mapping_round_trip() {
        let store = MemoryStore::new();
        store.store_container("abc123", "http://h1:2375").await.unwrap();
        assert_eq!(store.retrieve_container("abc123").await.unwrap(), "http://h1:2375");
        store.remove_container("abc123").await.unwrap();
        let err = store.retrieve_container("abc123").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchContainer(_)));
    }

    #[tokio::test]
    async fn remove_missing_container_fails() {
        let store = MemoryStore::new();
        let err = store.remove_container("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchContainer(_)));
    }

    #[tokio::test]
    async fn storing_image_twice_keeps_one_entry() {
        let store = MemoryStore::new();
        store.store_image("ubuntu", "img-1", "http://h1:2375").await.unwrap();
        store.store_image("ubuntu", "img-1", "http://h1:2375").await.unwrap();
        let history = store.retrieve_image("ubuntu").await.unwrap();
        assert_eq!(history.entries.len(), 1);
        assert_eq!(history.last_id, "img-1");
        assert_eq!(history.last_node, "http://h1:2375");
    }

    #[tokio::test]
    async fn removing_last_image_entry_removes_record() {
        let store = MemoryStore::new();
        store.store_image("ubuntu", "img-1", "http://h1:2375").await.unwrap();
        store.remove_image("ubuntu", "img-1", "http://h1:2375").await.unwrap();
        let err = store.retrieve_image("ubuntu").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchImage(_)));
    }

    #[tokio::test]
    async fn concurrent_lock_has_exactly_one_winner() {
        let store = MemoryStore::new();
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .lock_node_for_healing("http://h1:2375", true, Duration::from_secs(5))
                    .await
                    .unwrap()
            }));
        }
        let mut acquired = 0;
        for t in tasks {
            if t.await.unwrap() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);

        // a manual unlock frees the lease for the next caller
        store.unlock_node("http://h1:2375").await.unwrap();
        assert!(store
            .lock_node_for_healing("http://h1:2375", true, Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = MemoryStore::new();
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();
        assert!(store
            .lock_node_for_healing("http://h1:2375", true, Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store
            .lock_node_for_healing("http://h1:2375", false, Duration::from_secs(5))
            .await
            .unwrap());
        let node = store.retrieve_node("http://h1:2375").await.unwrap();
        assert!(!node.healing.is_failure);
    }

    #[tokio::test]
    async fn extend_pushes_the_deadline() {
        let store = MemoryStore::new();
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();
        assert!(store
            .lock_node_for_healing("http://h1:2375", true, Duration::from_millis(20))
            .await
            .unwrap());
        store
            .extend_node_lock("http://h1:2375", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // original deadline has passed; the extension still holds
        assert!(!store
            .lock_node_for_healing("http://h1:2375", true, Duration::from_secs(5))
            .await
            .unwrap());
    }
}
