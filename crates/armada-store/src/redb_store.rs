use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use armada_domain::{ContainerMapping, HealingRecord, ImageHistory, Node};
use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::store::ClusterStore;

const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
const CONTAINERS: TableDefinition<&str, &str> = TableDefinition::new("containers");
const IMAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("images");

fn internal(e: impl std::fmt::Display) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// Persistent [`ClusterStore`] backed by a redb database file.
///
/// redb admits a single write transaction at a time, so every
/// read-modify-write here (image history updates, the healing-lock
/// check-and-set) is atomic without further coordination.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a redb database at `path`.
    ///
    /// Parent directories are created automatically.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;

        // Ensure tables exist
        {
            let wtxn = db.begin_write().map_err(internal)?;
            wtxn.open_table(NODES).map_err(internal)?;
            wtxn.open_table(CONTAINERS).map_err(internal)?;
            wtxn.open_table(IMAGES).map_err(internal)?;
            wtxn.commit().map_err(internal)?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    fn read_node(&self, address: &str) -> Result<Node, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(NODES).map_err(internal)?;
        match table.get(address).map_err(internal)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Err(StoreError::NoSuchNode(address.to_string())),
        }
    }

    fn write_node(&self, node: &Node) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(node)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(NODES).map_err(internal)?;
            table
                .insert(node.address.as_str(), bytes.as_slice())
                .map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    /// Run `mutate` on the stored node inside one write transaction.
    fn mutate_node<T>(
        &self,
        address: &str,
        mutate: impl FnOnce(&mut Node) -> T,
    ) -> Result<T, StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let out;
        {
            let mut table = wtxn.open_table(NODES).map_err(internal)?;
            let mut node: Node = match table.get(address).map_err(internal)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => return Err(StoreError::NoSuchNode(address.to_string())),
            };
            out = mutate(&mut node);
            let bytes = serde_json::to_vec(&node)?;
            table
                .insert(address, bytes.as_slice())
                .map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(out)
    }

    fn lock_deadline(timeout: Duration) -> Result<chrono::DateTime<Utc>, StoreError> {
        let delta = chrono::Duration::from_std(timeout)
            .map_err(|e| StoreError::Internal(format!("lock timeout out of range: {}", e)))?;
        Ok(Utc::now() + delta)
    }
}

#[async_trait]
impl ClusterStore for RedbStore {
    async fn store_node(&self, node: Node) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&node)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(NODES).map_err(internal)?;
            if table.get(node.address.as_str()).map_err(internal)?.is_some() {
                return Err(StoreError::DuplicatedNodeAddress(node.address));
            }
            table
                .insert(node.address.as_str(), bytes.as_slice())
                .map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn retrieve_node(&self, address: &str) -> Result<Node, StoreError> {
        self.read_node(address)
    }

    async fn retrieve_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(NODES).map_err(internal)?;
        let mut nodes = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            nodes.push(serde_json::from_slice(v.value())?);
        }
        Ok(nodes)
    }

    async fn retrieve_nodes_by_metadata(
        &self,
        filter: &HashMap<String, String>,
    ) -> Result<Vec<Node>, StoreError> {
        let nodes = self.retrieve_nodes().await?;
        Ok(nodes
            .into_iter()
            .filter(|n| {
                filter
                    .iter()
                    .all(|(k, v)| n.metadata.get(k).map_or(false, |nv| nv == v))
            })
            .collect())
    }

    async fn update_node(&self, node: &Node) -> Result<(), StoreError> {
        // existence check and replace under one write transaction
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(NODES).map_err(internal)?;
            if table.get(node.address.as_str()).map_err(internal)?.is_none() {
                return Err(StoreError::NoSuchNode(node.address.clone()));
            }
            let bytes = serde_json::to_vec(node)?;
            table
                .insert(node.address.as_str(), bytes.as_slice())
                .map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn remove_node(&self, address: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let removed;
        {
            let mut table = wtxn.open_table(NODES).map_err(internal)?;
            removed = table.remove(address).map_err(internal)?.is_some();
        }
        wtxn.commit().map_err(internal)?;
        if removed {
            Ok(())
        } else {
            Err(StoreError::NoSuchNode(address.to_string()))
        }
    }

    async fn store_container(&self, id: &str, host: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(CONTAINERS).map_err(internal)?;
            table.insert(id, host).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn retrieve_container(&self, id: &str) -> Result<String, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(CONTAINERS).map_err(internal)?;
        match table.get(id).map_err(internal)? {
            Some(guard) => Ok(guard.value().to_string()),
            None => Err(StoreError::NoSuchContainer(id.to_string())),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        let removed;
        {
            let mut table = wtxn.open_table(CONTAINERS).map_err(internal)?;
            removed = table.remove(id).map_err(internal)?.is_some();
        }
        wtxn.commit().map_err(internal)?;
        if removed {
            Ok(())
        } else {
            Err(StoreError::NoSuchContainer(id.to_string()))
        }
    }

    async fn retrieve_containers(&self) -> Result<Vec<ContainerMapping>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(CONTAINERS).map_err(internal)?;
        let mut mappings = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (k, v) = entry.map_err(internal)?;
            mappings.push(ContainerMapping {
                id: k.value().to_string(),
                host: v.value().to_string(),
            });
        }
        Ok(mappings)
    }

    async fn store_image(
        &self,
        repo: &str,
        image_id: &str,
        host: &str,
    ) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(IMAGES).map_err(internal)?;
            let mut history: ImageHistory = match table.get(repo).map_err(internal)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => ImageHistory::new(repo),
            };
            history.record(host, image_id);
            let bytes = serde_json::to_vec(&history)?;
            table.insert(repo, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn retrieve_image(&self, repo: &str) -> Result<ImageHistory, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(IMAGES).map_err(internal)?;
        match table.get(repo).map_err(internal)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Err(StoreError::NoSuchImage(repo.to_string())),
        }
    }

    async fn remove_image(
        &self,
        repo: &str,
        image_id: &str,
        host: &str,
    ) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(IMAGES).map_err(internal)?;
            let mut history: ImageHistory = match table.get(repo).map_err(internal)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => return Err(StoreError::NoSuchImage(repo.to_string())),
            };
            if !history.remove(host, image_id) {
                return Err(StoreError::NoSuchImage(repo.to_string()));
            }
            if history.is_empty() {
                table.remove(repo).map_err(internal)?;
            } else {
                let bytes = serde_json::to_vec(&history)?;
                table.insert(repo, bytes.as_slice()).map_err(internal)?;
            }
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn retrieve_images(&self) -> Result<Vec<ImageHistory>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(IMAGES).map_err(internal)?;
        let mut histories = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            histories.push(serde_json::from_slice(v.value())?);
        }
        Ok(histories)
    }

    async fn lock_node_for_healing(
        &self,
        address: &str,
        is_failure: bool,
        timeout: Duration,
    ) -> Result<bool, StoreError> {
        let deadline = Self::lock_deadline(timeout)?;
        self.mutate_node(address, |node| {
            if node.healing.is_locked() {
                return false;
            }
            node.healing = HealingRecord {
                locked_until: Some(deadline),
                is_failure,
            };
            true
        })
    }

    async fn extend_node_lock(&self, address: &str, timeout: Duration) -> Result<(), StoreError> {
        let deadline = Self::lock_deadline(timeout)?;
        self.mutate_node(address, |node| {
            node.healing.locked_until = Some(deadline);
        })
    }

    async fn unlock_node(&self, address: &str) -> Result<(), StoreError> {
        self.mutate_node(address, |node| {
            node.healing = HealingRecord::default();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dummy_node(address: &str) -> Node {
        Node::new(address, HashMap::new())
    }

    fn open_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(&dir.path().join("armada.redb")).unwrap()
    }

    #[tokio::test]
    async fn store_and_retrieve_node() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();
        let got = store.retrieve_node("http://h1:2375").await.unwrap();
        assert_eq!(got.address, "http://h1:2375");
    }

    #[tokio::test]
    async fn duplicate_address_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();
        let err = store.store_node(dummy_node("http://h1:2375")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicatedNodeAddress(_)));
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("armada.redb");

        // Write
        {
            let store = RedbStore::open(&path).unwrap();
            store.store_node(dummy_node("http://h1:2375")).await.unwrap();
            store.store_container("abc123", "http://h1:2375").await.unwrap();
            store.store_image("ubuntu", "img-1", "http://h1:2375").await.unwrap();
        }

        // Re-open and verify
        {
            let store = RedbStore::open(&path).unwrap();
            assert_eq!(store.retrieve_nodes().await.unwrap().len(), 1);
            assert_eq!(
                store.retrieve_container("abc123").await.unwrap(),
                "http://h1:2375"
            );
            let history = store.retrieve_image("ubuntu").await.unwrap();
            assert_eq!(history.last_id, "img-1");
        }
    }

    #[tokio::test]
    async fn image_history_accumulates_and_shrinks() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.store_image("ubuntu", "img-1", "http://h1:2375").await.unwrap();
        store.store_image("ubuntu", "img-2", "http://h2:2375").await.unwrap();
        store.store_image("ubuntu", "img-2", "http://h2:2375").await.unwrap();

        let history = store.retrieve_image("ubuntu").await.unwrap();
        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.last_node, "http://h2:2375");

        store.remove_image("ubuntu", "img-2", "http://h2:2375").await.unwrap();
        store.remove_image("ubuntu", "img-1", "http://h1:2375").await.unwrap();
        let err = store.retrieve_image("ubuntu").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchImage(_)));
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_unlocked() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.store_node(dummy_node("http://h1:2375")).await.unwrap();

        assert!(store
            .lock_node_for_healing("http://h1:2375", true, Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!store
            .lock_node_for_healing("http://h1:2375", true, Duration::from_secs(5))
            .await
            .unwrap());

        store.unlock_node("http://h1:2375").await.unwrap();
        assert!(store
            .lock_node_for_healing("http://h1:2375", false, Duration::from_secs(5))
            .await
            .unwrap());
        let node = store.retrieve_node("http://h1:2375").await.unwrap();
        assert!(!node.healing.is_failure);
    }

    #[tokio::test]
    async fn lock_on_missing_node_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let err = store
            .lock_node_for_healing("http://ghost:2375", true, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchNode(_)));
    }
}
