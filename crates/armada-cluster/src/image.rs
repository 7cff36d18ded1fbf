use std::sync::Arc;

use armada_client::NodeClient;
use armada_store::{ClusterStore, StoreError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::{Cluster, FanoutMode};
use crate::container::CreateContainerOptions;
use crate::error::ClusterError;

#[derive(Debug, Clone, Default)]
pub struct PullImageOptions {
    pub repository: String,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportImageOptions {
    /// Source URL, or `-` for an uploaded tarball.
    pub source: String,
    pub repository: String,
}

#[derive(Debug, Clone, Default)]
pub struct BuildImageOptions {
    /// Tag for the built image; also the history key.
    pub name: String,
    /// Remote build-context URL handed to the daemon.
    pub remote: Option<String>,
    /// Local build context as a tarball.
    pub context: Option<Vec<u8>>,
}

/// Look up the image's id on the node and record the `(node, id)` history
/// entry. Best-effort: inspect or storage failures only log.
pub(crate) async fn record_image(
    storage: &Arc<dyn ClusterStore>,
    client: &NodeClient,
    repository: &str,
) {
    match client.inspect_image(repository).await {
        Ok(body) => {
            if let Some(id) = body.get("Id").and_then(Value::as_str) {
                if let Err(e) = storage.store_image(repository, id, client.address()).await {
                    warn!(repository, address = client.address(), error = %e, "failed to record image history");
                }
            }
        }
        Err(e) => {
            debug!(repository, address = client.address(), error = %e, "image inspect after operation failed")
        }
    }
}

impl Cluster {
    /// Pull on the given nodes (all enabled ones when empty), waiting for
    /// every node to finish. Each successful pull records a history entry.
    pub async fn pull_image(
        &self,
        opts: PullImageOptions,
        nodes: Vec<String>,
    ) -> Result<String, ClusterError> {
        let addresses = if nodes.is_empty() {
            self.enabled_addresses().await?
        } else {
            nodes
        };
        if addresses.is_empty() {
            return Err(ClusterError::NoNodesAvailable);
        }
        let storage = self.storage.clone();
        let repository = opts.repository.clone();
        let tag = opts.tag.clone();
        self.run_on_nodes(
            addresses,
            "pullImage",
            FanoutMode::WaitAll,
            StoreError::NoSuchImage(opts.repository.clone()),
            move |client| {
                let storage = storage.clone();
                let repository = repository.clone();
                let tag = tag.clone();
                async move {
                    let output = client.pull_image(&repository, tag.as_deref()).await?;
                    record_image(&storage, &client, &repository).await;
                    Ok(output)
                }
            },
        )
        .await
    }

    /// Push from the node holding the most recent version.
    pub async fn push_image(&self, name: &str, tag: Option<&str>) -> Result<String, ClusterError> {
        let history = self.storage.retrieve_image(name).await?;
        let client = NodeClient::new(&history.last_node)
            .map_err(|e| Self::node_error(&history.last_node, "pushImage", e))?;
        let result = client.push_image(name, tag).await;
        self.settle(
            client.address(),
            "pushImage",
            StoreError::NoSuchImage(name.to_string()),
            result,
        )
        .await
    }

    /// Remove the image from the hosts its history names, first-arrival.
    pub async fn remove_image(&self, name: &str) -> Result<(), ClusterError> {
        self.remove_image_mode(name, FanoutMode::FirstArrival).await
    }

    /// Like [`remove_image`](Cluster::remove_image) but waits for every host
    /// to have finished.
    pub async fn remove_image_wait(&self, name: &str) -> Result<(), ClusterError> {
        self.remove_image_mode(name, FanoutMode::WaitAll).await
    }

    async fn remove_image_mode(
        &self,
        name: &str,
        mode: FanoutMode,
    ) -> Result<(), ClusterError> {
        let history = self.storage.retrieve_image(name).await?;
        let repository = name.to_string();
        let result = self
            .run_on_nodes(
                history.hosts(),
                "removeImage",
                mode,
                StoreError::NoSuchImage(name.to_string()),
                move |client| {
                    let repository = repository.clone();
                    async move { client.remove_image(&repository).await }
                },
            )
            .await;

        // the index entries go away whatever the daemons answered
        for entry in &history.entries {
            if let Err(e) = self
                .storage
                .remove_image(name, &entry.image_id, &entry.node)
                .await
            {
                debug!(repository = name, error = %e, "image entry already gone from storage");
            }
        }
        self.remove_from_registry(name);

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(repository = name, "image was not present on any of its hosts");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fire-and-forget tag delete against an HTTP image registry, for
    /// repositories of the `registry.host/name` form. The outcome never
    /// affects the caller.
    pub fn remove_from_registry(&self, repository: &str) {
        let Some((registry, name)) = repository.split_once('/') else {
            return;
        };
        // only a host-looking prefix names a registry
        if !registry.contains('.') && !registry.contains(':') {
            return;
        }
        let url = format!("http://{}/v1/repositories/{}/tags", registry, name);
        tokio::spawn(async move {
            if let Err(e) = armada_client::http_delete(&url).await {
                debug!(url = %url, error = %e, "registry tag delete failed");
            }
        });
    }

    /// Images across every enabled node, concatenated. De-duplication is
    /// deferred to the caller.
    pub async fn list_images(&self) -> Result<Vec<Value>, ClusterError> {
        let addresses = self.enabled_addresses().await?;
        self.gather_on_nodes(addresses, "listImages", |client| async move {
            client.list_images().await
        })
        .await
    }

    /// Import on every enabled node, waiting for all of them.
    pub async fn import_image(&self, opts: ImportImageOptions) -> Result<String, ClusterError> {
        let addresses = self.enabled_addresses().await?;
        if addresses.is_empty() {
            return Err(ClusterError::NoNodesAvailable);
        }
        let source = opts.source.clone();
        let repository = opts.repository.clone();
        self.run_on_nodes(
            addresses,
            "importImage",
            FanoutMode::WaitAll,
            StoreError::NoSuchImage(opts.repository.clone()),
            move |client| {
                let source = source.clone();
                let repository = repository.clone();
                async move { client.import_image(&source, &repository).await }
            },
        )
        .await
    }

    /// Build on one scheduled node and record the resulting image.
    pub async fn build_image(&self, opts: BuildImageOptions) -> Result<String, ClusterError> {
        let node = self
            .scheduler
            .schedule(self, &CreateContainerOptions::default())
            .await?;
        let client = NodeClient::new(&node.address)
            .map_err(|e| Self::node_error(&node.address, "buildImage", e))?;
        let result = client
            .build_image(&opts.name, opts.remote.as_deref(), opts.context.clone())
            .await;
        let output = self
            .settle(
                client.address(),
                "buildImage",
                StoreError::NoSuchImage(opts.name.clone()),
                result,
            )
            .await?;
        record_image(&self.storage, &client, &opts.name).await;
        Ok(output)
    }
}
