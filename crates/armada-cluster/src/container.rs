use armada_client::{AttachOptions, LogsOptions, NodeClient};
use armada_store::StoreError;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::Cluster;
use crate::error::ClusterError;
use crate::image::record_image;

/// Options for [`Cluster::create_container`].
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    pub name: Option<String>,
    /// Pin the container to this node; the scheduler never runs.
    pub address: Option<String>,
    /// Daemon-side create payload. `Image` names the image to run.
    pub config: Value,
    /// Opaque options a custom scheduler may interpret.
    pub scheduler_opts: Option<Value>,
}

impl CreateContainerOptions {
    pub fn image(&self) -> Option<&str> {
        self.config.get("Image").and_then(Value::as_str)
    }
}

/// Outcome of a successful create.
#[derive(Debug, Clone)]
pub struct CreatedContainer {
    /// Node that ended up hosting the container.
    pub address: String,
    pub id: String,
    /// Full daemon response body.
    pub body: Value,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveContainerOptions {
    pub id: String,
    pub force: bool,
    pub remove_volumes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommitContainerOptions {
    pub id: String,
    pub repository: Option<String>,
    pub tag: Option<String>,
}

impl Cluster {
    // ── Create ────────────────────────────────────────────────────────────────

    /// Create a container on a scheduled node, retrying every remaining
    /// candidate on failure. On success the container→host mapping is
    /// recorded, along with an image→host entry for the referenced image.
    ///
    /// With an explicit `opts.address` the scheduler is bypassed entirely
    /// and no retry happens; a failure still names that literal address.
    pub async fn create_container(
        &self,
        opts: CreateContainerOptions,
    ) -> Result<CreatedContainer, ClusterError> {
        if let Some(address) = opts.address.clone() {
            return self.create_on_node(&address, &opts).await;
        }

        let node = self.scheduler.schedule(self, &opts).await?;
        let mut tried = vec![node.address.clone()];
        let mut last_err = match self.create_on_node(&node.address, &opts).await {
            Ok(created) => return Ok(created),
            Err(e) => e,
        };
        for candidate in self.scheduler.candidates(self, &opts).await? {
            if tried.contains(&candidate.address) {
                continue;
            }
            debug!(address = %candidate.address, "retrying container create on next candidate");
            tried.push(candidate.address.clone());
            match self.create_on_node(&candidate.address, &opts).await {
                Ok(created) => return Ok(created),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn create_on_node(
        &self,
        address: &str,
        opts: &CreateContainerOptions,
    ) -> Result<CreatedContainer, ClusterError> {
        let client = NodeClient::new(address)
            .map_err(|e| Self::node_error(address, "createContainer", e))?;
        let body = client
            .create_container(opts.name.as_deref(), &opts.config)
            .await
            .map_err(|e| Self::node_error(address, "createContainer", e))?;
        let id = body
            .get("Id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ClusterError::UnexpectedResponse {
                address: address.to_string(),
                message: "create response carried no container id".to_string(),
            })?
            .to_string();
        self.storage.store_container(&id, address).await?;
        if let Some(image) = opts.image() {
            record_image(&self.storage, &client, image).await;
        }
        Ok(CreatedContainer {
            address: address.to_string(),
            id,
            body,
        })
    }

    // ── Targeted operations ───────────────────────────────────────────────────

    /// Resolve the authoritative host for `id`. Unknown ids fail with
    /// `NoSuchContainer` before any network traffic.
    async fn container_client(
        &self,
        id: &str,
        cmd: &'static str,
    ) -> Result<NodeClient, ClusterError> {
        let host = self.storage.retrieve_container(id).await?;
        NodeClient::new(&host).map_err(|e| Self::node_error(&host, cmd, e))
    }

    pub async fn inspect_container(&self, id: &str) -> Result<Value, ClusterError> {
        let client = self.container_client(id, "inspectContainer").await?;
        let result = client.inspect_container(id).await;
        self.settle(
            client.address(),
            "inspectContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn start_container(&self, id: &str) -> Result<(), ClusterError> {
        let client = self.container_client(id, "startContainer").await?;
        let result = client.start_container(id).await;
        self.settle(
            client.address(),
            "startContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn stop_container(&self, id: &str, wait_secs: u32) -> Result<(), ClusterError> {
        let client = self.container_client(id, "stopContainer").await?;
        let result = client.stop_container(id, wait_secs).await;
        self.settle(
            client.address(),
            "stopContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn restart_container(&self, id: &str, wait_secs: u32) -> Result<(), ClusterError> {
        let client = self.container_client(id, "restartContainer").await?;
        let result = client.restart_container(id, wait_secs).await;
        self.settle(
            client.address(),
            "restartContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn kill_container(
        &self,
        id: &str,
        signal: Option<&str>,
    ) -> Result<(), ClusterError> {
        let client = self.container_client(id, "killContainer").await?;
        let result = client.kill_container(id, signal).await;
        self.settle(
            client.address(),
            "killContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn pause_container(&self, id: &str) -> Result<(), ClusterError> {
        let client = self.container_client(id, "pauseContainer").await?;
        let result = client.pause_container(id).await;
        self.settle(
            client.address(),
            "pauseContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn unpause_container(&self, id: &str) -> Result<(), ClusterError> {
        let client = self.container_client(id, "unpauseContainer").await?;
        let result = client.unpause_container(id).await;
        self.settle(
            client.address(),
            "unpauseContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    /// Remove the container and its mapping. When the host reports it gone
    /// already, the stale mapping is dropped and `NoSuchContainer` surfaces.
    pub async fn remove_container(
        &self,
        opts: RemoveContainerOptions,
    ) -> Result<(), ClusterError> {
        let client = self.container_client(&opts.id, "removeContainer").await?;
        let result = client
            .remove_container(&opts.id, opts.force, opts.remove_volumes)
            .await;
        let settled = self
            .settle(
                client.address(),
                "removeContainer",
                StoreError::NoSuchContainer(opts.id.clone()),
                result,
            )
            .await;
        match settled {
            Ok(()) => {
                self.storage.remove_container(&opts.id).await?;
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                if let Err(e) = self.storage.remove_container(&opts.id).await {
                    debug!(id = %opts.id, error = %e, "stale container mapping already gone");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Blocks until the container exits; returns its exit code.
    pub async fn wait_container(&self, id: &str) -> Result<i64, ClusterError> {
        let client = self.container_client(id, "waitContainer").await?;
        let result = client.wait_container(id).await;
        self.settle(
            client.address(),
            "waitContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    /// The raw response is handed back so the caller owns the stream.
    pub async fn attach_container(
        &self,
        id: &str,
        opts: &AttachOptions,
    ) -> Result<reqwest::Response, ClusterError> {
        let client = self.container_client(id, "attachContainer").await?;
        let result = client.attach_container(id, opts).await;
        self.settle(
            client.address(),
            "attachContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn container_logs(
        &self,
        id: &str,
        opts: &LogsOptions,
    ) -> Result<reqwest::Response, ClusterError> {
        let client = self.container_client(id, "containerLogs").await?;
        let result = client.container_logs(id, opts).await;
        self.settle(
            client.address(),
            "containerLogs",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    pub async fn export_container(&self, id: &str) -> Result<reqwest::Response, ClusterError> {
        let client = self.container_client(id, "exportContainer").await?;
        let result = client.export_container(id).await;
        self.settle(
            client.address(),
            "exportContainer",
            StoreError::NoSuchContainer(id.to_string()),
            result,
        )
        .await
    }

    /// Commit the container into an image; with a repository set, the new
    /// image id lands in the image→host index.
    pub async fn commit_container(
        &self,
        opts: CommitContainerOptions,
    ) -> Result<Value, ClusterError> {
        let client = self.container_client(&opts.id, "commitContainer").await?;
        let result = client
            .commit_container(&opts.id, opts.repository.as_deref(), opts.tag.as_deref())
            .await;
        let body = self
            .settle(
                client.address(),
                "commitContainer",
                StoreError::NoSuchContainer(opts.id.clone()),
                result,
            )
            .await?;
        if let (Some(repo), Some(image_id)) = (
            opts.repository.as_deref(),
            body.get("Id").and_then(Value::as_str),
        ) {
            if let Err(e) = self.storage.store_image(repo, image_id, client.address()).await {
                warn!(repository = repo, address = client.address(), error = %e, "failed to record committed image");
            }
        }
        Ok(body)
    }

    // ── Fleet-wide enumeration ────────────────────────────────────────────────

    /// Containers across every enabled node, concatenated. De-duplication is
    /// the caller's business.
    pub async fn list_containers(&self, all: bool) -> Result<Vec<Value>, ClusterError> {
        let addresses = self.enabled_addresses().await?;
        self.gather_on_nodes(addresses, "listContainers", move |client| async move {
            client.list_containers(all).await
        })
        .await
    }
}
