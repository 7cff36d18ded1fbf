use armada_client::ClientError;
use armada_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Storage-level routing errors (`NoSuchContainer` and friends) pass
    /// through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A remote call failed on a specific node. The base error is preserved.
    #[error("error running {cmd} in docker node {address}: {source}")]
    Node {
        address: String,
        cmd: &'static str,
        #[source]
        source: ClientError,
    },

    /// The daemon answered but the body wasn't what the protocol promises.
    #[error("unexpected response from node {address}: {message}")]
    UnexpectedResponse { address: String, message: String },

    #[error("no nodes available")]
    NoNodesAvailable,

    #[error("invalid address")]
    InvalidAddress,

    /// Another holder owns the node's healing lease.
    #[error("healer already running for node {0}")]
    HealerInProgress(String),

    #[error("timed out waiting for node to be ready")]
    WaitNodeTimeout,
}

impl ClusterError {
    /// The routing not-found class: the index simply has no such entry.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClusterError::Store(
                StoreError::NoSuchNode(_)
                    | StoreError::NoSuchContainer(_)
                    | StoreError::NoSuchImage(_)
            )
        )
    }
}
