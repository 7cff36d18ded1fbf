pub mod cluster;
pub mod container;
pub mod error;
pub mod healing;
pub mod image;
pub mod monitor;
pub mod scheduler;

pub use cluster::Cluster;
pub use container::{
    CommitContainerOptions, CreateContainerOptions, CreatedContainer, RemoveContainerOptions,
};
pub use error::ClusterError;
pub use healing::{DefaultHealer, Healer};
pub use image::{BuildImageOptions, ImportImageOptions, PullImageOptions};
pub use scheduler::{RoundRobin, Scheduler};

// the pieces callers wire a cluster together from
pub use armada_client::{AttachOptions, LogsOptions};
pub use armada_domain::{Node, NodeStatus};
pub use armada_store::{ClusterStore, MemoryStore, RedbStore, StoreError};
