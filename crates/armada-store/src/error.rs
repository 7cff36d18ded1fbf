use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A node address is the primary key; storing it twice is a caller bug.
    #[error("node address shouldn't repeat: {0}")]
    DuplicatedNodeAddress(String),

    #[error("no such node in storage: {0}")]
    NoSuchNode(String),

    #[error("no such container in storage: {0}")]
    NoSuchContainer(String),

    #[error("no such image in storage: {0}")]
    NoSuchImage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
