use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid node address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The daemon answered 404: the resource simply isn't on this host.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// True for the remote not-found class the dispatcher tolerates.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}
