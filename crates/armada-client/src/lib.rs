pub mod client;
pub mod error;
mod http;

pub use client::{http_delete, AttachOptions, LogsOptions, NodeClient};
pub use error::ClientError;
