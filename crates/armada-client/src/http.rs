use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;

// Process-wide HTTP clients, shared across every node. Each per-node client
// wrapper is rebuilt from the node address as needed; connection reuse is
// whatever the underlying transport offers.

/// Liveness probes: 5 s dial, 60 s total.
pub(crate) static PING_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(60))
        .build()
        .expect("ping http client")
});

/// Regular operations: 10 s dial, 1 h total.
pub(crate) static DEFAULT_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(3600))
        .build()
        .expect("default http client")
});

/// Persistent streams (attach, logs, pulls): 10 s dial, no total deadline.
pub(crate) static STREAM_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("stream http client")
});
