use std::sync::Arc;
use std::time::Duration;

use armada_client::NodeClient;
use armada_store::ClusterStore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cluster::Cluster;
use crate::healing::NodeHealing;

pub(crate) struct MonitorHandle {
    stop: mpsc::Sender<()>,
}

impl Cluster {
    /// Launch the active monitor: every `interval`, probe every registered
    /// node (disabled ones included) in parallel and feed the outcomes into
    /// the healing state machine. A no-op when a monitor is already running.
    pub fn start_active_monitoring(&self, interval: Duration) {
        let mut guard = self.monitor.lock().expect("monitor lock poisoned");
        if guard.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let storage = self.storage.clone();
        let healing = self.healing.clone();
        tokio::spawn(async move {
            debug!(interval_ms = interval.as_millis() as u64, "active monitoring started");
            loop {
                probe_round(&storage, &healing).await;
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("active monitoring stopped");
        });
        *guard = Some(MonitorHandle { stop: stop_tx });
    }

    /// Signal the monitor loop to exit. In-flight probes run to completion;
    /// the loop only checks the signal between cycles.
    pub fn stop_active_monitoring(&self) {
        if let Some(handle) = self.monitor.lock().expect("monitor lock poisoned").take() {
            let _ = handle.stop.try_send(());
        }
    }
}

async fn probe_round(storage: &Arc<dyn ClusterStore>, healing: &Arc<NodeHealing>) {
    let nodes = match storage.retrieve_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!(error = %e, "monitor could not enumerate nodes");
            return;
        }
    };

    let mut probes = JoinSet::new();
    for node in nodes {
        let healing = healing.clone();
        probes.spawn(async move {
            let outcome = match NodeClient::new(&node.address) {
                Ok(client) => client.ping().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(()) => {
                    if let Err(e) = healing.handle_node_success(&node.address).await {
                        debug!(address = %node.address, error = %e, "success handler skipped");
                    }
                }
                Err(failure) => {
                    debug!(address = %node.address, error = %failure, "liveness probe failed");
                    if let Err(e) = healing
                        .handle_node_error(node.address.clone(), failure, true)
                        .await
                    {
                        debug!(address = %node.address, error = %e, "error handler skipped");
                    }
                }
            }
        });
    }
    while probes.join_next().await.is_some() {}
}
