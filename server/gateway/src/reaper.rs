//! Periodic sweep that removes clients idle past the inactivity window,
//! aborting their pipeline workers and releasing every per-client resource
//! (decoder state, dialogue, trigger buffer, observer binding).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::observer::{ObserverEvent, ObserverHub};
use crate::registry::ClientRegistry;
use vgw_metrics::gateway::GatewayMetrics;

pub async fn run(
    registry: Arc<ClientRegistry>,
    observer: Arc<ObserverHub>,
    gw_metrics: Arc<GatewayMetrics>,
    sweep_interval: Duration,
    idle_window: Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        ticker.tick().await;
        let reaped = registry.reap(Instant::now(), idle_window);
        for client in reaped {
            if let Some(handle) = client.worker_handle.lock().unwrap().take() {
                handle.abort();
            }
            observer.publish(client.ip, ObserverEvent::Reaped);
            observer.unbind(client.ip);
            gw_metrics.client_reaped();
            info!(ip = %client.ip, "client reaped");
        }
    }
}
