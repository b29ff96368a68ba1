mod collaborators;
mod config;
mod metrics_adapter;
mod observer;
mod reaper;
mod receive;
mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use vgw_media::pipeline::{PipelineConfig, PipelineWorker};
use vgw_media::trigger::TriggerConfig;
use vgw_metrics::{MetricsConfig, MetricsServer};

use crate::collaborators::{EchoLlm, SilentAsr, SilentTts};
use crate::config::Config;
use crate::observer::ObserverHub;
use crate::registry::ClientRegistry;

/// A short fixed MP3-shaped blob stood in for a real canned error
/// utterance; a production deployment replaces this with a pre-rendered
/// audio asset.
const CANNED_ERROR_MP3: &[u8] = &[];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Arc::new(Config::parse());
    if cfg.fragment_max_bytes != vgw_media::wire::MAX_DATAGRAM_BYTES {
        tracing::warn!(
            configured = cfg.fragment_max_bytes,
            wire = vgw_media::wire::MAX_DATAGRAM_BYTES,
            "fragment_max_bytes is informational only; the wire codec's MTU cap is fixed"
        );
    }

    let metrics_server = MetricsServer::install(MetricsConfig {
        listen: cfg.metrics_listen.clone(),
        namespace: metrics_adapter::NAMESPACE,
    })?;
    tokio::spawn(async move {
        if let Err(e) = metrics_server.serve().await {
            tracing::warn!(error = %e, "metrics server exited");
        }
    });

    let gw_metrics = metrics_adapter::gateway_metrics();
    let pipeline_metrics = metrics_adapter::pipeline_metrics();

    let pipeline = Arc::new(PipelineWorker::new(
        PipelineConfig {
            asr_timeout: Duration::from_millis(cfg.asr_timeout_ms),
            llm_timeout: Duration::from_millis(cfg.llm_timeout_ms),
            tts_timeout: Duration::from_millis(cfg.tts_timeout_ms),
            inter_fragment_gap: Duration::from_millis(2),
        },
        Arc::new(SilentAsr),
        Arc::new(EchoLlm),
        Arc::new(SilentTts),
        pipeline_metrics,
        CANNED_ERROR_MP3.to_vec(),
    ));

    let trigger_cfg = TriggerConfig {
        sample_rate: cfg.sample_rate,
        silence_ms_for_flush: cfg.silence_ms_for_flush,
        max_utterance_ms: cfg.max_utterance_ms,
    };
    let registry = Arc::new(ClientRegistry::new(
        cfg.max_clients,
        cfg.dialogue_history_limit,
        trigger_cfg,
        Duration::from_millis(cfg.interrupt_cooldown_ms),
    ));
    let observer = Arc::new(ObserverHub::new());

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    info!(%addr, "listening");

    tokio::spawn(reaper::run(
        registry.clone(),
        observer.clone(),
        gw_metrics.clone(),
        Duration::from_millis(cfg.reap_sweep_interval_ms),
        Duration::from_millis(cfg.reap_idle_ms),
    ));

    tokio::select! {
        r = receive::run(socket, registry, pipeline, observer, gw_metrics, cfg) => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown");
        }
    }

    Ok(())
}
