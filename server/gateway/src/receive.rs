//! The single receive loop: reads the shared UDP socket, dispatches each
//! datagram by wire packet type, and spawns/feeds per-client pipeline
//! workers. Hardened to never fault on a single malformed datagram.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use vgw_media::pipeline::{FragmentSink, PipelineOutcome, PipelineWorker, UtteranceInput, UtteranceKind};
use vgw_media::session::Role;
use vgw_media::vad::BLOCK_SAMPLES;
use vgw_media::wire::{self, PacketType};

use crate::config::Config;
use crate::observer::{ObserverEvent, ObserverHub};
use crate::registry::{ClientRegistry, LogicalClient, ObserveOutcome};
use vgw_metrics::gateway::GatewayMetrics;

/// Sends already-framed fragment payloads to a client's current address over
/// the shared UDP socket. The pipeline has no socket knowledge; this is the
/// only bridge between the two.
struct UdpFragmentSink {
    socket: Arc<UdpSocket>,
    client: Arc<LogicalClient>,
}

#[async_trait]
impl FragmentSink for UdpFragmentSink {
    async fn send_fragment(&self, payload: Vec<u8>) -> anyhow::Result<()> {
        let framed = wire::encode(PacketType::CompressionTtsMp3Fragment, &payload);
        let addr = self.client.current_addr();
        self.socket.send_to(&framed, addr).await?;
        Ok(())
    }
}

pub async fn run(
    socket: Arc<UdpSocket>,
    registry: Arc<ClientRegistry>,
    pipeline: Arc<PipelineWorker>,
    observer: Arc<ObserverHub>,
    gw_metrics: Arc<GatewayMetrics>,
    cfg: Arc<Config>,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; wire::MAX_DATAGRAM_BYTES];
    loop {
        let (n, addr) = socket.recv_from(&mut buf).await?;
        gw_metrics.packet_received();

        let packet = match wire::parse(&buf[..n]) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, %addr, "dropping malformed datagram");
                gw_metrics.packet_dropped("malformed");
                continue;
            }
        };

        match packet.kind {
            PacketType::ControlHello => {
                handle_hello(&registry, &socket, &pipeline, &observer, &gw_metrics, &cfg, addr);
            }
            PacketType::CompressionAdpcm => {
                handle_adpcm(
                    &registry,
                    &socket,
                    &pipeline,
                    &observer,
                    &gw_metrics,
                    &cfg,
                    addr,
                    packet.payload,
                );
            }
            PacketType::ControlReset => {
                handle_reset(&registry, &observer, &gw_metrics, addr);
            }
            PacketType::CompressionTtsMp3 | PacketType::CompressionTtsMp3Fragment => {
                debug!(%addr, "dropping server-to-client packet type received from a client");
                gw_metrics.packet_dropped("unexpected_direction");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_hello(
    registry: &Arc<ClientRegistry>,
    socket: &Arc<UdpSocket>,
    pipeline: &Arc<PipelineWorker>,
    observer: &Arc<ObserverHub>,
    gw_metrics: &Arc<GatewayMetrics>,
    cfg: &Arc<Config>,
    addr: SocketAddr,
) {
    let (client, outcome) = match registry.observe(addr) {
        Ok(v) => v,
        Err(e) => {
            warn!(%addr, error = %e, "registry at capacity, dropping hello");
            gw_metrics.admission_rejected();
            gw_metrics.packet_dropped("at_capacity");
            return;
        }
    };
    log_observe_outcome(&client, outcome, gw_metrics, observer);
    maybe_enqueue_greeting(&client, pipeline, socket, observer, gw_metrics, cfg);
}

/// Enqueue a canned greeting utterance the first time a client is seen,
/// whether that discovery happened via `CONTROL_HELLO` or the first audio
/// datagram — both dispatch paths call this.
fn maybe_enqueue_greeting(
    client: &Arc<LogicalClient>,
    pipeline: &Arc<PipelineWorker>,
    socket: &Arc<UdpSocket>,
    observer: &Arc<ObserverHub>,
    gw_metrics: &Arc<GatewayMetrics>,
    cfg: &Arc<Config>,
) {
    if client.welcomed.swap(true, std::sync::atomic::Ordering::SeqCst) {
        return;
    }
    let input = UtteranceInput {
        kind: UtteranceKind::Greeting,
        pcm: Vec::new(),
        history: Vec::new(),
        language_hint: cfg.language_hint.clone(),
        voice_id: cfg.tts_voice_id.clone(),
        session_id: client.session_id,
        chunk_index: client.chunk_index(),
    };
    info!(ip = %client.ip, "greeting utterance enqueued");
    enqueue_utterance(client, input, pipeline, socket, observer, gw_metrics);
}

fn handle_reset(
    registry: &Arc<ClientRegistry>,
    observer: &Arc<ObserverHub>,
    gw_metrics: &Arc<GatewayMetrics>,
    addr: SocketAddr,
) {
    let (client, outcome) = match registry.observe(addr) {
        Ok(v) => v,
        Err(_) => return,
    };
    log_observe_outcome(&client, outcome, gw_metrics, observer);

    client.dialogue.lock().unwrap().clear();
    client.trigger.lock().unwrap().reset();
    client.block_carry.lock().unwrap().clear();
    gw_metrics.client_reset();
    observer.publish(client.ip, ObserverEvent::Reset);
    info!(ip = %client.ip, "client reset");
}

#[allow(clippy::too_many_arguments)]
fn handle_adpcm(
    registry: &Arc<ClientRegistry>,
    socket: &Arc<UdpSocket>,
    pipeline: &Arc<PipelineWorker>,
    observer: &Arc<ObserverHub>,
    gw_metrics: &Arc<GatewayMetrics>,
    cfg: &Arc<Config>,
    addr: SocketAddr,
    payload: &[u8],
) {
    let (client, outcome) = match registry.observe(addr) {
        Ok(v) => v,
        Err(e) => {
            warn!(%addr, error = %e, "registry at capacity, dropping audio");
            gw_metrics.admission_rejected();
            gw_metrics.packet_dropped("at_capacity");
            return;
        }
    };
    log_observe_outcome(&client, outcome, gw_metrics, observer);
    maybe_enqueue_greeting(&client, pipeline, socket, observer, gw_metrics, cfg);

    let decoded = {
        let mut state = client.decoder.lock().unwrap();
        match vgw_media::adpcm::decode(&mut state, payload) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(ip = %client.ip, error = %e, "dropping malformed adpcm payload");
                gw_metrics.packet_dropped("bad_adpcm");
                return;
            }
        }
    };

    let mut flushed: Vec<Vec<f32>> = Vec::new();
    {
        let mut carry = client.block_carry.lock().unwrap();
        carry.extend(decoded);
        while carry.len() >= BLOCK_SAMPLES {
            let block: Vec<f32> = carry.drain(..BLOCK_SAMPLES).collect();
            let is_speech = client.vad.lock().unwrap().is_speech(&block);
            if let Some(utterance) = client.trigger.lock().unwrap().push_block(&block, is_speech) {
                flushed.push(utterance);
            }
        }
    }

    for pcm in flushed {
        dispatch_utterance(&client, pcm, pipeline, socket, observer, gw_metrics, cfg);
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_utterance(
    client: &Arc<LogicalClient>,
    pcm: Vec<f32>,
    pipeline: &Arc<PipelineWorker>,
    socket: &Arc<UdpSocket>,
    observer: &Arc<ObserverHub>,
    gw_metrics: &Arc<GatewayMetrics>,
    cfg: &Arc<Config>,
) {
    observer.publish(client.ip, ObserverEvent::Utterance { transcript: String::new() });

    let history: Vec<(Role, String)> = client.dialogue.lock().unwrap().turns().cloned().collect();
    let input = UtteranceInput {
        kind: UtteranceKind::Speech,
        pcm,
        history,
        language_hint: cfg.language_hint.clone(),
        voice_id: cfg.tts_voice_id.clone(),
        session_id: client.session_id,
        chunk_index: client.chunk_index(),
    };

    enqueue_utterance(client, input, pipeline, socket, observer, gw_metrics);
}

/// Hand one utterance to a client's pipeline worker, spawning that worker's
/// task the first time a client has anything to process. A worker task, once
/// spawned, lives for the client's whole lifetime looping on
/// `next_utterance`, so whether a task exists says nothing about whether it
/// is currently mid-reply — that's tracked separately via `is_busy`.
fn enqueue_utterance(
    client: &Arc<LogicalClient>,
    input: UtteranceInput,
    pipeline: &Arc<PipelineWorker>,
    socket: &Arc<UdpSocket>,
    observer: &Arc<ObserverHub>,
    gw_metrics: &Arc<GatewayMetrics>,
) {
    let worker_spawned = client.worker_handle.lock().unwrap().is_some();
    if !worker_spawned {
        spawn_worker(client.clone(), pipeline.clone(), socket.clone(), observer.clone(), gw_metrics.clone());
    } else if client.is_busy() {
        // Fresh input arrived while the worker is mid-reply; interrupt it so
        // the new utterance takes over instead of queuing behind a stale one.
        client.raise_interrupt();
    }
    client.offer_utterance(input);
}

fn spawn_worker(
    client: Arc<LogicalClient>,
    pipeline: Arc<PipelineWorker>,
    socket: Arc<UdpSocket>,
    observer: Arc<ObserverHub>,
    gw_metrics: Arc<GatewayMetrics>,
) {
    let worker_client = client.clone();
    let handle = tokio::spawn(async move {
        let client = worker_client;
        let sink = UdpFragmentSink { socket, client: client.clone() };
        loop {
            let input = client.next_utterance().await;
            if !client.past_cooldown(Instant::now()) {
                continue;
            }
            let is_greeting = input.kind == UtteranceKind::Greeting;

            client.set_busy(true);
            let outcome = pipeline.process(input, &sink, client.as_ref()).await;
            client.set_busy(false);

            match outcome {
                PipelineOutcome::Idle => {}
                PipelineOutcome::Replied { reply_text, .. } => {
                    if is_greeting {
                        gw_metrics.greeting_sent();
                    }
                    let mut dialogue = client.dialogue.lock().unwrap();
                    dialogue.push(Role::Assistant, reply_text.clone());
                    drop(dialogue);
                    observer.publish(client.ip, ObserverEvent::ReplyText { text: reply_text });
                }
                PipelineOutcome::Interrupted { .. } => {
                    gw_metrics.packet_dropped("interrupted_chunk");
                }
            }
        }
    });
    *client.worker_handle.lock().unwrap() = Some(handle);
}

fn log_observe_outcome(
    client: &Arc<LogicalClient>,
    outcome: ObserveOutcome,
    gw_metrics: &Arc<GatewayMetrics>,
    observer: &Arc<ObserverHub>,
) {
    match outcome {
        ObserveOutcome::Created => {
            gw_metrics.client_created();
            info!(ip = %client.ip, "client created");
            observer.publish(client.ip, ObserverEvent::Connected);
        }
        ObserveOutcome::Migrated => {
            gw_metrics.client_migrated();
            info!(ip = %client.ip, port = client.current_addr().port(), "client migrated");
            observer.publish(client.ip, ObserverEvent::Migrated);
        }
        ObserveOutcome::Unchanged => {}
    }
}
