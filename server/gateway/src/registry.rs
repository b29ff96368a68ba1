//! The client registry: maps a remote IP to a durable [`LogicalClient`],
//! reconciling NAT-induced source-port churn and reaping idle sessions.
//!
//! The registry lock is held only for the lookup/insert itself; every other
//! per-client operation (decoder state, dialogue history, the trigger
//! buffer) goes through that client's own lock, never the registry's.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use vgw_media::adpcm::AdpcmState;
use vgw_media::errors::RegistryError;
use vgw_media::pipeline::{InterruptHandle, UtteranceInput};
use vgw_media::session::DialogueSession;
use vgw_media::trigger::AudioTriggerBuffer;
use vgw_media::vad::{EnergyVad, VoiceActivityDetector};

pub struct LogicalClient {
    pub ip: IpAddr,
    pub session_id: [u8; 16],
    current_addr: Mutex<SocketAddr>,
    pub welcomed: AtomicBool,
    last_activity: Mutex<Instant>,
    chunk_counter: AtomicU32,
    interrupt_cooldown_until: Mutex<Instant>,
    interrupt_cooldown: Duration,
    interrupted: AtomicBool,
    /// Set for the duration of a `PipelineWorker::process` call; distinct
    /// from `worker_handle`, which is `Some` from the moment a client's first
    /// utterance spawns its worker task and never reverts to `None` while
    /// that task loops waiting for the next one.
    busy: AtomicBool,
    pub decoder: Mutex<AdpcmState>,
    pub vad: Mutex<Box<dyn VoiceActivityDetector>>,
    pub trigger: Mutex<AudioTriggerBuffer>,
    /// Samples decoded but not yet long enough to form a full VAD block;
    /// carried across datagrams since ADPCM packets rarely land on a
    /// 512-sample boundary.
    pub block_carry: Mutex<Vec<f32>>,
    pub dialogue: Mutex<DialogueSession>,
    /// Single-slot mailbox for the next utterance to run through the
    /// pipeline. A fresh flush always overwrites whatever is waiting here —
    /// there is never a backlog, only ever the latest utterance.
    pending_utterance: Mutex<Option<UtteranceInput>>,
    utterance_ready: Notify,
    pub worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LogicalClient {
    fn new(
        addr: SocketAddr,
        dialogue_history_limit: usize,
        trigger_cfg: vgw_media::trigger::TriggerConfig,
        interrupt_cooldown: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            ip: addr.ip(),
            session_id: *Uuid::new_v4().as_bytes(),
            current_addr: Mutex::new(addr),
            welcomed: AtomicBool::new(false),
            last_activity: Mutex::new(now),
            chunk_counter: AtomicU32::new(0),
            interrupt_cooldown_until: Mutex::new(now),
            interrupt_cooldown,
            interrupted: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            decoder: Mutex::new(AdpcmState::default()),
            vad: Mutex::new(Box::new(EnergyVad::default())),
            trigger: Mutex::new(AudioTriggerBuffer::new(trigger_cfg)),
            block_carry: Mutex::new(Vec::new()),
            dialogue: Mutex::new(DialogueSession::new(dialogue_history_limit)),
            pending_utterance: Mutex::new(None),
            utterance_ready: Notify::new(),
            worker_handle: Mutex::new(None),
        }
    }

    pub fn current_addr(&self) -> SocketAddr {
        *self.current_addr.lock().unwrap()
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap()
    }

    pub fn chunk_index(&self) -> u32 {
        self.chunk_counter.load(Ordering::SeqCst)
    }

    /// Whether a fresh utterance is allowed to start a new reply right now,
    /// i.e. we are past the interruption debounce window.
    pub fn past_cooldown(&self, now: Instant) -> bool {
        now >= *self.interrupt_cooldown_until.lock().unwrap()
    }

    /// Place a freshly flushed utterance in the mailbox, overwriting
    /// whatever was there, and wake the pipeline worker.
    pub fn offer_utterance(&self, input: UtteranceInput) {
        *self.pending_utterance.lock().unwrap() = Some(input);
        self.utterance_ready.notify_one();
    }

    /// Wait for and take the next utterance. Only the client's own worker
    /// task calls this.
    pub async fn next_utterance(&self) -> UtteranceInput {
        loop {
            let notified = self.utterance_ready.notified();
            if let Some(input) = self.pending_utterance.lock().unwrap().take() {
                return input;
            }
            notified.await;
        }
    }

    /// Called by the receive loop when fresh speech arrives for a client
    /// whose pipeline worker is mid-reply.
    pub fn raise_interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Whether the pipeline worker is currently inside `PipelineWorker::process`
    /// for this client, as opposed to merely having a worker task alive and
    /// parked on `next_utterance`.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl InterruptHandle for LogicalClient {
    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    fn note_interrupted_during_send(&self) {
        self.chunk_counter.fetch_add(1, Ordering::SeqCst);
        *self.interrupt_cooldown_until.lock().unwrap() = Instant::now() + self.interrupt_cooldown;
    }
}

/// Outcome of a registry lookup, distinguishing the three cases the receive
/// loop reacts to differently (greeting, migration log, nothing notable).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObserveOutcome {
    Created,
    Migrated,
    Unchanged,
}

pub struct ClientRegistry {
    clients: RwLock<std::collections::HashMap<IpAddr, std::sync::Arc<LogicalClient>>>,
    max_clients: usize,
    dialogue_history_limit: usize,
    trigger_cfg: vgw_media::trigger::TriggerConfig,
    interrupt_cooldown: Duration,
}

impl ClientRegistry {
    pub fn new(
        max_clients: usize,
        dialogue_history_limit: usize,
        trigger_cfg: vgw_media::trigger::TriggerConfig,
        interrupt_cooldown: Duration,
    ) -> Self {
        Self {
            clients: RwLock::new(std::collections::HashMap::new()),
            max_clients,
            dialogue_history_limit,
            trigger_cfg,
            interrupt_cooldown,
        }
    }

    /// Look up (or create) the logical client for `addr`'s IP. Reconciles
    /// source-port churn as a metadata update, never a session rebuild.
    pub fn observe(
        &self,
        addr: SocketAddr,
    ) -> Result<(std::sync::Arc<LogicalClient>, ObserveOutcome), RegistryError> {
        let ip = addr.ip();

        if let Some(client) = self.clients.read().unwrap().get(&ip).cloned() {
            client.touch();
            let mut cur = client.current_addr.lock().unwrap();
            if *cur != addr {
                *cur = addr;
                drop(cur);
                return Ok((client, ObserveOutcome::Migrated));
            }
            return Ok((client, ObserveOutcome::Unchanged));
        }

        let mut clients = self.clients.write().unwrap();
        if let Some(client) = clients.get(&ip).cloned() {
            client.touch();
            return Ok((client, ObserveOutcome::Unchanged));
        }
        if clients.len() >= self.max_clients {
            return Err(RegistryError::AtCapacity(self.max_clients));
        }

        let client = std::sync::Arc::new(LogicalClient::new(
            addr,
            self.dialogue_history_limit,
            self.trigger_cfg.clone(),
            self.interrupt_cooldown,
        ));
        clients.insert(ip, client.clone());
        Ok((client, ObserveOutcome::Created))
    }

    pub fn get(&self, ip: IpAddr) -> Option<std::sync::Arc<LogicalClient>> {
        self.clients.read().unwrap().get(&ip).cloned()
    }

    /// Remove every client whose last activity predates `now - idle_window`.
    /// Returns the reaped clients so the caller can abort their workers and
    /// emit logs/metrics/observer events outside the registry lock.
    pub fn reap(&self, now: Instant, idle_window: Duration) -> Vec<std::sync::Arc<LogicalClient>> {
        let mut clients = self.clients.write().unwrap();
        let stale: Vec<IpAddr> = clients
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity()) >= idle_window)
            .map(|(ip, _)| *ip)
            .collect();

        stale
            .into_iter()
            .filter_map(|ip| clients.remove(&ip))
            .collect()
    }

    /// Drop a client outright, independent of its activity timestamp. Not
    /// used by `CONTROL_RESET` (which clears session state in place) but
    /// kept for administrative use and tests.
    pub fn remove(&self, ip: IpAddr) -> Option<std::sync::Arc<LogicalClient>> {
        self.clients.write().unwrap().remove(&ip)
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use vgw_media::trigger::TriggerConfig;

    fn addr(ip: [u8; 4], port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port)
    }

    #[test]
    fn single_identity_survives_port_churn() {
        let reg = ClientRegistry::new(10, 50, TriggerConfig::default(), Duration::from_millis(500));

        let (c1, o1) = reg.observe(addr([10, 0, 0, 5], 40001)).unwrap();
        assert_eq!(o1, ObserveOutcome::Created);

        let (c2, o2) = reg.observe(addr([10, 0, 0, 5], 40002)).unwrap();
        assert_eq!(o2, ObserveOutcome::Migrated);
        assert!(std::sync::Arc::ptr_eq(&c1, &c2));

        let (c3, o3) = reg.observe(addr([10, 0, 0, 5], 40003)).unwrap();
        assert_eq!(o3, ObserveOutcome::Migrated);
        assert!(std::sync::Arc::ptr_eq(&c1, &c3));
        assert_eq!(reg.len(), 1);
        assert_eq!(c3.current_addr().port(), 40003);
    }

    #[test]
    fn reap_leaves_other_sessions_untouched() {
        let reg = ClientRegistry::new(10, 50, TriggerConfig::default(), Duration::from_millis(500));
        let (active, _) = reg.observe(addr([10, 0, 0, 1], 1)).unwrap();
        let (idle, _) = reg.observe(addr([10, 0, 0, 2], 2)).unwrap();
        active.dialogue.lock().unwrap().push(vgw_media::session::Role::User, "hi");
        active.welcomed.store(true, Ordering::SeqCst);

        *idle.last_activity.lock().unwrap() = Instant::now() - Duration::from_secs(1_000);

        let reaped = reg.reap(Instant::now(), Duration::from_millis(120_000));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].ip, idle.ip);

        assert_eq!(reg.len(), 1);
        assert!(reg.get(active.ip).is_some());
        assert!(active.welcomed.load(Ordering::SeqCst));
        assert_eq!(active.dialogue.lock().unwrap().len(), 1);
    }

    #[test]
    fn reset_clears_dialogue_and_trigger_but_preserves_identity() {
        let reg = ClientRegistry::new(10, 50, TriggerConfig::default(), Duration::from_millis(500));
        let (client, _) = reg.observe(addr([10, 0, 0, 9], 1)).unwrap();
        client.welcomed.store(true, Ordering::SeqCst);
        client.dialogue.lock().unwrap().push(vgw_media::session::Role::User, "hi");
        client.block_carry.lock().unwrap().extend([0.1f32, 0.2, 0.3]);
        let decoder_before = *client.decoder.lock().unwrap();

        // Mirrors the gateway's CONTROL_RESET handling: clear conversational
        // and in-flight audio state, never the identity or codec state.
        client.dialogue.lock().unwrap().clear();
        client.trigger.lock().unwrap().reset();
        client.block_carry.lock().unwrap().clear();

        assert!(client.dialogue.lock().unwrap().is_empty());
        assert!(client.block_carry.lock().unwrap().is_empty());
        assert!(client.welcomed.load(Ordering::SeqCst));
        assert_eq!(*client.decoder.lock().unwrap(), decoder_before);
        assert_eq!(client.session_id, reg.get(client.ip).unwrap().session_id);
    }

    #[test]
    fn soft_cap_rejects_new_ips_but_serves_known_ones() {
        let reg = ClientRegistry::new(1, 50, TriggerConfig::default(), Duration::from_millis(500));
        reg.observe(addr([10, 0, 0, 1], 1)).unwrap();

        let err = reg.observe(addr([10, 0, 0, 2], 2)).unwrap_err();
        assert!(matches!(err, RegistryError::AtCapacity(1)));

        // Already-known IP still served despite being at capacity.
        assert!(reg.observe(addr([10, 0, 0, 1], 2)).is_ok());
    }
}
