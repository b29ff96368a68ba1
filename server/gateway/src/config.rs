use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "vgw-gateway", about = "Real-time duplex audio gateway")]
pub struct Config {
    /// UDP port the gateway listens on; same port serves inbound and
    /// outbound traffic for every client.
    #[arg(long, env = "VGW_LISTEN_PORT", default_value_t = 31_000)]
    pub listen_port: u16,

    /// Address the Prometheus exporter binds to.
    #[arg(long, env = "VGW_METRICS_LISTEN", default_value = "0.0.0.0:9100")]
    pub metrics_listen: String,

    /// Soft cap on distinct client IPs held in the registry at once. Once
    /// reached, new IPs are rejected until the reaper frees capacity;
    /// already-known IPs are served regardless.
    #[arg(long, env = "VGW_MAX_CLIENTS", default_value_t = 10_000)]
    pub max_clients: usize,

    /// How often the reaper sweeps the registry for idle clients.
    #[arg(long, env = "VGW_REAP_SWEEP_INTERVAL_MS", default_value_t = 10_000)]
    pub reap_sweep_interval_ms: u64,

    /// Inactivity window after which a client is reaped.
    #[arg(long, env = "VGW_REAP_IDLE_MS", default_value_t = 120_000)]
    pub reap_idle_ms: u64,

    /// Sustained-silence threshold that flushes a collecting utterance.
    #[arg(long, env = "VGW_SILENCE_MS_FOR_FLUSH", default_value_t = 900)]
    pub silence_ms_for_flush: u64,

    /// Hard cap on a single collected utterance before it is force-flushed.
    #[arg(long, env = "VGW_MAX_UTTERANCE_MS", default_value_t = 15_000)]
    pub max_utterance_ms: u64,

    /// Debounce window after an interruption before a new utterance may
    /// trigger another reply.
    #[arg(long, env = "VGW_INTERRUPT_COOLDOWN_MS", default_value_t = 500)]
    pub interrupt_cooldown_ms: u64,

    /// Outer UDP datagram size ceiling, shared with the fragmenter.
    #[arg(long, env = "VGW_FRAGMENT_MAX_BYTES", default_value_t = 1_400)]
    pub fragment_max_bytes: usize,

    /// Number of (role, text) turns retained per client's dialogue history.
    #[arg(long, env = "VGW_DIALOGUE_HISTORY_LIMIT", default_value_t = 50)]
    pub dialogue_history_limit: usize,

    /// Voice identity passed to the TTS collaborator.
    #[arg(long, env = "VGW_TTS_VOICE_ID", default_value = "default")]
    pub tts_voice_id: String,

    /// Language hint passed to the ASR collaborator.
    #[arg(long, env = "VGW_LANGUAGE_HINT", default_value = "en")]
    pub language_hint: String,

    /// Per-call ASR deadline.
    #[arg(long, env = "VGW_ASR_TIMEOUT_MS", default_value_t = 4_000)]
    pub asr_timeout_ms: u64,

    /// Per-call LLM deadline.
    #[arg(long, env = "VGW_LLM_TIMEOUT_MS", default_value_t = 8_000)]
    pub llm_timeout_ms: u64,

    /// Per-call TTS deadline.
    #[arg(long, env = "VGW_TTS_TIMEOUT_MS", default_value_t = 4_000)]
    pub tts_timeout_ms: u64,

    /// Audio sample rate; fixed by the wire format but kept configurable for
    /// the trigger buffer's block-duration math.
    #[arg(long, env = "VGW_SAMPLE_RATE", default_value_t = 16_000)]
    pub sample_rate: u32,
}
