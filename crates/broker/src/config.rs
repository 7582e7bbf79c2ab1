// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which persistence adapter the broker loads at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    /// Snapshot-file backend, `spec.md` §4.2. The env value is `persistent`
    /// to match the two names the spec enumerates for `STORE_BACKEND`.
    Persistent,
    /// `sqlx`-backed relational backend, `SPEC_FULL.md` §13.
    Relational,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "persistent" => Ok(Self::Persistent),
            "relational" => Ok(Self::Relational),
            other => Err(format!("unknown STORE_BACKEND {other:?}, expected memory|persistent|relational")),
        }
    }
}

/// Configuration for the agent message bus broker.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "agentbus-broker", about = "Agent message bus broker")]
pub struct BrokerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8085, env = "PORT")]
    pub port: u16,

    /// Persistence backend: memory, persistent (snapshot file), or relational.
    #[arg(long, default_value = "memory", env = "STORE_BACKEND")]
    pub store_backend: StoreBackend,

    /// Path to the snapshot file (required when `store_backend=persistent`)
    /// or the SQLite database file (when `store_backend=relational`).
    #[arg(long, env = "STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Comma-separated list of agent ids allowed to register. Empty means unrestricted.
    #[arg(long, env = "AGENT_ALLOWLIST", value_delimiter = ',')]
    pub agent_allowlist: Vec<String>,

    /// Comma-separated list of human identities allowed to inject messages. Empty means unrestricted.
    #[arg(long, env = "HUMAN_ALLOWLIST", value_delimiter = ',')]
    pub human_allowlist: Vec<String>,

    /// Grace period past expiry during which a target may still receive queued sends, in seconds.
    #[arg(long, default_value_t = 30, env = "BUS_GRACE_PERIOD_SECS")]
    pub grace_period_secs: u64,

    /// Minimum spacing between progress events per message, in seconds.
    #[arg(long, default_value_t = 2, env = "BUS_PROGRESS_MIN_INTERVAL_SECS")]
    pub progress_min_interval_secs: u64,

    /// How long a (from,to,request_id) idempotency key is honored, in seconds.
    #[arg(long, default_value_t = 86_400, env = "BUS_IDEMPOTENCY_WINDOW_SECS")]
    pub idempotency_window_secs: u64,

    /// Upper bound clamp on long-poll wait, in seconds.
    #[arg(long, default_value_t = 60, env = "BUS_INBOX_WAIT_MAX_SECS")]
    pub inbox_wait_max_secs: u64,

    /// Time a message may sit in `waiting` before auto-error, in seconds.
    #[arg(long, default_value_t = 10, env = "BUS_ACK_TIMEOUT_SECS")]
    pub ack_timeout_secs: u64,

    /// Message TTL applied when the caller omits one, in seconds.
    #[arg(long, default_value_t = 600, env = "BUS_DEFAULT_MESSAGE_TTL_SECS")]
    pub default_message_ttl_secs: u64,

    /// Registration TTL applied when the caller omits one, in seconds.
    #[arg(long, default_value_t = 60, env = "BUS_DEFAULT_REGISTRATION_TTL_SECS")]
    pub default_registration_ttl_secs: u64,

    /// Push delivery retry budget.
    #[arg(long, default_value_t = 3, env = "BUS_PUSH_MAX_ATTEMPTS")]
    pub push_max_attempts: u32,

    /// Initial exponential backoff before a push retry, in milliseconds.
    #[arg(long, default_value_t = 500, env = "BUS_PUSH_BASE_BACKOFF_MS")]
    pub push_base_backoff_ms: u64,

    /// Head-trim threshold per agent inbox.
    #[arg(long, default_value_t = 10_000, env = "BUS_MAX_INBOX_EVENTS_PER_AGENT")]
    pub max_inbox_events_per_agent: usize,

    /// Head-trim threshold for the global observe log.
    #[arg(long, default_value_t = 50_000, env = "BUS_MAX_OBSERVE_EVENTS")]
    pub max_observe_events: usize,

    /// Long-poll retry interval for inbox polling, in milliseconds.
    #[arg(long, default_value_t = 100, env = "BUS_INBOX_POLL_INTERVAL_MS")]
    pub inbox_poll_interval_ms: u64,

    /// Long-poll retry interval for observe streaming, in milliseconds.
    #[arg(long, default_value_t = 1000, env = "BUS_OBSERVE_POLL_INTERVAL_MS")]
    pub observe_poll_interval_ms: u64,
}

impl BrokerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn progress_min_interval(&self) -> Duration {
        Duration::from_secs(self.progress_min_interval_secs)
    }

    pub fn idempotency_window(&self) -> Duration {
        Duration::from_secs(self.idempotency_window_secs)
    }

    pub fn inbox_wait_max(&self) -> Duration {
        Duration::from_secs(self.inbox_wait_max_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn default_message_ttl(&self) -> Duration {
        Duration::from_secs(self.default_message_ttl_secs)
    }

    pub fn default_registration_ttl(&self) -> Duration {
        Duration::from_secs(self.default_registration_ttl_secs)
    }

    pub fn push_base_backoff(&self) -> Duration {
        Duration::from_millis(self.push_base_backoff_ms)
    }

    pub fn inbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.inbox_poll_interval_ms)
    }

    pub fn observe_poll_interval(&self) -> Duration {
        Duration::from_millis(self.observe_poll_interval_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8085,
            store_backend: StoreBackend::Memory,
            state_file: None,
            agent_allowlist: Vec::new(),
            human_allowlist: Vec::new(),
            grace_period_secs: 30,
            progress_min_interval_secs: 2,
            idempotency_window_secs: 86_400,
            inbox_wait_max_secs: 60,
            ack_timeout_secs: 10,
            default_message_ttl_secs: 600,
            default_registration_ttl_secs: 60,
            push_max_attempts: 3,
            push_base_backoff_ms: 500,
            max_inbox_events_per_agent: 10_000,
            max_observe_events: 50_000,
            inbox_poll_interval_ms: 100,
            observe_poll_interval_ms: 1000,
        }
    }
}
