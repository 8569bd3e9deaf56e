//! Tunables for the transport, the executor and the raw REPL.
//!
//! Every struct deserializes with `#[serde(default)]`, so a JSON file
//! only needs the fields it overrides. Durations are integer milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Transport settings.
    pub transport: TransportConfig,
    /// Executor and REPL settings.
    pub executor: ExecutorConfig,
}

impl Config {
    /// Parses a JSON configuration document.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TransportConfig {
    /// Write block size in bytes.
    pub block_size: usize,
    /// Traffic log capacity in characters.
    pub log_capacity: usize,
    /// Quiescence window after connect during which input is discarded.
    #[serde(with = "millis", rename = "settle_ms")]
    pub settle: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            block_size: 128,
            log_capacity: 32 * 1024,
            settle: Duration::from_millis(500),
        }
    }
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ExecutorConfig {
    /// How long a state probe listens for a reply.
    #[serde(with = "millis", rename = "probe_ms")]
    pub probe: Duration,
    /// Pause between state probes while waiting for a reboot.
    #[serde(with = "millis", rename = "poll_ms")]
    pub poll: Duration,
    /// Total time a reboot may take to reach the running firmware.
    #[serde(with = "millis", rename = "reset_window_ms")]
    pub reset_window: Duration,
    /// Commands with a longer timeout emit busy notifications.
    #[serde(with = "millis", rename = "busy_threshold_ms")]
    pub busy_threshold: Duration,
    /// Timeout used when a caller has no better one.
    #[serde(with = "millis", rename = "command_timeout_ms")]
    pub command_timeout: Duration,
    /// Raw REPL settings.
    pub repl: ReplConfig,
}

/// Seconds a reboot may take before the executor gives up.
pub const RESET_SECONDS: u64 = 10;

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            probe: Duration::from_millis(100),
            poll: Duration::from_millis(500),
            reset_window: Duration::from_secs(RESET_SECONDS),
            busy_threshold: Duration::from_millis(500),
            command_timeout: Duration::from_millis(5000),
            repl: ReplConfig::default(),
        }
    }
}

/// Raw REPL timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ReplConfig {
    /// Wait for the raw REPL banner.
    #[serde(with = "millis", rename = "entry_ms")]
    pub entry: Duration,
    /// Wait for the prompt after a null command or reset.
    #[serde(with = "millis", rename = "prompt_ms")]
    pub prompt: Duration,
    /// Wait for `OK` after a submission.
    #[serde(with = "millis", rename = "acknowledge_ms")]
    pub acknowledge: Duration,
    /// Wait for the end of a program's stdout.
    #[serde(with = "millis", rename = "output_ms")]
    pub output: Duration,
    /// Wait for the end of a program's exception text.
    #[serde(with = "millis", rename = "command_end_ms")]
    pub command_end: Duration,
    /// Short pause after mode switches.
    #[serde(with = "millis", rename = "pause_ms")]
    pub pause: Duration,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            entry: Duration::from_millis(1000),
            prompt: Duration::from_millis(1000),
            acknowledge: Duration::from_millis(1000),
            output: Duration::from_millis(800),
            command_end: Duration::from_millis(100),
            pause: Duration::from_millis(10),
        }
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
