//! Serialized command execution, device-state probing and reboot recovery.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use zxlink_proto::control::{RAW_MARKER, REPL_MARKER, RUNNING_MARKER, STATE_PROBE};
use zxlink_proto::{Param, decode_response, encode_request};

use crate::config::ExecutorConfig;
use crate::observer::Observers;
use crate::repl::Repl;
use crate::transport::Transport;
use crate::{Error, Result};

/// Best-effort classification of the firmware's current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceState {
    /// No recognizable reply.
    Unknown,
    /// The firmware's command server is running.
    Running,
    /// Friendly REPL prompt.
    Repl,
    /// Raw REPL.
    RawRepl,
}

impl DeviceState {
    /// Classifies a probe reply by substring, in fixed priority order.
    pub fn classify(response: &[u8]) -> Self {
        if contains(response, RUNNING_MARKER) {
            Self::Running
        } else if contains(response, RAW_MARKER) {
            Self::RawRepl
        } else if contains(response, REPL_MARKER) {
            Self::Repl
        } else {
            Self::Unknown
        }
    }
}

/// Whether `haystack` contains `needle`.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Emits busy start on creation and busy stop on drop.
struct Busy<'a>(&'a Observers<bool>);

impl<'a> Busy<'a> {
    /// Notifies `true`.
    fn start(observers: &'a Observers<bool>) -> Self {
        observers.notify(&true);
        Self(observers)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.notify(&false);
    }
}

/// Runs line commands and REPL sessions one at a time over a [`Transport`].
///
/// The execution lock is a FIFO-fair [`tokio::sync::Mutex`]: callers are
/// served in arrival order and never interleave on the wire.
#[derive(Debug)]
pub struct Executor {
    /// The shared transport.
    transport: Transport,
    /// Settings.
    config: ExecutorConfig,
    /// The execution lock.
    lock: Mutex<()>,
    /// Busy observers.
    busy: Observers<bool>,
}

impl Executor {
    /// Creates an executor over `transport`.
    pub fn new(transport: Transport, config: ExecutorConfig) -> Self {
        Self {
            transport,
            config,
            lock: Mutex::new(()),
            busy: Observers::new(),
        }
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The executor's settings.
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Registers a handler receiving `true` when a long operation starts
    /// and `false` when it ends.
    pub fn on_busy(&self, handler: impl Fn(&bool) + Send + Sync + 'static) {
        self.busy.add(handler);
    }

    /// Sends a line command and decodes its JSON reply.
    ///
    /// A zero `timeout` waits forever. Reply failures are wrapped in
    /// [`Error::CommandFailed`].
    pub async fn execute(&self, command: &str, params: &[Param], timeout: Duration) -> Result<Value> {
        let request = encode_request(command, params);
        let response = {
            let _guard = self.lock.lock().await;
            let _busy = (timeout > self.config.busy_threshold).then(|| Busy::start(&self.busy));
            self.transport.settled().await;
            self.transport.flush();

            let started = Instant::now();
            self.transport.write(&request).await?;
            let response = self
                .transport
                .read(b"\n", (!timeout.is_zero()).then_some(timeout))
                .await;
            debug!(command, elapsed = ?started.elapsed(), "command completed");
            response
        };

        decode_response(&response).map_err(|e| Error::CommandFailed {
            command: command.to_owned(),
            source: Box::new(e.into()),
        })
    }

    /// [`execute`](Self::execute), then decodes the reply into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        command: &str,
        params: &[Param],
        timeout: Duration,
    ) -> Result<T> {
        let value = self.execute(command, params, timeout).await?;
        serde_json::from_value(value).map_err(|e| Error::CommandFailed {
            command: command.to_owned(),
            source: Box::new(Error::Parse(e)),
        })
    }

    /// Probes the device state under the execution lock.
    pub async fn state(&self) -> Result<DeviceState> {
        let _guard = self.lock.lock().await;
        self.transport.settled().await;
        self.probe().await
    }

    /// Runs `action` inside a raw REPL session.
    ///
    /// The lock is held for the whole session; raw mode is entered and
    /// reset before `action` runs. Failures are wrapped in
    /// [`Error::ReplFailed`].
    pub async fn execute_repl<T>(&self, action: impl AsyncFnOnce(&mut Repl) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let _busy = Busy::start(&self.busy);
        self.transport.settled().await;

        let mut repl = Repl::new(self.transport.clone(), self.config.repl);
        session(&mut repl, action)
            .await
            .map_err(|e| Error::ReplFailed(Box::new(e)))
    }

    /// Reboots the firmware and waits for its command server.
    ///
    /// Probes every `poll` interval until [`DeviceState::Running`] is seen,
    /// for at most `reset_window`. Taking a [`Repl`] guarantees the
    /// execution lock is held.
    pub async fn reboot(&self, repl: &mut Repl) -> Result<()> {
        let started = Instant::now();
        repl.reboot().await?;

        let poll = self.config.poll.max(Duration::from_millis(1));
        let attempts = (self.config.reset_window.as_millis() / poll.as_millis()).max(1);
        let mut state = DeviceState::Unknown;
        for _ in 0..attempts {
            state = self.probe().await?;
            if state == DeviceState::Running {
                info!(elapsed = ?started.elapsed(), "firmware running");
                return Ok(());
            }
            tokio::time::sleep(poll).await;
        }
        Err(Error::NotReady { state })
    }

    /// Reboots into the firmware inside a REPL session.
    pub async fn reset(&self) -> Result<()> {
        let started = Instant::now();
        self.execute_repl(async |repl| self.reboot(repl).await)
            .await
            .map_err(|e| Error::ResetFailed(Box::new(e)))?;
        info!(elapsed = ?started.elapsed(), "reset complete");
        Ok(())
    }

    /// Writes the probe sequence and classifies the reply. Takes no lock.
    async fn probe(&self) -> Result<DeviceState> {
        self.transport.flush();
        self.transport.write_bytes(STATE_PROBE).await?;
        let response = self.transport.read(b"", Some(self.config.probe)).await;
        let state = DeviceState::classify(&response);
        debug!(?state, "probed device state");
        Ok(state)
    }
}

/// Enters and resets raw mode, then runs `action`.
async fn session<T>(repl: &mut Repl, action: impl AsyncFnOnce(&mut Repl) -> Result<T>) -> Result<T> {
    repl.enter().await?;
    repl.reset().await?;
    action(repl).await
}
