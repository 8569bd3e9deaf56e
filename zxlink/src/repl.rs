//! MicroPython raw REPL protocol: mode switches, program submission,
//! and file transfer.
//!
//! A [`Repl`] is only handed out by [`Executor::execute_repl`], which
//! holds the execution lock for the lifetime of the borrow.
//!
//! [`Executor::execute_repl`]: crate::Executor::execute_repl

use std::fmt;
use std::time::Duration;

use tracing::debug;
use zxlink_proto::control::{
    COMMAND_END, NORMAL, NOT_FOUND_MARKER, OUTPUT_END, RAW_BANNER, RAW_NULL, RAW_OK, RAW_PROMPT,
    RAW_RESET, RAW_START, RAW_SUBMIT, REBOOT, STOP,
};
use zxlink_proto::{CHUNK_SIZE, Chunk, script};

use crate::config::ReplConfig;
use crate::transport::Transport;
use crate::{Error, Result};

/// The protocol step an expectation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Stage {
    /// Waiting for the raw REPL banner.
    Entry,
    /// Waiting for the raw prompt.
    Prompt,
    /// Waiting for `OK` after a submission.
    Acknowledge,
    /// Waiting for the end of stdout.
    Output,
    /// Waiting for the end of the exception text.
    CommandEnd,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entry => "REPL entry",
            Self::Prompt => "REPL prompt",
            Self::Acknowledge => "REPL acknowledgement",
            Self::Output => "REPL output",
            Self::CommandEnd => "REPL command end",
        })
    }
}

/// A raw REPL session on the device.
#[derive(Debug)]
pub struct Repl {
    /// The shared transport.
    transport: Transport,
    /// Timeouts.
    config: ReplConfig,
}

impl Repl {
    /// Wraps `transport`; the caller must hold the execution lock.
    pub(crate) const fn new(transport: Transport, config: ReplConfig) -> Self {
        Self { transport, config }
    }

    /// The underlying transport, for reading a launched program's output.
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Enters raw mode from any state.
    pub async fn enter(&mut self) -> Result<()> {
        self.transport.write_bytes(STOP).await?;
        self.pause().await;
        self.expect(&[RAW_START], RAW_BANNER, self.config.entry, Stage::Entry)
            .await
            .map_err(|e| Error::Entry(Box::new(e)))
    }

    /// Returns to the friendly REPL.
    pub async fn exit(&mut self) -> Result<()> {
        self.transport.write_bytes(&[NORMAL]).await?;
        self.pause().await;
        self.transport.flush();
        Ok(())
    }

    /// Leaves raw mode and soft-reboots the firmware.
    pub async fn reboot(&mut self) -> Result<()> {
        self.exit().await?;
        self.transport.write_bytes(&[REBOOT]).await
    }

    /// Clears any partially entered program without leaving raw mode.
    pub async fn reset(&mut self) -> Result<()> {
        self.prompt(RAW_NULL).await?;
        self.prompt(&[RAW_RESET]).await?;
        self.pause().await;
        self.transport.flush();
        Ok(())
    }

    /// Runs `command` and returns its stdout.
    ///
    /// A non-empty exception text fails with [`Error::Exception`].
    pub async fn execute(&mut self, command: &str) -> Result<String> {
        self.submit(command).await?;

        let output = self
            .transport
            .read(OUTPUT_END, Some(self.config.output))
            .await;
        let Some(stdout) = output.strip_suffix(OUTPUT_END) else {
            return Err(timeout(Stage::Output, OUTPUT_END));
        };

        let tail = self
            .transport
            .read(COMMAND_END, Some(self.config.command_end))
            .await;
        let Some(exception) = tail.strip_suffix(COMMAND_END) else {
            return Err(timeout(Stage::CommandEnd, COMMAND_END));
        };
        if !exception.is_empty() {
            return Err(Error::Exception(
                String::from_utf8_lossy(exception).into_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(stdout).into_owned())
    }

    /// Submits `command` and returns once the device acknowledges it.
    ///
    /// The program keeps running; its output arrives on [`Self::transport`].
    pub async fn launch(&mut self, command: &str) -> Result<()> {
        self.submit(command).await?;
        debug!(len = command.len(), "program launched");
        Ok(())
    }

    /// Dedents a multi-line script and runs it as one submission.
    pub async fn execute_lines(&mut self, text: &str) -> Result<String> {
        self.execute(&script::dedent(text)).await
    }

    /// Uploads `data` to `path`.
    ///
    /// The payload goes to a temp file first and is renamed over `path`
    /// at the end, so `path` never holds a partial file.
    pub async fn put(&mut self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        self.execute_lines(&script::open_upload(path)).await?;

        let mut literal = 0usize;
        for chunk in data.chunks(CHUNK_SIZE) {
            let chunk = Chunk::encode(chunk);
            if chunk.is_literal() {
                literal += 1;
            }
            self.execute(&chunk.to_call()).await?;
        }

        self.execute_lines(&script::finish_upload(path)).await?;
        debug!(
            path,
            bytes = data.len(),
            chunks = data.len().div_ceil(CHUNK_SIZE),
            literal,
            "uploaded"
        );
        Ok(())
    }

    /// Downloads `path`; `None` if it does not exist.
    pub async fn get_binary(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.execute_lines(&script::read_file(path)).await {
            Ok(hex) => Ok(Some(hex::decode(hex.trim())?)),
            Err(e) if e.is_exception_with(NOT_FOUND_MARKER) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Downloads `path` as UTF-8 text; `None` if it does not exist.
    pub async fn get_text(&mut self, path: &str) -> Result<Option<String>> {
        match self.get_binary(path).await? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }

    /// Deletes everything under `path` except entries named in `keep`.
    pub async fn remove_dir(&mut self, path: &str, keep: &[&str]) -> Result<()> {
        self.execute_lines(&script::remove_dir(path, keep)).await?;
        Ok(())
    }

    /// Whether the firmware exposes a network API.
    pub async fn has_network(&mut self) -> Result<bool> {
        let out = self.execute_lines(script::HAS_NETWORK).await?;
        Ok(out.trim() == "True")
    }

    /// Null command, program text, submit; waits for `OK`.
    async fn submit(&mut self, command: &str) -> Result<()> {
        self.prompt(RAW_NULL).await?;
        self.transport.write(command).await?;
        self.expect(
            &[RAW_SUBMIT],
            RAW_OK,
            self.config.acknowledge,
            Stage::Acknowledge,
        )
        .await
        .map_err(|e| Error::NotAcknowledged(Box::new(e)))
    }

    /// Sends `data` and waits for the raw prompt.
    async fn prompt(&self, data: &[u8]) -> Result<()> {
        self.expect(data, RAW_PROMPT, self.config.prompt, Stage::Prompt)
            .await
    }

    /// Flushes, sends `data`, and requires the reply to end with `token`.
    async fn expect(
        &self,
        data: &[u8],
        token: &[u8],
        wait: Duration,
        stage: Stage,
    ) -> Result<()> {
        self.transport.flush();
        self.transport.write_bytes(data).await?;
        let response = self.transport.read(token, Some(wait)).await;
        if response.ends_with(token) {
            Ok(())
        } else {
            Err(timeout(stage, token))
        }
    }

    /// Yields briefly after a mode switch.
    async fn pause(&self) {
        tokio::time::sleep(self.config.pause).await;
    }
}

/// A [`Error::Timeout`] for `stage` missing `token`.
fn timeout(stage: Stage, token: &[u8]) -> Error {
    Error::Timeout {
        stage,
        expected: format!("{:?}", String::from_utf8_lossy(token)),
    }
}
