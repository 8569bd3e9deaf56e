//! Byte-level serial transport with buffered, timeout-bounded reads.
//!
//! A background task owns the read half of the link. It appends every
//! chunk to the read buffer and wakes waiting readers through a
//! [`Notify`], so [`Transport::read`] never polls.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::log::{Direction, TrafficLog};
use crate::observer::Observers;
use crate::{Error, Result};

/// Size of a single read from the link.
const READ_CHUNK: usize = 4096;

/// Opens the physical link.
pub trait Connector {
    /// The opened byte stream.
    type Link: AsyncRead + AsyncWrite + Send + 'static;

    /// Chooses a port. `Ok(None)` means the user cancelled the selection.
    fn select(&mut self) -> io::Result<Option<String>>;

    /// Opens the chosen port.
    fn open(&mut self, port: &str) -> io::Result<Self::Link>;
}

/// Boxed write half of the link.
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared handle to a serial connection.
///
/// Cloning is cheap; all clones drive the same connection.
#[derive(Clone)]
pub struct Transport {
    /// Shared state.
    inner: Arc<Inner>,
}

/// State shared between handles and the read loop.
struct Inner {
    /// Settings.
    config: TransportConfig,
    /// Bytes received and not yet consumed.
    buffer: Mutex<VecDeque<u8>>,
    /// Signalled when bytes arrive or the link closes.
    arrived: Notify,
    /// Write half of the current link.
    writer: tokio::sync::Mutex<Option<Writer>>,
    /// The running read loop.
    session: Mutex<Option<Session>>,
    /// Whether a link is attached.
    connected: AtomicBool,
    /// Input before this instant is discarded.
    settle_until: Mutex<Instant>,
    /// Diagnostic traffic log.
    log: Mutex<TrafficLog>,
    /// Connect observers.
    on_connect: Observers<()>,
    /// Disconnect observers.
    on_disconnect: Observers<()>,
    /// Received-data observers.
    on_read: Observers<[u8]>,
}

/// Handle to a running read loop.
struct Session {
    /// Cancels the loop.
    stop: oneshot::Sender<()>,
    /// The loop task.
    task: JoinHandle<()>,
}

/// Locks a std mutex, ignoring poisoning.
pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport {
    /// Creates a disconnected transport.
    pub fn new(config: TransportConfig) -> Self {
        let log = TrafficLog::new(config.log_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                buffer: Mutex::new(VecDeque::new()),
                arrived: Notify::new(),
                writer: tokio::sync::Mutex::new(None),
                session: Mutex::new(None),
                connected: AtomicBool::new(false),
                settle_until: Mutex::new(Instant::now()),
                log: Mutex::new(log),
                on_connect: Observers::new(),
                on_disconnect: Observers::new(),
                on_read: Observers::new(),
            }),
        }
    }

    /// Selects and opens a port through `connector`, then starts streaming.
    ///
    /// Returns `Ok(false)` when the selection was cancelled.
    pub fn connect<C: Connector>(&self, connector: &mut C) -> Result<bool> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        let Some(port) = connector.select().map_err(Error::Select)? else {
            info!("serial port selection cancelled");
            return Ok(false);
        };
        let link = connector.open(&port).map_err(|source| Error::Open {
            port: port.clone(),
            source,
        })?;
        self.attach(link)?;
        info!(port, "serial port open");
        Ok(true)
    }

    /// Starts streaming over an already-open link.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach<L>(&self, link: L) -> Result<()>
    where
        L: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut session = lock(&self.inner.session);
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        let (reader, writer) = tokio::io::split(link);
        {
            let Ok(mut slot) = self.inner.writer.try_lock() else {
                return Err(Error::AlreadyConnected);
            };
            *slot = Some(Box::new(writer));
        }

        self.flush();
        *lock(&self.inner.settle_until) = Instant::now() + self.inner.config.settle;
        self.inner.connected.store(true, Ordering::SeqCst);

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(read_loop(Arc::clone(&self.inner), reader, stopped));
        *session = Some(Session { stop, task });
        drop(session);

        debug!("serial connected");
        self.inner.on_connect.notify(&());
        Ok(())
    }

    /// Cancels the read loop and waits for the close path to finish.
    ///
    /// Disconnect observers have run when this returns.
    pub async fn disconnect(&self) {
        let session = lock(&self.inner.session).take();
        if let Some(Session { stop, task }) = session {
            let _ = stop.send(());
            if let Err(e) = task.await {
                warn!(error = %e, "serial read loop failed");
            }
        }
    }

    /// Whether a link is attached.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Writes text to the link.
    pub async fn write(&self, data: &str) -> Result<()> {
        self.write_bytes(data.as_bytes()).await
    }

    /// Writes bytes in fixed-size blocks and flushes.
    pub async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let mut slot = self.inner.writer.lock().await;
        let writer = slot.as_mut().ok_or(Error::NotConnected)?;
        lock(&self.inner.log).record(Direction::Write, data);
        for block in data.chunks(self.inner.config.block_size.max(1)) {
            writer.write_all(block).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Consumes buffered bytes until they end with `delimiter`.
    ///
    /// `timeout` bounds the silence between bytes, not the whole read: the
    /// deadline restarts whenever a byte is consumed. `None` waits forever.
    /// Gives up once the deadline passes or the link is closed and the
    /// buffer drained, returning whatever was consumed. An empty delimiter
    /// never matches, so the read lasts until the link goes quiet.
    pub async fn read(&self, delimiter: &[u8], timeout: Option<Duration>) -> Vec<u8> {
        let mut deadline = timeout.map(|t| Instant::now() + t);
        let mut out = Vec::new();
        loop {
            let arrived = self.inner.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let consumed = out.len();
            if self.inner.take_until(&mut out, delimiter) || !self.is_connected() {
                return out;
            }
            if out.len() > consumed {
                deadline = timeout.map(|t| Instant::now() + t);
            }
            match deadline {
                Some(at) => {
                    if tokio::time::timeout_at(at, arrived).await.is_err() {
                        self.inner.take_until(&mut out, delimiter);
                        return out;
                    }
                }
                None => arrived.await,
            }
        }
    }

    /// [`read`](Self::read), decoded lossily as UTF-8.
    pub async fn read_string(&self, delimiter: &str, timeout: Option<Duration>) -> String {
        let bytes = self.read(delimiter.as_bytes(), timeout).await;
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Discards buffered, unconsumed bytes.
    pub fn flush(&self) {
        lock(&self.inner.buffer).clear();
    }

    /// Number of buffered, unconsumed bytes.
    pub fn available(&self) -> usize {
        lock(&self.inner.buffer).len()
    }

    /// Waits until the post-connect quiescence window has elapsed.
    pub async fn settled(&self) {
        let until = *lock(&self.inner.settle_until);
        tokio::time::sleep_until(until).await;
    }

    /// The rendered traffic log.
    pub fn log(&self) -> String {
        lock(&self.inner.log).contents().to_owned()
    }

    /// Registers a handler run after each successful connect.
    ///
    /// The read loop is already running when handlers are invoked.
    pub fn on_connect(&self, handler: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.on_connect.add(handler);
    }

    /// Registers a handler run after the link closes.
    pub fn on_disconnect(&self, handler: impl Fn(&()) + Send + Sync + 'static) {
        self.inner.on_disconnect.add(handler);
    }

    /// Registers a handler run for each buffered chunk.
    pub fn on_read(&self, handler: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.inner.on_read.add(handler);
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.is_connected())
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Moves buffered bytes into `out` one at a time; `true` once it ends
    /// with `delimiter`.
    fn take_until(&self, out: &mut Vec<u8>, delimiter: &[u8]) -> bool {
        let mut buffer = lock(&self.buffer);
        while let Some(b) = buffer.pop_front() {
            out.push(b);
            if !delimiter.is_empty() && out.ends_with(delimiter) {
                return true;
            }
        }
        false
    }

    /// Handles one received chunk.
    fn ingest(&self, chunk: &[u8]) {
        lock(&self.log).record(Direction::Read, chunk);
        if Instant::now() < *lock(&self.settle_until) {
            trace!(len = chunk.len(), "discarding boot chatter");
            return;
        }
        lock(&self.buffer).extend(chunk);
        self.arrived.notify_waiters();
        self.on_read.notify(chunk);
    }

    /// Drops the link and notifies readers and observers.
    async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.arrived.notify_waiters();
        debug!("serial disconnected");
        self.on_disconnect.notify(&());
    }
}

/// Reads the link until it ends, fails, or `stop` fires.
async fn read_loop<R>(inner: Arc<Inner>, mut reader: R, mut stop: oneshot::Receiver<()>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            _ = &mut stop => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("serial stream ended");
                    break;
                }
                Ok(n) => inner.ingest(&buf[..n]),
                Err(e) => {
                    warn!(error = %e, "unexpected serial disconnect");
                    break;
                }
            },
        }
    }
    inner.close().await;
}
