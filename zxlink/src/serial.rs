//! The physical serial backend.
//!
//! `serialport` is blocking, so each open port is bridged onto a
//! [`tokio::io::duplex`] stream by two threads: one copies device output
//! in, the other copies writes out.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPortType, StopBits};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::transport::Connector;

/// Default line speed.
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Blocking read timeout; bounds how long the bridge takes to notice a close.
const POLL: Duration = Duration::from_millis(50);

/// Capacity of the in-memory bridge.
const BRIDGE_CAPACITY: usize = 64 * 1024;

/// A serial port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS path or name of the port.
    pub name: String,
    /// Human-readable description, if the OS reports one.
    pub description: Option<String>,
}

/// Lists serial ports visible to the host.
pub fn list_ports() -> io::Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(usb) => usb.product.or(usb.manufacturer),
                SerialPortType::BluetoothPort => Some("Bluetooth".to_owned()),
                SerialPortType::PciPort | SerialPortType::Unknown => None,
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

/// Opens real serial ports at 8N1.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Explicit port; otherwise the only available port is used.
    port: Option<String>,
    /// Line speed.
    baud_rate: u32,
}

impl SerialConnector {
    /// Creates a connector for `port`, or for whichever single port exists.
    pub const fn new(port: Option<String>, baud_rate: u32) -> Self {
        Self { port, baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(None, DEFAULT_BAUD_RATE)
    }
}

impl Connector for SerialConnector {
    type Link = DuplexStream;

    fn select(&mut self) -> io::Result<Option<String>> {
        if let Some(port) = &self.port {
            return Ok(Some(port.clone()));
        }
        let mut ports = list_ports()?;
        match ports.len() {
            1 => Ok(ports.pop().map(|p| p.name)),
            0 => {
                warn!("no serial ports found");
                Ok(None)
            }
            n => {
                warn!(count = n, "several serial ports found; choose one explicitly");
                Ok(None)
            }
        }
    }

    fn open(&mut self, port: &str) -> io::Result<DuplexStream> {
        let handle = Handle::try_current().map_err(io::Error::other)?;
        let mut rx = serialport::new(port, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(POLL)
            .open()?;
        let mut tx = rx.try_clone()?;

        let (link, bridge) = tokio::io::duplex(BRIDGE_CAPACITY);
        let (mut bridge_rx, mut bridge_tx) = tokio::io::split(bridge);
        let closed = Arc::new(AtomicBool::new(false));

        let rx_closed = Arc::clone(&closed);
        let rx_handle = handle.clone();
        thread::Builder::new()
            .name(format!("zxlink-rx {port}"))
            .spawn(move || {
                let mut buf = [0u8; 1024];
                while !rx_closed.load(Ordering::SeqCst) {
                    match rx.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if rx_handle.block_on(bridge_tx.write_all(&buf[..n])).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            warn!(error = %e, "serial read failed");
                            break;
                        }
                    }
                }
                let _ = rx_handle.block_on(bridge_tx.shutdown());
                debug!("serial rx thread exited");
            })?;

        thread::Builder::new()
            .name(format!("zxlink-tx {port}"))
            .spawn(move || {
                let mut buf = [0u8; 1024];
                loop {
                    let n = match handle.block_on(bridge_rx.read(&mut buf)) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    if let Err(e) = tx.write_all(&buf[..n]).and_then(|()| tx.flush()) {
                        warn!(error = %e, "serial write failed");
                        break;
                    }
                }
                closed.store(true, Ordering::SeqCst);
                debug!("serial tx thread exited");
            })?;

        Ok(link)
    }
}
