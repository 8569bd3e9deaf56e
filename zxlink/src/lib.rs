//! Host-side driver for a MicroPython ZX printer interface over serial.
//!
//! Three layers share one connection:
//!
//! - [`Transport`]: the byte stream, with buffered timeout-bounded reads,
//!   connect and disconnect notification and a diagnostic traffic log;
//! - [`Executor`]: serialized line commands answered in JSON, device-state
//!   probing and reboot recovery;
//! - [`Repl`]: raw REPL sessions for running code and moving files.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use zxlink::{Config, Executor, SerialConnector, Transport};
//!
//! # async fn demo() -> zxlink::Result<()> {
//! let config = Config::default();
//! let transport = Transport::new(config.transport);
//! transport.connect(&mut SerialConnector::default())?;
//!
//! let executor = Executor::new(transport, config.executor);
//! let about = executor.execute("about", &[], Duration::from_secs(5)).await?;
//! println!("{about}");
//!
//! executor
//!     .execute_repl(async |repl| repl.put("/boot.py", b"print('hi')\n").await)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod error;
mod events;
mod log;
mod observer;
mod repl;
mod serial;
mod transport;

pub use command::{DeviceState, Executor};
pub use config::{Config, ExecutorConfig, RESET_SECONDS, ReplConfig, TransportConfig};
pub use error::{Error, Result};
pub use events::EventDecoder;
pub use repl::{Repl, Stage};
pub use serial::{DEFAULT_BAUD_RATE, PortInfo, SerialConnector, list_ports};
pub use transport::{Connector, Transport};
pub use zxlink_proto::Param;
