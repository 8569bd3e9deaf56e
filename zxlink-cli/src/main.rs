//! CLI for a MicroPython ZX printer interface on a serial port.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod device;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;
use zxlink::{Config, DEFAULT_BAUD_RATE, Executor, SerialConnector, Transport};

#[derive(Parser)]
#[command(name = "zxlink", version, about = "Drive a MicroPython ZX printer interface over serial")]
struct Cli {
    /// Serial port (default: the only port present).
    #[arg(short, long, global = true, env = "ZXLINK_PORT")]
    port: Option<String>,

    /// Line speed.
    #[arg(short, long, global = true, env = "ZXLINK_BAUD", default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// JSON file overriding timing and buffer settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Print the serial traffic log to stderr before exiting.
    #[arg(long, global = true)]
    dump_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports.
    Ports,

    /// Send a line command and print its JSON reply.
    Exec(device::ExecArgs),

    /// Probe the device state.
    State,

    /// Reboot into the firmware and wait for it.
    Reset,

    /// Run Python in the raw REPL and print its output.
    Python {
        /// Code to run; indentation common to all lines is removed.
        code: String,
    },

    /// Start a script and stream its output.
    Run(device::RunArgs),

    /// Upload a file.
    Put {
        /// Local file.
        local: PathBuf,
        /// Path on the device.
        remote: String,
    },

    /// Download a file.
    Get {
        /// Path on the device.
        remote: String,
        /// Local file (default: stdout).
        local: Option<PathBuf>,
    },

    /// Delete a directory tree, sparing the named entries.
    Rmdir {
        /// Directory on the device.
        path: String,
        /// Entry names to keep, at any depth.
        #[arg(short, long)]
        keep: Vec<String>,
    },

    /// Upload every file listed in one or more manifests, then reboot.
    Install {
        /// Manifest files with a `filenames` list.
        #[arg(required = true, num_args = 1..)]
        manifests: Vec<PathBuf>,
    },

    /// Report whether the firmware has a network API.
    Network,

    /// Print firmware events as they arrive.
    Monitor {
        /// Stop after this many seconds (default: until interrupted).
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = cli.dispatch().await {
        eprintln!("zxlink: {e:#}");
        std::process::exit(1);
    }
}

/// Logs to stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Ports => return device::ports(),
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "zxlink", &mut std::io::stdout());
                return Ok(());
            }
            _ => {}
        }

        let config = load_config(self.config.as_deref())?;
        let transport = Transport::new(config.transport);
        let mut connector = SerialConnector::new(self.port, self.baud);
        if !transport.connect(&mut connector)? {
            bail!("no serial port selected; pass --port or set ZXLINK_PORT");
        }
        let executor = Executor::new(transport.clone(), config.executor);

        let result = match self.command {
            Command::Exec(args) => device::exec(&executor, args).await,
            Command::State => device::state(&executor).await,
            Command::Reset => device::reset(&executor).await,
            Command::Python { code } => device::python(&executor, &code).await,
            Command::Run(args) => device::run(&executor, args).await,
            Command::Put { local, remote } => device::put(&executor, &local, &remote).await,
            Command::Get { remote, local } => device::get(&executor, &remote, local.as_deref()).await,
            Command::Rmdir { path, keep } => device::rmdir(&executor, &path, &keep).await,
            Command::Install { manifests } => device::install(&executor, &manifests).await,
            Command::Network => device::network(&executor).await,
            Command::Monitor { duration } => device::monitor(&executor, duration).await,
            Command::Ports | Command::Completion { .. } => Ok(()),
        };

        if self.dump_log {
            eprintln!("{}", transport.log());
        }
        transport.disconnect().await;
        result
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Config::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}
