//! Device commands: exec, state, reset, python, run, put, get, rmdir, install,
//! network, monitor.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::time::Instant;
use zxlink::{Executor, Param, list_ports};

/// Arguments for `zxlink exec`.
///
/// Usage: `zxlink exec COMMAND [PARAM...] [--timeout MS]`
#[derive(clap::Args)]
pub struct ExecArgs {
    /// Command name.
    pub command: String,

    /// Parameters, URL-encoded on the wire.
    pub params: Vec<String>,

    /// Reply timeout in milliseconds; 0 waits forever.
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Arguments for `zxlink run`.
#[derive(clap::Args)]
pub struct RunArgs {
    /// Local Python script.
    pub script: PathBuf,

    /// How long to stream output, in milliseconds.
    #[arg(short, long, default_value_t = 2000)]
    pub follow: u64,
}

/// An install manifest.
#[derive(Deserialize)]
struct Manifest {
    /// Files to upload, relative to the manifest.
    filenames: Vec<String>,
}

pub fn ports() -> Result<()> {
    let ports = list_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports.");
        return Ok(());
    }
    for port in &ports {
        println!("{:<30} {}", port.name, port.description.as_deref().unwrap_or(""));
    }
    Ok(())
}

pub async fn exec(executor: &Executor, args: ExecArgs) -> Result<()> {
    let timeout = args
        .timeout
        .map_or(executor.config().command_timeout, Duration::from_millis);
    let params: Vec<Param> = args.params.into_iter().map(Param::from).collect();
    let reply = executor.execute(&args.command, &params, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

pub async fn state(executor: &Executor) -> Result<()> {
    let state = executor.state().await?;
    println!("{state:?}");
    Ok(())
}

pub async fn reset(executor: &Executor) -> Result<()> {
    executor.reset().await?;
    println!("firmware running");
    Ok(())
}

pub async fn python(executor: &Executor, code: &str) -> Result<()> {
    let out = executor
        .execute_repl(async |repl| repl.execute_lines(code).await)
        .await?;
    print!("{out}");
    Ok(())
}

pub async fn run(executor: &Executor, args: RunArgs) -> Result<()> {
    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read {}", args.script.display()))?;
    let follow = Duration::from_millis(args.follow);

    executor
        .execute_repl(async |repl| {
            repl.launch(&script).await?;
            let deadline = Instant::now() + follow;
            let mut stdout = std::io::stdout();
            while Instant::now() < deadline {
                let slice = deadline.saturating_duration_since(Instant::now()).min(Duration::from_millis(100));
                let out = repl.transport().read(b"\n", Some(slice)).await;
                stdout.write_all(&out)?;
                stdout.flush()?;
            }
            Ok(())
        })
        .await?;
    Ok(())
}

pub async fn put(executor: &Executor, local: &Path, remote: &str) -> Result<()> {
    let data = std::fs::read(local).with_context(|| format!("failed to read {}", local.display()))?;
    executor
        .execute_repl(async |repl| repl.put(remote, &data).await)
        .await?;
    println!("{remote}: {} bytes", data.len());
    Ok(())
}

pub async fn get(executor: &Executor, remote: &str, local: Option<&Path>) -> Result<()> {
    let Some(data) = executor
        .execute_repl(async |repl| repl.get_binary(remote).await)
        .await?
    else {
        bail!("{remote}: no such file on device");
    };
    match local {
        Some(path) => std::fs::write(path, &data)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => std::io::stdout().write_all(&data)?,
    }
    Ok(())
}

pub async fn rmdir(executor: &Executor, path: &str, keep: &[String]) -> Result<()> {
    let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
    executor
        .execute_repl(async |repl| repl.remove_dir(path, &keep).await)
        .await?;
    println!("{path}");
    Ok(())
}

pub async fn install(executor: &Executor, manifests: &[PathBuf]) -> Result<()> {
    let files = collect_install(manifests)?;
    let total = files.len();

    executor
        .execute_repl(async |repl| {
            for (i, (name, data)) in files.iter().enumerate() {
                repl.put(name, data).await?;
                eprintln!("[{:>3}%] {name}", (i + 1) * 100 / total.max(1));
            }
            repl.reboot().await
        })
        .await?;
    println!("installed {total} files; rebooting");
    Ok(())
}

/// Reads every manifest and the files it lists, before touching the device.
fn collect_install(manifests: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    for manifest in manifests {
        let text = std::fs::read_to_string(manifest)
            .with_context(|| format!("failed to read {}", manifest.display()))?;
        let parsed: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("invalid manifest {}", manifest.display()))?;
        let base = manifest.parent().unwrap_or_else(|| Path::new(""));
        for name in parsed.filenames {
            let path = base.join(&name);
            let data = std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            files.push((name, data));
        }
    }
    Ok(files)
}

pub async fn network(executor: &Executor) -> Result<()> {
    let has = executor
        .execute_repl(async |repl| repl.has_network().await)
        .await?;
    println!("{}", if has { "network available" } else { "no network" });
    Ok(())
}

pub async fn monitor(executor: &Executor, duration: Option<u64>) -> Result<()> {
    let mut events = executor.transport().events();
    let until = duration.map(|s| Instant::now() + Duration::from_secs(s));
    loop {
        let deadline = async {
            match until {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => println!("{event}"),
                None => break,
            },
            () = deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
        if !executor.transport().is_connected() {
            bail!("device disconnected");
        }
    }
    Ok(())
}
