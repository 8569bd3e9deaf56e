//! An in-memory device speaking the firmware's line protocol and a
//! MicroPython raw REPL, attached to a [`Transport`] over a duplex pipe.
//!
//! The REPL side understands exactly the programs the host generates:
//! uploads, downloads, directory cleanup, the network probe, plus bare
//! `print('..')` and `raise Name('..')` lines.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::missing_docs_in_private_items)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::Instant;
use zxlink::{Config, Executor, Transport};

/// Banner printed on entering raw mode.
const BANNER: &str = "raw REPL; CTRL-B to exit\r\n>";

/// Friendly prompt.
const PROMPT: &str = "\r\n>>> ";

/// Firmware mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Running,
    Repl,
    Raw,
    Booting,
}

/// One line-protocol exchange step, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Received(String),
    Replied(String),
}

/// Everything the device knows and remembers.
#[derive(Debug)]
pub struct State {
    pub mode: Mode,
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    /// Non-empty raw REPL programs, verbatim.
    pub programs: Vec<String>,
    pub wire: Vec<Wire>,
    /// After every program, the content of this path is snapshotted.
    pub watch: Option<String>,
    pub snapshots: Vec<Option<Vec<u8>>>,
    pub reboots: usize,
    line: Vec<u8>,
    raw: Vec<u8>,
    open: Option<String>,
}

/// Device behaviour, fixed before spawning.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub mode: Mode,
    pub commands: HashMap<String, String>,
    pub reply_delay: Duration,
    pub boot_delay: Duration,
    /// Whether a reboot comes back with the command server running.
    pub boots_to_firmware: bool,
    pub network: bool,
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            mode: Mode::Running,
            commands: HashMap::new(),
            reply_delay: Duration::ZERO,
            boot_delay: Duration::from_millis(1200),
            boots_to_firmware: true,
            network: true,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
        }
    }
}

impl FakeDevice {
    /// Answers `command` (a full request line or its first word) with `reply`.
    pub fn command(mut self, command: &str, reply: &str) -> Self {
        self.commands.insert(command.to_owned(), reply.to_owned());
        self
    }

    /// Seeds a file, creating its parent directories.
    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        let mut dir = path;
        while let Some(i) = dir.rfind('/') {
            dir = &dir[..i];
            if !dir.is_empty() {
                self.dirs.insert(dir.to_owned());
            }
        }
        self.files.insert(path.to_owned(), data.to_vec());
        self
    }

    /// Seeds an empty directory.
    pub fn dir(mut self, path: &str) -> Self {
        self.dirs.insert(path.to_owned());
        self
    }

    /// Starts the device task, returning the host end of the pipe.
    pub fn spawn(self) -> (DuplexStream, Device) {
        let (host, io) = tokio::io::duplex(64 * 1024);
        let state = Arc::new(Mutex::new(State {
            mode: self.mode,
            files: self.files.clone(),
            dirs: self.dirs.clone(),
            programs: Vec::new(),
            wire: Vec::new(),
            watch: None,
            snapshots: Vec::new(),
            reboots: 0,
            line: Vec::new(),
            raw: Vec::new(),
            open: None,
        }));
        tokio::spawn(run(io, self, Arc::clone(&state)));
        (host, Device { state })
    }

    /// Spawns the device and wraps it in an executor with no quiescence window.
    pub fn connect(self) -> (Executor, Device) {
        let config = test_config();
        let transport = Transport::new(config.transport);
        let (link, device) = self.spawn();
        transport.attach(link).expect("attach");
        (Executor::new(transport, config.executor), device)
    }
}

/// Handle for inspecting a running device.
#[derive(Debug, Clone)]
pub struct Device {
    state: Arc<Mutex<State>>,
}

impl Device {
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    pub fn watch(&self, path: &str) {
        self.state().watch = Some(path.to_owned());
    }

    pub fn programs(&self) -> Vec<String> {
        self.state().programs.clone()
    }

    pub fn wire(&self) -> Vec<Wire> {
        self.state().wire.clone()
    }
}

/// Default configuration without the post-connect quiescence window.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.transport.settle = Duration::ZERO;
    config
}

/// What to do after feeding one byte.
enum Step {
    Nothing,
    Reply(String),
    Command(String),
    Reboot(String),
}

async fn run(mut io: DuplexStream, setup: FakeDevice, state: Arc<Mutex<State>>) {
    let mut buf = [0u8; 1024];
    let mut boot_at: Option<Instant> = None;
    loop {
        let n = tokio::select! {
            read = io.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
            () = tokio::time::sleep_until(boot_at.unwrap_or_else(Instant::now)), if boot_at.is_some() => {
                boot_at = None;
                let banner = {
                    let mut s = state.lock().unwrap();
                    if setup.boots_to_firmware {
                        s.mode = Mode::Running;
                        "firmware ready\r\n"
                    } else {
                        s.mode = Mode::Repl;
                        "MicroPython v1.22.0\r\n>>> "
                    }
                };
                if io.write_all(banner.as_bytes()).await.is_err() {
                    return;
                }
                continue;
            }
        };

        for &b in &buf[..n] {
            let step = state.lock().unwrap().feed(b, &setup);
            match step {
                Step::Nothing => {}
                Step::Reply(out) => {
                    if io.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Step::Command(line) => {
                    let reply = setup
                        .commands
                        .get(&line)
                        .or_else(|| line.split(' ').next().and_then(|w| setup.commands.get(w)))
                        .cloned()
                        .unwrap_or_else(|| r#"{"error": "unknown command"}"#.to_owned());
                    state.lock().unwrap().wire.push(Wire::Received(line.clone()));
                    if !setup.reply_delay.is_zero() {
                        tokio::time::sleep(setup.reply_delay).await;
                    }
                    if io.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() {
                        return;
                    }
                    state.lock().unwrap().wire.push(Wire::Replied(line));
                }
                Step::Reboot(out) => {
                    boot_at = Some(Instant::now() + setup.boot_delay);
                    if io.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl State {
    fn feed(&mut self, b: u8, setup: &FakeDevice) -> Step {
        match self.mode {
            Mode::Booting => Step::Nothing,
            Mode::Running => match b {
                0x03 => {
                    self.line.clear();
                    self.mode = Mode::Repl;
                    Step::Reply(format!("Traceback (most recent call last):\r\nKeyboardInterrupt: {PROMPT}"))
                }
                b'\r' => {
                    let line = String::from_utf8_lossy(&std::mem::take(&mut self.line)).into_owned();
                    Step::Command(line)
                }
                b'\n' => Step::Nothing,
                _ => {
                    self.line.push(b);
                    Step::Nothing
                }
            },
            Mode::Repl => match b {
                0x01 => {
                    self.raw.clear();
                    self.mode = Mode::Raw;
                    Step::Reply(BANNER.to_owned())
                }
                0x02 | 0x03 | b'\r' => {
                    self.line.clear();
                    Step::Reply(PROMPT.to_owned())
                }
                0x04 if self.line.is_empty() => {
                    self.mode = Mode::Booting;
                    self.reboots += 1;
                    Step::Reboot("MPY: soft reboot\r\n".to_owned())
                }
                0x04 => Step::Nothing,
                _ => {
                    self.line.push(b);
                    Step::Reply(char::from(b).to_string())
                }
            },
            Mode::Raw => match b {
                0x01 => {
                    self.raw.clear();
                    Step::Reply(BANNER.to_owned())
                }
                0x02 => {
                    self.line.clear();
                    self.mode = Mode::Repl;
                    Step::Reply(PROMPT.to_owned())
                }
                0x03 => {
                    self.raw.clear();
                    Step::Nothing
                }
                0x04 if self.raw.is_empty() => {
                    Step::Reply(format!("OK\r\nMPY: soft reboot\r\n{BANNER}"))
                }
                0x04 => {
                    let program = String::from_utf8_lossy(&std::mem::take(&mut self.raw)).into_owned();
                    let (stdout, exception) = self.exec(&program, setup);
                    Step::Reply(format!("OK{stdout}\x04{exception}\x04>"))
                }
                _ => {
                    self.raw.push(b);
                    Step::Nothing
                }
            },
        }
    }

    /// Runs one raw REPL program, returning stdout and exception text.
    fn exec(&mut self, program: &str, setup: &FakeDevice) -> (String, String) {
        if program.trim().is_empty() {
            return (String::new(), String::new());
        }
        self.programs.push(program.to_owned());
        let result = self.interpret(program, setup);
        if let Some(watch) = &self.watch {
            let snapshot = self.files.get(watch).cloned();
            self.snapshots.push(snapshot);
        }
        result
    }

    fn interpret(&mut self, program: &str, setup: &FakeDevice) -> (String, String) {
        let lines: Vec<&str> = program.split(['\r', '\n']).map(str::trim).collect();

        if program.contains("def rd(") {
            if let Some(call) = lines.iter().find(|l| l.starts_with("rd(")) {
                let args = strings(call);
                let keep: Vec<String> = args[1..].iter().map(|a| text(a)).collect();
                self.remove_tree(&text(&args[0]), &keep);
            }
            return (String::new(), String::new());
        }
        if program.contains("'rb') as f:") {
            let line = lines.iter().find(|l| l.starts_with("with open(")).expect("open line");
            let path = text(&strings(line)[0]);
            return match self.files.get(&path) {
                Some(data) => (hex::encode(data), String::new()),
                None => (String::new(), traceback("OSError: [Errno 2] ENOENT")),
            };
        }
        if program.contains("import network") {
            let answer = if setup.network { "True" } else { "False" };
            return (format!("{answer}\r\n"), String::new());
        }

        let mut stdout = String::new();
        for line in lines {
            if let Some(rest) = line.strip_prefix("try: os.mkdir(") {
                let dir = text(&strings(rest)[0]);
                if !dir.is_empty() {
                    self.dirs.insert(dir);
                }
            } else if line.starts_with("f=open(") {
                let path = text(&strings(line)[0]);
                self.files.insert(path.clone(), Vec::new());
                self.open = Some(path);
            } else if let Some(rest) = line.strip_prefix("wb(b") {
                let data = strings(rest).remove(0);
                self.append(&data);
            } else if let Some(rest) = line.strip_prefix("wh(") {
                let data = hex::decode(strings(rest).remove(0)).expect("hex chunk");
                self.append(&data);
            } else if line == "c()" {
                self.open = None;
            } else if let Some(rest) = line.strip_prefix("try: os.remove(") {
                self.files.remove(&text(&strings(rest)[0]));
            } else if let Some(rest) = line.strip_prefix("os.rename(") {
                let args = strings(rest);
                match self.files.remove(&text(&args[0])) {
                    Some(data) => {
                        self.files.insert(text(&args[1]), data);
                    }
                    None => return (stdout, traceback("OSError: [Errno 2] ENOENT")),
                }
            } else if let Some(rest) = line.strip_prefix("raise ") {
                let name = rest.split('(').next().unwrap_or(rest);
                let message = strings(rest).first().map(|m| text(m)).unwrap_or_default();
                return (stdout, traceback(&format!("{name}: {message}")));
            } else if let Some(rest) = line.strip_prefix("print(") {
                if let Some(arg) = strings(rest).first() {
                    stdout.push_str(&text(arg));
                    stdout.push_str("\r\n");
                }
            }
        }
        (stdout, String::new())
    }

    fn append(&mut self, data: &[u8]) {
        let path = self.open.clone().expect("file open");
        self.files.get_mut(&path).expect("open file exists").extend_from_slice(data);
    }

    /// Deletes files under `root` whose path has no component in `keep`,
    /// then every such directory left empty.
    fn remove_tree(&mut self, root: &str, keep: &[String]) {
        let prefix = format!("{}/", root.trim_end_matches('/'));
        let kept = |rel: &str| rel.split('/').any(|c| keep.iter().any(|k| k == c));

        self.files
            .retain(|path, _| path.strip_prefix(&prefix).is_none_or(kept));

        let mut dirs: Vec<String> = self
            .dirs
            .iter()
            .filter(|d| d.strip_prefix(&prefix).is_some_and(|rel| !kept(rel)))
            .cloned()
            .collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
        for dir in dirs {
            let inner = format!("{dir}/");
            let occupied = self.files.keys().any(|f| f.starts_with(&inner))
                || self.dirs.iter().any(|d| d.starts_with(&inner));
            if !occupied {
                self.dirs.remove(&dir);
            }
        }
    }
}

fn traceback(last: &str) -> String {
    format!("Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\n{last}\r\n")
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec()).expect("utf-8 string argument")
}

/// Every single-quoted Python string literal in `s`, unescaped.
fn strings(s: &str) -> Vec<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\'' {
            i += 1;
            continue;
        }
        i += 1;
        let mut value = Vec::new();
        while i < bytes.len() && bytes[i] != b'\'' {
            if bytes[i] == b'\\' {
                match bytes[i + 1] {
                    b'x' => {
                        let digits = std::str::from_utf8(&bytes[i + 2..i + 4]).expect("hex digits");
                        value.push(u8::from_str_radix(digits, 16).expect("hex escape"));
                        i += 4;
                    }
                    c => {
                        value.push(c);
                        i += 2;
                    }
                }
            } else {
                value.push(bytes[i]);
                i += 1;
            }
        }
        out.push(value);
        i += 1;
    }
    out
}
