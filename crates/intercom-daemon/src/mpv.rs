/// mpv IPC transport, one mpv process per audio source.
///
/// ```text
///   MpvOutput (AudioOutput, called from DaemonCore)
///         │  unbounded mpsc, strictly ordered
///         ▼
///   transport_task ── owns MpvDriver, (re)spawns mpv on demand
///         │
///         ├── writer_task   ← MpvRequest → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── response (request_id) → pending oneshot
///                                └── event / property-change → TransportEvent
///                                                               → DaemonEvent
/// ```
///
/// The core never awaits audio.  Commands queue up here and are applied in
/// order; what mpv reports back (position, end of file, a dead process)
/// returns to the core as `DaemonEvent::Transport`.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use intercom_core::arbiter::MediaSource;
use intercom_core::output::AudioOutput;
use intercom_core::platform;

use crate::core::DaemonEvent;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_TIME_POS: u64 = 1;
pub const OBS_DURATION: u64 = 2;

/// Synthetic event the reader emits when the socket closes.
const IPC_CLOSED: &str = "ipc-closed";

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct MpvRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (no request_id).  `conn` identifies the socket
/// connection it arrived on.
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub conn: u64,
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// What a transport reports back to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Position(u64),
    Duration(u64),
    /// Natural end of the loaded file.
    Finished,
    /// mpv gave up on the file.
    Failed(String),
    /// The mpv process or its socket went away.
    Lost,
}

impl TransportEvent {
    pub fn from_mpv(evt: &MpvEvent) -> Option<Self> {
        if let Some((id, data)) = evt.as_property_change() {
            let ms = data.as_f64().filter(|v| *v >= 0.0).map(|secs| (secs * 1000.0) as u64)?;
            return match id {
                OBS_TIME_POS => Some(Self::Position(ms)),
                OBS_DURATION => Some(Self::Duration(ms)),
                _ => None,
            };
        }
        match evt.event_name()? {
            "end-file" => match evt.raw.get("reason").and_then(Value::as_str) {
                Some("eof") => Some(Self::Finished),
                Some("error") => {
                    let detail = evt
                        .raw
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    Some(Self::Failed(detail.to_string()))
                }
                // "stop", "quit", "redirect": we asked for it
                _ => None,
            },
            IPC_CLOSED => Some(Self::Lost),
            _ => None,
        }
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    conn: u64,
    tx: mpsc::Sender<MpvRequest>,
}

impl MpvHandle {
    pub fn conn(&self) -> u64 {
        self.conn
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MpvRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn observe_properties(&self) {
        for (id, name) in [(OBS_TIME_POS, "time-pos"), (OBS_DURATION, "duration")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns one mpv child process.
pub struct MpvDriver {
    label: &'static str,
    socket_name: String,
    binary: Option<PathBuf>,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(source: MediaSource, binary: Option<PathBuf>) -> Self {
        Self {
            label: source.label(),
            socket_name: platform::mpv_socket_name(source.label()),
            binary,
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        let Some(child) = self.process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                match status.code() {
                    Some(code) => warn!("mpv {}: exited with code {}", self.label, code),
                    None => warn!("mpv {}: terminated by signal", self.label),
                }
                false
            }
            Err(e) => {
                warn!("mpv {}: liveness check failed: {}", self.label, e);
                false
            }
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn command(&self, volume: u8, muted: bool) -> anyhow::Result<tokio::process::Command> {
        let binary = platform::find_mpv_binary(self.binary.as_ref())
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let stderr_path = platform::data_dir().join(format!("mpv-{}-stderr.log", self.label));
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;

        let mut cmd = tokio::process::Command::new(binary);
        cmd.arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(platform::mpv_socket_arg(self.label))
            .arg(format!("--volume={}", volume.min(100)))
            .arg(format!("--mute={}", if muted { "yes" } else { "no" }))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .kill_on_drop(true);
        Ok(cmd)
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
        volume: u8,
        muted: bool,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        let child = self.command(volume, muted)?.spawn()?;
        info!("mpv {}: spawned pid {:?}", self.label, child.id());
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv {} IPC socket did not appear", self.label);
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv {}: connected to {}", self.label, self.socket_name);
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
        volume: u8,
        muted: bool,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let child = self.command(volume, muted)?.spawn()?;
        self.process = Some(child);

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv {}: connected to named pipe", self.label);
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv {} named pipe did not appear", self.label)
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let conn = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<MpvRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(conn, BufReader::new(read_half), pending, event_tx));

    MpvHandle { conn, tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    conn: u64,
    mut reader: BufReader<R>,
    pending: Pending,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "mpv IPC connection closed".to_string(),
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    let _ = event_tx.send(MpvEvent { conn, raw: val }).await;
                }
            }
            Err(e) => break format!("mpv IPC read error: {}", e),
        }
    };

    debug!("mpv reader: {}", reason);
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
    let _ = event_tx
        .send(MpvEvent {
            conn,
            raw: json!({ "event": IPC_CLOSED }),
        })
        .await;
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: Pending)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register first so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── AudioOutput over mpv ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum OutputCommand {
    Load(String),
    Play,
    Pause,
    Stop,
    Seek(u64),
    Volume(u8),
    Muted(bool),
}

impl OutputCommand {
    /// Commands worth starting an mpv process for.  The rest only matter to
    /// a process that is already playing something.
    fn needs_process(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Play)
    }

    fn to_ipc(&self) -> Vec<Value> {
        match self {
            Self::Load(uri) => vec![
                json!(["loadfile", uri, "replace"]),
                json!(["set_property", "pause", false]),
            ],
            Self::Play => vec![json!(["set_property", "pause", false])],
            Self::Pause => vec![json!(["set_property", "pause", true])],
            Self::Stop => vec![json!(["stop"])],
            Self::Seek(ms) => vec![json!(["set_property", "time-pos", *ms as f64 / 1000.0])],
            Self::Volume(v) => vec![json!(["set_property", "volume", *v])],
            Self::Muted(m) => vec![json!(["set_property", "mute", *m])],
        }
    }
}

/// `AudioOutput` backed by a dedicated mpv process.  Calls return at once;
/// the transport task applies them in order.
pub struct MpvOutput {
    label: &'static str,
    tx: mpsc::UnboundedSender<OutputCommand>,
}

impl MpvOutput {
    pub fn spawn(
        source: MediaSource,
        binary: Option<PathBuf>,
        events: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(transport_task(source, binary, rx, events));
        Self {
            label: source.label(),
            tx,
        }
    }

    fn push(&self, cmd: OutputCommand) {
        if self.tx.send(cmd).is_err() {
            warn!("mpv {}: transport task gone, command dropped", self.label);
        }
    }
}

impl AudioOutput for MpvOutput {
    fn load(&mut self, uri: &str) {
        self.push(OutputCommand::Load(uri.to_string()));
    }
    fn play(&mut self) {
        self.push(OutputCommand::Play);
    }
    fn pause(&mut self) {
        self.push(OutputCommand::Pause);
    }
    fn stop(&mut self) {
        self.push(OutputCommand::Stop);
    }
    fn seek(&mut self, position_ms: u64) {
        self.push(OutputCommand::Seek(position_ms));
    }
    fn set_volume(&mut self, volume: u8) {
        self.push(OutputCommand::Volume(volume));
    }
    fn set_muted(&mut self, muted: bool) {
        self.push(OutputCommand::Muted(muted));
    }
}

async fn transport_task(
    source: MediaSource,
    binary: Option<PathBuf>,
    mut rx: mpsc::UnboundedReceiver<OutputCommand>,
    events: mpsc::Sender<DaemonEvent>,
) {
    let label = source.label();
    let mut driver = MpvDriver::new(source, binary);
    let mut handle: Option<MpvHandle> = None;
    let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(256);
    let mut volume = 100u8;
    let mut muted = false;

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match &cmd {
                    OutputCommand::Volume(v) => volume = *v,
                    OutputCommand::Muted(m) => muted = *m,
                    _ => {}
                }

                if handle.is_some() && !driver.process_alive() {
                    warn!("mpv {}: process died, dropping handle", label);
                    handle = None;
                    // a reload respawns below; anything else reports the loss
                    if !cmd.needs_process() {
                        let event = TransportEvent::Lost;
                        let _ = events.send(DaemonEvent::Transport { source, event }).await;
                    }
                }
                if handle.is_none() {
                    if !cmd.needs_process() {
                        continue;
                    }
                    match driver.spawn_and_connect(mpv_tx.clone(), volume, muted).await {
                        Ok(h) => {
                            h.observe_properties().await;
                            handle = Some(h);
                        }
                        Err(e) => {
                            error!("mpv {}: cannot start: {}", label, e);
                            let event = TransportEvent::Failed(e.to_string());
                            let _ = events.send(DaemonEvent::Transport { source, event }).await;
                            continue;
                        }
                    }
                }

                if let Some(h) = &handle {
                    for ipc in cmd.to_ipc() {
                        if let Err(e) = h.send(ipc).await {
                            warn!("mpv {}: {:?} failed: {}", label, cmd, e);
                            break;
                        }
                    }
                }
            }
            Some(evt) = mpv_rx.recv() => {
                // a replaced connection may still be draining
                if handle.as_ref().map(MpvHandle::conn) != Some(evt.conn) {
                    continue;
                }
                if let Some(event) = TransportEvent::from_mpv(&evt) {
                    if event == TransportEvent::Lost {
                        handle = None;
                    }
                    if events.send(DaemonEvent::Transport { source, event }).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    debug!("mpv {}: transport task exiting", label);
    driver.kill().await;
}
