//! Engine process adapter
//!
//! One adapter owns one spawned engine. Commands are serialized through an
//! actor task that owns the child's stdio: it writes requests, frames stdout
//! into replies, and resolves completion slots strictly FIFO. Stderr is a
//! side channel surfaced as an event stream, with chat-tagged and PV lines
//! picked out for the relay layer.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::capabilities::EngineCaps;
use crate::error::GtpError;
use crate::framing::{Frame, FrameBuffer};

/// How long a killed engine gets before the hard-kill backstop fires.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Drive the engine with a single `{"gtp_commands": […]}` JSON document
    /// instead of raw CRLF-terminated lines.
    pub json_transport: bool,
    /// Watch stderr for principal-variation lines.
    pub pv_chat: bool,
    /// Watch stderr for `DISCUSSION:`/`MALKOVICH:` chat tags.
    pub chat_extraction: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Spawning,
    Ready,
    Busy,
    Dead,
}

/// One decoded stderr event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StderrEvent {
    /// A diagnostic line, trimmed.
    Line(String),
    /// A `DISCUSSION:`/`MALKOVICH:` tagged line; channel is lowercased.
    Chat { channel: String, body: String },
    /// A principal variation extracted from an `info … pv …` line.
    Pv(Vec<String>),
}

enum Request {
    Command {
        text: String,
        last: bool,
        done: oneshot::Sender<Result<String, GtpError>>,
    },
    Kill,
}

struct Shared {
    dead: AtomicBool,
    failed: AtomicBool,
    ignore: AtomicBool,
    first_move: AtomicBool,
    ready: AtomicBool,
    pending: AtomicUsize,
}

/// Handle to one engine subprocess.
pub struct Engine {
    tx: mpsc::UnboundedSender<Request>,
    shared: Arc<Shared>,
    options: EngineOptions,
    caps: EngineCaps,
    stderr_rx: Option<mpsc::UnboundedReceiver<StderrEvent>>,
}

impl Engine {
    /// Spawn the engine process and start its I/O tasks. The adapter is in
    /// `Spawning` state until [`Engine::handshake`] completes.
    pub fn spawn(argv: &[String], options: EngineOptions) -> Result<Engine, GtpError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| GtpError::Spawn("empty engine command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GtpError::Spawn(format!("{program}: {e}")))?;

        let stdin = child.stdin.take().expect("child stdin was piped");
        let stdout = child.stdout.take().expect("child stdout was piped");
        let stderr = child.stderr.take().expect("child stderr was piped");

        let shared = Arc::new(Shared {
            dead: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            ignore: AtomicBool::new(false),
            first_move: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();

        tokio::spawn(stderr_loop(stderr, options, stderr_tx));
        tokio::spawn(io_loop(
            child,
            stdin,
            stdout,
            options,
            rx,
            Arc::clone(&shared),
        ));

        Ok(Engine {
            tx,
            shared,
            options,
            caps: EngineCaps::default(),
            stderr_rx: Some(stderr_rx),
        })
    }

    /// Probe the engine's command set. Must complete before the adapter is
    /// handed out; the pool calls this once per spawn. The JSON transport
    /// is one-shot, so it has no interactive probe and keeps the default
    /// (restricted) capability profile.
    pub async fn handshake(&mut self) -> Result<EngineCaps, GtpError> {
        if self.options.json_transport {
            self.shared.ready.store(true, Ordering::SeqCst);
            return Ok(self.caps);
        }
        let list = self.command("list_commands").await?;
        let mut caps = EngineCaps::from_command_list(&list);
        if EngineCaps::has_kata_time_listing(&list) {
            let listing = self.command("kata-list_time_settings").await?;
            caps.apply_kata_time_listing(&listing);
        }
        self.caps = caps;
        self.shared.ready.store(true, Ordering::SeqCst);
        Ok(caps)
    }

    pub fn caps(&self) -> EngineCaps {
        self.caps
    }

    /// Enqueue one GTP command and await its reply.
    pub async fn command(&self, text: &str) -> Result<String, GtpError> {
        self.submit(text, false).await
    }

    /// Like [`Engine::command`], but closes the JSON request stream. Only
    /// meaningful with the JSON transport.
    pub async fn command_final(&self, text: &str) -> Result<String, GtpError> {
        self.submit(text, true).await
    }

    async fn submit(&self, text: &str, last: bool) -> Result<String, GtpError> {
        if self.is_dead() {
            return Err(GtpError::DeadEngine);
        }
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Request::Command {
                text: text.to_string(),
                last,
                done,
            })
            .map_err(|_| GtpError::DeadEngine)?;
        rx.await.unwrap_or(Err(GtpError::DeadEngine))
    }

    /// Shut the engine down: `quit`, suppress further output, signal the
    /// process, hard-kill after five seconds if it lingers.
    pub fn kill(&self) {
        self.shared.ignore.store(true, Ordering::SeqCst);
        self.shared.dead.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Request::Kill);
    }

    pub fn state(&self) -> EngineState {
        if self.shared.dead.load(Ordering::SeqCst) {
            EngineState::Dead
        } else if !self.shared.ready.load(Ordering::SeqCst) {
            EngineState::Spawning
        } else if self.shared.pending.load(Ordering::SeqCst) > 0 {
            EngineState::Busy
        } else {
            EngineState::Ready
        }
    }

    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::SeqCst)
    }

    /// A command-level or protocol-level error was observed on this engine.
    pub fn failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    pub fn first_move(&self) -> bool {
        self.shared.first_move.load(Ordering::SeqCst)
    }

    pub fn set_first_move(&self, value: bool) {
        self.shared.first_move.store(value, Ordering::SeqCst);
    }

    /// The stderr event stream. Yields `None` after the first call. The
    /// stream only carries events when chat extraction or PV watching is
    /// enabled; plain diagnostic lines are logged by the adapter itself.
    pub fn take_stderr_events(&mut self) -> Option<mpsc::UnboundedReceiver<StderrEvent>> {
        self.stderr_rx.take()
    }

    /// Hand the stderr stream back so the next borrower of this engine can
    /// take it again.
    pub fn restore_stderr_events(&mut self, rx: mpsc::UnboundedReceiver<StderrEvent>) {
        self.stderr_rx = Some(rx);
    }
}

async fn io_loop(
    mut child: Child,
    stdin: impl AsyncWrite + Unpin,
    stdout: impl AsyncRead + Unpin,
    options: EngineOptions,
    mut rx: mpsc::UnboundedReceiver<Request>,
    shared: Arc<Shared>,
) {
    let mut stdin = Some(stdin);
    let mut stdout = stdout;
    let mut frames = FrameBuffer::new(options.json_transport);
    let mut pending: VecDeque<oneshot::Sender<Result<String, GtpError>>> = VecDeque::new();
    let mut json_cmds: Vec<String> = Vec::new();
    let mut read_buf = vec![0u8; 8192];

    let die = loop {
        tokio::select! {
            req = rx.recv() => match req {
                Some(Request::Command { text, last, done }) => {
                    if shared.dead.load(Ordering::SeqCst) {
                        let _ = done.send(Err(GtpError::DeadEngine));
                        continue;
                    }
                    debug!(cmd = %text, "engine <");
                    pending.push_back(done);
                    shared.pending.store(pending.len(), Ordering::SeqCst);
                    if options.json_transport {
                        json_cmds.push(text);
                        if last {
                            let doc = json!({ "gtp_commands": json_cmds }).to_string();
                            if let Some(mut w) = stdin.take() {
                                if let Err(e) = write_all_flush(&mut w, doc.as_bytes()).await {
                                    break Some(GtpError::Transport(e.to_string()));
                                }
                                // Dropping the writer closes the stream.
                            }
                        }
                    } else if let Some(w) = stdin.as_mut() {
                        let line = format!("{text}\r\n");
                        if let Err(e) = write_all_flush(w, line.as_bytes()).await {
                            break Some(GtpError::Transport(e.to_string()));
                        }
                    }
                }
                Some(Request::Kill) | None => break None,
            },
            read = stdout.read(&mut read_buf) => match read {
                Ok(0) => break Some(GtpError::EngineExited),
                Err(e) => break Some(GtpError::Transport(e.to_string())),
                Ok(n) => {
                    if shared.ignore.load(Ordering::SeqCst) {
                        continue;
                    }
                    let chunk = String::from_utf8_lossy(&read_buf[..n]).into_owned();
                    for frame in frames.push(&chunk) {
                        resolve_frame(frame, &mut pending, &shared);
                    }
                    shared.pending.store(pending.len(), Ordering::SeqCst);
                }
            },
        }
    };

    shared.dead.store(true, Ordering::SeqCst);
    if let Some(err) = &die {
        if !shared.ignore.load(Ordering::SeqCst) {
            shared.failed.store(true, Ordering::SeqCst);
            warn!(error = %err, "engine died");
        }
        // The request that hit a transport error, plus everything queued
        // behind it, completes with the death error.
        for slot in pending.drain(..) {
            let _ = slot.send(Err(err.clone()));
        }
    } else {
        for slot in pending.drain(..) {
            let _ = slot.send(Err(GtpError::DeadEngine));
        }
    }
    shared.pending.store(0, Ordering::SeqCst);

    // Late submissions race the dead flag; fail them here.
    rx.close();
    while let Ok(req) = rx.try_recv() {
        if let Request::Command { done, .. } = req {
            let _ = done.send(Err(GtpError::DeadEngine));
        }
    }

    shutdown_child(&mut child, stdin, die.is_none()).await;
}

fn resolve_frame(
    frame: Frame,
    pending: &mut VecDeque<oneshot::Sender<Result<String, GtpError>>>,
    shared: &Shared,
) {
    let Some(slot) = pending.pop_front() else {
        debug!(?frame, "engine output with no pending request");
        return;
    };
    let result = match frame {
        Frame::Success(body) => {
            debug!(body = %body, "engine >");
            Ok(body)
        }
        Frame::Failure(reason) => {
            shared.failed.store(true, Ordering::SeqCst);
            Err(GtpError::ProtocolFailure(reason))
        }
        Frame::Violation(raw) => {
            shared.failed.store(true, Ordering::SeqCst);
            Err(GtpError::UnexpectedOutput(raw))
        }
    };
    let _ = slot.send(result);
}

/// Graceful quit, then SIGTERM, then a hard kill after [`REAP_TIMEOUT`].
async fn shutdown_child(
    child: &mut Child,
    stdin: Option<impl AsyncWrite + Unpin>,
    send_quit: bool,
) {
    if send_quit {
        if let Some(mut w) = stdin {
            let _ = write_all_flush(&mut w, b"quit\r\n").await;
        }
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }

    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(status) => debug!(?status, "engine reaped"),
        Err(_) => {
            warn!("engine ignored shutdown, sending hard kill");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

async fn write_all_flush(
    w: &mut (impl AsyncWrite + Unpin),
    bytes: &[u8],
) -> std::io::Result<()> {
    w.write_all(bytes).await?;
    w.flush().await
}

async fn stderr_loop(
    stderr: impl AsyncRead + Unpin,
    options: EngineOptions,
    tx: mpsc::UnboundedSender<StderrEvent>,
) {
    // DISCUSSION:/MALKOVICH: prefixes mark lines the game layer relays as
    // in-game chat.
    let chat_re = Regex::new(r"^(DISCUSSION|MALKOVICH):(.*)$").expect("static regex");
    let forward = options.chat_extraction || options.pv_chat;
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(raw)) = lines.next_line().await {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let event = if options.chat_extraction {
            match chat_re.captures(line) {
                Some(caps) => StderrEvent::Chat {
                    channel: caps[1].to_lowercase(),
                    body: caps[2].trim().to_string(),
                },
                None => classify_pv(line, options.pv_chat),
            }
        } else {
            classify_pv(line, options.pv_chat)
        };
        if let StderrEvent::Line(line) = &event {
            debug!(line = %line, "engine !");
            if !forward {
                continue;
            }
        }
        if tx.send(event).is_err() {
            break;
        }
    }
}

fn classify_pv(line: &str, pv_chat: bool) -> StderrEvent {
    if pv_chat && line.starts_with("info") && line.contains(" pv ") {
        let moves = line
            .split_whitespace()
            .skip_while(|w| *w != "pv")
            .skip(1)
            .map(str::to_string)
            .collect::<Vec<_>>();
        if !moves.is_empty() {
            return StderrEvent::Pv(moves);
        }
    }
    StderrEvent::Line(line.to_string())
}
