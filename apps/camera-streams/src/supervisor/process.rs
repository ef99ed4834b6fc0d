use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Invocation;

const STDERR_TAIL_LINES: usize = 8;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationMode {
    /// Cooperative stop that lets the process finalize its output.
    Graceful,
    /// Immediate, uncatchable kill.
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Last lines the process wrote to stderr.
    pub detail: Option<String>,
}

impl ProcessExit {
    pub fn describe(&self) -> String {
        let mut text = match self.code {
            Some(code) => format!("transcoder exited with status {}", code),
            None => "transcoder was terminated by a signal".to_string(),
        };
        if let Some(detail) = self.detail.as_deref().filter(|d| !d.is_empty()) {
            text.push_str(": ");
            text.push_str(detail);
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The engine reported encoding progress, i.e. it is producing output.
    Progress,
    Exited(ProcessExit),
}

/// A running transcoder owned by its session's monitor task.
#[async_trait]
pub trait TranscoderProcess: Send {
    fn pid(&self) -> Option<u32>;

    fn terminate(&mut self, mode: TerminationMode) -> io::Result<()>;

    /// Next lifecycle event. Must be cancel-safe: it is raced against other work and
    /// polled again afterwards. Not called again after `Exited`.
    async fn next_event(&mut self) -> ProcessEvent;
}

/// Launches transcoder processes.
pub trait Transcoder: Send + Sync {
    fn spawn(&self, invocation: &Invocation) -> io::Result<Box<dyn TranscoderProcess>>;
}

/// Runs ffmpeg as a child process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }
}

impl Transcoder for FfmpegTranscoder {
    fn spawn(&self, invocation: &Invocation) -> io::Result<Box<dyn TranscoderProcess>> {
        let label = format!("{}/{}", invocation.camera_id, invocation.purpose);
        debug!(
            session = %label,
            "Spawning {} {}",
            invocation.program.display(),
            invocation.args.join(" ")
        );

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        info!(session = %label, pid = ?pid, "Transcoder started");

        let progress = child.stdout.take().map(|stdout| {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(read_progress(stdout, tx));
            rx
        });

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_stderr(stderr, stderr_tail.clone(), label.clone())));

        Ok(Box::new(FfmpegProcess {
            child,
            pid,
            progress,
            stderr_tail,
            stderr_task,
            label,
        }))
    }
}

/// `-progress pipe:1` writes `key=value` blocks, each closed by `progress=continue`.
async fn read_progress<R: AsyncRead + Unpin>(stdout: R, tx: mpsc::Sender<()>) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.starts_with("progress=") {
            // A full channel means a report is already pending.
            let _ = tx.try_send(());
        }
    }
}

async fn read_stderr<R: AsyncRead + Unpin>(
    stderr: R,
    tail: Arc<Mutex<VecDeque<String>>>,
    label: String,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        debug!(session = %label, "ffmpeg: {}", line);
        let mut tail = tail.lock();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

async fn next_progress(progress: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match progress {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct FfmpegProcess {
    child: Child,
    pid: Option<u32>,
    progress: Option<mpsc::Receiver<()>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
    label: String,
}

impl FfmpegProcess {
    #[cfg(unix)]
    fn interrupt(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = self
            .child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "process already exited"))?;
        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(pid), Signal::SIGINT).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) -> io::Result<()> {
        warn!(session = %self.label, "Graceful stop unsupported on this platform, killing");
        self.child.start_kill()
    }

    fn stderr_summary(&self) -> Option<String> {
        let tail = self.stderr_tail.lock();
        if tail.is_empty() {
            None
        } else {
            Some(tail.iter().cloned().collect::<Vec<_>>().join(" | "))
        }
    }
}

#[async_trait]
impl TranscoderProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&mut self, mode: TerminationMode) -> io::Result<()> {
        debug!(session = %self.label, pid = ?self.pid, ?mode, "Signalling transcoder");
        match mode {
            TerminationMode::Graceful => self.interrupt(),
            TerminationMode::Forced => self.child.start_kill(),
        }
    }

    async fn next_event(&mut self) -> ProcessEvent {
        loop {
            tokio::select! {
                status = self.child.wait() => {
                    // Let the stderr reader catch the last lines before summarizing.
                    if let Some(task) = self.stderr_task.as_mut() {
                        let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
                        self.stderr_task = None;
                    }

                    let exit = match status {
                        Ok(status) => ProcessExit {
                            success: status.success(),
                            code: status.code(),
                            detail: self.stderr_summary(),
                        },
                        Err(e) => {
                            warn!(session = %self.label, "Failed to wait for transcoder: {}", e);
                            ProcessExit {
                                success: false,
                                code: None,
                                detail: Some(e.to_string()),
                            }
                        }
                    };
                    return ProcessEvent::Exited(exit);
                }
                report = next_progress(&mut self.progress) => match report {
                    Some(()) => return ProcessEvent::Progress,
                    None => self.progress = None,
                },
            }
        }
    }
}
