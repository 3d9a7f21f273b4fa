//! Supervisor side of a job: one worker process at a time.
//!
//! ```text
//!  caller ──submit──▶ JobSupervisor ──spawn──▶ worker process
//!    ▲                     │                      │ stdout: WorkerEvent lines
//!    │  JobMessage         ▼                      ▼
//!    └─────────────── pump thread ◀──────── reader thread
//!                          │ stdin: "cancel", then kill after the grace period
//!                          └──────────────────────▶ worker process
//! ```

use std::{
    io::{BufRead, BufReader, Read, Write},
    path::PathBuf,
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::{
    config::InferenceSettings,
    core::{audio::write_wav_f32, cancel::CancellationToken},
    error::{Result, StemError},
    job::protocol::{read_stems, WorkerEvent, WorkerRequest, CANCEL_COMMAND},
    model::ModelSelection,
    types::{AudioBuffer, JobMessage},
};

pub const UNEXPECTED_EXIT: &str = "worker exited unexpectedly";

/// How to launch the worker executable. `--job <request.json>` is appended.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["worker".to_string()],
        }
    }

    /// Re-launch the running binary in worker mode.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wait between the graceful stop request and the forced kill.
    pub grace_period: Duration,
    pub poll_interval: Duration,
    /// Cancel jobs running longer than this; reported as an error.
    pub job_timeout: Option<Duration>,
    pub worker: WorkerCommand,
}

impl SupervisorConfig {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            job_timeout: None,
            worker,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let worker = WorkerCommand::current_exe()
            .unwrap_or_else(|_| WorkerCommand::new("stem-splitter"));
        Self::new(worker)
    }
}

pub struct JobSupervisor {
    config: SupervisorConfig,
    busy: Arc<AtomicBool>,
}

impl JobSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts a worker for `audio`. Fails with [`StemError::JobActive`] while a
    /// previous job has not reached its terminal message.
    pub fn submit(
        &self,
        audio: &AudioBuffer,
        model: &ModelSelection,
        settings: &InferenceSettings,
    ) -> Result<JobHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StemError::JobActive);
        }
        let guard = BusyGuard(self.busy.clone());

        let workdir = tempfile::Builder::new()
            .prefix("stem-splitter-job-")
            .tempdir()?;
        let input = workdir.path().join("input.wav");
        write_wav_f32(&input, audio)?;

        let request = WorkerRequest {
            input,
            output_dir: workdir.path().join("stems"),
            model: model.clone(),
            settings: settings.clone(),
        };
        let job_path = workdir.path().join("job.json");
        request.write_to(&job_path)?;

        let worker = &self.config.worker;
        let mut child = Command::new(&worker.program)
            .args(&worker.args)
            .arg("--job")
            .arg(&job_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                StemError::Worker(format!(
                    "failed to spawn {}: {e}",
                    worker.program.display()
                ))
            })?;

        let pid = child.id();
        info!(pid, model = %model.name, frames = audio.frames(), "job submitted");

        let (stdin, stdout, stderr) = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let events = match stdout {
            Some(out) => spawn_event_reader(out),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(StemError::Worker("worker stdout not captured".into()));
            }
        };
        if let Some(err) = stderr {
            spawn_log_forwarder(err, pid);
        }

        let token = CancellationToken::new();
        let (tx, rx) = unbounded();
        let pump = Pump {
            pid,
            child,
            stdin,
            events,
            tx,
            token: token.clone(),
            grace_period: self.config.grace_period,
            poll_interval: self.config.poll_interval,
            job_timeout: self.config.job_timeout,
            started: Instant::now(),
            cancel_deadline: None,
            timed_out: false,
            last_percent: 0,
            _workdir: workdir,
            busy: Some(guard),
        };
        let thread = thread::Builder::new()
            .name(format!("job-pump-{pid}"))
            .spawn(move || pump.run())?;

        Ok(JobHandle {
            pid,
            token,
            messages: rx,
            pump: Some(thread),
        })
    }

    /// Same as [`JobHandle::cancel`].
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }
}

/// Caller's view of a running job.
pub struct JobHandle {
    pid: u32,
    token: CancellationToken,
    messages: Receiver<JobMessage>,
    pump: Option<JoinHandle<()>>,
}

impl JobHandle {
    /// OS process id of the worker.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Requests cancellation: the worker is asked to stop and killed if it has
    /// not exited within the grace period.
    pub fn cancel(&self) {
        if self.token.set() {
            info!(pid = self.pid, "cancel requested");
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_set()
    }

    /// The ordered message stream. It disconnects after the terminal message.
    pub fn messages(&self) -> &Receiver<JobMessage> {
        &self.messages
    }

    pub fn try_recv(&self) -> Option<JobMessage> {
        self.messages.try_recv().ok()
    }

    pub fn recv(&self) -> Option<JobMessage> {
        self.messages.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<JobMessage> {
        self.messages.recv_timeout(timeout).ok()
    }

    /// Blocks until the terminal message, discarding progress and status.
    pub fn wait(mut self) -> JobMessage {
        let terminal = loop {
            match self.messages.recv() {
                Ok(msg) if msg.is_terminal() => break msg,
                Ok(_) => continue,
                Err(_) => {
                    break JobMessage::Error {
                        message: "job channel closed without a result".into(),
                    }
                }
            }
        };
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
        terminal
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the worker process for the lifetime of one job.
struct Pump {
    pid: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<WorkerEvent>,
    tx: Sender<JobMessage>,
    token: CancellationToken,
    grace_period: Duration,
    poll_interval: Duration,
    job_timeout: Option<Duration>,
    started: Instant,
    cancel_deadline: Option<Instant>,
    timed_out: bool,
    last_percent: u8,
    _workdir: TempDir,
    busy: Option<BusyGuard>,
}

impl Pump {
    fn run(mut self) {
        let terminal = self.pump();
        self.shutdown();
        // Release the supervisor before the caller can observe the result.
        self.busy.take();
        let outcome = match &terminal {
            JobMessage::Success { stems } => format!("success ({} stems)", stems.len()),
            JobMessage::Error { message } => format!("error: {message}"),
            other => format!("{other:?}"),
        };
        info!(pid = self.pid, %outcome, "job finished");
        if self.tx.send(terminal).is_err() {
            debug!(pid = self.pid, "job handle dropped before the result");
        }
    }

    fn pump(&mut self) -> JobMessage {
        loop {
            if self.cancel_deadline.is_none() {
                self.check_cancel();
            }

            loop {
                match self.events.try_recv() {
                    Ok(event) => {
                        if let Some(terminal) = self.handle(event) {
                            return terminal;
                        }
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            match self.child.try_wait() {
                Ok(Some(status)) => return self.on_exit(status),
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = self.pid, "failed to poll worker: {e}");
                    self.kill();
                    return JobMessage::Error {
                        message: format!("lost track of worker: {e}"),
                    };
                }
            }

            if let Some(deadline) = self.cancel_deadline {
                if Instant::now() >= deadline {
                    warn!(
                        pid = self.pid,
                        grace = ?self.grace_period,
                        "worker did not stop in time, killing"
                    );
                    self.kill();
                    return self.stopped();
                }
            }

            match self.events.recv_timeout(self.poll_interval) {
                Ok(event) => {
                    if let Some(terminal) = self.handle(event) {
                        return terminal;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(self.poll_interval),
            }
        }
    }

    fn check_cancel(&mut self) {
        if let Some(limit) = self.job_timeout {
            if !self.token.is_set() && self.started.elapsed() >= limit {
                warn!(pid = self.pid, ?limit, "job timed out");
                self.timed_out = true;
                self.token.set();
            }
        }
        if self.token.is_set() {
            self.request_stop();
            self.cancel_deadline = Some(Instant::now() + self.grace_period);
        }
    }

    /// Sends the cancel command and closes the control pipe.
    fn request_stop(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = writeln!(stdin, "{CANCEL_COMMAND}").and_then(|_| stdin.flush()) {
                debug!(pid = self.pid, "control pipe already closed: {e}");
            }
        }
    }

    /// Translates one worker event; returns the terminal message if any.
    fn handle(&mut self, event: WorkerEvent) -> Option<JobMessage> {
        match event {
            WorkerEvent::Progress { percent } => {
                let percent = percent.min(100);
                if percent >= self.last_percent {
                    self.last_percent = percent;
                    self.relay(JobMessage::Progress { percent });
                }
                None
            }
            WorkerEvent::Status { text } => {
                self.relay(JobMessage::Status { text });
                None
            }
            WorkerEvent::Success { .. } | WorkerEvent::Error { .. } if self.token.is_set() => {
                Some(self.stopped())
            }
            WorkerEvent::Success { stems } => Some(match read_stems(&stems) {
                Ok(stems) => JobMessage::Success { stems },
                Err(e) => JobMessage::Error {
                    message: format!("failed to load separated stems: {e}"),
                },
            }),
            WorkerEvent::Error { message } => Some(JobMessage::Error { message }),
            WorkerEvent::Cancelled => Some(self.stopped()),
        }
    }

    fn relay(&mut self, message: JobMessage) {
        if self.tx.send(message).is_err() && self.token.set() {
            info!(pid = self.pid, "job handle dropped, cancelling");
        }
    }

    fn on_exit(&mut self, status: ExitStatus) -> JobMessage {
        // Lines written right before exit may still be in flight.
        let deadline = Instant::now() + self.grace_period;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(terminal) = self.handle(event) {
                        return terminal;
                    }
                }
                Err(_) => break,
            }
        }

        if self.token.is_set() {
            return self.stopped();
        }
        warn!(pid = self.pid, %status, "worker exited without a result");
        JobMessage::Error {
            message: UNEXPECTED_EXIT.to_string(),
        }
    }

    /// Terminal message for a job that was stopped on purpose.
    fn stopped(&self) -> JobMessage {
        match (self.timed_out, self.job_timeout) {
            (true, Some(limit)) => JobMessage::Error {
                message: format!("job timed out after {limit:?}"),
            },
            _ => JobMessage::Cancelled,
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(pid = self.pid, "kill failed: {e}");
        }
        let _ = self.child.wait();
    }

    /// Lets a finished worker exit on its own, killing it after the grace period.
    fn shutdown(&mut self) {
        self.stdin.take();
        let deadline = Instant::now() + self.grace_period;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                _ => {
                    self.kill();
                    return;
                }
            }
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.kill();
        }
    }
}

fn spawn_event_reader<R: Read + Send + 'static>(stdout: R) -> Receiver<WorkerEvent> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match WorkerEvent::from_line(&line) {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("unparseable worker output ({e}): {line}"),
            }
        }
    });
    rx
}

fn spawn_log_forwarder<R: Read + Send + 'static>(stderr: R, pid: u32) {
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            debug!(target: "stem_splitter_core::worker", pid, "{line}");
        }
    });
}
