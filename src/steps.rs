//! Sequential execution of the external demultiplexing commands.
//!
//! Steps are typed descriptors (program plus argument vector), never shell
//! strings. A sequence stops at the first failing step; there is no retry and
//! no rollback of the steps that already ran.

use crate::lifecycle::RunState;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DIAGNOSTIC_TAIL_LINES: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One external command of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Lifecycle phase the run is in while this step executes.
    pub phase: RunState,
}

impl StepSpec {
    pub fn new(name: &str, program: impl Into<String>, phase: RunState) -> Self {
        Self {
            name: name.to_string(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            phase,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-quoted rendering used in logs and failure messages.
    pub fn command_line(&self) -> String {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        let joined = shlex::try_join(words).unwrap_or_else(|_| {
            std::iter::once(self.program.clone())
                .chain(self.args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ")
        });
        match &self.cwd {
            Some(dir) => format!("(cd {}) {}", dir.display(), joined),
            None => joined,
        }
    }
}

impl fmt::Display for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.command_line())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailureKind {
    ToolNotFound,
    /// Tool ran and reported an error through its exit status.
    ExitStatus(i32),
    /// Tool was terminated by a signal.
    Crashed(Option<i32>),
    TimedOut(Duration),
    Io,
}

impl fmt::Display for StepFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailureKind::ToolNotFound => write!(f, "tool not found"),
            StepFailureKind::ExitStatus(code) => write!(f, "tool reported error (exit status {})", code),
            StepFailureKind::Crashed(Some(signal)) => write!(f, "tool crashed (signal {})", signal),
            StepFailureKind::Crashed(None) => write!(f, "tool crashed"),
            StepFailureKind::TimedOut(limit) => write!(f, "tool timed out after {}s", limit.as_secs()),
            StepFailureKind::Io => write!(f, "could not run tool"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step '{step}' failed: {kind}")]
pub struct StepFailure {
    pub step: String,
    pub command_line: String,
    pub kind: StepFailureKind,
    /// Tail of the tool's error output, or the OS error text.
    pub diagnostic: String,
}

impl StepFailure {
    fn new(spec: &StepSpec, kind: StepFailureKind, diagnostic: impl Into<String>) -> Self {
        Self {
            step: spec.name.clone(),
            command_line: spec.command_line(),
            kind,
            diagnostic: diagnostic.into(),
        }
    }
}

pub type StepOutcome = Result<(), StepFailure>;

/// Runs a single step. The orchestrator only talks to this trait, so tests
/// substitute a recording fake.
pub trait CommandExecutor {
    fn execute(&mut self, step: &StepSpec) -> StepOutcome;
}

/// Executes steps as child processes of this one.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill and fail any step still running after `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute(&mut self, step: &StepSpec) -> StepOutcome {
        let mut command = Command::new(&step.program);
        command
            .args(&step.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &step.cwd {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group, so a timeout reaches every descendant
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| {
            let kind = if e.kind() == ErrorKind::NotFound {
                StepFailureKind::ToolNotFound
            } else {
                StepFailureKind::Io
            };
            StepFailure::new(step, kind, e.to_string())
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.timeout {
            None => child.wait().map_err(|e| StepFailure::new(step, StepFailureKind::Io, e.to_string()))?,
            Some(limit) => match wait_with_timeout(&mut child, limit) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    warn!(step = %step.name, timeout_secs = limit.as_secs(), "killing step after timeout");
                    kill_step(&mut child);
                    let _ = child.wait();
                    // descendants may still hold the pipes; take what was read so far
                    let err_text = stderr.snapshot();
                    return Err(StepFailure::new(step, StepFailureKind::TimedOut(limit), tail(&err_text)));
                }
                Err(e) => return Err(StepFailure::new(step, StepFailureKind::Io, e.to_string())),
            },
        };

        let out_text = stdout.join();
        let err_text = stderr.join();
        if !out_text.is_empty() {
            debug!(step = %step.name, output = %tail(&out_text), "step output");
        }

        if status.success() {
            return Ok(());
        }
        let kind = match status.code() {
            Some(code) => StepFailureKind::ExitStatus(code),
            None => StepFailureKind::Crashed(signal_of(&status)),
        };
        Err(StepFailure::new(step, kind, tail(&err_text)))
    }
}

/// Output of one child pipe, read on a background thread.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: thread::JoinHandle<()>,
}

impl Drain {
    fn join(self) -> String {
        let Drain { buf, handle } = self;
        let _ = handle.join();
        Drain::read_buf(&buf)
    }

    fn snapshot(&self) -> String {
        Drain::read_buf(&self.buf)
    }

    fn read_buf(buf: &Mutex<Vec<u8>>) -> String {
        match buf.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buf);
    let handle = thread::spawn(move || {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(_) => break,
                },
            }
        }
    });
    Drain { buf, handle }
}

#[cfg(unix)]
fn kill_step(child: &mut Child) {
    // the child leads its own group, so its pid is the group id
    let pgid = child.id() as libc::pid_t;
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_step(child: &mut Child) {
    let _ = child.kill();
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= limit {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(limit.saturating_sub(started.elapsed())));
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

/// Run `steps` in order and stop at the first failure.
///
/// `on_step` is called before each step is executed.
pub fn run_steps<E, F>(executor: &mut E, steps: &[StepSpec], mut on_step: F) -> StepOutcome
where
    E: CommandExecutor + ?Sized,
    F: FnMut(&StepSpec),
{
    for (index, step) in steps.iter().enumerate() {
        on_step(step);
        info!(step = %step.name, index = index + 1, total = steps.len(), "exec: {}", step.command_line());
        let started = Instant::now();
        executor.execute(step)?;
        debug!(step = %step.name, elapsed_ms = started.elapsed().as_millis() as u64, "step done");
    }
    Ok(())
}
