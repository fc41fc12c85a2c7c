use crate::error::{Result, SeqwatchError};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

pub const SUBJECT_PREFIX: &str = "[seqwatch]";

/// A message for the operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
    /// Built and logged but not delivered.
    pub suppress: bool,
}

impl Notification {
    pub fn new(subject: impl AsRef<str>, body: impl Into<String>) -> Self {
        Self {
            subject: format!("{} {}", SUBJECT_PREFIX, subject.as_ref()),
            body: body.into(),
            attachment: None,
            suppress: false,
        }
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }

    pub fn suppressed(mut self, suppress: bool) -> Self {
        self.suppress = suppress;
        self
    }

    /// Plain mail rendering, headers then body.
    pub fn to_mail(&self, to: Option<&str>) -> String {
        let mut mail = String::new();
        if let Some(to) = to {
            mail.push_str(&format!("To: {}\n", to));
        }
        mail.push_str(&format!("Subject: {}\n", self.subject));
        if let Some(path) = &self.attachment {
            mail.push_str(&format!("X-Attachment: {}\n", path.display()));
        }
        mail.push('\n');
        mail.push_str(&self.body);
        if !self.body.ends_with('\n') {
            mail.push('\n');
        }
        mail
    }
}

pub trait Notifier {
    fn send(&mut self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        if notification.suppress {
            debug!(subject = %notification.subject, "notification suppressed");
            return Ok(());
        }
        info!(subject = %notification.subject, "{}", notification.body);
        Ok(())
    }
}

/// Pipes each notification, in mail format, to an external command
/// such as `sendmail -t`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    to: Option<String>,
}

impl CommandNotifier {
    pub fn from_command_line(command_line: &str, to: Option<&str>) -> Result<Self> {
        let mut words = shlex::split(command_line)
            .ok_or_else(|| SeqwatchError::Config(format!("unbalanced quotes in notify command '{}'", command_line)))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| SeqwatchError::Config("empty notify command".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
            to: to.map(str::to_string),
        })
    }
}

impl Notifier for CommandNotifier {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        if notification.suppress {
            debug!(subject = %notification.subject, "notification suppressed");
            return Ok(());
        }
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SeqwatchError::Notify(format!("cannot start '{}': {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(notification.to_mail(self.to.as_deref()).as_bytes())
                .map_err(|e| SeqwatchError::Notify(format!("cannot write to '{}': {}", self.program, e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| SeqwatchError::Notify(format!("'{}' did not finish: {}", self.program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(program = %self.program, status = ?output.status.code(), "notify command failed");
            return Err(SeqwatchError::Notify(format!(
                "'{}' exited with {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim()
            )));
        }
        debug!(subject = %notification.subject, program = %self.program, "notification sent");
        Ok(())
    }
}

/// Keeps every notification in memory, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    pub sent: Vec<Notification>,
}

impl Notifier for MemoryNotifier {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        self.sent.push(notification.clone());
        Ok(())
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        (**self).send(notification)
    }
}
