use crate::error::{Result, SeqwatchError};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Single-instance guard for one scan cycle.
///
/// The PID is written to a private file first and then hard-linked to the
/// lock path, so the lock file is never seen without its PID and two cycles
/// racing for it cannot both succeed. The lock is removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SeqwatchError::io_at(parent, e))?;
            }
        }

        let pid = std::process::id();
        let staged = staging_path(path, pid);
        write_pid(&staged, pid)?;
        let linked = fs::hard_link(&staged, path);
        if let Err(e) = fs::remove_file(&staged) {
            warn!(path = %staged.display(), error = %e, "could not remove staged lock file");
        }

        match linked {
            Ok(()) => {
                debug!(path = %path.display(), pid, "acquired instance lock");
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match read_pid(path)? {
                Some(pid) if !is_process_alive(pid) => {
                    warn!(path = %path.display(), pid, "lock file left by a process that is gone");
                    Err(SeqwatchError::StaleLock {
                        path: path.to_path_buf(),
                        pid,
                    })
                }
                // live holder, or no readable PID to rule one out
                pid => Err(SeqwatchError::LockHeld {
                    path: path.to_path_buf(),
                    pid,
                }),
            },
            Err(e) => Err(SeqwatchError::io_at(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove instance lock");
        }
    }
}

fn staging_path(path: &Path, pid: u32) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", pid));
    path.with_file_name(name)
}

fn write_pid(path: &Path, pid: u32) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| SeqwatchError::io_at(path, e))?;
    write!(file, "{}", pid).map_err(|e| SeqwatchError::io_at(path, e))?;
    file.sync_data().map_err(|e| SeqwatchError::io_at(path, e))
}

fn read_pid(path: &Path) -> Result<Option<u32>> {
    let text = fs::read_to_string(path).map_err(|e| SeqwatchError::io_at(path, e))?;
    Ok(text.trim().parse().ok())
}

fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}
