use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::{CpuRefreshKind, Disks, RefreshKind, System};
use walkdir::WalkDir;

pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Disk usage and free space measurements used by preflight and reports.
pub trait DiskProbe {
    /// Bytes used by everything under `path`.
    fn usage(&self, path: &Path) -> io::Result<u64>;

    /// Bytes available to unprivileged users on the filesystem holding `path`.
    fn available(&self, path: &Path) -> io::Result<u64>;
}

/// Measures the real filesystem: usage by walking the tree, free space from
/// the mounted disk with the longest mount point prefix.
#[derive(Debug, Default)]
pub struct SystemDiskProbe;

impl DiskProbe for SystemDiskProbe {
    fn usage(&self, path: &Path) -> io::Result<u64> {
        dir_usage(path)
    }

    fn available(&self, path: &Path) -> io::Result<u64> {
        let target = fs::canonicalize(path)?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted disk holds {}", target.display()),
                )
            })
    }
}

fn dir_usage(path: &Path) -> io::Result<u64> {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .try_fold(0u64, |total, entry| {
            let entry = entry?;
            if entry.file_type().is_dir() {
                return Ok(total);
            }
            Ok(total + entry.metadata()?.len())
        })
}

/// Worker-count hint handed to the demultiplexing build step.
pub fn processor_count() -> usize {
    let sys = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
    sys.cpus().len().max(1)
}

/// Fixed measurements, for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDiskProbe {
    pub usage: Vec<(PathBuf, u64)>,
    pub available: u64,
}

impl DiskProbe for StaticDiskProbe {
    fn usage(&self, path: &Path) -> io::Result<u64> {
        Ok(self
            .usage
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, bytes)| *bytes)
            .unwrap_or(0))
    }

    fn available(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.available)
    }
}
