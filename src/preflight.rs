use crate::disk::{DiskProbe, GIB};
use crate::pipeline::PipelineRequest;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Reason a run cannot start demultiplexing. Nothing has been modified when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreflightFailure {
    #[error("Input data directory does not exist: {}", .0.display())]
    MissingInputDir(PathBuf),

    #[error("Sample design directory does not exist: {}", .0.display())]
    MissingDesignDir(PathBuf),

    #[error("Temporary directory does not exist: {}", .0.display())]
    MissingTmpDir(PathBuf),

    #[error("Report directory does not exist: {}", .0.display())]
    MissingReportDir(PathBuf),

    #[error("No sample design found: {}", .0.display())]
    MissingDesignFile(PathBuf),

    #[error("FASTQ output directory already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error(
        "Not enough disk space: {:.2} GB is needed (factor x{factor}) and {:.2} GB is available",
        gigabytes(.needed),
        gigabytes(.available)
    )]
    InsufficientSpace { needed: u64, available: u64, factor: f64 },

    #[error("Could not measure disk space on {}: {message}", .path.display())]
    Probe { path: PathBuf, message: String },
}

impl PreflightFailure {
    pub fn short_label(&self) -> &'static str {
        match self {
            PreflightFailure::MissingInputDir(_) => "input data directory does not exist",
            PreflightFailure::MissingDesignDir(_) => "sample design directory does not exist",
            PreflightFailure::MissingTmpDir(_) => "temporary directory does not exist",
            PreflightFailure::MissingReportDir(_) => "report directory does not exist",
            PreflightFailure::MissingDesignFile(_) => "no sample design found",
            PreflightFailure::OutputExists(_) => "fastq output directory already exists",
            PreflightFailure::InsufficientSpace { .. } => "not enough disk space to demultiplex",
            PreflightFailure::Probe { .. } => "could not measure disk space",
        }
    }
}

fn gigabytes(bytes: &u64) -> f64 {
    *bytes as f64 / GIB
}

pub type PreflightResult = Result<(), PreflightFailure>;

fn require_dir(path: &Path, fail: fn(PathBuf) -> PreflightFailure) -> PreflightResult {
    if path.is_dir() {
        Ok(())
    } else {
        Err(fail(path.to_path_buf()))
    }
}

/// Fail-fast checks run before anything irreversible happens for a run.
///
/// Order: input root and run directory, design directory, temporary
/// directory, report root, design file, output collision, free space.
pub fn check(request: &PipelineRequest, probe: &dyn DiskProbe, space_factor: f64) -> PreflightResult {
    require_dir(&request.source_root, PreflightFailure::MissingInputDir)?;
    require_dir(&request.input_dir, PreflightFailure::MissingInputDir)?;
    require_dir(&request.design_dir, PreflightFailure::MissingDesignDir)?;
    require_dir(&request.tmp_dir, PreflightFailure::MissingTmpDir)?;
    require_dir(&request.reports_root, PreflightFailure::MissingReportDir)?;

    if !request.design_source.is_file() {
        return Err(PreflightFailure::MissingDesignFile(request.design_source.clone()));
    }

    if request.output_dir.exists() {
        return Err(PreflightFailure::OutputExists(request.output_dir.clone()));
    }

    let probe_err = |path: &Path, e: std::io::Error| PreflightFailure::Probe {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let usage = probe
        .usage(&request.input_dir)
        .map_err(|e| probe_err(&request.input_dir, e))?;
    let available = probe
        .available(&request.fastq_root)
        .map_err(|e| probe_err(&request.fastq_root, e))?;
    let needed = (usage as f64 * space_factor).ceil() as u64;

    debug!(
        run_id = %request.run_id,
        input_usage = usage,
        output_free = available,
        space_needed = needed,
        "space check"
    );

    if available < needed {
        return Err(PreflightFailure::InsufficientSpace {
            needed,
            available,
            factor: space_factor,
        });
    }
    Ok(())
}
