use crate::error::{Result, SeqwatchError};
use crate::run_id::RunId;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lifecycle stages that each keep their own processed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    NewRun,
    EndRun,
    Demux,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::NewRun, Stage::EndRun, Stage::Demux];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::NewRun => "new_run",
            Stage::EndRun => "end_run",
            Stage::Demux => "demux",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Stage::ALL.into_iter().find(|s| s.name() == name)
    }

    pub fn file_name(&self) -> String {
        format!("{}.done", self.name())
    }
}

/// Set of run ids already handled for one stage.
///
/// Membership only grows. Implementations must make `add` durable before
/// returning `Ok`, since the orchestrator relies on it as the sole guard
/// against processing a run twice.
pub trait ProcessedSetStore {
    fn contains(&self, run_id: &RunId) -> bool;

    /// Record `run_id`; adding an id that is already present is a no-op.
    fn add(&mut self, run_id: &RunId) -> Result<()>;

    fn load_all(&mut self) -> Result<BTreeSet<RunId>>;
}

/// Append-only, newline-delimited file of run ids.
pub struct FileProcessedSet {
    path: PathBuf,
    seen: FxHashSet<RunId>,
}

impl FileProcessedSet {
    /// Open the set stored at `path`. A missing file is an empty set.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = read_ids(&path)?;
        debug!(path = %path.display(), entries = seen.len(), "opened processed set");
        Ok(Self { path, seen })
    }

    pub fn for_stage(var_path: &Path, stage: Stage) -> Result<Self> {
        Self::open(var_path.join(stage.file_name()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn read_ids(path: &Path) -> Result<FxHashSet<RunId>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FxHashSet::default()),
        Err(e) => return Err(SeqwatchError::io_at(path, e)),
    };
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(RunId::from_stored)
        .collect())
}

impl ProcessedSetStore for FileProcessedSet {
    fn contains(&self, run_id: &RunId) -> bool {
        self.seen.contains(run_id)
    }

    fn add(&mut self, run_id: &RunId) -> Result<()> {
        if self.seen.contains(run_id) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SeqwatchError::io_at(&self.path, e))?;
        writeln!(file, "{}", run_id).map_err(|e| SeqwatchError::io_at(&self.path, e))?;
        file.sync_data()
            .map_err(|e| SeqwatchError::io_at(&self.path, e))?;
        self.seen.insert(run_id.clone());
        debug!(path = %self.path.display(), run_id = %run_id, "recorded run id");
        Ok(())
    }

    /// Re-reads the file so entries appended by an operator are picked up.
    fn load_all(&mut self) -> Result<BTreeSet<RunId>> {
        let on_disk = read_ids(&self.path)?;
        self.seen.extend(on_disk);
        Ok(self.seen.iter().cloned().collect())
    }
}

/// Non-persistent store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryProcessedSet {
    seen: BTreeSet<RunId>,
}

impl MemoryProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            seen: ids.into_iter().map(RunId::from_stored).collect(),
        }
    }
}

impl ProcessedSetStore for MemoryProcessedSet {
    fn contains(&self, run_id: &RunId) -> bool {
        self.seen.contains(run_id)
    }

    fn add(&mut self, run_id: &RunId) -> Result<()> {
        self.seen.insert(run_id.clone());
        Ok(())
    }

    fn load_all(&mut self) -> Result<BTreeSet<RunId>> {
        Ok(self.seen.clone())
    }
}
