use crate::error::{Result, SeqwatchError};
use crate::processed_set::ProcessedSetStore;
use crate::run_id::{RunId, SequencerCatalog, SequencerType};
use crate::run_info::{RUN_INFO_FILE, RunInfo};
use crate::settings::{self, Settings};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Finds run directories under the sequencer data roots.
#[derive(Debug, Clone)]
pub struct RunDiscoveryScanner {
    data_paths: Vec<PathBuf>,
    serials: Option<HashSet<String>>,
    catalog: SequencerCatalog,
}

impl RunDiscoveryScanner {
    pub fn new(data_paths: Vec<PathBuf>) -> Self {
        Self {
            data_paths,
            serials: None,
            catalog: SequencerCatalog::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let serials = settings
            .get(settings::SEQUENCER_SERIALS_KEY)
            .map(|v| {
                v.split(|c: char| c == ',' || c == ':' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<HashSet<_>>()
            })
            .filter(|s| !s.is_empty());
        Self {
            data_paths: settings.sequencer_data_paths(),
            serials,
            catalog: SequencerCatalog::from_config(settings.get(settings::SEQUENCER_TYPES_KEY)),
        }
    }

    /// Only keep runs from these instruments.
    pub fn with_serials<'a>(mut self, serials: impl IntoIterator<Item = &'a str>) -> Self {
        self.serials = Some(serials.into_iter().map(str::to_string).collect());
        self
    }

    pub fn with_catalog(mut self, catalog: SequencerCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn sequencer_type(&self, run_id: &RunId) -> SequencerType {
        self.catalog.sequencer_type(run_id)
    }

    /// Every directory named like a run, from an accepted instrument.
    /// A missing data root is skipped with a warning. When the same run
    /// appears under two roots the first root wins.
    pub fn list_runs(&self) -> Result<BTreeMap<RunId, PathBuf>> {
        let mut runs = BTreeMap::new();
        for root in &self.data_paths {
            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(path = %root.display(), "sequencer data path does not exist");
                    continue;
                }
                Err(e) => return Err(SeqwatchError::io_at(root, e)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| SeqwatchError::io_at(root, e))?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Ok(run_id) = RunId::parse(name) else {
                    continue;
                };
                if !self.accepts_instrument(&run_id) {
                    debug!(run_id = %run_id, "instrument not configured, ignoring");
                    continue;
                }
                runs.entry(run_id).or_insert(path);
            }
        }
        Ok(runs)
    }

    fn accepts_instrument(&self, run_id: &RunId) -> bool {
        match (&self.serials, run_id.instrument()) {
            (None, _) => true,
            (Some(serials), Some(serial)) => serials.contains(serial),
            (Some(_), None) => false,
        }
    }

    /// Runs with metadata on disk that neither store has seen yet.
    pub fn scan_new_runs(
        &self,
        new_run: &dyn ProcessedSetStore,
        end_run: &dyn ProcessedSetStore,
    ) -> Result<BTreeMap<RunId, PathBuf>> {
        Ok(self
            .list_runs()?
            .into_iter()
            .filter(|(_, dir)| dir.join(RUN_INFO_FILE).is_file())
            .filter(|(id, _)| !end_run.contains(id) && !new_run.contains(id))
            .collect())
    }

    /// Runs whose sequencer-specific completion marker exists.
    pub fn scan_completed_runs(&self) -> Result<BTreeMap<RunId, PathBuf>> {
        Ok(self
            .list_runs()?
            .into_iter()
            .filter(|(id, dir)| self.completion_marker(id, dir).is_file())
            .collect())
    }

    pub fn completion_marker(&self, run_id: &RunId, run_dir: &Path) -> PathBuf {
        run_dir.join(self.sequencer_type(run_id).completion_marker())
    }

    /// Modification time of the completion marker.
    pub fn completed_at(&self, run_id: &RunId, run_dir: &Path) -> Option<SystemTime> {
        fs::metadata(self.completion_marker(run_id, run_dir))
            .and_then(|m| m.modified())
            .ok()
    }

    pub fn run_info(&self, run_dir: &Path) -> Result<RunInfo> {
        RunInfo::from_file(&run_dir.join(RUN_INFO_FILE))
    }
}
