//! One scan cycle: new-run reports, end-of-run notices, demultiplexing.

use crate::discovery::RunDiscoveryScanner;
use crate::disk::DiskProbe;
use crate::error::{Result, SeqwatchError};
use crate::instance_lock::InstanceLock;
use crate::notify::{Notification, Notifier};
use crate::orchestrator::{DemuxOrchestrator, DemuxOutcome};
use crate::processed_set::{FileProcessedSet, ProcessedSetStore, Stage};
use crate::report;
use crate::run_id::{RunId, SequencerType};
use crate::sample_sheet::DesignConverter;
use crate::settings::{self, Settings};
use crate::steps::CommandExecutor;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

pub const DENY_FILE: &str = "demux.deny";
pub const CYCLE_LAST_ERROR_FILE: &str = "seqwatch.lasterr";
pub const FIRST_BASE_REPORT_FILE: &str = "First_Base_Report.htm";

#[derive(Debug, Default, Serialize)]
pub struct CycleSummary {
    pub new_runs: Vec<RunId>,
    pub end_runs: Vec<RunId>,
    pub end_runs_suppressed: Vec<RunId>,
    pub demultiplexed: Vec<RunId>,
    pub demux_failed: Vec<RunId>,
}

impl CycleSummary {
    pub fn is_empty(&self) -> bool {
        self.new_runs.is_empty()
            && self.end_runs.is_empty()
            && self.demultiplexed.is_empty()
            && self.demux_failed.is_empty()
    }
}

/// Collaborators of a cycle. Stores are opened from `var.path` on each run.
pub struct Cycle<'a> {
    pub settings: &'a Settings,
    pub scanner: RunDiscoveryScanner,
    pub executor: &'a mut dyn CommandExecutor,
    pub converter: &'a dyn DesignConverter,
    pub notifier: &'a mut dyn Notifier,
    pub probe: &'a dyn DiskProbe,
    pub threads: usize,
}

impl Cycle<'_> {
    /// Take the instance lock, then run every enabled stage.
    ///
    /// A live lock holder yields `LockHeld`. A lock left by a dead process
    /// is reported to the operators and yields `StaleLock`; the file stays.
    pub fn run(&mut self) -> Result<CycleSummary> {
        let lock_path = self.settings.lock_file();
        let _lock = match InstanceLock::acquire(&lock_path) {
            Ok(lock) => lock,
            Err(SeqwatchError::StaleLock { path, pid }) => {
                self.report_stale_lock(&path, pid);
                return Err(SeqwatchError::StaleLock { path, pid });
            }
            Err(e) => return Err(e),
        };

        let var_path = self.settings.var_path();
        fs::create_dir_all(&var_path).map_err(|e| SeqwatchError::io_at(&var_path, e))?;

        let mut summary = CycleSummary::default();
        let mut new_run = FileProcessedSet::for_stage(&var_path, Stage::NewRun)?;
        let mut end_run = FileProcessedSet::for_stage(&var_path, Stage::EndRun)?;
        let mut demux = FileProcessedSet::for_stage(&var_path, Stage::Demux)?;

        if self.settings.bool(settings::NEW_RUN_STEP_KEY) {
            self.new_run_stage(&mut new_run, &end_run, &mut summary)?;
        }
        if self.settings.bool(settings::END_RUN_STEP_KEY) {
            self.end_run_stage(&mut end_run, &mut summary)?;
        }
        if self.settings.bool(settings::DEMUX_STEP_KEY) {
            self.demux_stage(&mut end_run, &mut demux, &mut summary)?;
        }

        if !summary.is_empty() {
            info!(
                new_runs = summary.new_runs.len(),
                end_runs = summary.end_runs.len(),
                demultiplexed = summary.demultiplexed.len(),
                failed = summary.demux_failed.len(),
                "end of cycle"
            );
        }
        Ok(summary)
    }

    fn new_run_stage(
        &mut self,
        new_run: &mut FileProcessedSet,
        end_run: &FileProcessedSet,
        summary: &mut CycleSummary,
    ) -> Result<()> {
        for (run_id, run_dir) in self.scanner.scan_new_runs(&*new_run, end_run)? {
            let kind = self.scanner.sequencer_type(&run_id);
            info!(stage = "new_run", run_id = %run_id, sequencer = kind.label(), "new run");

            let info = match self.scanner.run_info(&run_dir) {
                Ok(info) => info,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "cannot read run metadata, will retry");
                    continue;
                }
            };
            let run_summary = info.summary();
            if run_summary.inconsistent_cycles {
                warn!(run_id = %run_id, "{}", run_summary.cycles_line());
            }

            let attachment = Some(run_dir.join(FIRST_BASE_REPORT_FILE))
                .filter(|p| kind == SequencerType::HiSeq && p.is_file());
            let notification = report::new_run(&run_id, kind, &info, attachment);
            if self.deliver(&run_id, &notification) && self.record(new_run, &run_id, Stage::NewRun) {
                summary.new_runs.push(run_id);
            }
        }
        Ok(())
    }

    fn end_run_stage(&mut self, end_run: &mut FileProcessedSet, summary: &mut CycleSummary) -> Result<()> {
        let max_age_hours = self.settings.u64(settings::END_RUN_MAX_AGE_KEY)?.unwrap_or(12);
        let max_age = Duration::from_secs(max_age_hours * 3600);

        for (run_id, run_dir) in self.scanner.scan_completed_runs()? {
            if end_run.contains(&run_id) {
                continue;
            }
            let kind = self.scanner.sequencer_type(&run_id);
            let completed_at = self.scanner.completed_at(&run_id, &run_dir);
            let suppress = completed_at
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .map(|age| age > max_age)
                .unwrap_or(false);
            info!(stage = "end_run", run_id = %run_id, notify = !suppress, "run completed");

            let notification = report::end_run(&run_id, kind, completed_at.map(DateTime::<Local>::from), suppress);
            if self.deliver(&run_id, &notification) && self.record(end_run, &run_id, Stage::EndRun) {
                if suppress {
                    summary.end_runs_suppressed.push(run_id.clone());
                }
                summary.end_runs.push(run_id);
            }
        }
        Ok(())
    }

    fn demux_stage(
        &mut self,
        end_run: &mut FileProcessedSet,
        demux: &mut FileProcessedSet,
        summary: &mut CycleSummary,
    ) -> Result<()> {
        let deny = FileProcessedSet::open(self.settings.var_path().join(DENY_FILE))?;
        let candidates = demux_candidates(&self.scanner, end_run, demux, &deny)?;

        let mut orchestrator = DemuxOrchestrator::new(
            self.settings,
            demux,
            &mut *self.executor,
            self.converter,
            &mut *self.notifier,
            self.probe,
        )
        .with_threads(self.threads);

        for run_id in candidates {
            let report = orchestrator.demux(&run_id);
            match report.outcome {
                DemuxOutcome::Recorded { .. } => summary.demultiplexed.push(run_id),
                DemuxOutcome::Failed(_) => summary.demux_failed.push(run_id),
                DemuxOutcome::AlreadyDone => {}
            }
        }
        Ok(())
    }

    fn deliver(&mut self, run_id: &RunId, notification: &Notification) -> bool {
        match self.notifier.send(notification) {
            Ok(()) => true,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "notification failed, will retry next cycle");
                false
            }
        }
    }

    /// Persist `run_id` for `stage`. A failed write is reported to the
    /// operators; the run is then announced again by the next cycle.
    fn record(&mut self, store: &mut dyn ProcessedSetStore, run_id: &RunId, stage: Stage) -> bool {
        match store.add(run_id) {
            Ok(()) => true,
            Err(e) => {
                error!(stage = stage.name(), run_id = %run_id, error = %e, "cannot record run");
                self.report(&report::record_failure(stage.name(), run_id, &e.to_string()));
                false
            }
        }
    }

    fn report_stale_lock(&mut self, path: &Path, pid: u32) {
        self.report(&report::stale_lock(path, pid));
    }

    /// Write `seqwatch.lasterr` and send the notification.
    fn report(&mut self, notification: &Notification) {
        let lasterr = self.settings.var_path().join(CYCLE_LAST_ERROR_FILE);
        if let Err(e) = fs::write(&lasterr, format!("{}\n\n{}\n", notification.subject, notification.body)) {
            warn!(path = %lasterr.display(), error = %e, "could not write last error");
        }
        if let Err(e) = self.notifier.send(notification) {
            warn!(subject = %notification.subject, error = %e, "could not send error notification");
        }
    }
}

/// Runs to demultiplex, in sorted order: complete on disk or already
/// announced as ended, minus runs already demultiplexed or denied.
pub fn demux_candidates(
    scanner: &RunDiscoveryScanner,
    end_run: &mut dyn ProcessedSetStore,
    demux: &mut dyn ProcessedSetStore,
    deny: &dyn ProcessedSetStore,
) -> Result<Vec<RunId>> {
    let mut candidates: BTreeSet<RunId> = scanner.scan_completed_runs()?.into_keys().collect();
    candidates.extend(end_run.load_all()?);
    let done = demux.load_all()?;
    Ok(candidates
        .into_iter()
        .filter(|id| !done.contains(id) && !deny.contains(id))
        .collect())
}
