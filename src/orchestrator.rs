//! Demultiplexing of one completed run, from preflight to the done record.

use crate::disk::DiskProbe;
use crate::error::SeqwatchError;
use crate::lifecycle::{FailureKind, RunLifecycle, RunState};
use crate::notify::Notifier;
use crate::pipeline::PipelineRequest;
use crate::preflight::{self, PreflightFailure};
use crate::processed_set::ProcessedSetStore;
use crate::report;
use crate::run_id::RunId;
use crate::sample_sheet::{ConversionError, DesignConverter};
use crate::settings::{self, Settings};
use crate::steps::{self, CommandExecutor, StepFailure};
use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

pub const LAST_ERROR_FILE: &str = "demux.lasterr";

#[derive(Debug, Error)]
pub enum DemuxFailure {
    #[error("cannot prepare demultiplexing: {0}")]
    Setup(#[source] SeqwatchError),

    #[error(transparent)]
    Precondition(#[from] PreflightFailure),

    #[error("error while converting {}: {source}", .design.display())]
    Conversion {
        design: PathBuf,
        #[source]
        source: ConversionError,
    },

    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error("cannot record run as demultiplexed: {0}")]
    Store(#[source] SeqwatchError),
}

impl DemuxFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            DemuxFailure::Setup(_) | DemuxFailure::Precondition(_) => FailureKind::Precondition,
            DemuxFailure::Conversion { .. } => FailureKind::Conversion,
            DemuxFailure::Step(_) => FailureKind::ExternalStep,
            DemuxFailure::Store(_) => FailureKind::Store,
        }
    }

    /// One-line summary used as the notification subject.
    pub fn short_label(&self, run_id: &RunId) -> String {
        match self {
            DemuxFailure::Setup(_) => format!("cannot prepare demultiplexing for run {}", run_id),
            DemuxFailure::Precondition(p) => format!("{} for run {}", p.short_label(), run_id),
            DemuxFailure::Conversion { design, .. } => format!(
                "error while converting {} for run {}",
                design.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                run_id
            ),
            DemuxFailure::Step(s) => format!("error in step '{}' for run {}", s.step, run_id),
            DemuxFailure::Store(_) => format!("cannot record run {} as demultiplexed", run_id),
        }
    }

    /// Full explanation for the notification body and the last-error file.
    pub fn detail(&self) -> String {
        match self {
            DemuxFailure::Step(s) => {
                let mut text = format!("Step '{}' failed: {}.\nCommand line:\n{}", s.step, s.kind, s.command_line);
                if !s.diagnostic.is_empty() {
                    text.push_str("\n\nTool output:\n");
                    text.push_str(&s.diagnostic);
                }
                text
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum DemuxOutcome {
    Recorded { elapsed: Duration },
    AlreadyDone,
    Failed(DemuxFailure),
}

/// What happened to one run, returned to the cycle for logging.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub history: Vec<RunState>,
    pub outcome: DemuxOutcome,
}

impl RunReport {
    pub fn is_recorded(&self) -> bool {
        matches!(self.outcome, DemuxOutcome::Recorded { .. })
    }

    pub fn failure(&self) -> Option<&DemuxFailure> {
        match &self.outcome {
            DemuxOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn final_state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Discovered)
    }
}

/// Drives one run through preflight, design conversion and the external
/// steps, then records it in the demux store.
///
/// The store is only written after every step succeeded, so a failed run is
/// picked up again by the next cycle.
pub struct DemuxOrchestrator<'a> {
    settings: &'a Settings,
    store: &'a mut dyn ProcessedSetStore,
    executor: &'a mut dyn CommandExecutor,
    converter: &'a dyn DesignConverter,
    notifier: &'a mut dyn Notifier,
    probe: &'a dyn DiskProbe,
    threads: usize,
}

impl<'a> DemuxOrchestrator<'a> {
    pub fn new(
        settings: &'a Settings,
        store: &'a mut dyn ProcessedSetStore,
        executor: &'a mut dyn CommandExecutor,
        converter: &'a dyn DesignConverter,
        notifier: &'a mut dyn Notifier,
        probe: &'a dyn DiskProbe,
    ) -> Self {
        Self {
            settings,
            store,
            executor,
            converter,
            notifier,
            probe,
            threads: 1,
        }
    }

    /// Worker-count hint used when `demux.threads` is not set.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn demux(&mut self, run_id: &RunId) -> RunReport {
        if self.store.contains(run_id) {
            info!(run_id = %run_id, "already demultiplexed, skipping");
            return RunReport {
                run_id: run_id.clone(),
                history: vec![RunState::Recorded],
                outcome: DemuxOutcome::AlreadyDone,
            };
        }

        info!(run_id = %run_id, "demultiplexing run");
        let started = Instant::now();
        let mut lifecycle = RunLifecycle::new(run_id.clone());

        match self.process(&mut lifecycle) {
            Ok(request) => {
                let elapsed = started.elapsed();
                self.finish(&request, elapsed);
                info!(run_id = %run_id, elapsed_secs = elapsed.as_secs(), "demultiplexing done");
                RunReport {
                    run_id: run_id.clone(),
                    history: lifecycle.into_history(),
                    outcome: DemuxOutcome::Recorded { elapsed },
                }
            }
            Err(failure) => {
                lifecycle.fail(failure.kind());
                self.report_failure(run_id, &failure);
                RunReport {
                    run_id: run_id.clone(),
                    history: lifecycle.into_history(),
                    outcome: DemuxOutcome::Failed(failure),
                }
            }
        }
    }

    fn process(&mut self, lifecycle: &mut RunLifecycle) -> Result<PipelineRequest, DemuxFailure> {
        let run_id = lifecycle.run_id().clone();
        let request = PipelineRequest::resolve(self.settings, &run_id, self.threads).map_err(DemuxFailure::Setup)?;
        let factor = self.settings.space_factor().map_err(DemuxFailure::Setup)?;

        preflight::check(&request, self.probe, factor)?;
        advance(lifecycle, RunState::Validated);

        advance(lifecycle, RunState::Configuring);
        let samples = self
            .converter
            .convert(&request.design_source, &request.flow_cell, &request.design_csv)
            .map_err(|source| DemuxFailure::Conversion {
                design: request.design_source.clone(),
                source,
            })?;
        info!(run_id = %run_id, samples, "design converted");

        let steps = request.steps();
        steps::run_steps(&mut *self.executor, &steps, |step| advance(lifecycle, step.phase))?;

        self.store.add(&run_id).map_err(DemuxFailure::Store)?;
        advance(lifecycle, RunState::Recorded);
        Ok(request)
    }

    fn finish(&mut self, request: &PipelineRequest, elapsed: Duration) {
        if let Err(e) = fs::remove_file(&request.design_csv) {
            warn!(path = %request.design_csv.display(), error = %e, "could not remove converted design");
        }

        let used_bytes = self.probe.usage(&request.output_dir).ok();
        let free_bytes = self.probe.available(&request.output_dir).ok();
        let notification = report::demux_success(&report::DemuxSuccess {
            request,
            elapsed,
            finished_at: Local::now(),
            used_bytes,
            free_bytes,
            reports_url: self.settings.get(settings::REPORTS_URL_KEY),
        });
        if let Err(e) = self.notifier.send(&notification) {
            warn!(run_id = %request.run_id, error = %e, "could not send success notification");
        }
    }

    fn report_failure(&mut self, run_id: &RunId, failure: &DemuxFailure) {
        let short = failure.short_label(run_id);
        let detail = failure.detail();
        error!(run_id = %run_id, kind = failure.kind().label(), "{}", short);

        let var_path = self.settings.var_path();
        let lasterr = var_path.join(LAST_ERROR_FILE);
        if let Err(e) = fs::create_dir_all(&var_path).and_then(|_| fs::write(&lasterr, format!("{}\n\n{}\n", short, detail))) {
            warn!(path = %lasterr.display(), error = %e, "could not write last error");
        }

        if let Err(e) = self.notifier.send(&report::demux_failure(&short, &detail)) {
            warn!(run_id = %run_id, error = %e, "could not send failure notification");
        }
    }
}

fn advance(lifecycle: &mut RunLifecycle, next: RunState) {
    if let Err(e) = lifecycle.advance(next) {
        warn!(run_id = %lifecycle.run_id(), error = %e, "ignored state transition");
    }
}
