use crate::error::{Result, SeqwatchError};
use crate::lifecycle::RunState;
use crate::run_id::RunId;
use crate::settings::{self, Settings};
use crate::steps::StepSpec;
use serde::Serialize;
use std::path::PathBuf;

pub const DESIGN_ARCHIVE: &str = "designs.zip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemuxParams {
    pub cluster_count: u64,
    pub compression: String,
    pub compression_level: u64,
    pub mismatches: u64,
    pub threads: usize,
}

/// Everything needed to demultiplex one run, resolved from settings.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRequest {
    pub run_id: RunId,
    pub flow_cell: String,
    pub run_number: u32,
    pub source_root: PathBuf,
    pub input_dir: PathBuf,
    pub design_dir: PathBuf,
    pub design_source: PathBuf,
    pub tmp_dir: PathBuf,
    pub design_csv: PathBuf,
    pub fastq_root: PathBuf,
    pub output_dir: PathBuf,
    pub reports_root: PathBuf,
    pub report_dir: PathBuf,
    pub tool_path: PathBuf,
    pub params: DemuxParams,
}

impl PipelineRequest {
    pub fn resolve(settings: &Settings, run_id: &RunId, threads: usize) -> Result<Self> {
        let run_number = run_id
            .run_number()
            .ok_or_else(|| SeqwatchError::RunId(run_id.to_string()))?;
        let flow_cell = run_id
            .flow_cell()
            .ok_or_else(|| SeqwatchError::RunId(run_id.to_string()))?
            .to_string();

        let source_root = settings.path(settings::BCL_DATA_PATH_KEY)?;
        let design_dir = settings.path(settings::DESIGN_PATH_KEY)?;
        let tmp_dir = settings.path(settings::TMP_PATH_KEY)?;
        let fastq_root = settings.path(settings::FASTQ_DATA_PATH_KEY)?;
        let reports_root = settings.path(settings::REPORTS_DATA_PATH_KEY)?;
        let tool_path = settings.path(settings::DEMUX_TOOL_PATH_KEY)?;

        let threads = match settings.u64(settings::DEMUX_THREADS_KEY)? {
            Some(n) if n > 0 => n as usize,
            _ => threads.max(1),
        };
        let params = DemuxParams {
            cluster_count: settings.u64(settings::DEMUX_CLUSTER_COUNT_KEY)?.unwrap_or(0),
            compression: settings
                .get(settings::DEMUX_COMPRESSION_KEY)
                .unwrap_or("gzip")
                .to_string(),
            compression_level: settings.u64(settings::DEMUX_COMPRESSION_LEVEL_KEY)?.unwrap_or(9),
            mismatches: settings.u64(settings::DEMUX_MISMATCHES_KEY)?.unwrap_or(0),
            threads,
        };

        Ok(Self {
            input_dir: source_root.join(run_id.as_str()),
            design_source: design_dir.join(design_file_name(run_number)),
            design_csv: tmp_dir.join(design_file_name(run_number)),
            output_dir: fastq_root.join(format!("fastq_{:04}", run_number)),
            report_dir: reports_root.join(run_id.as_str()),
            run_id: run_id.clone(),
            flow_cell,
            run_number,
            source_root,
            design_dir,
            tmp_dir,
            fastq_root,
            reports_root,
            tool_path,
            params,
        })
    }

    fn basecall_stats_dir(&self) -> String {
        format!("Basecall_Stats_{}", self.flow_cell)
    }

    fn basecall_stats_copy(&self) -> String {
        format!("basecall_stats_{}", self.run_id)
    }

    /// The fixed demultiplexing sequence, in execution order.
    pub fn steps(&self) -> Vec<StepSpec> {
        let out = &self.output_dir;
        let out_s = out.display().to_string();
        let stats = self.basecall_stats_dir();
        let stats_copy = self.basecall_stats_copy();
        let stats_archive = self.report_dir.join(format!("{}.tar.bz2", stats_copy));
        let p = &self.params;

        vec![
            StepSpec::new(
                "configure",
                self.tool_path.join("bin").join("configureBclToFastq.pl").display().to_string(),
                RunState::Configuring,
            )
            .arg("--fastq-cluster-count")
            .arg(p.cluster_count.to_string())
            .arg("--compression")
            .arg(p.compression.clone())
            .arg("--gz-level")
            .arg(p.compression_level.to_string())
            .arg("--mismatches")
            .arg(p.mismatches.to_string())
            .arg("--input-dir")
            .arg(self.input_dir.join("Data").join("Intensities").join("BaseCalls").display().to_string())
            .arg("--sample-sheet")
            .arg(self.design_csv.display().to_string())
            .arg("--output-dir")
            .arg(out_s.clone()),
            StepSpec::new("build", "make", RunState::RunningPipeline)
                .args(["-j".to_string(), p.threads.to_string()])
                .current_dir(out),
            StepSpec::new("copy design", "cp", RunState::Archiving)
                .args(["-p".to_string(), self.design_csv.display().to_string(), out_s.clone()]),
            StepSpec::new("create report directory", "mkdir", RunState::Archiving)
                .args(["-p".to_string(), self.report_dir.display().to_string()]),
            StepSpec::new("rename basecall stats", "mv", RunState::Archiving)
                .args([stats.clone(), stats_copy.clone()])
                .current_dir(out),
            StepSpec::new("archive basecall stats", "tar", RunState::Archiving)
                .args(["cjf".to_string(), stats_archive.display().to_string(), stats_copy.clone()])
                .current_dir(out),
            StepSpec::new("copy basecall stats", "cp", RunState::Archiving)
                .args(["-rp".to_string(), stats_copy.clone(), self.report_dir.display().to_string()])
                .current_dir(out),
            StepSpec::new("restore basecall stats", "mv", RunState::Archiving)
                .args([stats_copy, stats])
                .current_dir(out),
            StepSpec::new("lock output", "find", RunState::Locked).args([
                out_s,
                "-mindepth".to_string(),
                "1".to_string(),
                "-maxdepth".to_string(),
                "1".to_string(),
                "-type".to_string(),
                "d".to_string(),
                "-name".to_string(),
                "Project_*".to_string(),
                "-exec".to_string(),
                "chmod".to_string(),
                "-R".to_string(),
                "ugo-w".to_string(),
                "{}".to_string(),
                "+".to_string(),
            ]),
            StepSpec::new("archive design", "zip", RunState::Locked).args([
                "-j".to_string(),
                self.design_dir.join(DESIGN_ARCHIVE).display().to_string(),
                self.design_csv.display().to_string(),
                self.design_source.display().to_string(),
            ]),
        ]
    }
}

pub fn design_file_name(run_number: u32) -> String {
    format!("design-{:04}.csv", run_number)
}
