#![allow(dead_code)]

use seqwatch::notify::{MemoryNotifier, Notification};
use seqwatch::run_info::RUN_INFO_FILE;
use seqwatch::settings::Settings;
use seqwatch::steps::{CommandExecutor, StepFailure, StepFailureKind, StepOutcome, StepSpec};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const NEXTSEQ_RUN: &str = "150408_NB500892_0002_AH3LNMBGXX";
pub const NEXTSEQ_FLOW_CELL: &str = "H3LNMBGXX";
pub const HISEQ_RUN: &str = "150409_SN501_0042_AC3LNMACXX";
pub const HISEQ_FLOW_CELL: &str = "C3LNMACXX";

pub const RUN_INFO_XML: &str = r#"<?xml version="1.0"?>
<RunInfo Version="2">
  <Run Id="RUN" Number="2">
    <Flowcell>FC</Flowcell>
    <Instrument>NB500892</Instrument>
    <Reads>
      <Read Number="1" NumCycles="76" IsIndexedRead="N" />
      <Read Number="2" NumCycles="6" IsIndexedRead="Y" />
      <Read Number="3" NumCycles="76" IsIndexedRead="N" />
    </Reads>
    <FlowcellLayout LaneCount="4" />
  </Run>
</RunInfo>"#;

/// A throwaway sequencing site: data roots, design and report directories,
/// and the state directory, all under one temp dir.
pub struct Site {
    pub root: TempDir,
    pub settings: Settings,
}

impl Site {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().to_path_buf();
        for dir in ["sequencer", "designs", "tmp", "fastq", "reports", "casava", "var"] {
            fs::create_dir_all(base.join(dir)).unwrap();
        }
        let mut settings = Settings::with_defaults();
        let path = |name: &str| base.join(name).display().to_string();
        settings.set("var.path", path("var"));
        settings.set("sequencer.data.paths", path("sequencer"));
        settings.set("bcl.data.path", path("sequencer"));
        settings.set("design.path", path("designs"));
        settings.set("tmp.path", path("tmp"));
        settings.set("fastq.data.path", path("fastq"));
        settings.set("reports.data.path", path("reports"));
        settings.set("demux.tool.path", path("casava"));
        settings.set("reports.url", "http://reports.example.org/runs");
        Self { root, settings }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn var(&self) -> PathBuf {
        self.path("var")
    }

    pub fn run_dir(&self, run: &str) -> PathBuf {
        self.path("sequencer").join(run)
    }

    /// Run directory with metadata only, as seen while sequencing.
    pub fn add_run(&self, run: &str) -> PathBuf {
        let dir = self.run_dir(run);
        fs::create_dir_all(dir.join("Data").join("Intensities").join("BaseCalls")).unwrap();
        fs::write(dir.join(RUN_INFO_FILE), RUN_INFO_XML).unwrap();
        dir
    }

    pub fn complete_run(&self, run: &str, marker: &str) -> PathBuf {
        let dir = self.add_run(run);
        let marker_path = dir.join(marker);
        fs::write(&marker_path, "").unwrap();
        marker_path
    }

    pub fn add_design(&self, run_number: u32, flow_cell: &str) -> PathBuf {
        let path = self.path("designs").join(format!("design-{:04}.csv", run_number));
        fs::write(
            &path,
            format!(
                "FCID,Lane,SampleID,SampleRef,Index,Description,Control,Recipe,Operator,SampleProject\n\
                 {fc},1,s1,mm10,CGATGT,liver,N,R1,jo,proj_a\n\
                 {fc},1,s2,mm10,TGACCA,heart,N,R1,jo,proj_a\n",
                fc = flow_cell
            ),
        )
        .unwrap();
        path
    }

    pub fn output_dir(&self, run_number: u32) -> PathBuf {
        self.path("fastq").join(format!("fastq_{:04}", run_number))
    }
}

/// Records every step instead of running it. `configure` creates the output
/// directory the way the real tool does.
#[derive(Default)]
pub struct FakeExecutor {
    pub executed: Vec<String>,
    pub fail_on: Option<String>,
}

impl FakeExecutor {
    pub fn failing_on(step: &str) -> Self {
        Self {
            executed: Vec::new(),
            fail_on: Some(step.to_string()),
        }
    }
}

impl CommandExecutor for FakeExecutor {
    fn execute(&mut self, step: &StepSpec) -> StepOutcome {
        self.executed.push(step.name.clone());
        if step.name == "configure" {
            if let Some(pos) = step.args.iter().position(|a| a == "--output-dir") {
                fs::create_dir_all(Path::new(&step.args[pos + 1])).unwrap();
            }
        }
        if self.fail_on.as_deref() == Some(step.name.as_str()) {
            return Err(StepFailure {
                step: step.name.clone(),
                command_line: step.command_line(),
                kind: StepFailureKind::ExitStatus(2),
                diagnostic: "make: *** [all] Error 2".to_string(),
            });
        }
        Ok(())
    }
}

pub fn subjects(notifier: &MemoryNotifier) -> Vec<String> {
    notifier.sent.iter().map(|n: &Notification| n.subject.clone()).collect()
}
