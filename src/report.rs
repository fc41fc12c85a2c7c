//! Text of the operator messages.

use crate::disk::GIB;
use crate::notify::Notification;
use crate::pipeline::PipelineRequest;
use crate::run_id::{RunId, SequencerType};
use crate::run_info::RunInfo;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;

pub fn time_to_human_readable(time: DateTime<Local>) -> String {
    time.format("%a %b %e %H:%M:%S %Y").to_string()
}

pub fn duration_to_human_readable(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{:02}min{:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}min{:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Run features taken from `RunInfo.xml`, one tab-indented line each.
pub fn run_description(info: &RunInfo) -> String {
    let summary = info.summary();
    let mut text = String::from("Informations about this run:\n");
    text.push_str(&format!(
        "\t- {} lanes with {} aligned to PhiX.\n",
        info.lane_count,
        info.phix_lanes.len()
    ));
    text.push_str(&format!(
        "\t- {} read(s) and {} index(es).\n",
        summary.read_count, summary.index_count
    ));
    text.push_str(&format!("\t- {}\n", summary.cycles_line()));
    text.push_str(&format!("\t- estimated run type: {}.\n", summary.label));
    text
}

/// First report for a newly discovered run. HiSeq runs carry the first base
/// report as attachment when it exists.
pub fn new_run(run_id: &RunId, kind: SequencerType, info: &RunInfo, attachment: Option<PathBuf>) -> Notification {
    let label = info.summary().label;
    let description = run_description(info);
    match attachment {
        Some(path) => Notification::new(
            format!("First base report for {} run {}  {}", kind.label(), label, run_id),
            format!(
                "You will find attached to this message the first base report on sequencer {} for the run {}.\n\n{}",
                kind.label(),
                run_id,
                description
            ),
        )
        .with_attachment(path),
        None => Notification::new(
            format!("Detection new run on sequencer {} {}  {}", kind.label(), label, run_id),
            format!(
                "You will find below features on new run on {} {}.\n\n{}",
                kind.label(),
                run_id,
                description
            ),
        ),
    }
}

pub fn end_run(run_id: &RunId, kind: SequencerType, completed_at: Option<DateTime<Local>>, suppress: bool) -> Notification {
    let when = completed_at
        .map(|t| format!(" at {}", time_to_human_readable(t)))
        .unwrap_or_default();
    Notification::new(
        format!("End of run {}", run_id),
        format!("A new {} run ({}) has been completed{}.", kind.label(), run_id, when),
    )
    .suppressed(suppress)
}

pub struct DemuxSuccess<'a> {
    pub request: &'a PipelineRequest,
    pub elapsed: Duration,
    pub finished_at: DateTime<Local>,
    pub used_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub reports_url: Option<&'a str>,
}

pub fn demux_success(s: &DemuxSuccess<'_>) -> Notification {
    let run_id = &s.request.run_id;
    let mut body = format!(
        "End of demultiplexing for run {}.\nJob finished at {} with no error in {}.\n\n\
         FASTQ files for this run can be found in the following directory:\n  {}",
        run_id,
        time_to_human_readable(s.finished_at),
        duration_to_human_readable(s.elapsed),
        s.request.output_dir.display()
    );
    if let Some(url) = s.reports_url {
        body.push_str(&format!(
            "\n\nRun reports can be found at following location:\n  {}/{}",
            url.trim_end_matches('/'),
            run_id
        ));
    }
    if let (Some(used), Some(free)) = (s.used_bytes, s.free_bytes) {
        body.push_str(&format!(
            "\n\nFor this task {:.2} GB has been used and {:.2} GB still free.",
            used as f64 / GIB,
            free as f64 / GIB
        ));
    }
    Notification::new(format!("End of demultiplexing for run {}", run_id), body)
}

pub fn demux_failure(short: &str, detail: &str) -> Notification {
    Notification::new(format!("demultiplexer: {}", short), detail.to_string())
}

pub fn record_failure(stage: &str, run_id: &RunId, error: &str) -> Notification {
    Notification::new(
        format!("cannot record run {} in {}", run_id, stage),
        format!(
            "The {} notice for run {} was sent but the run could not be recorded:\n{}\n\nThe notice will be sent again by the next cycle until the state directory is fixed.",
            stage, run_id, error
        ),
    )
}

pub fn stale_lock(path: &std::path::Path, pid: u32) -> Notification {
    Notification::new(
        "A lock file exists",
        format!(
            "A lock file exists at {} (pid {}). Please investigate the last error and then remove the lock file.",
            path.display(),
            pid
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_info::ReadInfo;
    use chrono::TimeZone;

    fn info() -> RunInfo {
        RunInfo {
            lane_count: 8,
            phix_lanes: vec![1, 2],
            reads: vec![
                ReadInfo { number: 1, cycles: 101, indexed: false },
                ReadInfo { number: 2, cycles: 7, indexed: true },
                ReadInfo { number: 3, cycles: 101, indexed: false },
            ],
            ..RunInfo::default()
        }
    }

    #[test]
    fn test_durations() {
        assert_eq!(duration_to_human_readable(Duration::from_secs(42)), "42s");
        assert_eq!(duration_to_human_readable(Duration::from_secs(125)), "2min05s");
        assert_eq!(duration_to_human_readable(Duration::from_secs(3 * 3600 + 7)), "3h00min07s");
    }

    #[test]
    fn test_time_format() {
        let t = Local.with_ymd_and_hms(2015, 4, 8, 9, 5, 0).unwrap();
        assert_eq!(time_to_human_readable(t), "Wed Apr  8 09:05:00 2015");
    }

    #[test]
    fn test_run_description() {
        let text = run_description(&info());
        assert!(text.contains("8 lanes with 2 aligned to PhiX."));
        assert!(text.contains("2 read(s) and 1 index(es)."));
        assert!(text.contains("101 cycles per reads (209 total cycles)."));
        assert!(text.contains("estimated run type: PE-100 with 1 index(es)."));
    }

    #[test]
    fn test_new_run_subjects() {
        let run = RunId::from_stored("150408_SN501_0042_AC3LNMACXX");
        let hiseq = new_run(&run, SequencerType::HiSeq, &info(), Some(PathBuf::from("/x/First_Base_Report.htm")));
        assert!(hiseq.subject.starts_with("[seqwatch] First base report for HiSeq run PE-100"));
        assert!(hiseq.attachment.is_some());

        let nextseq = new_run(&run, SequencerType::NextSeq, &info(), None);
        assert!(nextseq.subject.contains("Detection new run on sequencer NextSeq"));
        assert!(nextseq.attachment.is_none());
    }

    #[test]
    fn test_inconsistent_cycles_reported_in_body() {
        let mut uneven = info();
        uneven.reads[2].cycles = 76;
        let run = RunId::from_stored("150408_SN501_0042_AC3LNMACXX");
        let body = new_run(&run, SequencerType::HiSeq, &uneven, None).body;
        assert!(body.contains("ERROR : cycles count per reads different"), "body was: {}", body);
        assert!(!run_description(&info()).contains("ERROR"));
    }

    #[test]
    fn test_record_failure_message() {
        let run = RunId::from_stored("150408_SN501_0042_AC3LNMACXX");
        let n = record_failure("new_run", &run, "IO error on /var/new_run.done: No such file or directory");
        assert_eq!(n.subject, "[seqwatch] cannot record run 150408_SN501_0042_AC3LNMACXX in new_run");
        assert!(n.body.contains("No such file or directory"));
    }

    #[test]
    fn test_end_run_suppression_flag() {
        let run = RunId::from_stored("150408_SN501_0042_AC3LNMACXX");
        assert!(end_run(&run, SequencerType::HiSeq, None, true).suppress);
        assert!(!end_run(&run, SequencerType::HiSeq, None, false).suppress);
    }
}
