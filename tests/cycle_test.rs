mod common;

use common::{FakeExecutor, HISEQ_FLOW_CELL, HISEQ_RUN, NEXTSEQ_FLOW_CELL, NEXTSEQ_RUN, Site, subjects};
use seqwatch::cycle::{CYCLE_LAST_ERROR_FILE, Cycle, CycleSummary, DENY_FILE};
use seqwatch::discovery::RunDiscoveryScanner;
use seqwatch::disk::StaticDiskProbe;
use seqwatch::error::SeqwatchError;
use seqwatch::instance_lock::InstanceLock;
use seqwatch::notify::MemoryNotifier;
use seqwatch::sample_sheet::CsvDesignConverter;
use seqwatch::{FileProcessedSet, ProcessedSetStore, RunId, Stage};
use std::fs;
use std::time::{Duration, SystemTime};

fn run_cycle(site: &Site, executor: &mut FakeExecutor, notifier: &mut MemoryNotifier) -> seqwatch::Result<CycleSummary> {
    let converter = CsvDesignConverter::default();
    let probe = StaticDiskProbe {
        usage: vec![],
        available: u64::MAX,
    };
    Cycle {
        settings: &site.settings,
        scanner: RunDiscoveryScanner::from_settings(&site.settings),
        executor,
        converter: &converter,
        notifier,
        probe: &probe,
        threads: 2,
    }
    .run()
}

fn stored(site: &Site, stage: Stage) -> Vec<String> {
    let mut store = FileProcessedSet::for_stage(&site.var(), stage).unwrap();
    store.load_all().unwrap().into_iter().map(|r| r.to_string()).collect()
}

/// A run is announced while sequencing, announced again when complete,
/// then demultiplexed; a later cycle finds nothing left to do.
#[test]
fn test_run_through_all_stages() {
    let site = Site::new();
    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();

    println!("[test] Cycle 1: run is sequencing");
    site.add_run(NEXTSEQ_RUN);
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();
    assert_eq!(summary.new_runs, vec![RunId::from_stored(NEXTSEQ_RUN)]);
    assert!(summary.end_runs.is_empty());
    assert!(executor.executed.is_empty());
    assert!(subjects(&notifier)[0].contains("Detection new run on sequencer NextSeq PE-75 with 1 index(es)"));

    println!("[test] Cycle 2: run completed, design provided");
    site.complete_run(NEXTSEQ_RUN, "CopyComplete.txt");
    site.add_design(2, NEXTSEQ_FLOW_CELL);
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();
    assert!(summary.new_runs.is_empty(), "already announced");
    assert_eq!(summary.end_runs, vec![RunId::from_stored(NEXTSEQ_RUN)]);
    assert_eq!(summary.demultiplexed, vec![RunId::from_stored(NEXTSEQ_RUN)]);
    assert_eq!(executor.executed.len(), 10);

    assert_eq!(stored(&site, Stage::NewRun), vec![NEXTSEQ_RUN]);
    assert_eq!(stored(&site, Stage::EndRun), vec![NEXTSEQ_RUN]);
    assert_eq!(stored(&site, Stage::Demux), vec![NEXTSEQ_RUN]);

    println!("[test] Cycle 3: nothing to do");
    let before = notifier.sent.len();
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();
    assert!(summary.is_empty());
    assert_eq!(executor.executed.len(), 10);
    assert_eq!(notifier.sent.len(), before);
    assert!(!site.settings.lock_file().exists(), "lock released after the cycle");
}

/// One run failing does not stop the next one.
#[test]
fn test_failure_isolated_per_run() {
    let site = Site::new();
    site.complete_run(NEXTSEQ_RUN, "CopyComplete.txt");
    site.complete_run(HISEQ_RUN, "RTAComplete.txt");
    // only the HiSeq run has a design
    site.add_design(42, HISEQ_FLOW_CELL);

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();

    assert_eq!(summary.demux_failed, vec![RunId::from_stored(NEXTSEQ_RUN)]);
    assert_eq!(summary.demultiplexed, vec![RunId::from_stored(HISEQ_RUN)]);
    assert_eq!(stored(&site, Stage::Demux), vec![HISEQ_RUN]);
    assert!(subjects(&notifier).iter().any(|s| s.contains("no sample design found")));
}

#[test]
fn test_denied_run_never_demultiplexed() {
    let site = Site::new();
    site.complete_run(NEXTSEQ_RUN, "CopyComplete.txt");
    site.add_design(2, NEXTSEQ_FLOW_CELL);
    fs::write(site.var().join(DENY_FILE), format!("{}\n", NEXTSEQ_RUN)).unwrap();

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();

    assert_eq!(summary.end_runs.len(), 1);
    assert!(summary.demultiplexed.is_empty());
    assert!(executor.executed.is_empty());
}

/// End-of-run notices for runs finished long ago are recorded but not sent.
#[test]
fn test_old_run_end_notice_suppressed() {
    let site = Site::new();
    let marker = site.complete_run(HISEQ_RUN, "RTAComplete.txt");
    let two_days_ago = SystemTime::now() - Duration::from_secs(48 * 3600);
    filetime::set_file_mtime(&marker, filetime::FileTime::from_system_time(two_days_ago)).unwrap();
    site.add_design(42, HISEQ_FLOW_CELL);

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();

    assert_eq!(summary.end_runs_suppressed, vec![RunId::from_stored(HISEQ_RUN)]);
    let end_notice = notifier
        .sent
        .iter()
        .find(|n| n.subject.contains("End of run"))
        .unwrap();
    assert!(end_notice.suppress);
    assert_eq!(stored(&site, Stage::EndRun), vec![HISEQ_RUN]);
}

#[test]
fn test_hiseq_new_run_attaches_first_base_report() {
    let site = Site::new();
    let dir = site.add_run(HISEQ_RUN);
    fs::write(dir.join("First_Base_Report.htm"), "<html></html>").unwrap();

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    run_cycle(&site, &mut executor, &mut notifier).unwrap();

    let report = &notifier.sent[0];
    assert!(report.subject.contains("First base report for HiSeq run"));
    assert_eq!(report.attachment.as_deref(), Some(dir.join("First_Base_Report.htm").as_path()));
}

#[test]
fn test_disabled_stage_is_skipped() {
    let mut site = Site::new();
    site.settings.set("demux.step", "false");
    site.complete_run(NEXTSEQ_RUN, "CopyComplete.txt");
    site.add_design(2, NEXTSEQ_FLOW_CELL);

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();
    assert_eq!(summary.end_runs.len(), 1);
    assert!(executor.executed.is_empty());
    assert!(stored(&site, Stage::Demux).is_empty());
}

#[test]
fn test_live_lock_holder_blocks_cycle() {
    let site = Site::new();
    site.complete_run(NEXTSEQ_RUN, "CopyComplete.txt");
    let _held = InstanceLock::acquire(&site.settings.lock_file()).unwrap();

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    let err = run_cycle(&site, &mut executor, &mut notifier).unwrap_err();
    assert!(matches!(err, SeqwatchError::LockHeld { .. }));
    assert!(notifier.sent.is_empty());
    assert!(stored(&site, Stage::EndRun).is_empty());
}

/// A lock left by a dead process is reported and kept for the operator.
#[test]
fn test_stale_lock_reported() {
    let site = Site::new();
    let lock_file = site.settings.lock_file();
    fs::write(&lock_file, "0").unwrap();

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    let err = run_cycle(&site, &mut executor, &mut notifier).unwrap_err();
    assert!(matches!(err, SeqwatchError::StaleLock { .. }));
    assert!(lock_file.exists());
    assert_eq!(subjects(&notifier), vec!["[seqwatch] A lock file exists"]);
    assert!(site.var().join(CYCLE_LAST_ERROR_FILE).exists());
}

#[test]
fn test_unreadable_metadata_retried_later() {
    let site = Site::new();
    let dir = site.add_run(NEXTSEQ_RUN);
    fs::write(dir.join("RunInfo.xml"), "<RunInfo>").unwrap();

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();
    assert!(summary.new_runs.is_empty());
    assert!(stored(&site, Stage::NewRun).is_empty());
}

/// A stage file that cannot be written is reported, and the run is neither
/// counted as announced nor recorded.
#[cfg(unix)]
#[test]
fn test_unwritable_stage_file_reported() {
    let mut site = Site::new();
    site.settings.set("end.run.step", "false");
    site.settings.set("demux.step", "false");
    site.add_run(NEXTSEQ_RUN);
    std::os::unix::fs::symlink(site.var().join("gone").join("new_run.done"), site.var().join("new_run.done")).unwrap();

    let mut executor = FakeExecutor::default();
    let mut notifier = MemoryNotifier::default();
    for cycle in 1..=2 {
        println!("[test] Cycle {}", cycle);
        let summary = run_cycle(&site, &mut executor, &mut notifier).unwrap();
        assert!(summary.new_runs.is_empty(), "nothing was recorded");
    }

    let sent = subjects(&notifier);
    assert_eq!(sent.len(), 4, "notice and error report in each cycle: {:?}", sent);
    assert!(sent[1].contains(&format!("cannot record run {} in new_run", NEXTSEQ_RUN)));
    let lasterr = fs::read_to_string(site.var().join(CYCLE_LAST_ERROR_FILE)).unwrap();
    assert!(lasterr.contains("cannot record run"));
}
