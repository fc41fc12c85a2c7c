use clap::{Parser, Subcommand};
use seqwatch::cycle::{Cycle, DENY_FILE};
use seqwatch::discovery::RunDiscoveryScanner;
use seqwatch::disk::{self, SystemDiskProbe};
use seqwatch::notify::{CommandNotifier, LogNotifier, Notifier};
use seqwatch::pipeline::PipelineRequest;
use seqwatch::preflight;
use seqwatch::run_info::RunInfo;
use seqwatch::sample_sheet::{CsvDesignConverter, IndexShortcuts};
use seqwatch::settings::{self, Settings};
use seqwatch::steps::ProcessExecutor;
use seqwatch::{FileProcessedSet, ProcessedSetStore, RunId, SeqwatchError, Stage};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "seqwatch")]
#[command(about = "Watch sequencer output and demultiplex completed runs", long_about = None)]
struct Cli {
    /// Configuration file (key=value)
    #[arg(long, env = "SEQWATCH_CONF")]
    conf: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan cycle: new runs, completed runs, demultiplexing
    Cycle,
    /// Print the processed sets and lock state as JSON
    Status,
    /// Print the run type estimated from a RunInfo.xml file
    Classify { run_info: PathBuf },
    /// Check whether a run could be demultiplexed now, without running anything
    Preflight { run_id: String },
}

fn load_settings(conf: Option<&Path>) -> Result<Settings, SeqwatchError> {
    match conf {
        Some(path) => Settings::load(path),
        None => Ok(Settings::with_defaults()),
    }
}

fn build_notifier(settings: &Settings) -> Result<Box<dyn Notifier>, SeqwatchError> {
    match settings.get(settings::NOTIFY_COMMAND_KEY) {
        Some(command) => Ok(Box::new(CommandNotifier::from_command_line(
            command,
            settings.get(settings::NOTIFY_TO_KEY),
        )?)),
        None => Ok(Box::new(LogNotifier)),
    }
}

fn cycle(settings: &Settings) -> Result<(), SeqwatchError> {
    let timeout = settings.u64(settings::STEP_TIMEOUT_KEY)?.map(Duration::from_secs);
    let index_path = settings.get(settings::INDEX_SEQUENCES_KEY).map(PathBuf::from);
    let shortcuts = IndexShortcuts::load(index_path.as_deref()).map_err(|e| SeqwatchError::Config(e.to_string()))?;

    let mut executor = ProcessExecutor::with_timeout(timeout);
    let converter = CsvDesignConverter::new(shortcuts);
    let mut notifier = build_notifier(settings)?;
    let probe = SystemDiskProbe;

    let mut cycle = Cycle {
        settings,
        scanner: RunDiscoveryScanner::from_settings(settings),
        executor: &mut executor,
        converter: &converter,
        notifier: &mut notifier,
        probe: &probe,
        threads: disk::processor_count(),
    };

    match cycle.run() {
        Ok(summary) => {
            if !summary.is_empty() {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Ok(())
        }
        Err(SeqwatchError::LockHeld { path, pid }) => {
            info!(path = %path.display(), pid = ?pid, "another cycle is running");
            println!("A lock file exists.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn status(settings: &Settings) -> Result<(), SeqwatchError> {
    let var_path = settings.var_path();
    let mut stages = serde_json::Map::new();
    for stage in Stage::ALL {
        let mut store = FileProcessedSet::for_stage(&var_path, stage)?;
        stages.insert(stage.name().to_string(), json!(store.load_all()?));
    }
    let mut deny = FileProcessedSet::open(var_path.join(DENY_FILE))?;
    let lock_file = settings.lock_file();
    let out = json!({
        "var_path": var_path,
        "stages": stages,
        "deny": deny.load_all()?,
        "lock_file": lock_file,
        "locked": lock_file.exists(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn classify(path: &Path) -> Result<(), SeqwatchError> {
    let info = RunInfo::from_file(path)?;
    let summary = info.summary();
    println!("{}", summary.label);
    println!("{}", summary.cycles_line());
    Ok(())
}

fn preflight_run(settings: &Settings, run_id: &str) -> Result<(), SeqwatchError> {
    let run_id = RunId::parse(run_id)?;
    let request = PipelineRequest::resolve(settings, &run_id, disk::processor_count())?;
    match preflight::check(&request, &SystemDiskProbe, settings.space_factor()?) {
        Ok(()) => {
            println!("{}: ready to demultiplex into {}", run_id, request.output_dir.display());
            for step in request.steps() {
                println!("  {}", step);
            }
        }
        Err(failure) => println!("{}: {}", run_id, failure),
    }
    Ok(())
}

fn main() -> Result<(), SeqwatchError> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let settings = load_settings(cli.conf.as_deref())?;
    let log_file = settings.get(settings::LOG_FILE_KEY).map(PathBuf::from);
    seqwatch::init_tracing("seqwatch", log_file.as_deref())?;

    match cli.command {
        Commands::Cycle => cycle(&settings),
        Commands::Status => status(&settings),
        Commands::Classify { run_info } => classify(&run_info),
        Commands::Preflight { run_id } => preflight_run(&settings, &run_id),
    }
}
