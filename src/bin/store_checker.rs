use clap::{Parser, Subcommand};
use itertools::Itertools;
use seqwatch::cycle::DENY_FILE;
use seqwatch::{FileProcessedSet, ProcessedSetStore, RunId, SeqwatchError, Settings, Stage};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "seqwatch-store")]
#[command(about = "Inspect and edit seqwatch processed run sets", long_about = None)]
struct Cli {
    /// Configuration file (key=value)
    #[arg(long, env = "SEQWATCH_CONF")]
    conf: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List run ids of a set (new_run, end_run, demux or deny)
    List { set: String },
    /// Exit with status 1 unless the run id is in the set
    Contains { set: String, run_id: String },
    /// Add a run id to a set, e.g. to skip or deny a run
    Mark { set: String, run_id: String },
}

fn open_set(settings: &Settings, name: &str) -> Result<FileProcessedSet, SeqwatchError> {
    let var_path = settings.var_path();
    if name == "deny" {
        return FileProcessedSet::open(var_path.join(DENY_FILE));
    }
    let stage = Stage::parse(name).ok_or_else(|| {
        SeqwatchError::Config(format!(
            "unknown set '{}', expected one of: {}, deny",
            name,
            Stage::ALL.iter().map(|s| s.name()).join(", ")
        ))
    })?;
    FileProcessedSet::for_stage(&var_path, stage)
}

fn main() -> Result<(), SeqwatchError> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let settings = match &cli.conf {
        Some(path) => Settings::load(path)?,
        None => Settings::with_defaults(),
    };

    match cli.command {
        Commands::List { set } => {
            let mut store = open_set(&settings, &set)?;
            for run_id in store.load_all()? {
                println!("{}", run_id);
            }
            println!("{} run(s) in {}", store.len(), store.path().display());
        }
        Commands::Contains { set, run_id } => {
            let store = open_set(&settings, &set)?;
            if store.contains(&RunId::from_stored(run_id.trim())) {
                println!("{} is in {}", run_id, set);
            } else {
                println!("{} is not in {}", run_id, set);
                std::process::exit(1);
            }
        }
        Commands::Mark { set, run_id } => {
            let run_id = RunId::parse(run_id.trim())?;
            let var_path = settings.var_path();
            std::fs::create_dir_all(&var_path).map_err(|e| SeqwatchError::io_at(&var_path, e))?;
            let mut store = open_set(&settings, &set)?;
            store.add(&run_id)?;
            println!("marked {} in {}", run_id, store.path().display());
        }
    }
    Ok(())
}
