use crate::error::{Result, SeqwatchError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

static RUN_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{6})_([A-Za-z0-9-]+)_(\d{1,6})_([A-Za-z0-9-]+)$").expect("run id pattern compiles")
});

/// Identifier assigned by the sequencer to one run directory,
/// e.g. `150408_NB500892_0002_AH3LNMBGXX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Parse a directory name, rejecting anything outside the naming convention.
    pub fn parse(name: &str) -> Result<Self> {
        if RUN_ID_PATTERN.is_match(name) {
            Ok(RunId(name.to_string()))
        } else {
            Err(SeqwatchError::RunId(name.to_string()))
        }
    }

    /// Wrap a token read back from a state file without re-validating it.
    pub fn from_stored(token: &str) -> Self {
        RunId(token.to_string())
    }

    pub fn is_valid(name: &str) -> bool {
        RUN_ID_PATTERN.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn field(&self, index: usize) -> Option<&str> {
        self.0.split('_').nth(index)
    }

    /// `YYMMDD` date prefix.
    pub fn date(&self) -> Option<&str> {
        self.field(0)
    }

    pub fn instrument(&self) -> Option<&str> {
        self.field(1)
    }

    pub fn run_number(&self) -> Option<u32> {
        self.field(2).and_then(|n| n.parse().ok())
    }

    /// Flow cell id with the A/B side letter removed.
    pub fn flow_cell(&self) -> Option<&str> {
        let field = self.field(3)?;
        if field.len() > 9 && (field.starts_with('A') || field.starts_with('B')) {
            Some(&field[1..])
        } else {
            Some(field)
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequencerType {
    HiSeq,
    NextSeq,
    MiSeq,
    Unknown,
}

impl SequencerType {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "hiseq" => SequencerType::HiSeq,
            "nextseq" => SequencerType::NextSeq,
            "miseq" => SequencerType::MiSeq,
            _ => SequencerType::Unknown,
        }
    }

    /// File the sequencer writes once the run data is complete on disk.
    pub fn completion_marker(&self) -> &'static str {
        match self {
            SequencerType::HiSeq | SequencerType::MiSeq => "RTAComplete.txt",
            SequencerType::NextSeq | SequencerType::Unknown => "CopyComplete.txt",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SequencerType::HiSeq => "HiSeq",
            SequencerType::NextSeq => "NextSeq",
            SequencerType::MiSeq => "MiSeq",
            SequencerType::Unknown => "unknown sequencer",
        }
    }
}

/// Maps instrument serials to sequencer types.
///
/// Configured entries (`SERIAL:type` pairs separated by commas) take
/// precedence over serial prefix heuristics.
#[derive(Debug, Clone, Default)]
pub struct SequencerCatalog {
    configured: HashMap<String, SequencerType>,
}

impl SequencerCatalog {
    pub fn from_config(value: Option<&str>) -> Self {
        let configured = value
            .unwrap_or("")
            .split(',')
            .filter_map(|pair| pair.split_once(':'))
            .map(|(serial, kind)| (serial.trim().to_string(), SequencerType::parse(kind)))
            .filter(|(serial, _)| !serial.is_empty())
            .collect();
        Self { configured }
    }

    pub fn sequencer_type(&self, run_id: &RunId) -> SequencerType {
        let Some(serial) = run_id.instrument() else {
            return SequencerType::Unknown;
        };
        if let Some(kind) = self.configured.get(serial) {
            return *kind;
        }
        if serial.starts_with("NB") || serial.starts_with("NS") {
            SequencerType::NextSeq
        } else if serial.starts_with('M') {
            SequencerType::MiSeq
        } else if ["SN", "D", "J", "K", "E"].iter().any(|p| serial.starts_with(p)) {
            SequencerType::HiSeq
        } else {
            SequencerType::Unknown
        }
    }
}
