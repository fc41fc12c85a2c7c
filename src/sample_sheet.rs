//! Sample design handling: read a per-run design, resolve index shortcuts,
//! validate it against the run and write the CSV the demultiplexer reads.

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const MAX_LANE: u32 = 8;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed design {}: {message}", .path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("invalid design:\n{}", .problems.join("\n"))]
    Invalid { problems: Vec<String> },
}

/// One line of a sample design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignEntry {
    #[serde(rename = "FCID")]
    pub flow_cell: String,
    #[serde(rename = "Lane")]
    pub lane: u32,
    #[serde(rename = "SampleID")]
    pub sample_id: String,
    #[serde(rename = "SampleRef", default)]
    pub sample_ref: String,
    #[serde(rename = "Index", default)]
    pub index: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "Control", default)]
    pub control: String,
    #[serde(rename = "Recipe", default)]
    pub recipe: String,
    #[serde(rename = "Operator", default)]
    pub operator: String,
    #[serde(rename = "SampleProject", default)]
    pub sample_project: String,
}

/// Named index sequences, e.g. `b1=CGATGT`.
///
/// Keys are matched case-insensitively; sequences are stored upper-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexShortcuts {
    sequences: BTreeMap<String, String>,
}

impl IndexShortcuts {
    /// Missing or unset file means no shortcuts.
    pub fn load(path: Option<&Path>) -> Result<Self, ConversionError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConversionError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(text: &str) -> Self {
        let sequences = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_uppercase()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();
        Self { sequences }
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Replace every shortcut part of a (possibly dual, `-`-joined) index.
    pub fn resolve(&self, index: &str) -> Result<String, String> {
        let index = index.trim();
        if index.is_empty() || is_sequence(index) {
            return Ok(index.to_uppercase());
        }
        index
            .split('-')
            .map(|part| {
                if is_sequence(part) {
                    Ok(part.to_uppercase())
                } else {
                    self.sequences
                        .get(&part.trim().to_lowercase())
                        .cloned()
                        .ok_or_else(|| format!("unknown index sequence shortcut '{}'", part))
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| parts.join("-"))
    }
}

fn is_sequence(index: &str) -> bool {
    !index.is_empty()
        && index
            .chars()
            .all(|c| matches!(c.to_ascii_uppercase(), 'A' | 'C' | 'G' | 'T' | 'N' | '-'))
}

fn is_valid_sample_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Turns a run's sample design into the demultiplexer's input.
pub trait DesignConverter {
    /// Returns the number of samples written to `dest`.
    fn convert(&self, source: &Path, flow_cell: &str, dest: &Path) -> Result<usize, ConversionError>;
}

/// Reads a CSV design, applies shortcuts and validation, writes CSV.
#[derive(Debug, Clone, Default)]
pub struct CsvDesignConverter {
    shortcuts: IndexShortcuts,
}

impl CsvDesignConverter {
    pub fn new(shortcuts: IndexShortcuts) -> Self {
        Self { shortcuts }
    }

    pub fn read(&self, source: &Path) -> Result<Vec<DesignEntry>, ConversionError> {
        let text = fs::read_to_string(source).map_err(|source_err| ConversionError::Io {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        rdr.deserialize()
            .collect::<Result<Vec<DesignEntry>, _>>()
            .map_err(|e| ConversionError::Malformed {
                path: source.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Resolve shortcuts in place and report every problem found.
    pub fn prepare(&self, entries: &mut [DesignEntry], flow_cell: &str) -> Result<(), ConversionError> {
        let mut problems = Vec::new();
        if entries.is_empty() {
            problems.push("design contains no samples".to_string());
        }

        let mut seen = HashSet::new();
        for entry in entries.iter_mut() {
            match self.shortcuts.resolve(&entry.index) {
                Ok(resolved) => entry.index = resolved,
                Err(message) => problems.push(format!("sample {}: {}", entry.sample_id, message)),
            }

            if !entry.flow_cell.eq_ignore_ascii_case(flow_cell) {
                problems.push(format!(
                    "sample {}: flow cell {} does not match run flow cell {}",
                    entry.sample_id, entry.flow_cell, flow_cell
                ));
            }
            if entry.lane == 0 || entry.lane > MAX_LANE {
                problems.push(format!("sample {}: invalid lane {}", entry.sample_id, entry.lane));
            }
            if !is_valid_sample_id(&entry.sample_id) {
                problems.push(format!("invalid sample id '{}'", entry.sample_id));
            }
            if entry.sample_project.is_empty() {
                problems.push(format!("sample {}: no sample project", entry.sample_id));
            }
            if !entry.index.is_empty() && !is_sequence(&entry.index) {
                problems.push(format!("sample {}: invalid index '{}'", entry.sample_id, entry.index));
            }
            if !seen.insert((entry.lane, entry.index.clone())) {
                problems.push(format!(
                    "lane {}: index '{}' used by more than one sample",
                    entry.lane, entry.index
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConversionError::Invalid { problems })
        }
    }

    pub fn write(&self, entries: &[DesignEntry], dest: &Path) -> Result<(), ConversionError> {
        let io_err = |source: std::io::Error| ConversionError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut wtr = WriterBuilder::new()
            .has_headers(true)
            .from_path(dest)
            .map_err(|e| ConversionError::Malformed {
                path: dest.to_path_buf(),
                message: e.to_string(),
            })?;
        for entry in entries {
            wtr.serialize(entry).map_err(|e| ConversionError::Malformed {
                path: dest.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        wtr.flush().map_err(io_err)
    }
}

impl DesignConverter for CsvDesignConverter {
    fn convert(&self, source: &Path, flow_cell: &str, dest: &Path) -> Result<usize, ConversionError> {
        let mut entries = self.read(source)?;
        self.prepare(&mut entries, flow_cell)?;
        self.write(&entries, dest)?;
        debug!(source = %source.display(), dest = %dest.display(), samples = entries.len(), "converted design");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "FCID,Lane,SampleID,SampleRef,Index,Description,Control,Recipe,Operator,SampleProject\n";

    fn converter() -> CsvDesignConverter {
        CsvDesignConverter::new(IndexShortcuts::parse("B1 = cgatgt\nb2=TGACCA\nnot a shortcut\n"))
    }

    #[test]
    fn test_shortcuts_case_insensitive() {
        let shortcuts = IndexShortcuts::parse("B1 = cgatgt\n");
        assert_eq!(shortcuts.resolve("b1").unwrap(), "CGATGT");
        assert_eq!(shortcuts.resolve("acgt").unwrap(), "ACGT");
        assert!(shortcuts.resolve("b9").is_err());
    }

    #[test]
    fn test_dual_index_shortcuts() {
        let shortcuts = IndexShortcuts::parse("b1=CGATGT\nb2=TGACCA\n");
        assert_eq!(shortcuts.resolve("b1-b2").unwrap(), "CGATGT-TGACCA");
    }

    #[test]
    fn test_missing_shortcut_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let shortcuts = IndexShortcuts::load(Some(&temp_dir.path().join("index.txt"))).unwrap();
        assert!(shortcuts.is_empty());
    }

    #[test]
    fn test_convert_resolves_and_writes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("design-0042.csv");
        let dest = temp_dir.path().join("out.csv");
        fs::write(
            &source,
            format!(
                "{}C3LNMACXX,1,s1,mm10,b1,desc,N,R1,jo,proj_a\nC3LNMACXX,1,s2,mm10,b2,desc,N,R1,jo,proj_a\n",
                HEADER
            ),
        )
        .unwrap();

        let count = converter().convert(&source, "C3LNMACXX", &dest).unwrap();
        assert_eq!(count, 2);
        let written = fs::read_to_string(&dest).unwrap();
        assert!(written.starts_with("FCID,Lane,SampleID"));
        assert!(written.contains("s1,mm10,CGATGT"));
        assert!(written.contains("s2,mm10,TGACCA"));
    }

    #[test]
    fn test_validation_collects_problems() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("design-0042.csv");
        fs::write(
            &source,
            format!(
                "{}OTHERFC,9,bad id,mm10,ACGT,,N,R1,jo,\nC3LNMACXX,1,s2,mm10,ACGT,,N,R1,jo,p\nC3LNMACXX,1,s3,mm10,acgt,,N,R1,jo,p\n",
                HEADER
            ),
        )
        .unwrap();

        match converter().convert(&source, "C3LNMACXX", &temp_dir.path().join("out.csv")) {
            Err(ConversionError::Invalid { problems }) => {
                assert!(problems.iter().any(|p| p.contains("does not match run flow cell")));
                assert!(problems.iter().any(|p| p.contains("invalid lane 9")));
                assert!(problems.iter().any(|p| p.contains("invalid sample id 'bad id'")));
                assert!(problems.iter().any(|p| p.contains("no sample project")));
                assert!(problems.iter().any(|p| p.contains("used by more than one sample")));
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
        assert!(!temp_dir.path().join("out.csv").exists());
    }

    #[test]
    fn test_malformed_lane_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("design-0001.csv");
        fs::write(&source, format!("{}FC,one,s1,r,A,,N,R,o,p\n", HEADER)).unwrap();
        assert!(matches!(
            converter().read(&source),
            Err(ConversionError::Malformed { .. })
        ));
    }
}
