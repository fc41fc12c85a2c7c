//! Read metadata from a run's `RunInfo.xml` and the run-type estimate
//! derived from it.

use crate::error::{Result, SeqwatchError};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;
use std::fs;
use std::path::Path;

pub const RUN_INFO_FILE: &str = "RunInfo.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadInfo {
    pub number: u32,
    pub cycles: u32,
    pub indexed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    pub run_id: Option<String>,
    pub flow_cell: Option<String>,
    pub instrument: Option<String>,
    pub reads: Vec<ReadInfo>,
    pub lane_count: u32,
    pub phix_lanes: Vec<u32>,
}

impl RunInfo {
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path).map_err(|e| SeqwatchError::io_at(path, e))?;
        Self::parse(&xml).map_err(|message| SeqwatchError::RunInfo {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(xml: &str) -> std::result::Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut info = RunInfo::default();
        let mut text_target: Option<&'static str> = None;
        let mut in_phix = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    match e.name().as_ref() {
                        b"Flowcell" => text_target = Some("flowcell"),
                        b"Instrument" => text_target = Some("instrument"),
                        b"Lane" if in_phix => text_target = Some("lane"),
                        b"AlignToPhiX" => in_phix = true,
                        _ => {}
                    }
                    apply_element(&mut info, &e)?;
                }
                Ok(Event::Empty(e)) => apply_element(&mut info, &e)?,
                Ok(Event::Text(t)) => {
                    if let Some(target) = text_target.take() {
                        let value = t.unescape().map_err(|e| e.to_string())?.trim().to_string();
                        match target {
                            "flowcell" => info.flow_cell = Some(value),
                            "instrument" => info.instrument = Some(value),
                            "lane" => info.phix_lanes.push(
                                value
                                    .parse()
                                    .map_err(|_| format!("invalid PhiX lane '{}'", value))?,
                            ),
                            _ => {}
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"AlignToPhiX" {
                        in_phix = false;
                    }
                    text_target = None;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(format!(
                        "XML error at position {}: {}",
                        reader.error_position(),
                        e
                    ))
                }
            }
        }

        if info.reads.is_empty() {
            return Err("no Read elements found".to_string());
        }
        info.reads.sort_by_key(|r| r.number);
        Ok(info)
    }

    pub fn summary(&self) -> RunTypeSummary {
        RunTypeSummary::from_reads(&self.reads)
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> std::result::Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value().map_err(|e| e.to_string())?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_u32(value: Option<String>, what: &str) -> std::result::Result<u32, String> {
    let value = value.ok_or_else(|| format!("missing {} attribute", what))?;
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid {} attribute '{}'", what, value))
}

fn apply_element(info: &mut RunInfo, e: &BytesStart<'_>) -> std::result::Result<(), String> {
    match e.name().as_ref() {
        b"Run" => info.run_id = attribute(e, b"Id")?,
        b"Read" => {
            let number = parse_u32(attribute(e, b"Number")?, "Number")?;
            let cycles = parse_u32(attribute(e, b"NumCycles")?, "NumCycles")?;
            let indexed = attribute(e, b"IsIndexedRead")?
                .map(|v| v.eq_ignore_ascii_case("Y"))
                .unwrap_or(false);
            info.reads.push(ReadInfo {
                number,
                cycles,
                indexed,
            });
        }
        b"FlowcellLayout" => info.lane_count = parse_u32(attribute(e, b"LaneCount")?, "LaneCount")?,
        _ => {}
    }
    Ok(())
}

/// Run type estimated from read metadata, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTypeSummary {
    pub read_count: usize,
    pub index_count: usize,
    pub cycles_per_read: u32,
    pub total_cycles: u32,
    /// Non-indexed reads disagree on cycle count, or there are none.
    pub inconsistent_cycles: bool,
    pub label: String,
}

impl RunTypeSummary {
    pub fn from_reads(reads: &[ReadInfo]) -> Self {
        let total_cycles = reads.iter().map(|r| r.cycles).sum();
        let index_count = reads.iter().filter(|r| r.indexed).count();
        let data_reads: Vec<&ReadInfo> = reads.iter().filter(|r| !r.indexed).collect();
        let cycles_per_read = data_reads.first().map(|r| r.cycles).unwrap_or(0);
        let inconsistent_cycles =
            cycles_per_read == 0 || data_reads.iter().any(|r| r.cycles != cycles_per_read);

        let label = match data_reads.len() {
            1 => format!("SR-{} with {} index(es)", cycles_per_read.saturating_sub(1), index_count),
            2 => format!("PE-{} with {} index(es)", cycles_per_read.saturating_sub(1), index_count),
            n => format!("Undetermined run type ({} reads with {} index(es))", n, index_count),
        };

        Self {
            read_count: data_reads.len(),
            index_count,
            cycles_per_read,
            total_cycles,
            inconsistent_cycles,
            label,
        }
    }

    /// Cycle line of the run description; carries the error flag when set.
    pub fn cycles_line(&self) -> String {
        if self.inconsistent_cycles {
            format!(
                "ERROR : cycles count per reads different between reads ({} total cycles).",
                self.total_cycles
            )
        } else {
            format!(
                "{} cycles per reads ({} total cycles).",
                self.cycles_per_read, self.total_cycles
            )
        }
    }
}
