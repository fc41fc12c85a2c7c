use crate::error::{Result, SeqwatchError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const VAR_PATH_KEY: &str = "var.path";
pub const LOCK_FILE_KEY: &str = "lock.file";
pub const LOG_FILE_KEY: &str = "log.file";
pub const SEQUENCER_DATA_PATHS_KEY: &str = "sequencer.data.paths";
pub const SEQUENCER_SERIALS_KEY: &str = "sequencer.serials";
pub const SEQUENCER_TYPES_KEY: &str = "sequencer.types";
pub const BCL_DATA_PATH_KEY: &str = "bcl.data.path";
pub const DESIGN_PATH_KEY: &str = "design.path";
pub const TMP_PATH_KEY: &str = "tmp.path";
pub const FASTQ_DATA_PATH_KEY: &str = "fastq.data.path";
pub const REPORTS_DATA_PATH_KEY: &str = "reports.data.path";
pub const REPORTS_URL_KEY: &str = "reports.url";
pub const DEMUX_TOOL_PATH_KEY: &str = "demux.tool.path";
pub const DEMUX_CLUSTER_COUNT_KEY: &str = "demux.fastq.cluster.count";
pub const DEMUX_COMPRESSION_KEY: &str = "demux.compression";
pub const DEMUX_COMPRESSION_LEVEL_KEY: &str = "demux.compression.level";
pub const DEMUX_MISMATCHES_KEY: &str = "demux.mismatches";
pub const DEMUX_THREADS_KEY: &str = "demux.threads";
pub const SPACE_FACTOR_KEY: &str = "space.factor";
pub const INDEX_SEQUENCES_KEY: &str = "index.sequences";
pub const NEW_RUN_STEP_KEY: &str = "new.run.step";
pub const END_RUN_STEP_KEY: &str = "end.run.step";
pub const DEMUX_STEP_KEY: &str = "demux.step";
pub const END_RUN_MAX_AGE_KEY: &str = "end.run.notify.max.age.hours";
pub const NOTIFY_COMMAND_KEY: &str = "notify.command";
pub const NOTIFY_TO_KEY: &str = "notify.to";
pub const STEP_TIMEOUT_KEY: &str = "step.timeout.secs";

const DEFAULTS: &[(&str, &str)] = &[
    (VAR_PATH_KEY, "./seqwatch_state"),
    (DEMUX_CLUSTER_COUNT_KEY, "0"),
    (DEMUX_COMPRESSION_KEY, "gzip"),
    (DEMUX_COMPRESSION_LEVEL_KEY, "9"),
    (DEMUX_MISMATCHES_KEY, "0"),
    (SPACE_FACTOR_KEY, "3.0"),
    (NEW_RUN_STEP_KEY, "true"),
    (END_RUN_STEP_KEY, "true"),
    (DEMUX_STEP_KEY, "true"),
    (END_RUN_MAX_AGE_KEY, "12"),
];

/// Flat option map read from a `key=value` configuration file.
///
/// Values are kept as strings; typed getters parse on access so a bad value
/// only matters to the stage that reads it.
#[derive(Debug, Clone)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Settings holding only the built-in defaults.
    pub fn with_defaults() -> Self {
        let values = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| SeqwatchError::io_at(path, e))?;
        let mut settings = Self::with_defaults();
        settings.merge_text(&text)?;
        Ok(settings)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut settings = Self::with_defaults();
        settings.merge_text(text)?;
        Ok(settings)
    }

    fn merge_text(&mut self, text: &str) -> Result<()> {
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                SeqwatchError::Config(format!("line {}: expected key=value, got '{}'", line_no + 1, line))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(SeqwatchError::Config(format!("line {}: empty key", line_no + 1)));
            }
            self.values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Raw value; empty strings count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| SeqwatchError::Config(format!("missing required key '{}'", key)))
    }

    pub fn path(&self, key: &str) -> Result<PathBuf> {
        self.require(key).map(PathBuf::from)
    }

    pub fn bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    SeqwatchError::Config(format!("'{}' must be a non-negative integer, got '{}'", key, v))
                })
            })
            .transpose()
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>> {
        self.get(key)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| SeqwatchError::Config(format!("'{}' must be a number, got '{}'", key, v)))
            })
            .transpose()
    }

    /// `:`-separated list, empty entries dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(':')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn var_path(&self) -> PathBuf {
        PathBuf::from(self.get(VAR_PATH_KEY).unwrap_or("./seqwatch_state"))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.get(LOCK_FILE_KEY)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.var_path().join("seqwatch.lock"))
    }

    pub fn sequencer_data_paths(&self) -> Vec<PathBuf> {
        self.list(SEQUENCER_DATA_PATHS_KEY)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    /// Multiplier applied to the input usage when checking output free space.
    pub fn space_factor(&self) -> Result<f64> {
        let factor = self.f64(SPACE_FACTOR_KEY)?.unwrap_or(3.0);
        if factor <= 0.0 {
            return Err(SeqwatchError::Config(format!(
                "'{}' must be positive, got {}",
                SPACE_FACTOR_KEY, factor
            )));
        }
        Ok(factor)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_present() {
        let settings = Settings::with_defaults();
        assert_eq!(settings.get(DEMUX_COMPRESSION_KEY), Some("gzip"));
        assert!(settings.bool(DEMUX_STEP_KEY));
        assert_eq!(settings.space_factor().unwrap(), 3.0);
    }

    #[test]
    fn test_parse_overrides_and_comments() {
        let text = "# comment\n\nvar.path = /data/var\nspace.factor=1.5\nreports.url=\ndemux.step = FALSE\n";
        let settings = Settings::from_text(text).unwrap();
        assert_eq!(settings.var_path(), PathBuf::from("/data/var"));
        assert_eq!(settings.space_factor().unwrap(), 1.5);
        assert_eq!(settings.get(REPORTS_URL_KEY), None);
        assert!(!settings.bool(DEMUX_STEP_KEY));
        assert_eq!(settings.lock_file(), PathBuf::from("/data/var/seqwatch.lock"));
    }

    #[test]
    fn test_missing_separator_is_error() {
        let err = Settings::from_text("var.path /tmp").unwrap_err();
        assert!(matches!(err, SeqwatchError::Config(_)));
    }

    #[test]
    fn test_list_and_numbers() {
        let text = "sequencer.data.paths=/a: /b ::/c\nstep.timeout.secs=abc\n";
        let settings = Settings::from_text(text).unwrap();
        assert_eq!(
            settings.sequencer_data_paths(),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
        assert!(settings.u64(STEP_TIMEOUT_KEY).is_err());
        assert_eq!(settings.u64(DEMUX_THREADS_KEY).unwrap(), None);
    }

    #[test]
    fn test_non_positive_space_factor_rejected() {
        let settings = Settings::from_text("space.factor=0").unwrap();
        assert!(settings.space_factor().is_err());
    }
}
