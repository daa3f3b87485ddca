//! What gets logged, where, and in which format

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Logging configuration
///
/// `level` and `targets` become `EnvFilter` directives unless `RUST_LOG`
/// is set, in which case the environment wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for every target without an override
    pub level: String,
    pub console: ConsoleOutput,
    /// JSONL file output, off when `None`
    pub file: Option<FileConfig>,
    /// Shape of JSON records, on the console and in files
    pub json: JsonFormat,
    /// Per-target level overrides, e.g. `spy_routing::shortcut = "trace"`
    pub targets: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleOutput::Json,
            file: None,
            json: JsonFormat::default(),
            targets: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Coloured human-readable console at debug
    pub fn development() -> Self {
        Self::default()
            .with_level("debug")
            .with_console(ConsoleOutput::Pretty { ansi: true })
    }

    /// A long-running node: daily JSONL files, quiet console
    pub fn node(log_dir: impl Into<PathBuf>) -> Self {
        Self::default()
            .with_console(ConsoleOutput::Off)
            .with_file(FileConfig::new(log_dir, "spy"))
    }

    /// A simulation run: progress on the console, every routing decision
    /// in one JSONL file that is rewritten by the next run
    pub fn simulation(log_dir: impl Into<PathBuf>) -> Self {
        Self::default()
            .with_console(ConsoleOutput::Pretty { ansi: true })
            .with_file(FileConfig::new(log_dir, "spy-sim").with_rotation(FileRotation::Never))
            .with_target("spy_routing", "debug")
    }

    /// Warnings only, plain console
    pub fn testing() -> Self {
        Self::default()
            .with_level("warn")
            .with_console(ConsoleOutput::Pretty { ansi: false })
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleOutput) -> Self {
        self.console = console;
        self
    }

    pub fn with_file(mut self, file: FileConfig) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// `EnvFilter` directives for the level plus target overrides
    pub fn filter_directives(&self) -> String {
        let mut directives = self.level.clone();
        for (target, level) in &self.targets {
            directives.push_str(&format!(",{target}={level}"));
        }
        directives
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleOutput {
    Off,
    /// One JSON object per line on stdout
    #[default]
    Json,
    Pretty { ansi: bool },
}

/// JSONL file output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name stem; rotated files get a date suffix
    pub prefix: String,
    pub rotation: FileRotation,
}

impl FileConfig {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            rotation: FileRotation::default(),
        }
    }

    pub fn with_rotation(mut self, rotation: FileRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path written under [`FileRotation::Never`]
    pub fn single_file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.jsonl", self.prefix))
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self::new("./logs", "spy")
    }
}

/// When a new log file is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated when logging starts
    Never,
}

/// Fields included in each JSON record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFormat {
    /// Event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Every enclosing span, not only the innermost
    pub span_list: bool,
    pub thread_ids: bool,
    /// Source file and line
    pub source_location: bool,
}

impl Default for JsonFormat {
    fn default() -> Self {
        Self {
            flatten: true,
            span_list: true,
            thread_ids: false,
            source_location: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json_console() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.console, ConsoleOutput::Json);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_node_preset_writes_daily_files() {
        let config = LogConfig::node("/var/log/spy");
        assert_eq!(config.console, ConsoleOutput::Off);
        let file = config.file.unwrap();
        assert_eq!(file.rotation, FileRotation::Daily);
        assert_eq!(file.directory(), Path::new("/var/log/spy"));
    }

    #[test]
    fn test_simulation_preset_single_file() {
        let config = LogConfig::simulation("out");
        let file = config.file.as_ref().unwrap();
        assert_eq!(file.rotation, FileRotation::Never);
        assert_eq!(file.single_file_path(), PathBuf::from("out/spy-sim.jsonl"));
        assert_eq!(config.filter_directives(), "info,spy_routing=debug");
    }

    #[test]
    fn test_filter_directives_sorted_by_target() {
        let config = LogConfig::testing()
            .with_target("spy_routing::shortcut", "trace")
            .with_target("spy_node", "debug");
        assert_eq!(
            config.filter_directives(),
            "warn,spy_node=debug,spy_routing::shortcut=trace"
        );
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "level": "debug",
            "console": { "pretty": { "ansi": false } },
            "file": { "directory": "logs", "prefix": "n1", "rotation": "hourly" },
            "json": { "flatten": false, "span_list": false, "thread_ids": true, "source_location": false },
            "targets": { "spy_node": "trace" }
        }"#;
        let config: LogConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.console, ConsoleOutput::Pretty { ansi: false });
        assert_eq!(config.file.as_ref().unwrap().rotation, FileRotation::Hourly);
        assert!(config.json.thread_ids);
        assert_eq!(config.filter_directives(), "debug,spy_node=trace");
    }
}
