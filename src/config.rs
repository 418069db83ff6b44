//! Supervisor configuration parsing, validation, and worker argument formatting.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

// ── Language model configs ───────────────────────────────────────────────────

/// Simplified Chinese model set.
pub const CONFIG_CHINESE: &str = "models/config_chinese.txt";
/// Traditional Chinese model set.
pub const CONFIG_CHINESE_CHT: &str = "models/config_chinese_cht.txt";
/// Cyrillic model set.
pub const CONFIG_CYRILLIC: &str = "models/config_cyrillic.txt";
/// English model set.
pub const CONFIG_EN: &str = "models/config_en.txt";
/// French model set.
pub const CONFIG_FRENCH_V2: &str = "models/config_french_v2.txt";
/// German model set.
pub const CONFIG_GERMAN_V2: &str = "models/config_german_v2.txt";
/// Japanese model set.
pub const CONFIG_JAPAN: &str = "models/config_japan.txt";
/// Korean model set.
pub const CONFIG_KOREAN: &str = "models/config_korean.txt";

/// Short language names accepted by [`language_config`].
pub const LANGUAGES: &[(&str, &str)] = &[
    ("chinese", CONFIG_CHINESE),
    ("chinese_cht", CONFIG_CHINESE_CHT),
    ("cyrillic", CONFIG_CYRILLIC),
    ("en", CONFIG_EN),
    ("french", CONFIG_FRENCH_V2),
    ("german", CONFIG_GERMAN_V2),
    ("japan", CONFIG_JAPAN),
    ("korean", CONFIG_KOREAN),
];

/// Look up the model config path for a short language name.
#[must_use]
pub fn language_config(name: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case(name))
        .map(|(_, path)| *path)
}

// ── Worker arguments ─────────────────────────────────────────────────────────

/// Flags passed to the OCR worker on its command line.
///
/// Unset fields are omitted so the worker falls back to its own defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct OcrArgs {
    /// Enable direction classification for rotated text. Worker default: off.
    #[serde(default)]
    pub cls: Option<bool>,
    /// Enable MKL-DNN CPU acceleration. Disabling lowers memory use. Worker default: on.
    #[serde(default)]
    pub enable_mkldnn: Option<bool>,
    /// Images whose long side exceeds this are scaled down. Worker default: 960.
    #[serde(default)]
    pub limit_side_len: Option<i32>,
    /// Enable angle classification; must match `cls`. Worker default: off.
    #[serde(default)]
    pub use_angle_cls: Option<bool>,
    /// Model config file, relative to the worker directory (see `CONFIG_*`).
    #[serde(default)]
    pub config_path: Option<String>,
}

impl OcrArgs {
    /// Ordered `(flag, value)` pairs; `None` means the flag is not passed.
    fn flags(&self) -> [(&'static str, Option<String>); 5] {
        [
            ("cls", self.cls.map(bool_flag)),
            ("enable_mkldnn", self.enable_mkldnn.map(bool_flag)),
            ("limit_side_len", self.limit_side_len.map(|n| n.to_string())),
            ("use_angle_cls", self.use_angle_cls.map(bool_flag)),
            (
                "config_path",
                self.config_path.clone().filter(|path| !path.is_empty()),
            ),
        ]
    }

    /// Worker arguments, one `name=value` entry per set field, in declaration order.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        self.flags()
            .into_iter()
            .filter_map(|(name, value)| value.map(|value| format!("{name}={value}")))
            .collect()
    }

    /// Space-joined form of [`OcrArgs::to_args`], as it appears on a command line.
    #[must_use]
    pub fn cmd_string(&self) -> String {
        self.to_args().join(" ")
    }
}

fn bool_flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_owned()
}

// ── Supervisor configuration ─────────────────────────────────────────────────

/// Ready marker printed by the worker once its models are loaded.
pub const DEFAULT_READY_MARKER: &str = "OCR init completed.";

fn default_restart_interval() -> u64 {
    1200
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_ready_marker() -> String {
    DEFAULT_READY_MARKER.into()
}

fn default_handshake_buffer() -> usize {
    4096
}

/// Supervisor configuration, usually parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Path to the worker executable.
    pub exe_path: PathBuf,
    /// Seconds between scheduled worker restarts; 0 disables them.
    #[serde(default = "default_restart_interval")]
    pub restart_interval_seconds: u64,
    /// Seconds to wait for the ready marker after launch.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
    /// Substring the worker prints on stdout when it is ready.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
    /// Stdout bytes allowed before the ready marker must have appeared.
    #[serde(default = "default_handshake_buffer")]
    pub handshake_buffer_bytes: usize,
    /// Flags passed to the worker.
    #[serde(default)]
    pub ocr: OcrArgs,
}

impl SupervisorConfig {
    /// Configuration with defaults for everything but the executable and its flags.
    #[must_use]
    pub fn new(exe_path: impl Into<PathBuf>, ocr: OcrArgs) -> Self {
        Self {
            exe_path: exe_path.into(),
            restart_interval_seconds: default_restart_interval(),
            startup_timeout_seconds: default_startup_timeout(),
            ready_marker: default_ready_marker(),
            handshake_buffer_bytes: default_handshake_buffer(),
            ocr,
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between scheduled restarts, or `None` when disabled.
    #[must_use]
    pub fn restart_interval(&self) -> Option<Duration> {
        (self.restart_interval_seconds > 0)
            .then(|| Duration::from_secs(self.restart_interval_seconds))
    }

    /// Maximum time allowed for the ready handshake.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.exe_path.as_os_str().is_empty() {
            return Err(AppError::Config("exe_path must not be empty".into()));
        }

        if self.ready_marker.is_empty() {
            return Err(AppError::Config("ready_marker must not be empty".into()));
        }

        if self.handshake_buffer_bytes < self.ready_marker.len() {
            return Err(AppError::Config(format!(
                "handshake_buffer_bytes ({}) must be at least the ready_marker length ({})",
                self.handshake_buffer_bytes,
                self.ready_marker.len()
            )));
        }

        if self.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
