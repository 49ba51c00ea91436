use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::events::DEFAULT_MAX_DUMPS;

pub const DEFAULT_MAX_SNAPSHOTS: usize = 200;
pub const DEFAULT_UI_LIST_LIMIT: usize = 20;
pub const DEFAULT_MAX_STRING: usize = 16_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: String, value: String },
}

fn positive(field: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::NonPositive { field });
    }
    Ok(value)
}

/// Snapshot history settings. Limits are validated on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    enabled: bool,
    max_snapshots: usize,
    ui_list_limit: usize,
}

impl HistoryConfig {
    pub fn new(enabled: bool, max_snapshots: usize, ui_list_limit: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled,
            max_snapshots: positive("max_snapshots", max_snapshots)?,
            ui_list_limit: positive("ui_list_limit", ui_list_limit)?,
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Retention bound applied after every persisted snapshot.
    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// How many recent snapshots are attached to a payload.
    pub fn ui_list_limit(&self) -> usize {
        self.ui_list_limit
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            ui_list_limit: DEFAULT_UI_LIST_LIMIT,
        }
    }
}

/// Limits for recorded dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumperConfig {
    max_dumps: usize,
    max_string: usize,
}

impl DumperConfig {
    pub fn new(max_dumps: usize, max_string: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            max_dumps: positive("max_dumps", max_dumps)?,
            max_string: positive("max_string", max_string)?,
        })
    }

    pub fn max_dumps(&self) -> usize {
        self.max_dumps
    }

    /// Maximum characters kept from a rendered dump.
    pub fn max_string(&self) -> usize {
        self.max_string
    }

    /// Cut `text` to `max_string` characters, marking the cut with `…`.
    pub fn truncate(&self, mut text: String) -> String {
        if let Some((byte_idx, _)) = text.char_indices().nth(self.max_string) {
            text.truncate(byte_idx);
            text.push('…');
        }
        text
    }
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            max_dumps: DEFAULT_MAX_DUMPS,
            max_string: DEFAULT_MAX_STRING,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebugBarConfig {
    pub enabled: bool,
    pub dumper: DumperConfig,
    /// Root of the snapshot history; no history is kept when unset
    pub history_dir: Option<PathBuf>,
    pub history: HistoryConfig,
}

impl Default for DebugBarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dumper: DumperConfig::default(),
            history_dir: None,
            history: HistoryConfig::default(),
        }
    }
}

impl DebugBarConfig {
    /// Read `TRACEBAR_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let history_dir = lookup("TRACEBAR_HISTORY_DIR")
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            enabled: parse_bool(&lookup, "TRACEBAR_ENABLED", true)?,
            dumper: DumperConfig::new(
                parse_var(&lookup, "TRACEBAR_MAX_DUMPS", DEFAULT_MAX_DUMPS)?,
                parse_var(&lookup, "TRACEBAR_MAX_STRING", DEFAULT_MAX_STRING)?,
            )?,
            history_dir,
            history: HistoryConfig::new(
                parse_bool(&lookup, "TRACEBAR_HISTORY_ENABLED", true)?,
                parse_var(&lookup, "TRACEBAR_MAX_SNAPSHOTS", DEFAULT_MAX_SNAPSHOTS)?,
                parse_var(&lookup, "TRACEBAR_UI_LIST_LIMIT", DEFAULT_UI_LIST_LIMIT)?,
            )?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}

fn parse_bool<F>(lookup: &F, var: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}
