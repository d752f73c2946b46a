//! Plugin options.
//!
//! Options come from a `[qemu_regdump]` table in a TOML file and from
//! sosreport-style `-k qemu_regdump.name=value` arguments. Every option is a
//! plain string where an empty value means "unset".

use crate::utils::errors::RegdumpError;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const PLUGIN_NAME: &str = "qemu_regdump";
pub const DEFAULT_TOOL_PATH: &str = "/usr/bin/qmp-regdump";

/// Name, default and description of every option, in listing order.
pub const OPTION_TABLE: &[(&str, &str, &str)] = &[
    ("path", DEFAULT_TOOL_PATH, "path to QMP dump script"),
    ("socket", "", "QMP socket (unix or TCP)"),
    ("kernel", "", "location of VM vmlinux kernel file"),
    ("mapfile", "", "location of VM System.map file"),
    ("pattern", "compat", "QMP socket matching: compat or strict"),
];

/// How QMP socket addresses are recognised in process command lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    /// Same matches as the historical sosreport plugin, quirks included.
    #[default]
    Compat,
    /// Only the value of the `-qmp` flag is considered.
    Strict,
}

impl FromStr for PatternMode {
    type Err = RegdumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "compat" => Ok(PatternMode::Compat),
            "strict" => Ok(PatternMode::Strict),
            other => Err(RegdumpError::InvalidOption(format!(
                "pattern must be 'compat' or 'strict', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PatternMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternMode::Compat => f.write_str("compat"),
            PatternMode::Strict => f.write_str("strict"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegdumpOptions {
    pub path: String,
    pub socket: String,
    pub kernel: String,
    pub mapfile: String,
    pub pattern: PatternMode,
}

impl Default for RegdumpOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_TOOL_PATH.to_string(),
            socket: String::new(),
            kernel: String::new(),
            mapfile: String::new(),
            pattern: PatternMode::Compat,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    qemu_regdump: RegdumpOptions,
}

impl RegdumpOptions {
    pub fn tool_path(&self) -> &str {
        &self.path
    }

    pub fn socket(&self) -> Option<&str> {
        non_empty(&self.socket)
    }

    pub fn kernel(&self) -> Option<&str> {
        non_empty(&self.kernel)
    }

    pub fn mapfile(&self) -> Option<&str> {
        non_empty(&self.mapfile)
    }

    /// Set a single option by name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), RegdumpError> {
        match name {
            "path" => self.path = value.to_string(),
            "socket" => self.socket = value.to_string(),
            "kernel" => self.kernel = value.to_string(),
            "mapfile" => self.mapfile = value.to_string(),
            "pattern" => self.pattern = value.parse()?,
            other => {
                return Err(RegdumpError::InvalidOption(format!(
                    "unknown option '{}' for plugin {}",
                    other, PLUGIN_NAME
                )));
            }
        }
        Ok(())
    }

    /// Apply a `[qemu_regdump.]name=value` argument.
    pub fn apply_arg(&mut self, arg: &str) -> Result<(), RegdumpError> {
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            RegdumpError::InvalidOption(format!("expected name=value, got '{}'", arg))
        })?;

        let name = match key.split_once('.') {
            Some((plugin, name)) if plugin == PLUGIN_NAME => name,
            Some((plugin, _)) => {
                return Err(RegdumpError::InvalidOption(format!(
                    "option '{}' belongs to plugin '{}'",
                    key, plugin
                )));
            }
            None => key,
        };

        self.set(name.trim(), value)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, RegdumpError> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| RegdumpError::Config(e.to_string()))?;
        Ok(file.qemu_regdump)
    }

    pub fn load(path: &Path) -> Result<Self, RegdumpError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            RegdumpError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|e| RegdumpError::Config(format!("{}: {}", path.display(), e)))
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}
