// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{RawToolDefinition, ReleaseOverride};
use crate::types::CancelMode;

/// Engine configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// max_running = 4
/// max_provisioning = 1
/// cancel_mode = "drain"
/// grace_period = "10s"
///
/// [paths]
/// tools_dir = "tools"
///
/// [run]
/// tools = ["EvtxECmd", "Hayabusa"]
/// triage_root = "D:/triage/C"
///
/// [release.Hayabusa]
/// sha256 = "..."
/// ```
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: RawEngineSection,

    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub run: RunSection,

    /// Release metadata overrides, keyed by tool identity.
    #[serde(default)]
    pub release: BTreeMap<String, ReleaseOverride>,

    /// Extra catalog entries, same schema as the builtin set.
    #[serde(default)]
    pub tool: Vec<RawToolDefinition>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineSection {
    /// Ceiling on tasks in the Running phase.
    #[serde(default = "default_max_running")]
    pub max_running: usize,

    /// Ceiling on tasks in the Provisioning phase.
    #[serde(default = "default_max_provisioning")]
    pub max_provisioning: usize,

    #[serde(default)]
    pub cancel_mode: CancelMode,

    /// How long a terminated process may take to exit before it is killed
    /// (`"500ms"`, `"10s"`, `"1m"`).
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    /// Interpreter substituted for `{python}`.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_max_running() -> usize {
    4
}

fn default_max_provisioning() -> usize {
    1
}

fn default_grace_period() -> String {
    "10s".to_string()
}

fn default_python() -> String {
    "python".to_string()
}

impl Default for RawEngineSection {
    fn default() -> Self {
        Self {
            max_running: default_max_running(),
            max_provisioning: default_max_provisioning(),
            cancel_mode: CancelMode::default(),
            grace_period: default_grace_period(),
            python: default_python(),
        }
    }
}

/// `[paths]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    /// Where operator-supplied binaries live.
    #[serde(default = "default_tools_dir")]
    pub tools_dir: PathBuf,

    /// Where downloaded releases are extracted.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Root of the results tree.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_tools_dir() -> PathBuf {
    PathBuf::from("tools")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".triagerun/cache")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Output")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            tools_dir: default_tools_dir(),
            cache_dir: default_cache_dir(),
            output_dir: default_output_dir(),
        }
    }
}

/// `[run]` section: the default selection and inputs, overridable from the
/// command line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default)]
    pub triage_root: Option<PathBuf>,

    #[serde(default)]
    pub memory_image: Option<PathBuf>,

    /// Selected modules per tool identity.
    #[serde(default)]
    pub modules: BTreeMap<String, Vec<String>>,
}

/// Validated `[engine]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSection {
    pub max_running: usize,
    pub max_provisioning: usize,
    pub cancel_mode: CancelMode,
    pub grace_period: Duration,
    pub python: String,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub paths: PathsSection,
    pub run: RunSection,
    pub release: BTreeMap<String, ReleaseOverride>,
    pub tool: Vec<RawToolDefinition>,
}
