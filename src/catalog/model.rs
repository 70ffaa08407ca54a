// src/catalog/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::catalog::template::CommandTemplate;
use crate::types::{InputKind, ToolCategory, WorkingDir};

/// Raw definition set as read from TOML (`[[tool]]` array of tables).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCatalog {
    #[serde(default)]
    pub tool: Vec<RawToolDefinition>,
}

/// One `[[tool]]` entry, before validation.
///
/// ```toml
/// [[tool]]
/// name = "PECmd"
/// category = "artifact-collection"
/// inputs = ["triage-root"]
/// binary = { source = "operator", path = "PECmd.exe" }
///
/// [[tool.command]]
/// args = ["{exe}", "-d", "{triage}/Windows/prefetch", "--csv", "{output}"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawToolDefinition {
    pub name: String,
    pub category: ToolCategory,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<InputKind>,
    pub binary: RawBinarySpec,
    #[serde(default)]
    pub working_dir: WorkingDir,
    /// Output directory name under the category dir; defaults to `name`.
    #[serde(default)]
    pub output_subdir: Option<String>,
    /// Modules (plugins) the tool accepts through `{module}`.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Modules run when the user selects none; defaults to all of `modules`.
    #[serde(default)]
    pub default_modules: Option<Vec<String>>,
    #[serde(rename = "command", default)]
    pub commands: Vec<RawCommand>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum RawBinarySpec {
    /// Pre-installed by the operator under the tools directory.
    Operator {
        path: String,
        #[serde(default)]
        version: Option<String>,
    },
    /// Downloaded from a versioned release archive.
    Release {
        version: String,
        url: String,
        executable: String,
        #[serde(default)]
        sha256: Option<String>,
        #[serde(default)]
        checksum_url: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCommand {
    pub args: Vec<String>,
    #[serde(default)]
    pub stdout: Option<String>,
}

/// Operator-supplied replacement for a release binary's metadata
/// (`[release.<tool>]` in the engine config).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseOverride {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub checksum_url: Option<String>,
}

/// A validated, immutable catalog entry.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub category: ToolCategory,
    pub description: String,
    pub inputs: Vec<InputKind>,
    pub binary: BinarySpec,
    pub working_dir: WorkingDir,
    pub output_subdir: String,
    pub modules: Vec<String>,
    pub default_modules: Vec<String>,
    pub commands: Vec<CommandTemplate>,
}

impl ToolDefinition {
    pub fn requires(&self, kind: InputKind) -> bool {
        self.inputs.contains(&kind)
    }

    pub fn accepts_modules(&self) -> bool {
        !self.modules.is_empty()
    }

    /// Version the engine insists on, if any. Operator-supplied binaries are
    /// accepted at whatever version is installed.
    pub fn version_requirement(&self) -> Option<&str> {
        match &self.binary {
            BinarySpec::Operator { .. } => None,
            BinarySpec::Release(release) => Some(&release.version),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySpec {
    Operator {
        /// Relative to the configured tools directory.
        path: PathBuf,
        version: Option<String>,
    },
    Release(ReleaseSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub version: String,
    pub url: String,
    /// Executable path relative to the extracted archive root.
    pub executable: PathBuf,
    /// Known-good SHA-256 (lowercase hex) pinned for this version.
    pub sha256: Option<String>,
    /// Where to fetch the integrity value when none is pinned.
    pub checksum_url: Option<String>,
}
