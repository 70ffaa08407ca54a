#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use triagerun::batch::{BatchPlan, PlannedTask, TaskInstance};
use triagerun::catalog::{RawBinarySpec, RawCommand, RawToolDefinition, ToolDefinition};
use triagerun::errors::SkipReason;
use triagerun::provision::{BinarySource, ProvisionedBinary};
use triagerun::types::{InputKind, ToolCategory, WorkingDir};

/// Builder for `ToolDefinition` to simplify test setup.
///
/// Starts as an artifact-collection tool with an operator-supplied binary
/// named after the tool and no commands.
pub struct ToolBuilder {
    raw: RawToolDefinition,
}

impl ToolBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            raw: RawToolDefinition {
                name: name.to_string(),
                category: ToolCategory::ArtifactCollection,
                description: String::new(),
                inputs: vec![InputKind::TriageRoot],
                binary: RawBinarySpec::Operator {
                    path: name.to_string(),
                    version: None,
                },
                working_dir: WorkingDir::Output,
                output_subdir: None,
                modules: Vec::new(),
                default_modules: None,
                commands: Vec::new(),
            },
        }
    }

    /// A memory-analysis tool taking the memory image.
    pub fn memory(name: &str) -> Self {
        let mut builder = Self::new(name);
        builder.raw.category = ToolCategory::MemoryAnalysis;
        builder.raw.inputs = vec![InputKind::MemoryImage];
        builder
    }

    pub fn operator_binary(mut self, path: &str, version: Option<&str>) -> Self {
        self.raw.binary = RawBinarySpec::Operator {
            path: path.to_string(),
            version: version.map(str::to_string),
        };
        self
    }

    pub fn release(mut self, version: &str, url: &str, executable: &str) -> Self {
        self.raw.binary = RawBinarySpec::Release {
            version: version.to_string(),
            url: url.to_string(),
            executable: executable.to_string(),
            sha256: None,
            checksum_url: None,
        };
        self
    }

    /// Pin the known-good digest of a release binary.
    pub fn sha256(mut self, digest: &str) -> Self {
        if let RawBinarySpec::Release { sha256, .. } = &mut self.raw.binary {
            *sha256 = Some(digest.to_string());
        }
        self
    }

    pub fn checksum_url(mut self, url: &str) -> Self {
        if let RawBinarySpec::Release { checksum_url, .. } = &mut self.raw.binary {
            *checksum_url = Some(url.to_string());
        }
        self
    }

    pub fn command(mut self, args: &[&str]) -> Self {
        self.raw.commands.push(RawCommand {
            args: args.iter().map(|a| a.to_string()).collect(),
            stdout: None,
        });
        self
    }

    pub fn command_with_stdout(mut self, args: &[&str], stdout: &str) -> Self {
        self.raw.commands.push(RawCommand {
            args: args.iter().map(|a| a.to_string()).collect(),
            stdout: Some(stdout.to_string()),
        });
        self
    }

    pub fn modules(mut self, modules: &[&str]) -> Self {
        self.raw.modules = modules.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn output_subdir(mut self, dir: &str) -> Self {
        self.raw.output_subdir = Some(dir.to_string());
        self
    }

    pub fn raw(self) -> RawToolDefinition {
        self.raw
    }

    /// Validate into a definition. Tools without commands get
    /// `{exe} {output}`.
    pub fn build(mut self) -> Arc<ToolDefinition> {
        if self.raw.commands.is_empty() {
            self = self.command(&["{exe}", "{output}"]);
        }
        Arc::new(ToolDefinition::try_from(self.raw).expect("Failed to build valid tool from builder"))
    }
}

/// Builder for `TaskInstance`.
pub struct TaskBuilder {
    definition: Arc<ToolDefinition>,
    triage_root: Option<PathBuf>,
    memory_image: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    modules: Vec<String>,
}

impl TaskBuilder {
    pub fn new(definition: Arc<ToolDefinition>) -> Self {
        Self {
            definition,
            triage_root: Some(PathBuf::from("/triage")),
            memory_image: None,
            output_dir: None,
            modules: Vec::new(),
        }
    }

    pub fn triage_root(mut self, root: Option<&Path>) -> Self {
        self.triage_root = root.map(Path::to_path_buf);
        self
    }

    pub fn memory_image(mut self, image: Option<&Path>) -> Self {
        self.memory_image = image.map(Path::to_path_buf);
        self
    }

    pub fn output_dir(mut self, dir: &Path) -> Self {
        self.output_dir = Some(dir.to_path_buf());
        self
    }

    pub fn modules(mut self, modules: &[&str]) -> Self {
        self.modules = modules.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn build(self) -> TaskInstance {
        let name = self.definition.name.clone();
        let output_dir = self
            .output_dir
            .unwrap_or_else(|| PathBuf::from("/out").join(&name));
        TaskInstance {
            name,
            definition: self.definition,
            triage_root: self.triage_root,
            memory_image: self.memory_image,
            output_dir,
            modules: self.modules,
            timestamp: "20240101120000".to_string(),
        }
    }

    /// Planned task, skipped when a declared input is missing.
    pub fn planned(self) -> PlannedTask {
        let instance = self.build();
        let skip = instance.missing_input().map(SkipReason::MissingInput);
        PlannedTask {
            instance: Arc::new(instance),
            skip,
        }
    }
}

/// Plan of runnable artifact tools named `names`.
pub fn plan_of(names: &[&str]) -> BatchPlan {
    let tasks = names
        .iter()
        .map(|name| TaskBuilder::new(ToolBuilder::new(name).build()).planned())
        .collect();
    BatchPlan {
        tasks,
        output_root: PathBuf::from("/out"),
        started_at: Utc::now(),
    }
}

/// An operator binary for `tool`.
pub fn binary_for(tool: &str) -> ProvisionedBinary {
    ProvisionedBinary {
        tool: tool.to_string(),
        executable: PathBuf::from("/tools").join(tool),
        version: "operator-supplied".to_string(),
        provisioned_at: Utc::now(),
        source: BinarySource::Operator,
    }
}
