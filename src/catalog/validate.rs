// src/catalog/validate.rs

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::catalog::model::{
    BinarySpec, RawBinarySpec, RawToolDefinition, ReleaseOverride, ReleaseSpec, ToolDefinition,
};
use crate::catalog::template::{CommandTemplate, Repeat, Root};
use crate::errors::{Result, TriageError};
use crate::types::InputKind;

impl TryFrom<RawToolDefinition> for ToolDefinition {
    type Error = TriageError;

    fn try_from(raw: RawToolDefinition) -> std::result::Result<Self, Self::Error> {
        let name = raw.name.trim().to_string();
        validate_identity(&name)?;

        let output_subdir = raw.output_subdir.clone().unwrap_or_else(|| name.clone());
        if !is_plain_relative(Path::new(&output_subdir)) {
            return Err(catalog_err(&name, format!("output_subdir '{output_subdir}' must be a relative path inside the category dir")));
        }

        let commands = validate_commands(&name, &raw)?;
        let default_modules = validate_modules(&name, &raw, &commands)?;
        let binary = validate_binary(&name, raw.binary)?;

        Ok(ToolDefinition {
            name,
            category: raw.category,
            description: raw.description,
            inputs: raw.inputs,
            binary,
            working_dir: raw.working_dir,
            output_subdir,
            modules: raw.modules,
            default_modules,
            commands,
        })
    }
}

/// Replace release metadata with operator-supplied values.
pub fn apply_release_override(raw: &mut RawToolDefinition, ov: &ReleaseOverride) -> Result<()> {
    match &mut raw.binary {
        RawBinarySpec::Operator { .. } => Err(TriageError::CatalogLoad(format!(
            "[release.{}] given, but tool '{}' uses an operator-supplied binary",
            raw.name, raw.name
        ))),
        RawBinarySpec::Release {
            version,
            url,
            executable,
            sha256,
            checksum_url,
        } => {
            if let Some(v) = &ov.version {
                *version = v.clone();
                // A pinned checksum belongs to one version; do not carry it over.
                if ov.sha256.is_none() {
                    *sha256 = None;
                }
            }
            if let Some(v) = &ov.url {
                *url = v.clone();
            }
            if let Some(v) = &ov.executable {
                *executable = v.clone();
            }
            if let Some(v) = &ov.sha256 {
                *sha256 = Some(v.clone());
            }
            if let Some(v) = &ov.checksum_url {
                *checksum_url = Some(v.clone());
            }
            Ok(())
        }
    }
}

fn catalog_err(tool: &str, msg: impl AsRef<str>) -> TriageError {
    TriageError::CatalogLoad(format!("tool '{}': {}", tool, msg.as_ref()))
}

fn validate_identity(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TriageError::CatalogLoad("tool with empty name".to_string()));
    }
    if name.contains(['/', '\\', ':']) || name == "." || name == ".." {
        return Err(catalog_err(name, "name may not contain path separators"));
    }
    Ok(())
}

/// Relative, non-empty, and free of `..`/root components.
fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn validate_binary(name: &str, raw: RawBinarySpec) -> Result<BinarySpec> {
    match raw {
        RawBinarySpec::Operator { path, version } => {
            let path = PathBuf::from(path);
            if !is_plain_relative(&path) {
                return Err(catalog_err(name, format!("operator binary path {:?} must be relative to the tools directory", path)));
            }
            Ok(BinarySpec::Operator { path, version })
        }
        RawBinarySpec::Release {
            version,
            url,
            executable,
            sha256,
            checksum_url,
        } => {
            if version.trim().is_empty() {
                return Err(catalog_err(name, "release binary needs a version"));
            }
            if url.trim().is_empty() {
                return Err(catalog_err(name, "release binary needs a url"));
            }
            let executable = PathBuf::from(executable);
            if !is_plain_relative(&executable) {
                return Err(catalog_err(name, format!("release executable {:?} must be relative to the archive root", executable)));
            }
            let sha256 = match sha256 {
                Some(s) => {
                    let s = s.trim().to_ascii_lowercase();
                    if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err(catalog_err(name, "sha256 must be 64 hex characters"));
                    }
                    Some(s)
                }
                None => None,
            };
            Ok(BinarySpec::Release(ReleaseSpec {
                version,
                url,
                executable,
                sha256,
                checksum_url,
            }))
        }
    }
}

fn validate_commands(name: &str, raw: &RawToolDefinition) -> Result<Vec<CommandTemplate>> {
    if raw.commands.is_empty() {
        return Err(catalog_err(name, "at least one [[tool.command]] is required"));
    }

    let mut commands = Vec::with_capacity(raw.commands.len());
    for (i, cmd) in raw.commands.iter().enumerate() {
        let template = CommandTemplate::parse(&cmd.args, cmd.stdout.as_deref())
            .map_err(|e| catalog_err(name, format!("command #{}: {e}", i + 1)))?;

        for root in template.roots() {
            let needed = match root {
                Root::Triage => Some(InputKind::TriageRoot),
                Root::Memory => Some(InputKind::MemoryImage),
                _ => None,
            };
            if let Some(kind) = needed {
                if !raw.inputs.contains(&kind) {
                    return Err(catalog_err(
                        name,
                        format!("command #{} uses input '{kind}' which is not declared in `inputs`", i + 1),
                    ));
                }
            }
        }

        if template.repeat() == Repeat::PerUser && !raw.inputs.contains(&InputKind::TriageRoot) {
            return Err(catalog_err(name, "{user} expansion needs the triage-root input"));
        }

        commands.push(template);
    }

    Ok(commands)
}

fn validate_modules(
    name: &str,
    raw: &RawToolDefinition,
    commands: &[CommandTemplate],
) -> Result<Vec<String>> {
    let uses_modules = commands.iter().any(|c| c.repeat() == Repeat::PerModule);

    if uses_modules && raw.modules.is_empty() {
        return Err(catalog_err(name, "commands use {module} but no `modules` are declared"));
    }
    if !uses_modules && !raw.modules.is_empty() {
        return Err(catalog_err(name, "`modules` declared but no command uses {module}"));
    }

    let mut seen = HashSet::new();
    for m in &raw.modules {
        if m.trim().is_empty() || m.contains(['/', '\\']) {
            return Err(catalog_err(name, format!("invalid module name '{m}'")));
        }
        if !seen.insert(m.as_str()) {
            return Err(catalog_err(name, format!("module '{m}' declared twice")));
        }
    }

    match &raw.default_modules {
        Some(defaults) => {
            if let Some(unknown) = defaults.iter().find(|m| !seen.contains(m.as_str())) {
                return Err(catalog_err(name, format!("default module '{unknown}' is not in `modules`")));
            }
            Ok(defaults.clone())
        }
        None => Ok(raw.modules.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::RawCommand;
    use crate::types::{ToolCategory, WorkingDir};

    fn raw(name: &str, args: &[&str]) -> RawToolDefinition {
        RawToolDefinition {
            name: name.to_string(),
            category: ToolCategory::ArtifactCollection,
            description: String::new(),
            inputs: vec![InputKind::TriageRoot],
            binary: RawBinarySpec::Operator {
                path: format!("{name}.exe"),
                version: None,
            },
            working_dir: WorkingDir::Output,
            output_subdir: None,
            modules: Vec::new(),
            default_modules: None,
            commands: vec![RawCommand {
                args: args.iter().map(|s| s.to_string()).collect(),
                stdout: None,
            }],
        }
    }

    #[test]
    fn accepts_a_well_formed_definition() {
        let def = ToolDefinition::try_from(raw("PECmd", &["{exe}", "-d", "{triage}/Windows/prefetch", "--csv", "{output}"])).unwrap();
        assert_eq!(def.output_subdir, "PECmd");
        assert_eq!(def.version_requirement(), None);
    }

    #[test]
    fn undeclared_input_is_a_load_error() {
        let err = ToolDefinition::try_from(raw("X", &["{exe}", "-f", "{memory}"])).unwrap_err();
        match err {
            TriageError::CatalogLoad(msg) => assert!(msg.contains("memory-image")),
            other => panic!("expected CatalogLoad, got {other:?}"),
        }
    }

    #[test]
    fn identity_with_separator_is_rejected() {
        assert!(matches!(
            ToolDefinition::try_from(raw("a/b", &["{exe}"])),
            Err(TriageError::CatalogLoad(_))
        ));
    }

    #[test]
    fn output_subdir_must_stay_inside() {
        let mut r = raw("X", &["{exe}"]);
        r.output_subdir = Some("../elsewhere".to_string());
        assert!(matches!(ToolDefinition::try_from(r), Err(TriageError::CatalogLoad(_))));
    }

    #[test]
    fn module_lists_are_checked() {
        let mut r = raw("Vol", &["{exe}", "windows.{module}"]);
        assert!(ToolDefinition::try_from(r.clone()).is_err());

        r.modules = vec!["pslist".to_string(), "netscan".to_string()];
        r.default_modules = Some(vec!["malfind".to_string()]);
        assert!(ToolDefinition::try_from(r.clone()).is_err());

        r.default_modules = None;
        let def = ToolDefinition::try_from(r).unwrap();
        assert_eq!(def.default_modules, vec!["pslist", "netscan"]);
    }

    #[test]
    fn override_of_version_drops_stale_checksum() {
        let mut r = raw("Hayabusa", &["{exe}"]);
        r.binary = RawBinarySpec::Release {
            version: "1.0.0".to_string(),
            url: "https://example.invalid/h.zip".to_string(),
            executable: "h.exe".to_string(),
            sha256: Some("a".repeat(64)),
            checksum_url: None,
        };
        let ov = ReleaseOverride {
            version: Some("2.0.0".to_string()),
            ..Default::default()
        };
        apply_release_override(&mut r, &ov).unwrap();
        let def = ToolDefinition::try_from(r).unwrap();
        match def.binary {
            BinarySpec::Release(rel) => {
                assert_eq!(rel.version, "2.0.0");
                assert_eq!(rel.sha256, None);
            }
            other => panic!("unexpected binary {other:?}"),
        }
    }
}
