// src/batch/plan.rs

//! Expanding a user selection into task instances.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, info};

use crate::batch::task::{BatchPlan, PlannedTask, TaskInstance};
use crate::catalog::{ToolCatalog, ToolDefinition};
use crate::errors::{Result, SkipReason, TriageError};
use crate::output::ResultOrganizer;

/// What the user asked to run.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Tool identities; duplicates collapse.
    pub tools: Vec<String>,
    /// Selected modules per tool identity. Tools absent here use their
    /// default modules.
    pub modules: BTreeMap<String, Vec<String>>,
    pub triage_root: Option<PathBuf>,
    pub memory_image: Option<PathBuf>,
}

/// Resolve `selection` against `catalog`, assign output directories and
/// create those of runnable tasks.
///
/// Selection errors and output path collisions abort before anything runs.
pub fn plan_batch(
    catalog: &ToolCatalog,
    selection: &Selection,
    organizer: &mut ResultOrganizer,
    started_at: DateTime<Local>,
) -> Result<BatchPlan> {
    validate_inputs(selection)?;

    let definitions = resolve_tools(catalog, &selection.tools)?;
    let modules = resolve_modules(catalog, &definitions, &selection.modules)?;
    let timestamp = started_at.format("%Y%m%d%H%M%S").to_string();

    let mut tasks = Vec::with_capacity(definitions.len());
    for def in definitions {
        let output_dir = organizer.assign(&def)?;
        let task_modules = modules
            .get(&def.name)
            .cloned()
            .unwrap_or_else(|| def.default_modules.clone());

        let instance = TaskInstance {
            name: def.name.clone(),
            definition: Arc::clone(&def),
            triage_root: selection.triage_root.clone(),
            memory_image: selection.memory_image.clone(),
            output_dir,
            modules: task_modules,
            timestamp: timestamp.clone(),
        };
        let skip = instance.missing_input().map(SkipReason::MissingInput);

        match skip {
            Some(reason) => info!(task = %instance.name, %reason, "task will be skipped"),
            None => {
                ResultOrganizer::prepare(&instance.output_dir)?;
                debug!(task = %instance.name, output = %instance.output_dir.display(), "output directory ready");
            }
        }

        tasks.push(PlannedTask {
            instance: Arc::new(instance),
            skip,
        });
    }

    Ok(BatchPlan {
        tasks,
        output_root: organizer.root().to_path_buf(),
        started_at: started_at.with_timezone(&Utc),
    })
}

fn validate_inputs(selection: &Selection) -> Result<()> {
    if let Some(root) = &selection.triage_root {
        if !root.is_dir() {
            return Err(TriageError::Selection(format!(
                "triage root {} is not a directory",
                root.display()
            )));
        }
    }
    if let Some(image) = &selection.memory_image {
        if !image.is_file() {
            return Err(TriageError::Selection(format!(
                "memory image {} is not a file",
                image.display()
            )));
        }
    }
    Ok(())
}

fn resolve_tools(catalog: &ToolCatalog, names: &[String]) -> Result<Vec<Arc<ToolDefinition>>> {
    if names.is_empty() {
        return Err(TriageError::Selection("no tools selected".to_string()));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let def = catalog.get(name)?;
        if seen.insert(def.name.clone()) {
            out.push(def);
        } else {
            debug!(tool = %def.name, "duplicate selection ignored");
        }
    }
    Ok(out)
}

/// Validate module selections; keys are canonicalised to catalog identities
/// and module names to their declared spelling.
fn resolve_modules(
    catalog: &ToolCatalog,
    selected: &[Arc<ToolDefinition>],
    requested: &BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut out = BTreeMap::new();

    for (tool, modules) in requested {
        let def = catalog.get(tool)?;
        if !selected.iter().any(|d| d.name == def.name) {
            return Err(TriageError::Selection(format!(
                "modules given for '{}', which is not selected",
                def.name
            )));
        }
        if !def.accepts_modules() {
            return Err(TriageError::Selection(format!(
                "'{}' does not accept modules",
                def.name
            )));
        }

        let mut resolved: Vec<String> = Vec::new();
        for module in modules {
            let canonical = def
                .modules
                .iter()
                .find(|m| m.eq_ignore_ascii_case(module.trim()))
                .ok_or_else(|| {
                    TriageError::Selection(format!(
                        "unknown module '{}' for '{}' (available: {})",
                        module,
                        def.name,
                        def.modules.join(", ")
                    ))
                })?;
            if !resolved.contains(canonical) {
                resolved.push(canonical.clone());
            }
        }
        if resolved.is_empty() {
            return Err(TriageError::Selection(format!(
                "empty module list for '{}'",
                def.name
            )));
        }

        out.insert(def.name.clone(), resolved);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InputKind;

    fn selection(tools: &[&str]) -> Selection {
        Selection {
            tools: tools.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn duplicates_collapse_and_missing_inputs_skip() {
        let dir = tempfile::tempdir().unwrap();
        let triage = dir.path().join("C");
        std::fs::create_dir(&triage).unwrap();

        let catalog = ToolCatalog::builtin().unwrap();
        let mut sel = selection(&["PECmd", "pecmd", "Volatility3"]);
        sel.triage_root = Some(triage);

        let mut org = ResultOrganizer::new(dir.path().join("Output"));
        let plan = plan_batch(&catalog, &sel, &mut org, Local::now()).unwrap();

        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.tasks[0].skip.is_none());
        assert!(plan.tasks[0].instance.output_dir.is_dir());
        assert_eq!(plan.tasks[1].skip, Some(SkipReason::MissingInput(InputKind::MemoryImage)));
        assert!(!plan.tasks[1].instance.output_dir.exists());
        assert_eq!(plan.tasks[1].instance.modules.len(), 9);
    }

    #[test]
    fn selection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ToolCatalog::builtin().unwrap();
        let mut org = ResultOrganizer::new(dir.path());

        let err = plan_batch(&catalog, &selection(&["Autopsy"]), &mut org, Local::now()).unwrap_err();
        assert!(matches!(err, TriageError::ToolNotFound(_)));

        let err = plan_batch(&catalog, &selection(&[]), &mut org, Local::now()).unwrap_err();
        assert!(matches!(err, TriageError::Selection(_)));

        let mut sel = selection(&["Volatility3"]);
        sel.modules.insert("volatility3".into(), vec!["hivelist".into()]);
        let err = plan_batch(&catalog, &sel, &mut org, Local::now()).unwrap_err();
        assert!(matches!(err, TriageError::Selection(msg) if msg.contains("hivelist")));

        let mut sel = selection(&["PECmd"]);
        sel.modules.insert("PECmd".into(), vec!["pslist".into()]);
        let err = plan_batch(&catalog, &sel, &mut org, Local::now()).unwrap_err();
        assert!(matches!(err, TriageError::Selection(_)));
    }

    #[test]
    fn selected_modules_are_canonicalised() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("mem.raw");
        std::fs::write(&image, b"x").unwrap();

        let catalog = ToolCatalog::builtin().unwrap();
        let mut sel = selection(&["Volatility3"]);
        sel.memory_image = Some(image);
        sel.modules.insert("Volatility3".into(), vec!["PSList".into(), "pslist".into(), "netscan".into()]);

        let mut org = ResultOrganizer::new(dir.path().join("out"));
        let plan = plan_batch(&catalog, &sel, &mut org, Local::now()).unwrap();
        assert_eq!(plan.tasks[0].instance.modules, vec!["pslist", "netscan"]);
    }
}
