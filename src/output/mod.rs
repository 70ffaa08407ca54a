// src/output/mod.rs

//! Mapping from tool identity to its output subtree.
//!
//! ```text
//! <output_root>/artifact-collection/<tool>/
//! <output_root>/memory-analysis/<tool>/
//! ```

use std::path::{Component, Path, PathBuf};

use crate::catalog::ToolDefinition;
use crate::errors::{Result, TriageError};

/// Assigns and creates per-task output directories under one run root.
#[derive(Debug, Clone)]
pub struct ResultOrganizer {
    root: PathBuf,
    assigned: Vec<(String, PathBuf)>,
}

impl ResultOrganizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            assigned: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output directory of `def` under this root. Pure.
    pub fn path_for(&self, def: &ToolDefinition) -> PathBuf {
        let mut path = self.root.join(def.category.dir_name());
        for segment in def.output_subdir.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".") {
            path.push(segment);
        }
        path
    }

    /// Reserve the output directory of `def` for this batch.
    ///
    /// Fails with `PathCollision` when the directory equals, contains or lies
    /// inside one already assigned, compared case-insensitively.
    pub fn assign(&mut self, def: &ToolDefinition) -> Result<PathBuf> {
        let path = self.path_for(def);
        let key = fold(&path);

        for (owner, other) in &self.assigned {
            let other_key = fold(other);
            if key.starts_with(&other_key) || other_key.starts_with(&key) {
                return Err(TriageError::PathCollision(format!(
                    "'{}' and '{}' both write to {}",
                    owner,
                    def.name,
                    path.display()
                )));
            }
        }

        self.assigned.push((def.name.clone(), path.clone()));
        Ok(path)
    }

    /// Create a directory idempotently.
    pub fn prepare(path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }
}

/// Case-folded normal components, for component-wise prefix checks.
fn fold(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_lowercase()),
            _ => None,
        })
        .collect()
}
