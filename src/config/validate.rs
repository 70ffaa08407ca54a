// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, EngineSection, RawConfigFile, RawEngineSection};
use crate::errors::{Result, TriageError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TriageError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_paths(&raw)?;
        validate_run(&raw)?;
        let engine = validate_engine(raw.engine)?;

        Ok(ConfigFile {
            engine,
            paths: raw.paths,
            run: raw.run,
            release: raw.release,
            tool: raw.tool,
        })
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        // The raw defaults always validate.
        let raw = RawConfigFile::default();
        ConfigFile {
            engine: EngineSection {
                max_running: raw.engine.max_running,
                max_provisioning: raw.engine.max_provisioning,
                cancel_mode: raw.engine.cancel_mode,
                grace_period: Duration::from_secs(10),
                python: raw.engine.python,
            },
            paths: raw.paths,
            run: raw.run,
            release: raw.release,
            tool: raw.tool,
        }
    }
}

fn config_err(msg: impl Into<String>) -> TriageError {
    TriageError::ConfigError(msg.into())
}

fn validate_engine(raw: RawEngineSection) -> Result<EngineSection> {
    if raw.max_running == 0 {
        return Err(config_err("[engine].max_running must be >= 1 (got 0)"));
    }
    if raw.max_provisioning == 0 {
        return Err(config_err("[engine].max_provisioning must be >= 1 (got 0)"));
    }
    if raw.python.trim().is_empty() {
        return Err(config_err("[engine].python must not be empty"));
    }

    let grace_period = parse_duration(&raw.grace_period)
        .map_err(|e| config_err(format!("[engine].grace_period: {e}")))?;

    Ok(EngineSection {
        max_running: raw.max_running,
        max_provisioning: raw.max_provisioning,
        cancel_mode: raw.cancel_mode,
        grace_period,
        python: raw.python,
    })
}

fn validate_paths(cfg: &RawConfigFile) -> Result<()> {
    let paths = [
        ("tools_dir", &cfg.paths.tools_dir),
        ("cache_dir", &cfg.paths.cache_dir),
        ("output_dir", &cfg.paths.output_dir),
    ];
    for (key, path) in paths {
        if path.as_os_str().is_empty() {
            return Err(config_err(format!("[paths].{key} must not be empty")));
        }
    }
    Ok(())
}

fn validate_run(cfg: &RawConfigFile) -> Result<()> {
    if cfg.run.tools.iter().any(|t| t.trim().is_empty()) {
        return Err(config_err("[run].tools contains an empty tool name"));
    }
    for (tool, modules) in &cfg.run.modules {
        if modules.is_empty() {
            return Err(config_err(format!(
                "[run].modules.{tool} is empty; omit it to use the tool's default modules"
            )));
        }
    }
    Ok(())
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
