// src/config/mod.rs

//! Engine configuration.
//!
//! - `model.rs`: TOML-backed raw model and the validated model.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: `RawConfigFile -> ConfigFile` conversion.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{ConfigFile, EngineSection, PathsSection, RawConfigFile, RunSection};
pub use validate::parse_duration;
