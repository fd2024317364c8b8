//! Shared types, error model, and configuration for ContextMaker.
//!
//! This crate is the foundation depended on by all other ContextMaker crates.
//! It provides:
//! - [`ContextMakerError`]: the unified error type
//! - Domain types ([`Project`], [`BuildStrategy`], [`EscalationMode`], [`OutputFormat`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BuilderConfig, DefaultsConfig, NotebookConfig, PatcherConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{ContextMakerError, Result};
pub use types::{
    BuildStrategy, DEFAULT_CONF_NAME, DEFAULT_INDEX_NAME, EscalationMode, OutputFormat, Project,
};
