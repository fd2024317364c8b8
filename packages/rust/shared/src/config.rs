//! Application configuration for ContextMaker.
//!
//! User config lives at `~/.contextmaker/contextmaker.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContextMakerError, Result};
use crate::types::EscalationMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contextmaker.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contextmaker";

// ---------------------------------------------------------------------------
// Config structs (matching contextmaker.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// External documentation build tool.
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Hazard patching rules.
    #[serde(default)]
    pub patcher: PatcherConfig,

    /// Notebook conversion.
    #[serde(default)]
    pub notebook: NotebookConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Where the build escalation starts.
    #[serde(default)]
    pub mode: EscalationMode,

    /// Page names (no extension) always left out of the artifact.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// `[builder]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Build tool executable.
    #[serde(default = "default_builder_command")]
    pub command: String,

    /// Builder name passed to `-b` for markup output.
    #[serde(default = "default_markdown_builder")]
    pub markdown_builder: String,

    /// Builder name passed to `-b` for styled page output.
    #[serde(default = "default_html_builder")]
    pub html_builder: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            command: default_builder_command(),
            markdown_builder: default_markdown_builder(),
            html_builder: default_html_builder(),
        }
    }
}

fn default_builder_command() -> String {
    "sphinx-build".into()
}
fn default_markdown_builder() -> String {
    "markdown".into()
}
fn default_html_builder() -> String {
    "html".into()
}

/// `[patcher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatcherConfig {
    /// Dotted call names that terminate the host process.
    #[serde(default = "default_hazards")]
    pub hazards: Vec<String>,

    /// File extensions (without dot) scanned for hazards.
    #[serde(default = "default_patch_extensions")]
    pub extensions: Vec<String>,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            hazards: default_hazards(),
            extensions: default_patch_extensions(),
        }
    }
}

fn default_hazards() -> Vec<String> {
    vec!["sys.exit".into(), "os._exit".into()]
}
fn default_patch_extensions() -> Vec<String> {
    vec!["py".into()]
}

/// `[notebook]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookConfig {
    /// Notebook converter executable.
    #[serde(default = "default_notebook_command")]
    pub command: String,

    /// Directories (relative to the repository root) searched for `*.ipynb`.
    #[serde(default = "default_search_dirs")]
    pub search_dirs: Vec<String>,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            command: default_notebook_command(),
            search_dirs: default_search_dirs(),
        }
    }
}

fn default_notebook_command() -> String {
    "jupytext".into()
}
fn default_search_dirs() -> Vec<String> {
    vec!["docs".into(), "doc".into(), "docs/source".into()]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contextmaker/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContextMakerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contextmaker/contextmaker.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContextMakerError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ContextMakerError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContextMakerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContextMakerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContextMakerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configs that would make every run fail in a confusing way.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.builder.command.trim().is_empty() {
        return Err(ContextMakerError::config("builder.command must not be empty"));
    }
    if config.notebook.command.trim().is_empty() {
        return Err(ContextMakerError::config("notebook.command must not be empty"));
    }
    if let Some(bad) = config
        .patcher
        .hazards
        .iter()
        .find(|h| h.trim().is_empty() || h.contains(char::is_whitespace))
    {
        return Err(ContextMakerError::config(format!(
            "invalid hazard pattern '{bad}': expected a dotted call name like sys.exit"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("sphinx-build"));
        assert!(toml_str.contains("sys.exit"));
        assert!(toml_str.contains("robust"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
mode = "direct"
exclude = ["changelog"]

[builder]
command = "/opt/venv/bin/sphinx-build"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.mode, EscalationMode::Direct);
        assert_eq!(config.defaults.exclude, vec!["changelog".to_string()]);
        assert_eq!(config.builder.command, "/opt/venv/bin/sphinx-build");
        assert_eq!(config.builder.markdown_builder, "markdown");
        assert_eq!(config.notebook.command, "jupytext");
        assert_eq!(config.notebook.search_dirs.len(), 3);
    }

    #[test]
    fn load_config_from_rejects_bad_hazard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contextmaker.toml");
        std::fs::write(&path, "[patcher]\nhazards = [\"sys exit\"]\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("invalid hazard pattern"));
    }

    #[test]
    fn load_config_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contextmaker.toml");
        std::fs::write(&path, "[defaults]\nmode = \"sideways\"\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
