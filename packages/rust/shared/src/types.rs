//! Core domain types for a documentation flattening run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContextMakerError, Result};

/// Default configuration script name inside a documentation project.
pub const DEFAULT_CONF_NAME: &str = "conf.py";

/// Default index document name inside a documentation project.
pub const DEFAULT_INDEX_NAME: &str = "index.rst";

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A documentation project: source tree, configuration script and index document,
/// plus the code root whose modules the docs reference.
///
/// All paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Documentation source root (where `conf.py` and `index.rst` usually live).
    pub doc_root: PathBuf,
    /// Configuration script.
    pub conf_path: PathBuf,
    /// Index document.
    pub index_path: PathBuf,
    /// Root of the library's source code, exposed to the build tool.
    pub source_root: PathBuf,
    /// Display name used in the artifact title.
    pub library_name: String,
}

impl Project {
    /// Resolve a project from user-supplied paths.
    ///
    /// `conf` and `index` default to `<doc_root>/conf.py` and `<doc_root>/index.rst`;
    /// the library name defaults to the base name of `source_root`.
    pub fn resolve(
        doc_root: &Path,
        source_root: &Path,
        conf: Option<&Path>,
        index: Option<&Path>,
        library_name: Option<&str>,
    ) -> Result<Self> {
        let doc_root = absolute(doc_root)?;
        let source_root = absolute(source_root)?;

        if !doc_root.is_dir() {
            return Err(ContextMakerError::validation(format!(
                "documentation source {} is not a directory",
                doc_root.display()
            )));
        }
        if !source_root.is_dir() {
            return Err(ContextMakerError::validation(format!(
                "source root {} is not a directory",
                source_root.display()
            )));
        }

        let conf_path = match conf {
            Some(p) => absolute(p)?,
            None => doc_root.join(DEFAULT_CONF_NAME),
        };
        let index_path = match index {
            Some(p) => absolute(p)?,
            None => doc_root.join(DEFAULT_INDEX_NAME),
        };

        let library_name = match library_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => source_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "library".to_string()),
        };

        Ok(Self {
            doc_root,
            conf_path,
            index_path,
            source_root,
            library_name,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| ContextMakerError::io(path, e))
}

// ---------------------------------------------------------------------------
// Build strategy / escalation mode
// ---------------------------------------------------------------------------

/// Configuration strategy used for one build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    /// The project's own configuration, unchanged.
    Original,
    /// The project's configuration with process-exit hazards neutralized.
    Neutralized,
    /// A minimal configuration synthesized from the source tree.
    Synthesized,
}

impl BuildStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Neutralized => "neutralized",
            Self::Synthesized => "synthesized",
        }
    }
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the build escalation starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// Try the project's configuration first, then fall back to a synthesized one.
    Direct,
    /// Go straight to the synthesized configuration.
    #[default]
    Robust,
}

impl std::fmt::Display for EscalationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Robust => f.write_str("robust"),
        }
    }
}

/// Page format the build tool renders to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Markup pages, concatenated verbatim.
    #[default]
    Markdown,
    /// Styled HTML pages, stripped to text before concatenation.
    Html,
}

impl OutputFormat {
    /// File extension of rendered pages in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => f.write_str("markdown"),
            Self::Html => f.write_str("html"),
        }
    }
}
