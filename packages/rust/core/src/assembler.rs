//! Artifact assembler.
//!
//! Takes the rendered pages, the reading order and an exclusion list, then
//! writes the single flattened artifact to disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use contextmaker_shared::{ContextMakerError, OutputFormat, Result};

use crate::pages::RenderedPages;

/// Reserved name of the index page.
const INDEX_NAME: &str = "index";

/// Separator written before every section but the first.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Output from a successful assembly.
#[derive(Debug, Clone)]
pub struct AssembleResult {
    /// Path of the written artifact.
    pub output: PathBuf,
    /// Section names, in emitted order.
    pub sections: Vec<String>,
    /// Sections that no toctree referenced.
    pub orphans: Vec<String>,
    pub size_bytes: usize,
    pub sha256: String,
}

/// Configuration for one assembly.
#[derive(Debug, Clone)]
pub struct AssembleConfig {
    /// Artifact path; parent directories are created.
    pub output: PathBuf,
    /// Name shown in the artifact title.
    pub library_name: String,
    /// Page names left out, matched against the page key or its base name.
    pub exclude: Vec<String>,
}

/// Section order for a set of pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionPlan {
    /// Page keys, in emitted order.
    pub sections: Vec<String>,
    /// The trailing subset of `sections` that no toctree referenced.
    pub orphans: Vec<String>,
}

/// Title line that opens every artifact.
pub fn title_line(library_name: &str) -> String {
    format!("# - {library_name} | Complete Documentation -\n\n")
}

/// Order page keys: index first, then the reading order, then everything
/// else sorted by path. Excluded pages are dropped before ordering.
pub fn plan_sections<'a>(
    pages: &'a BTreeMap<String, PathBuf>,
    order: &[String],
    exclude: &[String],
) -> SectionPlan {
    let excluded: BTreeSet<&str> = exclude
        .iter()
        .map(|e| normalize_exclusion(e))
        .filter(|e| !e.is_empty())
        .collect();
    let is_excluded = |key: &str| {
        let base = key.rsplit('/').next().unwrap_or(key);
        excluded.contains(key) || excluded.contains(base)
    };

    let mut pool: BTreeMap<&'a str, &'a Path> = pages
        .iter()
        .filter(|(key, _)| !is_excluded(key.as_str()))
        .map(|(key, path)| (key.as_str(), path.as_path()))
        .collect();

    let mut plan = SectionPlan::default();

    let index_key = pool
        .keys()
        .copied()
        .find(|key| key.eq_ignore_ascii_case(INDEX_NAME));
    if let Some(key) = index_key {
        pool.remove(key);
        plan.sections.push(key.to_string());
    }

    for name in order {
        if pool.remove(name.as_str()).is_some() {
            plan.sections.push(name.clone());
        } else if !is_excluded(name.as_str()) && !plan.sections.contains(name) {
            debug!(page = %name, "referenced in toctree but not rendered");
        }
    }

    let mut orphans: Vec<(&Path, &str)> = pool.into_iter().map(|(k, p)| (p, k)).collect();
    orphans.sort();
    for (_, key) in orphans {
        plan.sections.push(key.to_string());
        plan.orphans.push(key.to_string());
    }

    plan
}

fn normalize_exclusion(entry: &str) -> &str {
    let entry = entry.trim();
    [".md", ".html", ".rst"]
        .iter()
        .find_map(|ext| entry.strip_suffix(ext))
        .unwrap_or(entry)
}

/// Write the artifact for `pages` in reading order.
///
/// A page that can't be read or converted is logged and left out.
#[instrument(skip_all, fields(output = %config.output.display(), pages = pages.len()))]
pub fn assemble(
    config: &AssembleConfig,
    pages: &RenderedPages,
    order: &[String],
) -> Result<AssembleResult> {
    let plan = plan_sections(pages.pages(), order, &config.exclude);
    if !plan.orphans.is_empty() {
        info!(orphans = ?plan.orphans, "pages not referenced by any toctree");
    }

    let mut content = title_line(&config.library_name);
    let mut sections = Vec::with_capacity(plan.sections.len());

    for key in &plan.sections {
        let Some(path) = pages.pages().get(key) else {
            continue;
        };
        let body = match read_page(path, pages.format()) {
            Ok(body) => body,
            Err(e) => {
                warn!(page = %key, error = %e, "could not read page, skipping");
                continue;
            }
        };

        if !sections.is_empty() {
            content.push_str(SECTION_SEPARATOR);
        }
        content.push_str("## ");
        content.push_str(key);
        content.push_str("\n\n");
        content.push_str(&body);
        content.push_str("\n\n");
        sections.push(key.clone());
    }

    write_artifact(&config.output, &content)?;

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let sha256 = format!("{:x}", hasher.finalize());

    let orphans = plan
        .orphans
        .into_iter()
        .filter(|o| sections.contains(o))
        .collect();

    info!(
        sections = sections.len(),
        size = content.len(),
        path = %config.output.display(),
        "artifact written"
    );

    Ok(AssembleResult {
        output: config.output.clone(),
        sections,
        orphans,
        size_bytes: content.len(),
        sha256,
    })
}

fn read_page(path: &Path, format: OutputFormat) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| ContextMakerError::io(path, e))?;
    match format {
        OutputFormat::Markdown => Ok(raw),
        OutputFormat::Html => contextmaker_markdown::html_to_text(&raw),
    }
}

fn write_artifact(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ContextMakerError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| ContextMakerError::io(path, e))?;
    debug!(path = %path.display(), size = content.len(), "wrote artifact");
    Ok(())
}
