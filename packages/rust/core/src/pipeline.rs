//! End-to-end `build` pipeline: patch → escalate → order → assemble → notebooks.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, info, instrument, warn};

use contextmaker_shared::{
    BuildStrategy, EscalationMode, OutputFormat, PatcherConfig, Project, Result,
};

use crate::assembler::{self, AssembleConfig, AssembleResult};
use crate::builder::Builder;
use crate::escalator::{Attempt, Escalator};
use crate::notebook::{self, NotebookConverter};
use crate::pages::RenderedPages;
use crate::patcher::HazardPatcher;
use crate::toctree::ToctreeResolver;

/// Configuration for the `make` pipeline.
#[derive(Debug, Clone)]
pub struct MakeConfig {
    pub project: Project,
    /// Artifact path.
    pub output: PathBuf,
    /// Page names left out of the artifact.
    pub exclude: Vec<String>,
    pub format: OutputFormat,
    pub mode: EscalationMode,
    pub patcher: PatcherConfig,
    /// Notebook discovery base.
    pub repo_root: PathBuf,
    /// Directories under `repo_root` searched for notebooks.
    pub notebook_search_dirs: Vec<String>,
    /// Extra notebook appended after the discovered ones.
    pub notebook: Option<PathBuf>,
}

/// Result of the `make` pipeline.
#[derive(Debug)]
pub struct MakeReport {
    /// Strategy of the successful build, if any.
    pub strategy: Option<BuildStrategy>,
    pub attempts: Vec<Attempt>,
    pub assembled: AssembleResult,
    /// Notebooks appended to the artifact.
    pub notebooks: Vec<PathBuf>,
    /// Every build strategy failed; the artifact holds the title only.
    pub build_failed: bool,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, report: &MakeReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _report: &MakeReport) {}
}

/// Run the full `build` pipeline.
///
/// 1. Build: patch sandboxed copies and escalate until the tool renders
/// 2. Order: resolve toctrees from the original sources
/// 3. Assemble the artifact
/// 4. Append notebooks
///
/// A build that fails under every strategy still writes a title-only
/// artifact and appends notebooks; the report's `build_failed` is set.
#[instrument(skip_all, fields(doc_root = %config.project.doc_root.display(), output = %config.output.display()))]
pub fn make(
    config: &MakeConfig,
    builder: &dyn Builder,
    converter: &dyn NotebookConverter,
    progress: &dyn ProgressReporter,
) -> Result<MakeReport> {
    let start = Instant::now();
    info!(
        library = %config.project.library_name,
        format = %config.format,
        mode = %config.mode,
        "starting build pipeline"
    );

    // --- Phase 1: Build ---
    progress.phase("Building documentation");
    let patcher = HazardPatcher::new(&config.patcher)?;
    let outcome = Escalator::new(builder, &patcher).run(&config.project, config.format, config.mode)?;
    let strategy = outcome.strategy();
    let attempts = outcome.attempts;

    let (pages, build_failed) = match outcome.result {
        Ok(pages) => (pages, false),
        Err(failure) => {
            error!(
                attempts = attempts.len(),
                hint = failure.hint.unwrap_or("none"),
                "documentation build failed under every strategy; writing title-only artifact"
            );
            (RenderedPages::empty(config.format), true)
        }
    };

    // --- Phase 2: Reading order ---
    let order = if build_failed {
        Vec::new()
    } else {
        progress.phase("Resolving reading order");
        let root = resolver_root(&config.project);
        ToctreeResolver::new(root).resolve(&config.project.index_path)
    };

    // --- Phase 3: Assemble ---
    progress.phase("Assembling artifact");
    let assemble_config = AssembleConfig {
        output: config.output.clone(),
        library_name: config.project.library_name.clone(),
        exclude: config.exclude.clone(),
    };
    let assembled = assembler::assemble(&assemble_config, &pages, &order)?;
    drop(pages);

    // --- Phase 4: Notebooks ---
    let candidates = notebook_candidates(config);
    let notebooks = if candidates.is_empty() {
        Vec::new()
    } else {
        progress.phase("Appending notebooks");
        notebook::append_notebooks(&config.output, &candidates, converter)?
    };

    let report = MakeReport {
        strategy,
        attempts,
        assembled,
        notebooks,
        build_failed,
        elapsed: start.elapsed(),
    };

    progress.done(&report);

    info!(
        sections = report.assembled.sections.len(),
        notebooks = report.notebooks.len(),
        strategy = report.strategy.map(|s| s.as_str()).unwrap_or("none"),
        elapsed_ms = report.elapsed.as_millis(),
        "build pipeline complete"
    );

    Ok(report)
}

/// Documents are named relative to the doc root when the index lives under
/// it, otherwise relative to the index's own directory.
fn resolver_root(project: &Project) -> PathBuf {
    if project.index_path.starts_with(&project.doc_root) {
        return project.doc_root.clone();
    }
    project
        .index_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project.doc_root.clone())
}

/// Discovered notebooks, then the explicit one unless it was already found.
fn notebook_candidates(config: &MakeConfig) -> Vec<PathBuf> {
    let mut notebooks = notebook::discover_notebooks(&config.repo_root, &config.notebook_search_dirs);

    if let Some(extra) = &config.notebook {
        let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
        let extra_canonical = canonical(extra);
        if notebooks.iter().any(|n| canonical(n) == extra_canonical) {
            warn!(notebook = %extra.display(), "notebook already discovered, not appending twice");
        } else {
            notebooks.push(extra.clone());
        }
    }

    notebooks
}
