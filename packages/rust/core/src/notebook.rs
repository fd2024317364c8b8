//! Notebook appendix.
//!
//! Notebooks are converted to text by an external tool and appended to an
//! already-written artifact, one at a time.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, instrument, warn};

use contextmaker_shared::{ContextMakerError, Result};

use crate::sandbox::Sandbox;

/// Heading written before each appended notebook.
pub const NOTEBOOK_HEADING: &str = "\n\n# Notebook\n\n---\n\n";

/// Capability to turn a notebook into text.
pub trait NotebookConverter {
    fn convert(&self, notebook: &Path) -> Result<String>;
}

/// `jupytext --to md`, run on a sandboxed copy of the notebook.
#[derive(Debug, Clone)]
pub struct Jupytext {
    command: String,
}

impl Jupytext {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl NotebookConverter for Jupytext {
    fn convert(&self, notebook: &Path) -> Result<String> {
        let program = which::which(&self.command).map_err(|e| {
            ContextMakerError::Notebook(format!("{} is required to convert notebooks: {e}", self.command))
        })?;

        let file_name = notebook.file_name().ok_or_else(|| {
            ContextMakerError::validation(format!("{} has no file name", notebook.display()))
        })?;
        let sandbox = Sandbox::new("notebook_")?;
        let copy = sandbox.path().join(file_name);
        std::fs::copy(notebook, &copy).map_err(|e| ContextMakerError::io(notebook, e))?;

        debug!(notebook = %notebook.display(), "converting notebook");
        let output = Command::new(&program)
            .args(["--to", "md", "--opt", "notebook_metadata_filter=-all"])
            .arg(&copy)
            .output()
            .map_err(|e| {
                ContextMakerError::Notebook(format!("failed to run {}: {e}", self.command))
            })?;

        if !output.status.success() {
            return Err(ContextMakerError::Notebook(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let md_path = copy.with_extension("md");
        if !md_path.is_file() {
            return Err(ContextMakerError::Notebook(format!(
                "expected {} after conversion",
                md_path.display()
            )));
        }
        std::fs::read_to_string(&md_path).map_err(|e| ContextMakerError::io(&md_path, e))
    }
}

/// `*.ipynb` files directly inside each of `search_dirs` under `repo_root`,
/// sorted by path.
pub fn discover_notebooks(repo_root: &Path, search_dirs: &[String]) -> Vec<PathBuf> {
    let mut notebooks: Vec<PathBuf> = search_dirs
        .iter()
        .map(|dir| repo_root.join(dir))
        .filter(|dir| dir.is_dir())
        .filter_map(|dir| std::fs::read_dir(&dir).ok())
        .flat_map(|entries| entries.flatten().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "ipynb"))
        .collect();

    notebooks.sort();
    notebooks.dedup();
    debug!(count = notebooks.len(), "discovered notebooks");
    notebooks
}

/// Convert each notebook and append it to `output` under [`NOTEBOOK_HEADING`].
///
/// A notebook that fails to convert is logged and skipped. Returns the
/// notebooks that were appended.
#[instrument(skip_all, fields(output = %output.display(), notebooks = notebooks.len()))]
pub fn append_notebooks(
    output: &Path,
    notebooks: &[PathBuf],
    converter: &dyn NotebookConverter,
) -> Result<Vec<PathBuf>> {
    let mut appended = Vec::new();

    for notebook in notebooks {
        let text = match converter.convert(notebook) {
            Ok(text) => text,
            Err(e) => {
                warn!(notebook = %notebook.display(), error = %e, "notebook conversion failed, skipping");
                continue;
            }
        };

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(output)
            .map_err(|e| ContextMakerError::io(output, e))?;
        file.write_all(NOTEBOOK_HEADING.as_bytes())
            .and_then(|()| file.write_all(text.as_bytes()))
            .map_err(|e| ContextMakerError::io(output, e))?;

        info!(notebook = %notebook.display(), "appended notebook");
        appended.push(notebook.clone());
    }

    Ok(appended)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Converter returning canned text, failing for names containing "broken".
    pub(crate) struct FakeConverter;

    impl NotebookConverter for FakeConverter {
        fn convert(&self, notebook: &Path) -> Result<String> {
            let stem = notebook.file_stem().unwrap().to_string_lossy();
            if stem.contains("broken") {
                return Err(ContextMakerError::Notebook("bad json".into()));
            }
            Ok(format!("Notebook {stem}\n"))
        }
    }

    #[test]
    fn discover_finds_direct_children_sorted() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        std::fs::create_dir_all(r.join("docs/source")).unwrap();
        std::fs::create_dir_all(r.join("docs/deep/nested")).unwrap();
        std::fs::write(r.join("docs/b.ipynb"), "{}").unwrap();
        std::fs::write(r.join("docs/a.ipynb"), "{}").unwrap();
        std::fs::write(r.join("docs/notes.md"), "").unwrap();
        std::fs::write(r.join("docs/source/tour.ipynb"), "{}").unwrap();
        std::fs::write(r.join("docs/deep/nested/x.ipynb"), "{}").unwrap();

        let found = discover_notebooks(
            r,
            &["docs".into(), "doc".into(), "docs/source".into()],
        );
        assert_eq!(
            found,
            vec![
                r.join("docs/a.ipynb"),
                r.join("docs/b.ipynb"),
                r.join("docs/source/tour.ipynb"),
            ]
        );
    }

    #[test]
    fn append_writes_heading_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.md");
        std::fs::write(&output, "# - lib | Complete Documentation -\n\n").unwrap();
        let notebooks = vec![
            dir.path().join("first.ipynb"),
            dir.path().join("broken.ipynb"),
            dir.path().join("second.ipynb"),
        ];

        let appended = append_notebooks(&output, &notebooks, &FakeConverter).unwrap();
        assert_eq!(appended, vec![notebooks[0].clone(), notebooks[2].clone()]);

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(
            text,
            "# - lib | Complete Documentation -\n\n\
             \n\n# Notebook\n\n---\n\nNotebook first\n\
             \n\n# Notebook\n\n---\n\nNotebook second\n"
        );
    }

    #[test]
    fn missing_converter_command_is_a_notebook_error() {
        let dir = tempfile::tempdir().unwrap();
        let nb = dir.path().join("a.ipynb");
        std::fs::write(&nb, "{}").unwrap();

        let err = Jupytext::new("contextmaker-no-such-jupytext")
            .convert(&nb)
            .unwrap_err();
        assert!(matches!(err, ContextMakerError::Notebook(_)));
    }
}
