//! Rendered page sets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use contextmaker_shared::OutputFormat;

use crate::sandbox::Sandbox;

/// Build-tool bookkeeping pages that are not part of the documentation.
const BOOKKEEPING_PAGES: &[&str] = &["genindex", "search", "py-modindex"];

/// Pages produced by one successful build, keyed by page name.
///
/// A page name is the file's path relative to the output root with the
/// extension stripped and `/` separators (`index`, `api/core`).
#[derive(Debug)]
pub struct RenderedPages {
    root: PathBuf,
    format: OutputFormat,
    pages: BTreeMap<String, PathBuf>,
    _sandbox: Option<Sandbox>,
}

impl RenderedPages {
    /// Index an existing output directory. The directory is not owned.
    pub fn scan(root: &Path, format: OutputFormat) -> Self {
        Self {
            root: root.to_path_buf(),
            format,
            pages: collect_pages(root, format),
            _sandbox: None,
        }
    }

    /// Index a build output sandbox and take ownership of it.
    pub fn owned(sandbox: Sandbox, format: OutputFormat) -> Self {
        let root = sandbox.path().to_path_buf();
        let pages = collect_pages(&root, format);
        Self {
            root,
            format,
            pages,
            _sandbox: Some(sandbox),
        }
    }

    /// No pages at all; used when every build attempt failed.
    pub fn empty(format: OutputFormat) -> Self {
        Self {
            root: PathBuf::new(),
            format,
            pages: BTreeMap::new(),
            _sandbox: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Page name → file path, sorted by name.
    pub fn pages(&self) -> &BTreeMap<String, PathBuf> {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

fn collect_pages(root: &Path, format: OutputFormat) -> BTreeMap<String, PathBuf> {
    let ext = format.extension();
    let mut pages = BTreeMap::new();

    let walker = WalkDir::new(root).min_depth(1).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !(e.file_type().is_dir() && (name.starts_with('_') || name.starts_with('.')))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "could not read output entry, skipping");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|e| e != ext) {
            continue;
        }
        let Ok(rel) = path.with_extension("").strip_prefix(root).map(Path::to_path_buf) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if BOOKKEEPING_PAGES.contains(&key.as_str()) {
            continue;
        }
        pages.insert(key, path.to_path_buf());
    }

    debug!(root = %root.display(), count = pages.len(), "collected rendered pages");
    pages
}
