//! Hazard patcher.
//!
//! A documentation project's `conf.py` (and the library code it imports) runs
//! inside the build tool. A `sys.exit()` in there takes the whole build down
//! with no recoverable error. The patcher copies a tree into a [`Sandbox`] and
//! replaces every such call with an inert `None`, leaving the original alone.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use contextmaker_shared::{ContextMakerError, PatcherConfig, Result};

use crate::sandbox::Sandbox;

/// Replacement for a neutralized call. Valid as both a statement and an expression.
pub const PLACEHOLDER: &str = "None";

/// Directories never copied into a sandbox.
const SKIPPED_DIRS: &[&str] = &[".git", "__pycache__", ".tox", ".nox", "node_modules", "_build"];

/// Neutralizes process-terminating calls in source files.
#[derive(Debug, Clone)]
pub struct HazardPatcher {
    pattern: Regex,
    extensions: Vec<String>,
}

/// A patched copy of a file or directory. The copy lives as long as this value.
#[derive(Debug)]
pub struct PatchedCopy {
    sandbox: Sandbox,
    path: PathBuf,
    /// Files that had at least one call neutralized.
    pub files_patched: usize,
    /// Total number of calls neutralized.
    pub replacements: usize,
}

impl PatchedCopy {
    /// Path of the copy (same base name as the original).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root of the owning sandbox.
    pub fn sandbox_root(&self) -> &Path {
        self.sandbox.path()
    }
}

impl HazardPatcher {
    /// Build a patcher from dotted call names (`sys.exit`) and file extensions.
    pub fn new(config: &PatcherConfig) -> Result<Self> {
        if config.hazards.is_empty() {
            return Err(ContextMakerError::config("patcher.hazards must not be empty"));
        }

        let alternatives: Vec<String> = config
            .hazards
            .iter()
            .map(|hazard| {
                hazard
                    .trim()
                    .split('.')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s*\.\s*")
            })
            .collect();
        let pattern = format!(r"\b(?:{})\s*\(", alternatives.join("|"));
        let pattern = Regex::new(&pattern)
            .map_err(|e| ContextMakerError::config(format!("invalid hazard pattern: {e}")))?;

        let extensions = config
            .extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Ok(Self {
            pattern,
            extensions,
        })
    }

    /// Replace every hazardous call in `source` with [`PLACEHOLDER`].
    ///
    /// The call's arguments are matched with balanced parentheses, so
    /// `sys.exit(main())` is replaced whole. A call with no closing paren is
    /// left as is. Returns the new text and the number of replacements.
    pub fn neutralize(&self, source: &str) -> (String, usize) {
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        let mut search_from = 0;
        let mut count = 0;

        while let Some(m) = self.pattern.find_at(source, search_from) {
            match closing_paren(source, m.end()) {
                Some(end) => {
                    out.push_str(&source[cursor..m.start()]);
                    out.push_str(PLACEHOLDER);
                    cursor = end;
                    search_from = end;
                    count += 1;
                }
                None => search_from = m.end(),
            }
        }

        out.push_str(&source[cursor..]);
        (out, count)
    }

    /// Whether `path` has one of the patched extensions.
    pub fn applies_to(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    /// Copy `original` (file or directory) into a new sandbox and patch every
    /// matching file in the copy. The original is never written.
    ///
    /// A file that can't be copied or patched is logged and skipped.
    #[instrument(skip_all, fields(original = %original.display()))]
    pub fn copy_and_patch(&self, original: &Path) -> Result<PatchedCopy> {
        let sandbox = Sandbox::new("patched_src_")?;
        let base_name = original
            .file_name()
            .ok_or_else(|| {
                ContextMakerError::validation(format!("{} has no base name", original.display()))
            })?
            .to_os_string();
        let dest = sandbox.path().join(&base_name);

        let mut copy = PatchedCopy {
            sandbox,
            path: dest.clone(),
            files_patched: 0,
            replacements: 0,
        };

        if original.is_dir() {
            self.copy_tree(original, &dest, &mut copy)?;
        } else {
            std::fs::copy(original, &dest).map_err(|e| ContextMakerError::io(original, e))?;
            self.patch_counted(&dest, &mut copy);
        }

        if copy.replacements > 0 {
            info!(
                files = copy.files_patched,
                replacements = copy.replacements,
                path = %copy.path.display(),
                "neutralized process-exit calls in sandboxed copy"
            );
        }

        Ok(copy)
    }

    /// Patch one file in place. Returns the number of replacements.
    pub fn patch_file(&self, path: &Path) -> Result<usize> {
        let bytes = std::fs::read(path).map_err(|e| ContextMakerError::io(path, e))?;
        let Ok(content) = String::from_utf8(bytes) else {
            debug!(path = %path.display(), "not valid UTF-8, copied unpatched");
            return Ok(0);
        };
        let (patched, count) = self.neutralize(&content);
        if count > 0 {
            std::fs::write(path, patched).map_err(|e| ContextMakerError::io(path, e))?;
            debug!(path = %path.display(), replacements = count, "patched file");
        }
        Ok(count)
    }

    fn copy_tree(&self, original: &Path, dest: &Path, copy: &mut PatchedCopy) -> Result<()> {
        std::fs::create_dir_all(dest).map_err(|e| ContextMakerError::io(dest, e))?;

        let walker = WalkDir::new(original).min_depth(1).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "could not read entry, skipping");
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(original) else {
                continue;
            };
            let target = dest.join(rel);

            if entry.file_type().is_dir() {
                if let Err(e) = std::fs::create_dir_all(&target) {
                    warn!(path = %target.display(), error = %e, "could not create directory, skipping");
                }
                continue;
            }

            // Symlinks are followed by `fs::copy`; dangling ones fail and are skipped.
            if let Err(e) = std::fs::copy(entry.path(), &target) {
                warn!(path = %entry.path().display(), error = %e, "could not copy file, skipping");
                continue;
            }

            if self.applies_to(&target) {
                self.patch_counted(&target, copy);
            }
        }

        Ok(())
    }

    fn patch_counted(&self, path: &Path, copy: &mut PatchedCopy) {
        match self.patch_file(path) {
            Ok(0) => {}
            Ok(n) => {
                copy.files_patched += 1;
                copy.replacements += n;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "could not patch file, skipping"),
        }
    }
}

/// Index just past the `)` that closes a call whose `(` ends at `open_end`.
/// Quoted strings are skipped so parens inside them don't count.
fn closing_paren(source: &str, open_end: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in source[open_end..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open_end + offset + 1);
                }
            }
            _ => {}
        }
    }

    None
}
