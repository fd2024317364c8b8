//! Reading order from `.. toctree::` directives.
//!
//! Starting at the index document, every toctree is scanned for child
//! documents, and each child that exists on disk is resolved in turn, its own
//! order spliced in right after its name. A single seen-set spans the whole
//! traversal, so each document appears once, at its first reference, and
//! cycles terminate.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, error, instrument, warn};
use walkdir::WalkDir;

/// Source document extension.
const SOURCE_EXT: &str = "rst";

/// One `.. toctree::` directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toctree {
    /// `:glob:` option present.
    pub glob: bool,
    /// Raw entry lines, trimmed, in order.
    pub entries: Vec<String>,
}

/// Extract every toctree directive from a document's text.
///
/// A directive's body ends at another explicit markup line (`.. `), or at the
/// first non-blank line with no indentation. Option lines are read for
/// `:glob:` and otherwise skipped; blank lines are skipped.
pub fn parse_toctrees(content: &str) -> Vec<Toctree> {
    let mut trees = Vec::new();
    let mut current: Option<Toctree> = None;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with(".. toctree::") {
            trees.extend(current.take());
            current = Some(Toctree::default());
            continue;
        }

        let Some(tree) = current.as_mut() else {
            continue;
        };

        if trimmed.is_empty() {
            continue;
        }
        // reStructuredText directive content is an indented block; the first
        // non-blank line back at column zero closes it.
        let indented = line.starts_with([' ', '\t']);
        if !indented || trimmed == ".." || trimmed.starts_with(".. ") {
            trees.extend(current.take());
            continue;
        }
        if trimmed.starts_with(':') {
            if trimmed.starts_with(":glob:") {
                tree.glob = true;
            }
            continue;
        }

        tree.entries.push(trimmed.to_string());
    }

    trees.extend(current);
    trees
}

/// Target of a toctree entry, or `None` for entries that name no document.
///
/// `Title <target>` yields `target`; `self` and URLs are skipped.
pub fn entry_target(entry: &str) -> Option<&str> {
    let entry = entry.trim();
    let target = match entry.rfind('<') {
        Some(open) if entry.ends_with('>') => entry[open + 1..entry.len() - 1].trim(),
        _ => entry,
    };

    if target.is_empty() || target == "self" || target.contains("://") {
        None
    } else {
        Some(target)
    }
}

/// Document name for `target` referenced from document `current`.
///
/// Names are relative to the documentation root with `/` separators. A
/// leading `/` is root-relative, anything else is relative to `current`'s
/// directory. `.`/`..` segments are resolved and a `.rst` suffix dropped.
pub fn normalize_name(current: &str, target: &str) -> Option<String> {
    let target = target.strip_suffix(".rst").unwrap_or(target);

    let mut segments: Vec<&str> = Vec::new();
    let relative = match target.strip_prefix('/') {
        Some(rooted) => rooted,
        None => {
            if let Some((dir, _)) = current.rsplit_once('/') {
                segments.extend(dir.split('/'));
            }
            target
        }
    };

    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

fn has_glob_chars(target: &str) -> bool {
    target.contains(['*', '?', '['])
}

/// Translate a document-name glob into an anchored regex.
/// `*` and `?` stay within one path segment; `**` crosses segments.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' || c == '[' {
                        re.push('\\');
                    }
                    re.push(c);
                }
                re.push(']');
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }

    re.push('$');
    Regex::new(&re).ok()
}

/// Resolves reading order for documents under one documentation root.
#[derive(Debug, Clone)]
pub struct ToctreeResolver {
    root: PathBuf,
}

impl ToctreeResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reading order starting at the index document. The index itself is not
    /// part of the result and is never revisited.
    #[instrument(skip_all, fields(index = %index_path.display()))]
    pub fn resolve(&self, index_path: &Path) -> Vec<String> {
        let index_name = self.doc_name(index_path);
        let mut seen = BTreeSet::from([index_name]);
        let order = self.resolve_document(index_path, &mut seen);
        debug!(documents = order.len(), "resolved reading order");
        order
    }

    /// Reading order below one document, sharing `seen` with the caller.
    ///
    /// Children are collected from every toctree first, then each child that
    /// exists on disk is resolved and spliced in after its name.
    pub fn resolve_document(&self, doc_path: &Path, seen: &mut BTreeSet<String>) -> Vec<String> {
        let content = match std::fs::read_to_string(doc_path) {
            Ok(content) => content,
            Err(e) => {
                error!(path = %doc_path.display(), error = %e, "could not read document");
                return Vec::new();
            }
        };

        let current = self.doc_name(doc_path);
        let mut children = Vec::new();
        for tree in parse_toctrees(&content) {
            for entry in &tree.entries {
                let Some(target) = entry_target(entry) else {
                    continue;
                };
                let names = if tree.glob && has_glob_chars(target) {
                    self.expand_glob(&current, target)
                } else {
                    normalize_name(&current, target).into_iter().collect()
                };
                for name in names {
                    if seen.insert(name.clone()) {
                        children.push(name);
                    }
                }
            }
        }

        let mut order = Vec::with_capacity(children.len());
        for child in children {
            let child_path = self.doc_path(&child);
            order.push(child);
            if child_path.is_file() {
                order.extend(self.resolve_document(&child_path, seen));
            } else {
                warn!(path = %child_path.display(), "referenced document not found");
            }
        }
        order
    }

    /// Documents under the root matching a glob entry, sorted, excluding
    /// the referencing document.
    fn expand_glob(&self, current: &str, pattern: &str) -> Vec<String> {
        let Some(regex) = normalize_name(current, pattern).and_then(|p| glob_to_regex(&p)) else {
            warn!(pattern, "invalid toctree glob");
            return Vec::new();
        };

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && (name.starts_with('_') || name.starts_with('.')))
            });

        let mut matches: Vec<String> = walker
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|e| e == SOURCE_EXT)
            })
            .map(|entry| self.doc_name(entry.path()))
            .filter(|name| name != current && regex.is_match(name))
            .collect();

        matches.sort();
        debug!(pattern, count = matches.len(), "expanded toctree glob");
        matches
    }

    /// `<root>/<name>.rst`
    fn doc_path(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(format!("{name}.{SOURCE_EXT}").split('/'));
        path
    }

    /// Name of a document file relative to the root.
    fn doc_name(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}
