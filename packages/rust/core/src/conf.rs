//! Minimal `conf.py` synthesis.
//!
//! When a project's own configuration can't be made to build, a replacement is
//! rendered from scratch: the source root on `sys.path`, a fixed set of
//! extensions, and every importable unit under the source root registered in
//! `autodoc_mock_imports` so autodoc never has to import the real thing.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use contextmaker_shared::{ContextMakerError, Result};

use crate::sandbox::Sandbox;

/// Python file extensions that make a file importable.
const MODULE_EXTENSIONS: &[&str] = &["py", "so", "pyd"];

/// A synthesized configuration directory containing `conf.py`.
#[derive(Debug)]
pub struct SynthesizedConf {
    sandbox: Sandbox,
    /// Names registered as mocked imports.
    pub mock_imports: Vec<String>,
}

impl SynthesizedConf {
    /// Directory to pass to the build tool's `-c` flag.
    pub fn conf_dir(&self) -> &Path {
        self.sandbox.path()
    }
}

/// Render a minimal configuration for `source_root` into a fresh sandbox.
#[instrument(skip_all, fields(source_root = %source_root.display()))]
pub fn synthesize(source_root: &Path, project_name: &str) -> Result<SynthesizedConf> {
    let mock_imports = discover_mock_imports(source_root);
    let sandbox = Sandbox::new("minimal_conf_")?;
    let conf_path = sandbox.path().join("conf.py");

    let content = render_minimal_conf(source_root, project_name, &mock_imports);
    std::fs::write(&conf_path, content).map_err(|e| ContextMakerError::io(&conf_path, e))?;

    info!(
        path = %conf_path.display(),
        mocked = mock_imports.len(),
        "created minimal conf.py"
    );

    Ok(SynthesizedConf {
        sandbox,
        mock_imports,
    })
}

/// Enumerate top-level modules and packages under `source_root`, plus the
/// direct children of each package as `pkg.sub`. Nothing is imported.
///
/// Returns a sorted, de-duplicated list.
pub fn discover_mock_imports(source_root: &Path) -> Vec<String> {
    let mut names = BTreeSet::new();

    let entries = match std::fs::read_dir(source_root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %source_root.display(), error = %e, "could not list source root");
            return Vec::new();
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if !is_package(&path) {
                continue;
            }
            let Some(pkg) = dir_unit_name(&path) else {
                continue;
            };
            for sub in package_children(&path) {
                names.insert(format!("{pkg}.{sub}"));
            }
            names.insert(pkg);
        } else if let Some(module) = module_name(&path) {
            names.insert(module);
        }
    }

    debug!(count = names.len(), "discovered importable units");
    names.into_iter().collect()
}

/// Names of the modules and subpackages directly inside a package.
fn package_children(pkg_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(pkg_dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                is_package(&path).then(|| dir_unit_name(&path)).flatten()
            } else {
                module_name(&path).filter(|name| name != "__init__")
            }
        })
        .collect()
}

fn is_package(dir: &Path) -> bool {
    dir.join("__init__.py").is_file()
}

fn dir_unit_name(dir: &Path) -> Option<String> {
    let name = dir.file_name()?.to_str()?;
    is_identifier(name).then(|| name.to_string())
}

/// Module name of an importable file: the text before the first `.`, so
/// `_speedups.cpython-312-x86_64-linux-gnu.so` is `_speedups`.
fn module_name(file: &Path) -> Option<String> {
    let ext = file.extension()?.to_str()?;
    if !MODULE_EXTENSIONS.contains(&ext) {
        return None;
    }
    let file_name = file.file_name()?.to_str()?;
    let stem = file_name.split('.').next()?;
    is_identifier(stem).then(|| stem.to_string())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Quote `value` as a single-quoted Python string literal.
fn py_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Render the `conf.py` text.
pub fn render_minimal_conf(source_root: &Path, project_name: &str, mocks: &[String]) -> String {
    let mock_list = mocks.iter().map(|m| py_str(m)).collect::<Vec<_>>().join(", ");

    format!(
        "# Minimal Sphinx configuration generated by contextmaker\n\
         import os\n\
         import sys\n\
         sys.path.insert(0, {root})\n\
         \n\
         project = {project}\n\
         copyright = ''\n\
         author = ''\n\
         release = ''\n\
         version = ''\n\
         \n\
         extensions = [\n    \
             'sphinx.ext.autodoc',\n    \
             'sphinx.ext.napoleon',\n    \
             'sphinx.ext.viewcode',\n    \
             'sphinx.ext.intersphinx',\n\
         ]\n\
         templates_path = ['_templates']\n\
         exclude_patterns = ['_build', 'Thumbs.db', '.DS_Store']\n\
         html_theme = 'alabaster'\n\
         autodoc_mock_imports = [{mock_list}]\n\
         intersphinx_mapping = {{\n    \
             'python': ('https://docs.python.org/3/', None),\n\
         }}\n",
        root = py_str(&source_root.to_string_lossy()),
        project = py_str(project_name),
    )
}
