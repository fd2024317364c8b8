//! External documentation build tool.
//!
//! The build tool is an opaque subprocess: it takes a rendering mode, a
//! configuration directory, a source tree and an output directory, and
//! reports success through its exit status.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use contextmaker_shared::{BuilderConfig, ContextMakerError, OutputFormat, Result};

/// One invocation of the build tool.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    pub format: OutputFormat,
    /// Directory containing `conf.py`.
    pub conf_dir: PathBuf,
    /// Documentation source tree.
    pub source_dir: PathBuf,
    /// Where rendered pages are written.
    pub out_dir: PathBuf,
    /// Prepended to `PYTHONPATH`.
    pub python_path: PathBuf,
}

/// Captured result of one build.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Capability to render a documentation tree.
///
/// `Err` means the tool could not be run at all; a tool that ran and failed
/// returns `Ok` with `success == false`.
pub trait Builder {
    fn run(&self, invocation: &BuildInvocation) -> Result<BuildOutput>;
}

/// `sphinx-build` (or a compatible command) as a blocking subprocess.
#[derive(Debug, Clone)]
pub struct SphinxBuild {
    config: BuilderConfig,
}

impl SphinxBuild {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    fn builder_name(&self, format: OutputFormat) -> &str {
        match format {
            OutputFormat::Markdown => &self.config.markdown_builder,
            OutputFormat::Html => &self.config.html_builder,
        }
    }

    /// Arguments passed after the command name.
    pub fn args(&self, invocation: &BuildInvocation) -> Vec<OsString> {
        vec![
            "-b".into(),
            self.builder_name(invocation.format).into(),
            "-c".into(),
            invocation.conf_dir.clone().into(),
            invocation.source_dir.clone().into(),
            invocation.out_dir.clone().into(),
        ]
    }

    /// Human-readable command line, for logs.
    pub fn command_line(&self, invocation: &BuildInvocation) -> String {
        let mut line = self.config.command.clone();
        for arg in self.args(invocation) {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

impl Builder for SphinxBuild {
    fn run(&self, invocation: &BuildInvocation) -> Result<BuildOutput> {
        debug!(command = %self.command_line(invocation), "running build tool");

        let output = Command::new(&self.config.command)
            .args(self.args(invocation))
            .env("PYTHONPATH", python_path(&invocation.python_path)?)
            .output()
            .map_err(|e| {
                ContextMakerError::Build(format!("failed to run {}: {e}", self.config.command))
            })?;

        Ok(BuildOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// `first` followed by any existing `PYTHONPATH` entries.
fn python_path(first: &Path) -> Result<OsString> {
    let mut paths = vec![first.to_path_buf()];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths)
        .map_err(|e| ContextMakerError::Build(format!("invalid PYTHONPATH entry: {e}")))
}

/// Map build-tool stderr to a short hint about the likely cause.
pub fn diagnose(stderr: &str) -> Option<&'static str> {
    if stderr.contains("SystemExit") || stderr.contains("sys.exit") {
        Some("configuration still calls sys.exit; the project aborts when its checks fail")
    } else if stderr.contains("partially initialized module") || stderr.contains("circular import")
    {
        Some("circular import in the documented package; mocking may resolve it")
    } else if stderr.contains("ModuleNotFoundError") || stderr.contains("ImportError") {
        Some("a module imported by the configuration or autodoc is not installed")
    } else if stderr.contains("Configuration error") || stderr.contains("conf.py") {
        Some("the configuration script raised an error")
    } else {
        None
    }
}
