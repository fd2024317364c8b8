//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use contextmaker_core::pipeline::{MakeConfig, MakeReport, ProgressReporter};
use contextmaker_core::{Jupytext, SphinxBuild};
use contextmaker_shared::{
    AppConfig, EscalationMode, OutputFormat, Project, init_config, load_config,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ContextMaker: flatten Sphinx documentation into one LLM-ready file.
#[derive(Parser)]
#[command(
    name = "contextmaker",
    version,
    about = "Build a Sphinx project and flatten it into a single text artifact.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Escalation entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum ModeArg {
    /// Project configuration first, synthesized one on failure.
    Direct,
    /// Synthesized configuration only.
    Robust,
}

impl From<ModeArg> for EscalationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => Self::Direct,
            ModeArg::Robust => Self::Robust,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build the documentation and write the flattened artifact.
    Build(BuildArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `build`.
#[derive(Args, Debug)]
pub(crate) struct BuildArgs {
    /// Artifact path.
    #[arg(long)]
    pub output: PathBuf,

    /// Documentation project root (where conf.py and index.rst live).
    #[arg(long)]
    pub sphinx_source: PathBuf,

    /// Library source root, exposed to the build and scanned for mocked imports.
    #[arg(long)]
    pub source_root: PathBuf,

    /// Configuration script (defaults to <sphinx-source>/conf.py).
    #[arg(long)]
    pub conf: Option<PathBuf>,

    /// Index document (defaults to <sphinx-source>/index.rst).
    #[arg(long)]
    pub index: Option<PathBuf>,

    /// Page names to leave out (comma-separated, no extension).
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Extra notebook to append.
    #[arg(long)]
    pub notebook: Option<PathBuf>,

    /// Name shown in the artifact title (defaults to the source root's name).
    #[arg(long)]
    pub library_name: Option<String>,

    /// Render styled HTML pages and strip them to text.
    #[arg(long)]
    pub html_to_text: bool,

    /// Escalation entry (defaults to the config value).
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Base directory for notebook discovery (defaults to the working directory).
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "contextmaker=info",
        1 => "contextmaker=debug",
        _ => "contextmaker=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build(args) => cmd_build(args),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_build(args: BuildArgs) -> Result<()> {
    let app = load_config()?;
    let config = make_config(&app, args)?;

    info!(
        sphinx_source = %config.project.doc_root.display(),
        source_root = %config.project.source_root.display(),
        output = %config.output.display(),
        mode = %config.mode,
        "building documentation artifact"
    );

    let builder = SphinxBuild::new(app.builder.clone());
    let converter = Jupytext::new(app.notebook.command.clone());
    let reporter = CliProgress::new();

    let report = contextmaker_core::make(&config, &builder, &converter, &reporter)?;

    println!();
    if report.build_failed {
        println!("  Documentation build failed; wrote title-only artifact.");
    } else {
        println!("  Artifact written successfully!");
    }
    println!("  Library:   {}", config.project.library_name);
    println!(
        "  Strategy:  {}",
        report.strategy.map(|s| s.as_str()).unwrap_or("none")
    );
    println!("  Attempts:  {}", report.attempts.len());
    println!("  Sections:  {}", report.assembled.sections.len());
    println!("  Orphans:   {}", report.assembled.orphans.len());
    println!("  Notebooks: {}", report.notebooks.len());
    println!("  Size:      {} bytes", report.assembled.size_bytes);
    println!("  SHA-256:   {}", report.assembled.sha256);
    println!("  Path:      {}", report.assembled.output.display());
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    println!();

    if report.build_failed {
        error!(attempts = report.attempts.len(), "every build strategy failed");
        return Err(eyre!(
            "documentation build failed after {} attempt(s); see the log for diagnostics",
            report.attempts.len()
        ));
    }

    Ok(())
}

/// Merge config file values and CLI flags into the pipeline's view.
fn make_config(app: &AppConfig, args: BuildArgs) -> Result<MakeConfig> {
    let project = Project::resolve(
        &args.sphinx_source,
        &args.source_root,
        args.conf.as_deref(),
        args.index.as_deref(),
        args.library_name.as_deref(),
    )?;

    let mode = args.mode.map_or(app.defaults.mode, EscalationMode::from);

    let mut exclude = app.defaults.exclude.clone();
    exclude.extend(
        args.exclude
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
    );

    let format = if args.html_to_text {
        OutputFormat::Html
    } else {
        OutputFormat::Markdown
    };

    let repo_root = match args.repo_root {
        Some(root) => root,
        None => std::env::current_dir()
            .map_err(|e| eyre!("cannot determine working directory: {e}"))?,
    };

    Ok(MakeConfig {
        project,
        output: args.output,
        exclude,
        format,
        mode,
        patcher: app.patcher.clone(),
        repo_root,
        notebook_search_dirs: app.notebook.search_dirs.clone(),
        notebook: args.notebook,
    })
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _report: &MakeReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn build_parses_required_and_list_flags() {
        let cli = parse(&[
            "contextmaker",
            "-vv",
            "build",
            "--output",
            "out/lib.md",
            "--sphinx-source",
            "docs",
            "--source-root",
            "src/lib",
            "--exclude",
            "changelog,license",
            "--html-to-text",
            "--mode",
            "direct",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.output, PathBuf::from("out/lib.md"));
        assert_eq!(args.exclude, vec!["changelog", "license"]);
        assert!(args.html_to_text);
        assert_eq!(args.mode, Some(ModeArg::Direct));
        assert!(args.conf.is_none());
    }

    #[test]
    fn build_requires_sources() {
        assert!(Cli::try_parse_from(["contextmaker", "build", "--output", "x.md"]).is_err());
    }

    #[test]
    fn make_config_merges_file_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let docs = root.join("docs");
        let src = root.join("mylib");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::create_dir_all(&src).unwrap();

        let mut app = AppConfig::default();
        app.defaults.exclude = vec!["genapi".into()];

        let cli = parse(&[
            "contextmaker",
            "build",
            "--output",
            "out.md",
            "--sphinx-source",
            docs.to_str().unwrap(),
            "--source-root",
            src.to_str().unwrap(),
            "--exclude",
            "changelog, ,license",
            "--repo-root",
            root.to_str().unwrap(),
        ]);
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        let config = make_config(&app, args).unwrap();

        assert_eq!(config.exclude, vec!["genapi", "changelog", "license"]);
        assert_eq!(config.mode, EscalationMode::Robust);
        assert_eq!(config.format, OutputFormat::Markdown);
        assert_eq!(config.project.library_name, "mylib");
        assert_eq!(config.project.conf_path, docs.join("conf.py"));
        assert_eq!(config.repo_root, root);
    }

    #[test]
    fn unknown_mode_is_rejected_by_parser() {
        let err = Cli::try_parse_from([
            "contextmaker",
            "build",
            "--output",
            "out.md",
            "--sphinx-source",
            "docs",
            "--source-root",
            "src",
            "--mode",
            "yolo",
        ])
        .err()
        .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn mode_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cli = parse(&[
            "contextmaker",
            "build",
            "--output",
            "out.md",
            "--sphinx-source",
            root.to_str().unwrap(),
            "--source-root",
            root.to_str().unwrap(),
            "--mode",
            "direct",
        ]);
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        let config = make_config(&AppConfig::default(), args).unwrap();
        assert_eq!(config.mode, EscalationMode::Direct);
    }
}
