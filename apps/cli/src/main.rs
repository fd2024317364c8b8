//! ContextMaker CLI: flatten a Sphinx documentation project into one file.
//!
//! Builds the documentation with `sphinx-build`, recovering from broken
//! configurations, then concatenates the pages in table-of-contents order
//! into a single artifact for LLM context.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli)
}
