//! Core pipeline orchestration and domain logic for ContextMaker.
//!
//! This crate ties together hazard patching, build escalation, toctree
//! ordering and artifact assembly into one end-to-end workflow (`make`).

pub mod assembler;
pub mod builder;
pub mod conf;
pub mod escalator;
pub mod notebook;
pub mod pages;
pub mod patcher;
pub mod pipeline;
pub mod sandbox;
pub mod toctree;

pub use builder::{Builder, SphinxBuild};
pub use notebook::{Jupytext, NotebookConverter};
pub use pipeline::{MakeConfig, MakeReport, ProgressReporter, SilentProgress, make};
