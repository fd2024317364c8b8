//! Build escalation.
//!
//! Runs the build tool against progressively less faithful configurations
//! until one renders:
//!
//! ```text
//! Direct ──fail──▶ Synthesized ──fail──▶ Failed
//!   │                  │
//!   └──ok──▶ pages ◀───┘
//! ```
//!
//! `Direct` uses the project's own `conf.py` with hazards neutralized.
//! `Synthesized` uses a minimal configuration that mocks every importable unit
//! under the source root. `Robust` mode enters at `Synthesized`.
//!
//! Every directory created here is a [`Sandbox`]; the build output of the
//! successful attempt moves into the returned [`RenderedPages`].

use std::path::Path;

use tracing::{error, info, instrument, warn};

use contextmaker_shared::{
    BuildStrategy, ContextMakerError, DEFAULT_CONF_NAME, EscalationMode, OutputFormat, Project,
    Result,
};

use crate::builder::{BuildInvocation, BuildOutput, Builder, diagnose};
use crate::conf;
use crate::pages::RenderedPages;
use crate::patcher::{HazardPatcher, PatchedCopy};
use crate::sandbox::Sandbox;

/// Escalation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Direct,
    Synthesized,
    Failed,
}

impl EscalationState {
    /// Entry state for a mode.
    pub fn initial(mode: EscalationMode) -> Self {
        match mode {
            EscalationMode::Direct => Self::Direct,
            EscalationMode::Robust => Self::Synthesized,
        }
    }

    /// Next state after a failed attempt.
    pub fn on_failure(self) -> Self {
        match self {
            Self::Direct => Self::Synthesized,
            Self::Synthesized | Self::Failed => Self::Failed,
        }
    }
}

/// One build attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub strategy: BuildStrategy,
    /// `None` if the tool never ran or was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
}

/// Diagnostics of the last failed attempt.
#[derive(Debug, Clone, Default)]
pub struct BuildFailure {
    pub stdout: String,
    pub stderr: String,
    /// Likely cause, when recognisable.
    pub hint: Option<&'static str>,
}

/// What an escalation run produced.
#[derive(Debug)]
pub struct EscalationOutcome {
    pub attempts: Vec<Attempt>,
    pub result: std::result::Result<RenderedPages, BuildFailure>,
}

impl EscalationOutcome {
    /// Strategy of the successful attempt.
    pub fn strategy(&self) -> Option<BuildStrategy> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.success)
            .map(|a| a.strategy)
    }
}

type AttemptResult = (Attempt, std::result::Result<RenderedPages, BuildFailure>);

/// Drives a [`Builder`] through the escalation states.
pub struct Escalator<'a> {
    builder: &'a dyn Builder,
    patcher: &'a HazardPatcher,
}

/// Sandboxed inputs shared by every attempt.
struct Workspace {
    docs: PatchedCopy,
    source: PatchedCopy,
}

impl<'a> Escalator<'a> {
    pub fn new(builder: &'a dyn Builder, patcher: &'a HazardPatcher) -> Self {
        Self { builder, patcher }
    }

    /// Render `project` in `format`, starting at the state `mode` selects.
    ///
    /// `Err` is reserved for failures to prepare the sandboxes; a build that
    /// fails under every strategy is an `Ok` outcome holding a [`BuildFailure`].
    #[instrument(skip_all, fields(doc_root = %project.doc_root.display(), format = %format, mode = %mode))]
    pub fn run(
        &self,
        project: &Project,
        format: OutputFormat,
        mode: EscalationMode,
    ) -> Result<EscalationOutcome> {
        let workspace = Workspace {
            docs: self.patcher.copy_and_patch(&project.doc_root)?,
            source: self.patcher.copy_and_patch(&project.source_root)?,
        };

        let mut attempts = Vec::new();
        let mut last_failure = BuildFailure::default();
        let mut state = EscalationState::initial(mode);

        loop {
            let (attempt, result) = match state {
                EscalationState::Direct => self.try_direct(project, &workspace, format)?,
                EscalationState::Synthesized => {
                    self.try_synthesized(project, &workspace, format)?
                }
                EscalationState::Failed => {
                    error!(
                        attempts = attempts.len(),
                        stderr = %last_failure.stderr,
                        "all build strategies failed"
                    );
                    return Ok(EscalationOutcome {
                        attempts,
                        result: Err(last_failure),
                    });
                }
            };

            attempts.push(attempt);
            match result {
                Ok(pages) => {
                    return Ok(EscalationOutcome {
                        attempts,
                        result: Ok(pages),
                    });
                }
                Err(failure) => {
                    last_failure = failure;
                    state = state.on_failure();
                }
            }
        }
    }

    /// The project's own configuration, hazards neutralized.
    fn try_direct(
        &self,
        project: &Project,
        workspace: &Workspace,
        format: OutputFormat,
    ) -> Result<AttemptResult> {
        if !project.conf_path.is_file() {
            warn!(path = %project.conf_path.display(), "configuration file not found");
            return Ok((
                Attempt {
                    strategy: BuildStrategy::Original,
                    exit_code: None,
                    success: false,
                },
                Err(BuildFailure {
                    stderr: format!(
                        "configuration file {} not found",
                        project.conf_path.display()
                    ),
                    ..BuildFailure::default()
                }),
            ));
        }

        let original = std::fs::read(&project.conf_path)
            .map_err(|e| ContextMakerError::io(&project.conf_path, e))?;
        // Non-UTF-8 configurations (legacy coding cookies) run as written.
        let (patched, replacements) = match std::str::from_utf8(&original) {
            Ok(text) => {
                let (patched, n) = self.patcher.neutralize(text);
                (patched.into_bytes(), n)
            }
            Err(_) => {
                warn!(
                    path = %project.conf_path.display(),
                    "configuration is not valid UTF-8, left unpatched"
                );
                (original, 0)
            }
        };
        let strategy = if replacements > 0 {
            BuildStrategy::Neutralized
        } else {
            BuildStrategy::Original
        };

        match conf_in_docs(project) {
            Some(rel_dir) => {
                let conf_dir = workspace.docs.path().join(rel_dir);
                self.attempt(strategy, &conf_dir, workspace, format)
            }
            None => {
                let safe = Sandbox::new("safe_conf_")?;
                let conf_path = safe.path().join(DEFAULT_CONF_NAME);
                std::fs::write(&conf_path, patched)
                    .map_err(|e| ContextMakerError::io(&conf_path, e))?;
                info!(path = %conf_path.display(), "created safe conf.py");
                self.attempt(strategy, safe.path(), workspace, format)
            }
        }
    }

    /// A minimal configuration mocking the whole source tree.
    fn try_synthesized(
        &self,
        project: &Project,
        workspace: &Workspace,
        format: OutputFormat,
    ) -> Result<AttemptResult> {
        let synthesized = conf::synthesize(workspace.source.path(), &project.library_name)?;
        self.attempt(
            BuildStrategy::Synthesized,
            synthesized.conf_dir(),
            workspace,
            format,
        )
    }

    fn attempt(
        &self,
        strategy: BuildStrategy,
        conf_dir: &Path,
        workspace: &Workspace,
        format: OutputFormat,
    ) -> Result<AttemptResult> {
        let out = Sandbox::new("sphinx_build_")?;
        let invocation = BuildInvocation {
            format,
            conf_dir: conf_dir.to_path_buf(),
            source_dir: workspace.docs.path().to_path_buf(),
            out_dir: out.path().to_path_buf(),
            python_path: workspace.source.path().to_path_buf(),
        };

        info!(%strategy, "running build");
        let output = match self.builder.run(&invocation) {
            Ok(output) => output,
            Err(e) => {
                error!(%strategy, error = %e, "build tool could not be run");
                BuildOutput {
                    stderr: e.to_string(),
                    ..BuildOutput::default()
                }
            }
        };

        if output.success {
            let pages = RenderedPages::owned(out, format);
            if !pages.is_empty() {
                info!(%strategy, pages = pages.len(), "build succeeded");
                let attempt = Attempt {
                    strategy,
                    exit_code: output.exit_code,
                    success: true,
                };
                return Ok((attempt, Ok(pages)));
            }
            warn!(%strategy, "build exited cleanly but rendered no pages");
        }

        let hint = diagnose(&output.stderr);
        error!(
            %strategy,
            exit_code = ?output.exit_code,
            stdout = %output.stdout,
            stderr = %output.stderr,
            "build failed"
        );
        if let Some(hint) = hint {
            warn!(%strategy, hint, "likely cause");
        }

        let attempt = Attempt {
            strategy,
            exit_code: output.exit_code,
            success: false,
        };
        let failure = BuildFailure {
            stdout: output.stdout,
            stderr: output.stderr,
            hint,
        };
        Ok((attempt, Err(failure)))
    }
}

/// Directory of the configuration relative to the doc root, when it is the
/// doc tree's own `conf.py` (and so already present in the patched copy).
fn conf_in_docs(project: &Project) -> Option<&Path> {
    if project.conf_path.file_name()? != DEFAULT_CONF_NAME {
        return None;
    }
    let rel = project.conf_path.strip_prefix(&project.doc_root).ok()?;
    rel.parent()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use contextmaker_shared::PatcherConfig;

    use super::*;

    /// What the mock saw on one call.
    #[derive(Debug, Clone)]
    pub(crate) struct Call {
        pub conf_text: String,
        /// Entries of the python path while the build ran.
        pub python_path_entries: Vec<String>,
        pub conf_dir: PathBuf,
        pub out_dir: PathBuf,
        pub source_dir: PathBuf,
        pub python_path: PathBuf,
    }

    /// Builder that succeeds or fails per call, writing `pages` on success.
    pub(crate) struct ScriptedBuilder {
        script: RefCell<Vec<bool>>,
        pages: Vec<(&'static str, &'static str)>,
        pub calls: RefCell<Vec<Call>>,
    }

    impl ScriptedBuilder {
        pub fn new(script: &[bool], pages: &[(&'static str, &'static str)]) -> Self {
            let mut script = script.to_vec();
            script.reverse();
            Self {
                script: RefCell::new(script),
                pages: pages.to_vec(),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl Builder for ScriptedBuilder {
        fn run(&self, inv: &BuildInvocation) -> Result<BuildOutput> {
            self.calls.borrow_mut().push(Call {
                conf_text: std::fs::read_to_string(inv.conf_dir.join("conf.py"))
                    .unwrap_or_default(),
                python_path_entries: list_dir(&inv.python_path),
                conf_dir: inv.conf_dir.clone(),
                out_dir: inv.out_dir.clone(),
                source_dir: inv.source_dir.clone(),
                python_path: inv.python_path.clone(),
            });

            let ok = self.script.borrow_mut().pop().unwrap_or(false);
            if !ok {
                return Ok(BuildOutput {
                    success: false,
                    exit_code: Some(2),
                    stdout: "Running Sphinx".into(),
                    stderr: "Configuration error: boom".into(),
                });
            }
            for (name, content) in &self.pages {
                let path = inv.out_dir.join(format!("{name}.{}", inv.format.extension()));
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, content).unwrap();
            }
            Ok(BuildOutput {
                success: true,
                exit_code: Some(0),
                ..BuildOutput::default()
            })
        }
    }

    fn list_dir(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    struct Fixture {
        _root: tempfile::TempDir,
        project: Project,
    }

    fn fixture(conf: Option<&str>) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let docs = root.path().join("docs");
        let src = root.path().join("mylib");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::create_dir_all(src.join("mylib")).unwrap();
        std::fs::write(src.join("mylib/__init__.py"), "").unwrap();
        std::fs::write(docs.join("index.rst"), "Index\n=====\n").unwrap();
        if let Some(conf) = conf {
            std::fs::write(docs.join("conf.py"), conf).unwrap();
        }
        let project = Project::resolve(&docs, &src, None, None, None).unwrap();
        Fixture {
            _root: root,
            project,
        }
    }

    fn patcher() -> HazardPatcher {
        HazardPatcher::new(&PatcherConfig::default()).unwrap()
    }

    #[test]
    fn state_transitions() {
        assert_eq!(
            EscalationState::initial(EscalationMode::Direct),
            EscalationState::Direct
        );
        assert_eq!(
            EscalationState::initial(EscalationMode::Robust),
            EscalationState::Synthesized
        );
        assert_eq!(
            EscalationState::Direct.on_failure(),
            EscalationState::Synthesized
        );
        assert_eq!(
            EscalationState::Synthesized.on_failure(),
            EscalationState::Failed
        );
    }

    #[test]
    fn direct_success_with_clean_conf() {
        let fx = fixture(Some("project = 'x'\n"));
        let builder = ScriptedBuilder::new(&[true], &[("index", "# Index")]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.strategy(), Some(BuildStrategy::Original));
        let pages = outcome.result.as_ref().unwrap();
        assert_eq!(pages.pages().keys().collect::<Vec<_>>(), vec!["index"]);

        let call = &builder.calls()[0];
        assert_eq!(call.conf_text, "project = 'x'\n");
        assert_eq!(call.conf_dir, call.source_dir);
        assert_ne!(call.source_dir, fx.project.doc_root);
        assert_eq!(call.python_path_entries, vec!["mylib"]);
        assert!(!call.python_path.exists());
    }

    #[test]
    fn non_utf8_conf_still_runs_direct() {
        let fx = fixture(None);
        std::fs::write(&fx.project.conf_path, b"author = 'Jos\xe9'\n").unwrap();
        let builder = ScriptedBuilder::new(&[true], &[("index", "# Index")]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(outcome.strategy(), Some(BuildStrategy::Original));
        assert_eq!(builder.calls().len(), 1);
    }

    #[test]
    fn non_utf8_external_conf_is_copied_verbatim() {
        let fx = fixture(None);
        let external = fx.project.doc_root.parent().unwrap().join("legacy_conf.py");
        let bytes = b"# -*- coding: latin-1 -*-\nauthor = 'Jos\xe9'\n";
        std::fs::write(&external, bytes).unwrap();
        let project = Project::resolve(
            &fx.project.doc_root,
            &fx.project.source_root,
            Some(&external),
            None,
            None,
        )
        .unwrap();
        let builder = ScriptedBuilder::new(&[false, true], &[("index", "# Index")]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        // Direct ran with the file as written, then escalation carried on.
        let strategies: Vec<_> = outcome.attempts.iter().map(|a| a.strategy).collect();
        assert_eq!(
            strategies,
            vec![BuildStrategy::Original, BuildStrategy::Synthesized]
        );
        assert_eq!(builder.calls().len(), 2);
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn direct_neutralizes_exit_in_conf() {
        let conf = "import sys\nif not ok:\n    sys.exit('missing deps')\n";
        let fx = fixture(Some(conf));
        let builder = ScriptedBuilder::new(&[true], &[("index", "# Index")]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(outcome.strategy(), Some(BuildStrategy::Neutralized));
        assert_eq!(
            builder.calls()[0].conf_text,
            "import sys\nif not ok:\n    None\n"
        );
        let on_disk = std::fs::read_to_string(&fx.project.conf_path).unwrap();
        assert_eq!(on_disk, conf);
    }

    #[test]
    fn direct_failure_escalates_to_synthesized() {
        let fx = fixture(Some("project = 'x'\n"));
        let builder = ScriptedBuilder::new(&[false, true], &[("index", "# Index")]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        let strategies: Vec<_> = outcome.attempts.iter().map(|a| a.strategy).collect();
        assert_eq!(
            strategies,
            vec![BuildStrategy::Original, BuildStrategy::Synthesized]
        );
        assert_eq!(outcome.attempts[0].exit_code, Some(2));
        assert!(outcome.result.is_ok());

        let calls = builder.calls();
        assert!(calls[1].conf_text.contains("autodoc_mock_imports = ['mylib']"));
        assert!(!calls[0].out_dir.exists());
        assert!(!calls[1].conf_dir.exists());
    }

    #[test]
    fn both_failing_returns_last_diagnostics() {
        let fx = fixture(Some("project = 'x'\n"));
        let builder = ScriptedBuilder::new(&[false, false], &[]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.strategy(), None);
        let failure = outcome.result.unwrap_err();
        assert_eq!(failure.stderr, "Configuration error: boom");
        assert!(failure.hint.is_some());

        for call in builder.calls() {
            assert!(!call.out_dir.exists());
            assert!(!call.source_dir.exists());
        }
    }

    /// Log sink shared with a test subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn final_failure_diagnostics_are_logged() {
        let fx = fixture(Some("project = 'x'\n"));
        let builder = ScriptedBuilder::new(&[false, false], &[]);
        let patcher = patcher();

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let outcome = tracing::subscriber::with_default(subscriber, || {
            Escalator::new(&builder, &patcher)
                .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
                .unwrap()
        });
        assert!(outcome.result.is_err());

        let logs = logs.contents();
        assert!(logs.contains("build failed"));
        assert!(logs.contains("strategy=synthesized"));
        assert!(logs.contains("stdout=Running Sphinx"));
        assert!(logs.contains("stderr=Configuration error: boom"));
        assert!(logs.contains("likely cause"));
        assert!(logs.contains("all build strategies failed"));
    }

    #[test]
    fn robust_mode_makes_one_synthesized_attempt() {
        let fx = fixture(Some("import sys\nsys.exit(1)\n"));
        let builder = ScriptedBuilder::new(&[false], &[]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Robust)
            .unwrap();

        assert_eq!(
            outcome.attempts,
            vec![Attempt {
                strategy: BuildStrategy::Synthesized,
                exit_code: Some(2),
                success: false,
            }]
        );
        assert_eq!(builder.calls().len(), 1);
    }

    #[test]
    fn missing_conf_skips_straight_to_synthesized() {
        let fx = fixture(None);
        let builder = ScriptedBuilder::new(&[true], &[("index", "# Index")]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(builder.calls().len(), 1);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].success);
        assert_eq!(outcome.strategy(), Some(BuildStrategy::Synthesized));
    }

    #[test]
    fn external_conf_is_copied_as_conf_py() {
        let fx = fixture(None);
        let external = fx.project.doc_root.parent().unwrap().join("sphinx_conf.py");
        std::fs::write(&external, "sys.exit(0)\nproject = 'ext'\n").unwrap();
        let project = Project::resolve(
            &fx.project.doc_root,
            &fx.project.source_root,
            Some(&external),
            None,
            None,
        )
        .unwrap();
        let builder = ScriptedBuilder::new(&[true], &[("index", "# Index")]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(outcome.strategy(), Some(BuildStrategy::Neutralized));
        let call = &builder.calls()[0];
        assert_eq!(call.conf_text, "None\nproject = 'ext'\n");
        assert!(!call.conf_dir.exists());
    }

    #[test]
    fn clean_exit_without_pages_counts_as_failure() {
        let fx = fixture(Some("project = 'x'\n"));
        let builder = ScriptedBuilder::new(&[true, true], &[]);
        let patcher = patcher();

        let outcome = Escalator::new(&builder, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.result.is_err());
    }

    #[test]
    fn builder_spawn_error_escalates() {
        struct Missing;
        impl Builder for Missing {
            fn run(&self, _: &BuildInvocation) -> Result<BuildOutput> {
                Err(ContextMakerError::Build("failed to run sphinx-build".into()))
            }
        }
        let fx = fixture(Some("project = 'x'\n"));
        let patcher = patcher();

        let outcome = Escalator::new(&Missing, &patcher)
            .run(&fx.project, OutputFormat::Markdown, EscalationMode::Direct)
            .unwrap();

        assert_eq!(outcome.attempts.len(), 2);
        let failure = outcome.result.unwrap_err();
        assert!(failure.stderr.contains("failed to run sphinx-build"));
    }
}
