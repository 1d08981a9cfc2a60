//! Error kinds for each component (§7), composed under one top-level
//! [`PexError`] the binary boundary can format as the single diagnostic
//! line §7 requires. Individual components return their own leaf error
//! (`thiserror`); `anyhow::Error` carries arbitrary I/O context up to that
//! boundary, exactly as rustup's `src/errors.rs` composes `RustupError`
//! under `anyhow` (see also `src/cli/proxy_mode.rs`'s `ExitCode` pattern,
//! reused below).

use std::path::PathBuf;

use thiserror::Error;

use crate::interpreter::InterpreterHandle;

/// A fatal top-level error, the sole kind the launcher binary prints to
/// stderr before exiting non-zero (§7 propagation policy).
#[derive(Error, Debug)]
pub enum PexError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    UnsatisfiableInterpreter(#[from] UnsatisfiableInterpreter),
    #[error(transparent)]
    Venv(#[from] VenvError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Archive manifest missing, malformed, or referencing an incompatible
/// schema version. Fatal, exit code 1.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("archive at '{}' has no PEX-INFO manifest", .0.display())]
    Missing(PathBuf),
    #[error("PEX-INFO manifest at '{}' is not valid UTF-8 JSON: {1}", .0.display())]
    Malformed(PathBuf, serde_json::Error),
    #[error("PEX-INFO manifest at '{}' declares unsupported schema version {1}", .0.display())]
    UnsupportedSchema(PathBuf, u32),
    #[error("archive root '{}' does not exist", .0.display())]
    RootNotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// No candidate host interpreter satisfies the constraints (§7, §8).
#[derive(Debug)]
pub struct UnsatisfiableInterpreter {
    pub constraints: Vec<String>,
    pub candidates: Vec<InterpreterHandle>,
    pub identification_failures: Vec<(PathBuf, String)>,
    pub preamble: Option<String>,
}

impl UnsatisfiableInterpreter {
    pub fn new(
        constraints: Vec<String>,
        candidates: Vec<InterpreterHandle>,
        identification_failures: Vec<(PathBuf, String)>,
    ) -> Self {
        Self {
            constraints,
            candidates,
            identification_failures,
            preamble: None,
        }
    }

    /// Pure transformer returning a new value with a preamble attached
    /// (§9 "Reflection on error types").
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }
}

impl std::error::Error for UnsatisfiableInterpreter {}

impl std::fmt::Display for UnsatisfiableInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(preamble) = &self.preamble {
            writeln!(f, "{preamble}")?;
        }
        writeln!(f, "Could not find a compatible interpreter.")?;
        if !self.constraints.is_empty() {
            writeln!(f, "  constraints: {}", self.constraints.join(", "))?;
        }
        if !self.candidates.is_empty() {
            writeln!(f, "  candidates considered:")?;
            for c in &self.candidates {
                writeln!(f, "    {} ({})", c.binary.display(), c.version)?;
            }
        }
        if !self.identification_failures.is_empty() {
            writeln!(f, "  identification failures:")?;
            for (path, reason) in &self.identification_failures {
                writeln!(f, "    {}: {reason}", path.display())?;
            }
        }
        Ok(())
    }
}

/// A selected interpreter could not resolve the archive's distributions.
/// Rejects the candidate without aborting selection (§7).
#[derive(Error, Debug, Clone)]
#[error("interpreter at '{}' could not resolve distribution '{1}': {2}", .0.display())]
pub struct ResolveError(pub PathBuf, pub String, pub String);

/// Requested entry point could not be parsed, imported, or called.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("cannot specify both a script and a callable/module entry point for an archive")]
    ConflictingEntryPoints,
    #[error("no script named '{0}' found among console-scripts or bootstrap scripts")]
    ScriptNotFound(String),
    #[error("could not parse callable reference '{0}' (expected 'pkg.mod:name')")]
    InvalidCallableReference(String),
    #[error("could not invoke script '{0}': {1}")]
    ExecutionError(String, std::io::Error),
    #[error("inline source execution is not natively supported by this launcher core; falling back to an external interpreter process failed: {0}")]
    InlineExecFailed(std::io::Error),
}

/// A component-level error from the Environment Scrubber (C2).
#[derive(Error, Debug)]
pub enum ScrubError {
    #[error("environment scrubbing already ran once for this process")]
    AlreadyScrubbed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A component-level error from the Interpreter Selector (C3).
#[derive(Error, Debug)]
pub enum SelectError {
    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableInterpreter),
    #[error("failed to probe candidate interpreter at '{}': {1}", .0.display())]
    ProbeFailed(PathBuf, String),
}

/// A component-level error from the Distribution Activator (C4).
#[derive(Error, Debug)]
pub enum ActivateError {
    #[error("failed to mount archive at '{}': {1}", .0.display())]
    MountFailed(PathBuf, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The venv short-alias keyspace (40 hex chars) was exhausted without
/// resolving a collision (§3, §7 CollisionOverflow).
#[derive(Error, Debug)]
#[error("venv short-alias keyspace exhausted; colliding targets: {}", .colliding.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
pub struct CollisionOverflow {
    pub colliding: Vec<PathBuf>,
}

/// A component-level error from the Venv Materializer (C6).
#[derive(Error, Debug)]
pub enum VenvError {
    #[error(transparent)]
    CollisionOverflow(#[from] CollisionOverflow),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A component-level error from State Handoff (C7).
#[derive(Error, Debug)]
pub enum HandoffError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
