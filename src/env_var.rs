//! Names and typed accessors for the `PEX_*` environment variables (§6).
//!
//! Mirrors rustup's `env_var.rs` in spirit (a thin typed layer over
//! [`Process`]), but modeled more directly on pex's own `ENV` (`Variables`)
//! object from `pex/variables.py`: every `PEX_*` knob the launcher reads is
//! a method here, so `launch.rs` and friends never call `process.var(...)`
//! with a string literal directly.

use std::path::PathBuf;

use crate::process::Process;

/// The archive namespace prefix. Concretely `PEX_` for this launcher.
pub const PREFIX: &str = "PEX_";

pub const VAR_PYTHON: &str = "PEX_PYTHON";
pub const VAR_PYTHON_PATH: &str = "PEX_PYTHON_PATH";
pub const VAR_INHERIT_PATH: &str = "PEX_INHERIT_PATH";
pub const VAR_EXTRA_SYS_PATH: &str = "PEX_EXTRA_SYS_PATH";
pub const VAR_PATH: &str = "PEX_PATH";
pub const VAR_INTERPRETER: &str = "PEX_INTERPRETER";
pub const VAR_SCRIPT: &str = "PEX_SCRIPT";
pub const VAR_MODULE: &str = "PEX_MODULE";
pub const VAR_ENTRY_POINT: &str = "PEX_ENTRY_POINT";
pub const VAR_VERBOSE: &str = "PEX_VERBOSE";
pub const VAR_ROOT: &str = "PEX_ROOT";
pub const VAR_VENV: &str = "PEX_VENV";
pub const VAR_TOOLS: &str = "PEX_TOOLS";
pub const VAR_COVERAGE: &str = "PEX_COVERAGE";
pub const VAR_COVERAGE_FILENAME: &str = "PEX_COVERAGE_FILENAME";
pub const VAR_PROFILE: &str = "PEX_PROFILE";
pub const VAR_PROFILE_FILENAME: &str = "PEX_PROFILE_FILENAME";
pub const VAR_PROFILE_SORT: &str = "PEX_PROFILE_SORT";
pub const VAR_INTERPRETER_HISTORY: &str = "PEX_INTERPRETER_HISTORY";
pub const VAR_INTERPRETER_HISTORY_FILE: &str = "PEX_INTERPRETER_HISTORY_FILE";

/// Internal, not part of the public surface a user sets; preserved across
/// the `PEX_*` strip (§4.7, §8 invariant 7).
pub const VAR_EXEC_CHAIN: &str = "_PEX_EXEC_CHAIN";
pub const VAR_SHOULD_EXIT_BOOTSTRAP_REEXEC: &str = "_PEX_SHOULD_EXIT_BOOTSTRAP_REEXEC";
pub const VAR_STASHED_PYTHONPATH: &str = "_PEX_PYTHONPATH";

/// Set once this process is re-entering itself post-venv-materialization
/// (§4.6 step 5), so the second pass skips materialization and uses the
/// venv interpreter recorded in [`VAR_VENV_PYTHON`] directly.
pub const VAR_VENV_ACTIVE: &str = "_PEX_VENV_ACTIVE";
/// The venv alias's interpreter path, carried across the venv self-reexec.
pub const VAR_VENV_PYTHON: &str = "_PEX_VENV_PYTHON";

/// The host runtime's own module search-path variable, which this core
/// stashes/restores across re-exec (§4.7).
pub const PYTHONPATH: &str = "PYTHONPATH";

const INTERNAL_VARS: &[&str] = &[
    VAR_EXEC_CHAIN,
    VAR_SHOULD_EXIT_BOOTSTRAP_REEXEC,
    VAR_STASHED_PYTHONPATH,
    VAR_VENV_ACTIVE,
    VAR_VENV_PYTHON,
];

/// Typed view over the `PEX_*` environment, read fresh from a [`Process`]
/// on every access so tests can mutate the harness between calls.
pub struct Vars<'a> {
    process: &'a Process,
}

impl<'a> Vars<'a> {
    pub fn new(process: &'a Process) -> Self {
        Self { process }
    }

    pub fn python(&self) -> Option<String> {
        self.process.var(VAR_PYTHON).ok().filter(|s| !s.is_empty())
    }

    pub fn python_path(&self) -> Option<Vec<PathBuf>> {
        self.split_path(VAR_PYTHON_PATH)
    }

    pub fn inherit_path(&self) -> Option<String> {
        self.process
            .var(VAR_INHERIT_PATH)
            .ok()
            .filter(|s| !s.is_empty())
    }

    pub fn extra_sys_path(&self) -> Vec<PathBuf> {
        self.split_path(VAR_EXTRA_SYS_PATH).unwrap_or_default()
    }

    pub fn extra_archives(&self) -> Vec<PathBuf> {
        self.split_path(VAR_PATH).unwrap_or_default()
    }

    pub fn force_interpreter(&self) -> bool {
        self.flag(VAR_INTERPRETER)
    }

    pub fn script(&self) -> Option<String> {
        self.process.var(VAR_SCRIPT).ok().filter(|s| !s.is_empty())
    }

    pub fn module(&self) -> Option<String> {
        self.process
            .var(VAR_MODULE)
            .ok()
            .or_else(|| self.process.var(VAR_ENTRY_POINT).ok())
            .filter(|s| !s.is_empty())
    }

    pub fn verbose(&self) -> u8 {
        self.process
            .var(VAR_VERBOSE)
            .ok()
            .and_then(|s| s.parse::<u8>().ok())
            .unwrap_or(0)
            .min(9)
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.process.var(VAR_ROOT).ok().map(PathBuf::from)
    }

    pub fn venv(&self) -> Option<bool> {
        match self.process.var(VAR_VENV).ok().as_deref() {
            Some(v) if truthy(v) => Some(true),
            Some(v) if falsy(v) => Some(false),
            _ => None,
        }
    }

    pub fn tools(&self) -> bool {
        self.flag(VAR_TOOLS)
    }

    pub fn coverage(&self) -> bool {
        self.flag(VAR_COVERAGE)
    }

    pub fn coverage_filename(&self) -> Option<PathBuf> {
        self.process.var(VAR_COVERAGE_FILENAME).ok().map(PathBuf::from)
    }

    pub fn profile(&self) -> bool {
        self.flag(VAR_PROFILE)
    }

    pub fn profile_filename(&self) -> Option<PathBuf> {
        self.process.var(VAR_PROFILE_FILENAME).ok().map(PathBuf::from)
    }

    pub fn profile_sort(&self) -> Option<String> {
        self.process.var(VAR_PROFILE_SORT).ok()
    }

    pub fn interpreter_history(&self) -> bool {
        self.flag(VAR_INTERPRETER_HISTORY)
    }

    pub fn interpreter_history_file(&self) -> Option<PathBuf> {
        self.process
            .var(VAR_INTERPRETER_HISTORY_FILE)
            .ok()
            .map(PathBuf::from)
    }

    fn flag(&self, name: &str) -> bool {
        self.process.var(name).ok().is_some_and(|v| truthy(&v))
    }

    fn split_path(&self, name: &str) -> Option<Vec<PathBuf>> {
        self.process
            .var(name)
            .ok()
            .filter(|s| !s.is_empty())
            .map(|v| std::env::split_paths(&v).collect())
    }
}

fn truthy(v: &str) -> bool {
    !falsy(v) && !v.is_empty()
}

fn falsy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
}

/// Every environment variable name beginning with [`PREFIX`], excluding
/// the internal guard/chain variables (§4.7, §8 invariant 7).
pub fn user_facing_vars(process: &Process) -> Vec<String> {
    process
        .var_names()
        .into_iter()
        .filter(|k| k.starts_with(PREFIX) && !INTERNAL_VARS.contains(&k.as_str()))
        .collect()
}

pub fn is_internal(name: &str) -> bool {
    INTERNAL_VARS.contains(&name)
}
