//! State Handoff (C7), §4.7.
//!
//! Grounded on `pex_bootstrapper.py`'s `maybe_reexec_pex`: the
//! `_PEX_EXEC_CHAIN` accumulator (a `PathBuf` list joined on the host
//! path-separator, not a scalar), the `_PEX_SHOULD_EXIT_BOOTSTRAP_REEXEC`
//! single-use guard, and the popping of `PEX_PYTHON`/`PEX_PYTHON_PATH`
//! from the child environment before re-exec so a re-exec'd process
//! doesn't loop back into the same selection. Coverage/profiling
//! wrappers are grounded on `PEX._wrap_coverage`/`_wrap_profiling`
//! (`pex/pex.py`).

use std::path::{Path, PathBuf};

use crate::env_var::{self, Vars};
use crate::errors::HandoffError;
use crate::process::Process;

/// §4.7 "Search-path stash": moves `PYTHONPATH` to
/// `_PEX_PYTHONPATH` on entry, if set.
pub fn stash_pythonpath(process: &Process) {
    if let Ok(value) = process.var(env_var::PYTHONPATH) {
        process.set_var(env_var::VAR_STASHED_PYTHONPATH, &value);
        process.remove_var(env_var::PYTHONPATH);
    }
}

/// §4.2/§4.7: reads the stash back and removes it, returning the
/// original user search path for the scrubber's inherit-path handling.
pub fn unstash_pythonpath(process: &Process) -> Option<Vec<PathBuf>> {
    let stashed = process.remove_var(env_var::VAR_STASHED_PYTHONPATH)?;
    if stashed.is_empty() {
        return None;
    }
    Some(std::env::split_paths(&stashed).collect())
}

/// §4.7 "Re-exec guard": true if a parent process already completed
/// selection; consuming it (removing the variable) is the caller's
/// responsibility once observed, matching
/// `_PEX_SHOULD_EXIT_BOOTSTRAP_REEXEC`'s pop-on-read semantics.
pub fn reexec_already_happened(process: &Process) -> bool {
    process
        .var(env_var::VAR_SHOULD_EXIT_BOOTSTRAP_REEXEC)
        .is_ok_and(|v| env_var_is_set(&v))
}

pub fn consume_reexec_guard(process: &Process) {
    process.remove_var(env_var::VAR_SHOULD_EXIT_BOOTSTRAP_REEXEC);
}

pub fn set_reexec_guard(process: &Process) {
    process.set_var(env_var::VAR_SHOULD_EXIT_BOOTSTRAP_REEXEC, "1");
}

fn env_var_is_set(v: &str) -> bool {
    !v.is_empty() && v != "0"
}

/// §4.7 "Exec chain (test-only)": each traversed interpreter realpath,
/// in order, joined on the host's path-list separator exactly like any
/// other `PATH`-shaped variable.
pub fn exec_chain(process: &Process) -> Vec<PathBuf> {
    process
        .var(env_var::VAR_EXEC_CHAIN)
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| std::env::split_paths(&s).collect())
        .unwrap_or_default()
}

pub fn push_exec_chain(process: &Process, realpath: &Path) {
    let mut chain = exec_chain(process);
    chain.push(realpath.to_path_buf());
    let joined = std::env::join_paths(&chain).expect("realpaths do not contain the path separator");
    process.set_var(env_var::VAR_EXEC_CHAIN, &joined.to_string_lossy());
}

/// §4.7 "Archive-config strip": removes every `PEX_*` variable before
/// user code runs, when the manifest requests it (`strip_pex_env`).
pub fn strip_archive_config(process: &Process) {
    for name in env_var::user_facing_vars(process) {
        process.remove_var(&name);
    }
}

/// §4.7 "Coverage and profiling wrappers": optional wrappers around the
/// final user-code invocation.
pub enum RecordingWrapper {
    None,
    Coverage { output_file: Option<PathBuf> },
    Profile { output_file: Option<PathBuf>, sort: Option<String> },
}

pub fn recording_wrapper_for(process: &Process) -> Result<RecordingWrapper, HandoffError> {
    let vars = Vars::new(process);
    if vars.coverage() {
        return Ok(RecordingWrapper::Coverage {
            output_file: vars.coverage_filename(),
        });
    }
    if vars.profile() {
        return Ok(RecordingWrapper::Profile {
            output_file: vars.profile_filename(),
            sort: vars.profile_sort(),
        });
    }
    Ok(RecordingWrapper::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_process(vars: HashMap<String, String>) -> Process {
        crate::process::TestContext::with_vars(vars)
    }

    #[test]
    fn stash_and_unstash_roundtrip() {
        let mut vars = HashMap::new();
        vars.insert("PYTHONPATH".to_string(), "/a:/b".to_string());
        let process = test_process(vars);

        stash_pythonpath(&process);
        assert!(process.var(env_var::PYTHONPATH).is_err());
        assert_eq!(
            process.var(env_var::VAR_STASHED_PYTHONPATH).unwrap(),
            "/a:/b"
        );

        let restored = unstash_pythonpath(&process).unwrap();
        assert_eq!(restored, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(process.var(env_var::VAR_STASHED_PYTHONPATH).is_err());
    }

    #[test]
    fn reexec_guard_roundtrip() {
        let process = test_process(HashMap::new());
        assert!(!reexec_already_happened(&process));
        set_reexec_guard(&process);
        assert!(reexec_already_happened(&process));
        consume_reexec_guard(&process);
        assert!(!reexec_already_happened(&process));
    }

    #[test]
    fn exec_chain_accumulates_in_order() {
        let process = test_process(HashMap::new());
        push_exec_chain(&process, Path::new("/usr/bin/python3.9"));
        push_exec_chain(&process, Path::new("/opt/python3.11"));
        assert_eq!(
            exec_chain(&process),
            vec![
                PathBuf::from("/usr/bin/python3.9"),
                PathBuf::from("/opt/python3.11")
            ]
        );
    }

    #[test]
    fn strip_archive_config_removes_only_pex_vars() {
        let mut vars = HashMap::new();
        vars.insert("PEX_SCRIPT".to_string(), "foo".to_string());
        vars.insert("OTHER".to_string(), "bar".to_string());
        let process = test_process(vars);

        strip_archive_config(&process);
        assert!(process.var("PEX_SCRIPT").is_err());
        assert_eq!(process.var("OTHER").unwrap(), "bar");
    }
}
