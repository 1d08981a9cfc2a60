//! Interpreter Selector (C3), §4.3.
//!
//! Grounded on `pex_bootstrapper.py`'s `iter_compatible_interpreters`,
//! `_select_path_interpreter`, and `find_compatible_interpreter`: candidate
//! enumeration order, version/basename filtering, and the "latest release
//! of the minimum compatible version" tie-break are all carried over
//! faithfully; only the probe mechanism (a real subprocess here, versus
//! `PythonInterpreter.from_binary`'s cached class-level registry there) is
//! reimplemented per [`crate::interpreter`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{SelectError, UnsatisfiableInterpreter};
use crate::interpreter::{self, InterpreterHandle, InterpreterIdentificationError, ProbeCache};

/// A version/implementation predicate (§3 "union-of-ranges expression").
/// Kept simple: each [`VersionRange`] names an implementation tag and an
/// inclusive `semver` bound; a handle matches if it satisfies any range
/// whose implementation tag matches (case-insensitively), or any range
/// with no tag restriction.
#[derive(Debug, Clone)]
pub struct VersionRange {
    pub implementation: Option<String>,
    pub req: semver::VersionReq,
}

#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub ranges: Vec<VersionRange>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn matches(&self, handle: &InterpreterHandle) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        self.ranges.iter().any(|r| {
            let impl_ok = r
                .implementation
                .as_deref()
                .map(|tag| tag.eq_ignore_ascii_case(&handle.implementation))
                .unwrap_or(true);
            impl_ok && r.req.matches(&handle.version)
        })
    }

    pub fn as_strings(&self) -> Vec<String> {
        self.ranges
            .iter()
            .map(|r| match &r.implementation {
                Some(tag) => format!("{tag}{}", r.req),
                None => r.req.to_string(),
            })
            .collect()
    }
}

/// §4.3 "if an interpreter-test capability is provided" — typically
/// "can this interpreter resolve every required distribution in the
/// archive". Modeled as a trait so callers (and tests) can supply a
/// cheap stand-in rather than a real distribution resolution.
pub trait InterpreterTest {
    fn test(&self, handle: &InterpreterHandle) -> Result<(), String>;
}

/// No-op test: every accepted-by-constraints candidate passes.
pub struct AlwaysPasses;
impl InterpreterTest for AlwaysPasses {
    fn test(&self, _handle: &InterpreterHandle) -> Result<(), String> {
        Ok(())
    }
}

pub struct SelectionInputs<'a> {
    pub running_interpreter: Option<&'a InterpreterHandle>,
    pub user_pinned: Option<&'a Path>,
    pub search_path: &'a [PathBuf],
    pub valid_basenames: Option<&'a [String]>,
    pub constraints: &'a Constraints,
    pub probe_timeout: Option<Duration>,
}

pub struct SelectionOutcome {
    pub selected: Option<InterpreterHandle>,
    pub candidates_considered: Vec<InterpreterHandle>,
    pub identification_failures: Vec<(PathBuf, String)>,
    pub resolve_failures: Vec<(PathBuf, String)>,
}

/// §4.3 "Candidate enumeration" + "Filtering": produces every interpreter
/// handle that passes the version/implementation predicate and the
/// supplied interpreter-test, in enumeration order.
pub fn select(
    probes: &ProbeCache,
    test: &dyn InterpreterTest,
    inputs: &SelectionInputs,
) -> Result<SelectionOutcome, SelectError> {
    let mut seen_realpaths = std::collections::HashSet::new();
    let mut accepted = Vec::new();
    let mut candidates_considered = Vec::new();
    let mut identification_failures = Vec::new();
    let mut resolve_failures = Vec::new();

    let mut probe_and_collect = |binary: &Path| {
        match probes.probe(binary, inputs.probe_timeout) {
            Ok(handle) => {
                if !seen_realpaths.insert(handle.realpath.clone()) {
                    return;
                }
                candidates_considered.push(handle.clone());
                if !inputs.constraints.matches(&handle) {
                    return;
                }
                match test.test(&handle) {
                    Ok(()) => accepted.push(handle),
                    Err(reason) => resolve_failures.push((handle.binary.clone(), reason)),
                }
            }
            Err(InterpreterIdentificationError { binary, reason }) => {
                identification_failures.push((binary, reason));
            }
        }
    };

    // (1) the running interpreter, if named-like-a-host-interpreter itself
    // passes the basename filter, then its sibling binaries only if the
    // explicit search path doesn't already enumerate that directory.
    let mut running_dir_already_in_search_path = false;
    if let Some(running) = inputs.running_interpreter {
        let basename_ok = running
            .binary
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| match inputs.valid_basenames {
                Some(names) => names.iter().any(|n| n == name),
                None => interpreter::candidate_basenames().contains(&name),
            })
            .unwrap_or(false);
        if basename_ok {
            probe_and_collect(&running.binary);
        }
        if let Some(dir) = running.binary.parent() {
            running_dir_already_in_search_path =
                inputs.search_path.iter().any(|p| p.as_path() == dir);
            if !running_dir_already_in_search_path {
                for candidate in interpreter::iter_candidates_in_dir(dir, inputs.valid_basenames) {
                    probe_and_collect(&candidate);
                }
            }
        }
    }
    let _ = running_dir_already_in_search_path;

    // (2) user-pinned directory, external search path, ambient path — in
    // that priority (§4.3).
    if let Some(pinned) = inputs.user_pinned {
        if pinned.is_dir() {
            for candidate in interpreter::iter_candidates_in_dir(pinned, inputs.valid_basenames) {
                probe_and_collect(&candidate);
            }
        } else {
            probe_and_collect(pinned);
        }
    }
    for dir in inputs.search_path {
        for candidate in interpreter::iter_candidates_in_dir(dir, inputs.valid_basenames) {
            probe_and_collect(&candidate);
        }
    }

    let selected = tie_break(&accepted, inputs.running_interpreter, inputs.user_pinned);

    let has_constraints = !inputs.constraints.is_empty()
        || inputs.valid_basenames.is_some()
        || !resolve_failures.is_empty();

    if selected.is_none() && has_constraints {
        return Err(SelectError::Unsatisfiable(UnsatisfiableInterpreter::new(
            inputs.constraints.as_strings(),
            candidates_considered,
            identification_failures
                .into_iter()
                .chain(resolve_failures.clone())
                .collect(),
        )));
    }

    Ok(SelectionOutcome {
        selected,
        candidates_considered,
        identification_failures,
        resolve_failures,
    })
}

/// §4.3 "Selection tie-break".
fn tie_break(
    accepted: &[InterpreterHandle],
    running: Option<&InterpreterHandle>,
    preferred_binary: Option<&Path>,
) -> Option<InterpreterHandle> {
    if accepted.is_empty() {
        return None;
    }

    if let Some(preferred) = preferred_binary {
        if let Ok(preferred_real) = std::fs::canonicalize(preferred) {
            if let Some(h) = accepted.iter().find(|h| h.realpath == preferred_real) {
                return Some(h.clone());
            }
        }
    }

    if let Some(running) = running {
        if let Some(h) = accepted.iter().find(|h| h.realpath == running.realpath) {
            return Some(h.clone());
        }
    }

    // Latest release of the minimum compatible version: group by
    // (major, minor), take the smallest such group, then the largest
    // patch within it.
    accepted
        .iter()
        .min_by(|a, b| {
            let a_key = (a.version.major, a.version.minor, std::cmp::Reverse(a.version.patch));
            let b_key = (b.version.major, b.version.minor, std::cmp::Reverse(b.version.patch));
            a_key.cmp(&b_key)
        })
        .cloned()
}

/// §4.3 "Re-exec decision".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReexecDecision {
    ContinueInProcess,
    Reexec { target_binary: PathBuf },
}

pub fn reexec_decision(
    selected: &InterpreterHandle,
    running: &InterpreterHandle,
    has_stashed_user_search_path: bool,
) -> ReexecDecision {
    if selected.realpath == running.realpath && !has_stashed_user_search_path {
        ReexecDecision::ContinueInProcess
    } else {
        ReexecDecision::Reexec {
            target_binary: selected.binary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(binary: &str, realpath: &str, version: (u64, u64, u64)) -> InterpreterHandle {
        InterpreterHandle {
            binary: PathBuf::from(binary),
            realpath: PathBuf::from(realpath),
            version: semver::Version::new(version.0, version.1, version.2),
            implementation: "cpython".into(),
            sys_path: vec![],
            site_packages: vec![],
            extras_paths: vec![],
            is_virtualenv: false,
        }
    }

    #[test]
    fn tie_break_prefers_caller_pinned_over_running() {
        let running = handle("/usr/bin/python3", "/usr/bin/python3.9", (3, 9, 0));
        let pinned = handle("/opt/python3.11", "/opt/python3.11", (3, 11, 0));
        let accepted = vec![running.clone(), pinned.clone()];
        let chosen = tie_break(&accepted, Some(&running), Some(Path::new("/opt/python3.11")));
        assert_eq!(chosen.unwrap().realpath, pinned.realpath);
    }

    #[test]
    fn tie_break_prefers_running_to_avoid_reexec() {
        let running = handle("/usr/bin/python3", "/usr/bin/python3.9", (3, 9, 0));
        let other = handle("/opt/python3.10", "/opt/python3.10", (3, 10, 0));
        let accepted = vec![running.clone(), other];
        let chosen = tie_break(&accepted, Some(&running), None);
        assert_eq!(chosen.unwrap().realpath, running.realpath);
    }

    #[test]
    fn tie_break_picks_latest_release_of_minimum_compatible_version() {
        let a = handle("/a", "/a", (3, 9, 18));
        let b = handle("/b", "/b", (3, 9, 2));
        let c = handle("/c", "/c", (3, 11, 0));
        let accepted = vec![a.clone(), b, c];
        let chosen = tie_break(&accepted, None, None);
        assert_eq!(chosen.unwrap().realpath, a.realpath);
    }

    #[test]
    fn constraints_match_by_implementation_and_range() {
        let constraints = Constraints {
            ranges: vec![VersionRange {
                implementation: Some("cpython".into()),
                req: semver::VersionReq::parse(">=3.9.0, <3.12.0").unwrap(),
            }],
        };
        let h = handle("/a", "/a", (3, 10, 0));
        assert!(constraints.matches(&h));
        let h2 = handle("/b", "/b", (3, 12, 0));
        assert!(!constraints.matches(&h2));
    }

    #[test]
    fn reexec_decision_continues_when_selected_equals_running_and_no_stash() {
        let running = handle("/usr/bin/python3", "/usr/bin/python3.9", (3, 9, 0));
        let decision = reexec_decision(&running, &running, false);
        assert_eq!(decision, ReexecDecision::ContinueInProcess);
    }

    #[test]
    fn reexec_decision_reexecs_when_user_search_path_was_stashed() {
        let running = handle("/usr/bin/python3", "/usr/bin/python3.9", (3, 9, 0));
        let decision = reexec_decision(&running, &running, true);
        assert!(matches!(decision, ReexecDecision::Reexec { .. }));
    }
}
