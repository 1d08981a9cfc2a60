//! The process abstraction every component in this crate is built on.
//!
//! Every component takes `&Process` rather than reading `std::env::*`
//! directly, so that argv, env vars, cwd, and stdio are swappable in tests
//! without touching real process-global state. Mirrors the seam rustup
//! builds its CLI on (`src/process.rs`), generalized here to also hand out
//! `current_dir` and `cwd`-relative helpers the archive launcher needs for
//! realpath resolution.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

#[cfg(any(test, feature = "test-util"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "test-util"))]
use std::io::Cursor;
#[cfg(any(test, feature = "test-util"))]
use std::sync::{Arc, Mutex};

pub mod filesource;

/// Concrete backing for the process abstraction: either the real OS
/// process, or an in-memory harness used by tests.
#[derive(Clone, Debug)]
pub enum Process {
    Os(OsProcess),
    #[cfg(any(test, feature = "test-util"))]
    Test(TestContext),
}

impl Process {
    pub fn os() -> Self {
        Self::Os(OsProcess::new())
    }

    /// `argv[0]`'s file stem, used to recognize a self-launching prelude
    /// binary name (§6 "Invocation contract").
    pub fn name(&self) -> Option<String> {
        self.args()
            .next()
            .map(PathBuf::from)
            .as_ref()
            .and_then(|a| a.file_stem())
            .and_then(std::ffi::OsStr::to_str)
            .map(String::from)
    }

    pub fn var(&self, key: &str) -> Result<String, env::VarError> {
        match self {
            Process::Os(_) => env::var(key),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => p
                .vars
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(key)
                .cloned()
                .ok_or(env::VarError::NotPresent),
        }
    }

    pub fn var_os(&self, key: &str) -> Option<OsString> {
        match self {
            Process::Os(_) => env::var_os(key),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => p
                .vars
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(key)
                .map(OsString::from),
        }
    }

    /// Set-if-absent semantics used by inject-env (§4.5) and, in tests,
    /// to seed the harness.
    pub fn set_var_if_absent(&self, key: &str, value: &str) {
        match self {
            Process::Os(_) => {
                if env::var_os(key).is_none() {
                    // SAFETY: archive launch is single-threaded up to this point (§5).
                    unsafe { env::set_var(key, value) };
                }
            }
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => {
                let mut vars = p.vars.lock().unwrap_or_else(|e| e.into_inner());
                vars.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }
    }

    pub fn set_var(&self, key: &str, value: &str) {
        match self {
            Process::Os(_) => {
                // SAFETY: archive launch is single-threaded up to this point (§5).
                unsafe { env::set_var(key, value) };
            }
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => {
                p.vars
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key.to_string(), value.to_string());
            }
        }
    }

    pub fn remove_var(&self, key: &str) -> Option<String> {
        match self {
            Process::Os(_) => {
                let prior = env::var(key).ok();
                // SAFETY: archive launch is single-threaded up to this point (§5).
                unsafe { env::remove_var(key) };
                prior
            }
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => p.vars.lock().unwrap_or_else(|e| e.into_inner()).remove(key),
        }
    }

    /// All currently-set environment variable names. Used by the
    /// archive-config strip (§4.7) to find every `PEX_`-prefixed key.
    pub fn var_names(&self) -> Vec<String> {
        match self {
            Process::Os(_) => env::vars().map(|(k, _)| k).collect(),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => p
                .vars
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .keys()
                .cloned()
                .collect(),
        }
    }

    pub fn args(&self) -> Box<dyn Iterator<Item = String> + '_> {
        match self {
            Process::Os(_) => Box::new(env::args()),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => Box::new(p.args.clone().into_iter()),
        }
    }

    pub fn args_os(&self) -> Box<dyn Iterator<Item = OsString> + '_> {
        match self {
            Process::Os(_) => Box::new(env::args_os()),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => Box::new(p.args.clone().into_iter().map(OsString::from)),
        }
    }

    pub fn stdin(&self) -> Box<dyn filesource::Stdin> {
        match self {
            Process::Os(_) => Box::new(io::stdin()),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => Box::new(filesource::TestStdin(p.stdin.clone())),
        }
    }

    pub fn stdout(&self) -> Box<dyn filesource::Writer> {
        match self {
            Process::Os(_) => Box::new(io::stdout()),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => Box::new(filesource::TestWriter(p.stdout.clone())),
        }
    }

    pub fn stderr(&self) -> Box<dyn filesource::Writer> {
        match self {
            Process::Os(_) => Box::new(io::stderr()),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => Box::new(filesource::TestWriter(p.stderr.clone())),
        }
    }

    pub fn current_dir(&self) -> io::Result<PathBuf> {
        match self {
            Process::Os(_) => env::current_dir(),
            #[cfg(any(test, feature = "test-util"))]
            Process::Test(p) => Ok(p.cwd.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OsProcess {
    is_a_tty: bool,
}

impl OsProcess {
    pub fn new() -> Self {
        use std::io::IsTerminal;
        OsProcess {
            is_a_tty: io::stderr().is_terminal(),
        }
    }

    pub fn is_a_tty(&self) -> bool {
        self.is_a_tty
    }
}

impl Default for OsProcess {
    fn default() -> Self {
        OsProcess::new()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[derive(Clone, Debug, Default)]
pub struct TestContext {
    pub cwd: PathBuf,
    args: Vec<String>,
    vars: Arc<Mutex<HashMap<String, String>>>,
    stdin: filesource::TestStdinInner,
    stdout: filesource::TestWriterInner,
    stderr: filesource::TestWriterInner,
}

#[cfg(any(test, feature = "test-util"))]
impl TestContext {
    pub fn new<P: AsRef<std::path::Path>, A: AsRef<str>>(
        cwd: P,
        args: &[A],
        vars: HashMap<String, String>,
    ) -> Process {
        Process::Test(Self {
            cwd: cwd.as_ref().to_path_buf(),
            args: args.iter().map(|s| s.as_ref().to_string()).collect(),
            vars: Arc::new(Mutex::new(vars)),
            stdin: Arc::new(Mutex::new(Cursor::new(String::new()))),
            stdout: Arc::default(),
            stderr: Arc::default(),
        })
    }

    pub fn with_vars(vars: HashMap<String, String>) -> Process {
        Process::Test(Self {
            vars: Arc::new(Mutex::new(vars)),
            ..Default::default()
        })
    }
}
