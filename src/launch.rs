//! Top-level orchestration (§2 control flow): "launcher entry → C7 reads
//! environment → C3 selects interpreter (possibly re-execs via C7+C3) →
//! if venv-mode, C6 materializes and re-execs → C2 scrubs state using C1
//! → C4 activates distributions → C5 dispatches entry point."
//!
//! Process replacement is realized as spawn-then-propagate-exit-code
//! rather than a true `execve`, mirroring rustup's own
//! `cli/proxy_mode.rs::direct_proxy` (which does the same for Windows
//! portability) — see [`ExitCode`].

use std::path::{Path, PathBuf};

use tracing::{info, info_span};

use crate::activate::{Activator, Distribution};
use crate::archive::{self, ArchiveError};
use crate::classify::SanctionedPaths;
use crate::dispatch::{self, DispatchInputs};
use crate::env_var::{self, Vars};
use crate::errors::PexError;
use crate::handoff;
use crate::interpreter::{InterpreterHandle, ProbeCache};
use crate::manifest::ArchiveDescriptor;
use crate::process::Process;
use crate::scrub::{HostRuntime, Scrubber};
use crate::select::{self, AlwaysPasses, Constraints, SelectionInputs};
use crate::venv::{self, DefaultVenvPopulator, Materializer};

/// Mirrors rustup's `utils::ExitCode` newtype.
pub struct ExitCode(pub i32);

pub fn run(process: &Process) -> Result<ExitCode, PexError> {
    let vars = Vars::new(process);
    let argv: Vec<String> = process.args().collect();
    let Some(archive_root) = locate_archive_root(process) else {
        return Err(PexError::Other(anyhow::anyhow!(
            "could not determine the archive root from argv[0]"
        )));
    };

    let descriptor = ArchiveDescriptor::load(&archive_root)?;

    let probes = ProbeCache::new();

    if handoff::reexec_already_happened(process) {
        handoff::consume_reexec_guard(process);
    } else {
        let _span = info_span!("select_interpreter").entered();
        if let Some(exit) = maybe_select_and_reexec(process, &descriptor, &vars, &probes, &argv)? {
            return Ok(exit);
        }
    }

    let running = probes
        .probe(&current_exe_or_argv0(process), None)
        .ok();

    let env_extra = vars.extra_archives();
    let archive_roots: Vec<PathBuf> = std::iter::once(archive_root.clone())
        .chain(descriptor.merged_extra_archives(&env_extra))
        .collect();

    // §2: "if venv-mode, C6 materializes and re-execs" happens prior to
    // scrubbing: on its first pass this process materializes the venv and
    // replaces itself; the re-entered process (guarded by
    // [`env_var::VAR_VENV_ACTIVE`]) skips straight past this block and uses
    // the venv interpreter recorded in [`env_var::VAR_VENV_PYTHON`].
    if let Some(exit) = maybe_materialize_venv_and_reexec(
        process,
        &descriptor,
        &vars,
        running.as_ref(),
        &archive_roots,
        &argv,
    )? {
        return Ok(exit);
    }
    let venv_interpreter = process.var(env_var::VAR_VENV_PYTHON).ok().map(PathBuf::from);

    let sanctioned = build_sanctioned_paths(process, &archive_root, running.as_ref());

    let mut host = crate::scrub::InMemoryHost::default();
    let restored_user_path = handoff::unstash_pythonpath(process);
    let scrubber = Scrubber {
        sanctioned: &sanctioned,
        inherit_path: descriptor.inherit_path,
        extra_sys_path: &vars.extra_sys_path(),
        restored_user_path,
        is_virtualenv_host: running.as_ref().is_some_and(|h| h.is_virtualenv),
        cwd: process.current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let plan = scrubber.compute(&host.get_state());
    Scrubber::apply(&mut host, plan).map_err(|e| PexError::Other(anyhow::anyhow!(e)))?;

    let mut activator = Activator::new();
    let distributions = activator
        .activate(&mut host, &archive_roots)
        .map_err(|e| PexError::Other(anyhow::anyhow!(e)))?
        .to_vec();

    info!(count = distributions.len(), "activated distributions");

    let inputs = DispatchInputs {
        descriptor: &descriptor,
        distributions: &distributions,
        argv: &argv,
        force_interactive: vars.force_interpreter(),
        env_script: vars.script(),
        env_module: vars.module(),
        already_set_env_vars: &|name| process.var(name).is_ok(),
    };
    let resolved = dispatch::resolve(&inputs)?;

    if !matches!(resolved.entry, dispatch::Entry::Interactive) {
        let bootstrap_paths = [archive_root.clone()];
        dispatch::demote_bootstrap(&mut host, &bootstrap_paths, &["__archive_bootstrap__"]);
    }

    for (k, v) in &resolved.inject_env {
        process.set_var_if_absent(k, v);
    }

    let interpreter_binary = venv_interpreter
        .or_else(|| running.as_ref().map(|h| h.binary.clone()))
        .unwrap_or_else(|| PathBuf::from("python3"));

    if descriptor.strip_ambient_config {
        handoff::strip_archive_config(process);
    }

    let wrapper = handoff::recording_wrapper_for(process).map_err(|e| PexError::Other(anyhow::anyhow!(e)))?;
    let final_search_path = host.get_state().search_path;
    let code = dispatch::execute_with_wrapper(
        &resolved.entry,
        &interpreter_binary,
        &resolved.argv[1..],
        &wrapper,
        &final_search_path,
    )
    .map_err(PexError::from)?;

    Ok(ExitCode(code))
}

/// §4.6 "if venv-mode, C6 materializes and re-execs": on the first pass
/// through a venv-mode archive, mount every archive root directly (the
/// Activator itself runs later, against the scrubbed host state, so this
/// does its own lightweight mount rather than reuse `Activator::activate`),
/// materialize a venv for the running interpreter, record its launcher
/// under [`env_var::VAR_VENV_PYTHON`], and re-exec this same binary.
///
/// The re-exec targets this launcher's own `current_exe()`, not the venv's
/// raw interpreter binary: this core has no way to hand control to a
/// Python bytecode interpreter except by spawning one as an external
/// process, so the venv interpreter is recorded for the dispatcher to use
/// at the bottom of `run()` rather than exec'd into directly here.
fn maybe_materialize_venv_and_reexec(
    process: &Process,
    descriptor: &ArchiveDescriptor,
    vars: &Vars,
    running: Option<&InterpreterHandle>,
    archive_roots: &[PathBuf],
    argv: &[String],
) -> Result<Option<ExitCode>, PexError> {
    if vars.tools() || process.var(env_var::VAR_VENV_ACTIVE).is_ok() {
        return Ok(None);
    }
    if !vars.venv().unwrap_or(descriptor.venv_mode) {
        return Ok(None);
    }
    let Some(running) = running else {
        return Ok(None);
    };

    let mut distributions: Vec<Distribution> = Vec::new();
    for root in archive_roots {
        let mounted = archive::mount(root)?;
        distributions.extend(mounted.distributions);
    }

    let venv_root = vars
        .root()
        .unwrap_or_else(|| std::env::temp_dir().join("pex_root"))
        .join("venvs");
    let materializer = Materializer {
        venv_root,
        populator: &DefaultVenvPopulator,
    };
    let materialized = materializer.materialize(
        &descriptor.identity_hash,
        running,
        &distributions,
        descriptor.venv_layout,
    )?;

    process.set_var(env_var::VAR_VENV_ACTIVE, "1");
    process.set_var(env_var::VAR_VENV_PYTHON, &materialized.launcher.display().to_string());

    let code = replace_process(&current_exe_or_argv0(process), &argv[1..])?;
    Ok(Some(ExitCode(code)))
}

fn maybe_select_and_reexec(
    process: &Process,
    descriptor: &ArchiveDescriptor,
    vars: &Vars,
    probes: &ProbeCache,
    argv: &[String],
) -> Result<Option<ExitCode>, PexError> {
    let running = probes.probe(&current_exe_or_argv0(process), None).ok();

    let search_path: Vec<PathBuf> = process
        .var("PATH")
        .ok()
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();

    let user_pinned = vars.python().map(PathBuf::from);
    let constraints = Constraints {
        ranges: descriptor
            .interpreter_constraints
            .iter()
            .filter_map(|c| semver::VersionReq::parse(c).ok())
            .map(|req| crate::select::VersionRange {
                implementation: None,
                req,
            })
            .collect(),
    };

    let inputs = SelectionInputs {
        running_interpreter: running.as_ref(),
        user_pinned: user_pinned.as_deref(),
        search_path: &search_path,
        valid_basenames: None,
        constraints: &constraints,
        probe_timeout: None,
    };

    let outcome = select::select(probes, &AlwaysPasses, &inputs)
        .map_err(|e| PexError::Other(anyhow::anyhow!(e.to_string())))?;

    let Some(selected) = outcome.selected else {
        return Ok(None);
    };

    let Some(running) = running else {
        return Ok(None);
    };

    let has_stash = process.var(crate::env_var::VAR_STASHED_PYTHONPATH).is_ok();
    match select::reexec_decision(&selected, &running, has_stash) {
        select::ReexecDecision::ContinueInProcess => Ok(None),
        select::ReexecDecision::Reexec { target_binary } => {
            handoff::stash_pythonpath(process);
            handoff::set_reexec_guard(process);
            handoff::push_exec_chain(process, &selected.realpath);
            process.remove_var(crate::env_var::VAR_PYTHON);
            process.remove_var(crate::env_var::VAR_PYTHON_PATH);
            let code = replace_process(&target_binary, &argv[1..])?;
            Ok(Some(ExitCode(code)))
        }
    }
}

fn replace_process(binary: &Path, tail: &[String]) -> Result<i32, PexError> {
    let status = std::process::Command::new(binary)
        .args(tail)
        .status()
        .map_err(|e| PexError::Other(anyhow::anyhow!("failed to re-exec under {}: {e}", binary.display())))?;
    Ok(status.code().unwrap_or(1))
}

fn locate_archive_root(process: &Process) -> Option<PathBuf> {
    let arg0 = process.args_os().next()?;
    let path = PathBuf::from(arg0);
    std::fs::canonicalize(&path).ok().or(Some(path))
}

fn current_exe_or_argv0(process: &Process) -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| {
        process
            .args_os()
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("python3"))
    })
}

fn build_sanctioned_paths(
    process: &Process,
    archive_root: &Path,
    running: Option<&InterpreterHandle>,
) -> SanctionedPaths {
    let cwd = process.current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut builder = SanctionedPaths::builder(cwd).allow(archive_root);

    if let Some(handle) = running {
        builder = builder
            .allow_many(handle.sys_path.iter().map(PathBuf::as_path))
            .reject_site_many(handle.site_packages.iter().map(PathBuf::as_path))
            .reject_extras_many(handle.extras_paths.iter().map(PathBuf::as_path));
    }

    builder.build()
}

impl From<ArchiveError> for PexError {
    fn from(e: ArchiveError) -> Self {
        PexError::Other(anyhow::anyhow!(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn locate_archive_root_resolves_argv0() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.pex");
        std::fs::write(&archive, b"").unwrap();

        let process = crate::process::TestContext::new(dir.path(), &[archive.to_str().unwrap()], HashMap::new());
        let root = locate_archive_root(&process).unwrap();
        assert_eq!(root, archive.canonicalize().unwrap());
    }
}
