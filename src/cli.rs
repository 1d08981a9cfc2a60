//! The optional `clap`-derived surface (§6 "tool-support flag", `PEX_TOOLS`):
//! a `tools` sub-CLI for archive introspection, plus a couple of diagnostic
//! subcommands used by the scenario tests under `tests/`.
//!
//! This is deliberately not the primary invocation contract. A real archive
//! invocation hands this core arbitrary user argv that must be passed
//! through to the entry point untouched, so [`crate::launch::run`] never
//! parses argv itself (mirroring rustup's proxy mode, `cli/proxy_mode.rs`,
//! which also never touches `clap` for the common case). This module is the
//! rustup `cli/rustup_mode.rs` half of that split: the explicit, clap-parsed
//! surface, reached only when the archive is invoked with `PEX_TOOLS=1` or
//! the first user argv is `--pex-tools` and the manifest advertises
//! `tool_support`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::env_var::Vars;
use crate::manifest::ArchiveDescriptor;
use crate::process::Process;

#[derive(Parser, Debug)]
#[command(
    name = "archive-launch",
    about = "Inspect or repackage a self-contained application archive",
    bin_name = "archive-launch tools"
)]
pub struct ToolsCli {
    #[command(subcommand)]
    pub command: ToolsCommand,
}

#[derive(Subcommand, Debug)]
pub enum ToolsCommand {
    /// Print the archive manifest and resolved distributions.
    Info,
    /// Report where this archive's venv would be (or is) materialized.
    Venv,
}

/// True when the archive should be routed into [`ToolsCli`] instead of the
/// ordinary launch path: the manifest advertises tool support and either
/// `PEX_TOOLS` is set or the first user argument requests it explicitly.
pub fn wants_tools(process: &Process, descriptor: &ArchiveDescriptor, argv: &[String]) -> bool {
    if !descriptor.tool_support {
        return false;
    }
    Vars::new(process).tools() || argv.get(1).is_some_and(|a| a == "--pex-tools")
}

/// Runs the `tools` sub-CLI against `argv`, skipping argv[0] (the archive
/// path) and, if present, the `--pex-tools` marker itself.
pub fn run(descriptor: &ArchiveDescriptor, argv: &[String]) -> i32 {
    let tail: Vec<&String> = argv
        .iter()
        .skip(1)
        .filter(|a| a.as_str() != "--pex-tools")
        .collect();

    let cli = match ToolsCli::try_parse_from(std::iter::once(&"archive-launch".to_string()).chain(tail)) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    match cli.command {
        ToolsCommand::Info => {
            print_info(descriptor);
            0
        }
        ToolsCommand::Venv => {
            print_venv_path(descriptor);
            0
        }
    }
}

fn print_info(descriptor: &ArchiveDescriptor) {
    println!("root: {}", descriptor.root.display());
    println!("identity: {}", descriptor.identity_hash);
    println!("venv: {}", descriptor.venv_mode);
    if !descriptor.interpreter_constraints.is_empty() {
        println!("interpreter constraints: {}", descriptor.interpreter_constraints.join(", "));
    }
}

fn print_venv_path(descriptor: &ArchiveDescriptor) {
    let root = home::home_dir()
        .map(|h| h.join(".pex").join("venvs"))
        .unwrap_or_else(|| PathBuf::from(".pex/venvs"));
    println!("{}", root.join(&descriptor.identity_hash).display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_tools_requires_manifest_support() {
        let mut descriptor = bare_descriptor();
        descriptor.tool_support = false;
        let process = crate::process::TestContext::with_vars(std::collections::HashMap::new());
        assert!(!wants_tools(&process, &descriptor, &["app.pex".to_string()]));
    }

    #[test]
    fn wants_tools_honors_explicit_flag() {
        let mut descriptor = bare_descriptor();
        descriptor.tool_support = true;
        let process = crate::process::TestContext::with_vars(std::collections::HashMap::new());
        let argv = vec!["app.pex".to_string(), "--pex-tools".to_string()];
        assert!(wants_tools(&process, &descriptor, &argv));
    }

    fn bare_descriptor() -> ArchiveDescriptor {
        ArchiveDescriptor {
            root: PathBuf::from("/archive"),
            identity_hash: "abc".into(),
            interpreter_constraints: vec![],
            inherit_path: crate::manifest::InheritPath::None,
            entry_point: None,
            inject_env: Default::default(),
            inject_argv: vec![],
            strip_ambient_config: true,
            venv_mode: false,
            venv_layout: Default::default(),
            venv_bin_path: None,
            extra_archives: vec![],
            tool_support: false,
        }
    }
}
