//! The launcher binary (§6 "Invocation contract"): a single entry point that
//! always runs the full bootstrap in [`archive_launch::launch::run`]; there
//! is no top-level `clap` parse here because a real archive invocation's
//! argv belongs to user code, not to this binary (mirrors rustup's
//! `cli/proxy_mode.rs::main`, which likewise never parses its own argv with
//! `clap` and instead propagates a `std::process::ExitCode`).
//!
//! When the manifest advertises tool support and either `PEX_TOOLS` is set
//! or `--pex-tools` is the first argument, argv is instead routed to the
//! `tools` sub-CLI (feature-gated, see `cli.rs`), matching §6's
//! `tool-support flag`.

use std::io::Write;

use archive_launch::env_var::Vars;
use archive_launch::process::Process;
use archive_launch::PexError;

fn main() {
    let _ = tracing_log::LogTracer::init();
    let process = Process::os();
    init_tracing(&process);

    match run(&process) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            report_error(&e);
            std::process::exit(1);
        }
    }
}

fn run(process: &Process) -> Result<i32, PexError> {
    #[cfg(feature = "tools")]
    {
        if let Some(code) = maybe_run_tools(process)? {
            return Ok(code);
        }
    }

    let exit = archive_launch::launch::run(process)?;
    Ok(exit.0)
}

#[cfg(feature = "tools")]
fn maybe_run_tools(process: &Process) -> Result<Option<i32>, PexError> {
    use archive_launch::manifest::ArchiveDescriptor;

    let argv: Vec<String> = process.args().collect();
    let Some(arg0) = argv.first() else {
        return Ok(None);
    };
    let root = std::fs::canonicalize(arg0).unwrap_or_else(|_| std::path::PathBuf::from(arg0));
    let Ok(descriptor) = ArchiveDescriptor::load(&root) else {
        return Ok(None);
    };

    if archive_launch::cli::wants_tools(process, &descriptor, &argv) {
        return Ok(Some(archive_launch::cli::run(&descriptor, &argv)));
    }
    Ok(None)
}

/// `PEX_VERBOSE` (0..9, §6) maps to a `tracing` filter level, matching
/// rustup's own `tracing`/`EnvFilter` setup in `src/process.rs`.
fn init_tracing(process: &Process) {
    let verbose = Vars::new(process).verbose();
    let level = match verbose {
        0 => None,
        1..=4 => Some("info"),
        5..=8 => Some("debug"),
        _ => Some("trace"),
    };
    if let Some(level) = level {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// One diagnostic line to stderr per §7's propagation policy; the error's
/// cause chain follows on subsequent lines, mirroring rustup's
/// `cli/common.rs::report_error`. Colored when stderr is a tty, via the
/// same `anstream`/`anstyle`/`console` combination rustup's own terminal
/// layer (`cli/term2.rs`) is built on.
fn report_error(e: &PexError) {
    let bold_red = anstyle::Style::new().bold().fg_color(Some(anstyle::AnsiColor::Red.into()));
    let mut out = anstream::stderr();
    let _ = writeln!(out, "{bold_red}error:{bold_red:#} {e}");
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        let _ = writeln!(out, "  {}: {cause}", console::style("caused by").dim());
        source = cause.source();
    }
}
