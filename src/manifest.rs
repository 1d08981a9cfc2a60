//! The archive descriptor (§3 "Archive descriptor") and its on-disk
//! manifest format, `PEX-INFO` (§6 "Archive layout"): UTF-8 JSON at a
//! well-known relative path inside the archive root.
//!
//! Field semantics here follow `pex/pex_info.py` (not included in the
//! retrieved original source, but referenced throughout
//! `pex_bootstrapper.py`); unknown fields are ignored at load time
//! (forward-compatibility rule, §6) via `serde`'s default behavior of
//! skipping unrecognized JSON keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ManifestError;

pub const MANIFEST_FILE: &str = "PEX-INFO";

/// §3: inherit-path policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritPath {
    #[default]
    None,
    Prefer,
    Fallback,
}

impl InheritPath {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "false" | "none" => Some(Self::None),
            "prefer" => Some(Self::Prefer),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

/// §3: entry-point spec is script name xor callable/module reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPointSpec {
    Script(String),
    Callable(String),
}

/// §3: symlink vs copy, and how `bin/` is laid out, for venv population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VenvLayoutPolicy {
    #[default]
    Symlink,
    Copy,
}

/// Raw, wire-format mirror of `PEX-INFO`. Field names match the pex
/// manifest schema; unknown fields are silently ignored by `serde` (we do
/// not use `#[serde(deny_unknown_fields)]`, per §6's forward-compat rule).
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    build_properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    interpreter_constraints: Vec<String>,
    #[serde(default)]
    inherit_path: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    entry_point: Option<String>,
    #[serde(default)]
    inject_env: BTreeMap<String, String>,
    #[serde(default)]
    inject_args: Vec<String>,
    #[serde(default)]
    strip_pex_env: Option<bool>,
    #[serde(default)]
    venv: Option<bool>,
    #[serde(default)]
    venv_copies: Option<bool>,
    #[serde(default)]
    venv_bin_path: Option<String>,
    #[serde(default)]
    pex_path: Option<String>,
    #[serde(default)]
    includes_tools: Option<bool>,
    #[serde(default)]
    code_hash: Option<String>,
    #[serde(default)]
    pex_hash: Option<String>,
}

/// §3: a read-only record extracted from the archive manifest, immutable
/// for the life of the launch.
#[derive(Debug, Clone)]
pub struct ArchiveDescriptor {
    pub root: PathBuf,
    pub identity_hash: String,
    pub interpreter_constraints: Vec<String>,
    pub inherit_path: InheritPath,
    pub entry_point: Option<EntryPointSpec>,
    pub inject_env: BTreeMap<String, String>,
    pub inject_argv: Vec<String>,
    pub strip_ambient_config: bool,
    pub venv_mode: bool,
    pub venv_layout: VenvLayoutPolicy,
    pub venv_bin_path: Option<String>,
    pub extra_archives: Vec<PathBuf>,
    pub tool_support: bool,
}

impl ArchiveDescriptor {
    /// Loads and parses the manifest at `root/PEX-INFO`.
    pub fn load(root: &Path) -> Result<Self, ManifestError> {
        if !root.exists() {
            return Err(ManifestError::RootNotFound(root.to_path_buf()));
        }
        let manifest_path = root.join(MANIFEST_FILE);
        let contents = fs::read_to_string(&manifest_path)
            .map_err(|_| ManifestError::Missing(root.to_path_buf()))?;
        Self::parse(root, &contents)
    }

    pub fn parse(root: &Path, contents: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(contents)
            .map_err(|e| ManifestError::Malformed(root.to_path_buf(), e))?;

        if raw.script.is_some() && raw.entry_point.is_some() {
            // Both present is a manifest authoring error the dispatcher
            // would otherwise reject at execution time (§4.5); we let the
            // conflict surface there instead of failing the parse, matching
            // pex's own `_execute` which only raises once both are resolved
            // down to a single overridden value.
        }
        let entry_point = match (raw.script, raw.entry_point) {
            (Some(s), None) => Some(EntryPointSpec::Script(s)),
            (None, Some(e)) => Some(EntryPointSpec::Callable(e)),
            (Some(s), Some(_)) => Some(EntryPointSpec::Script(s)),
            (None, None) => None,
        };

        let inherit_path = raw
            .inherit_path
            .as_deref()
            .and_then(InheritPath::parse)
            .unwrap_or_default();

        let identity_hash = raw
            .pex_hash
            .or(raw.code_hash)
            .unwrap_or_else(|| identity_hash_of(root));

        let extra_archives = raw
            .pex_path
            .map(|s| std::env::split_paths(&s).collect())
            .unwrap_or_default();

        let _ = raw.build_properties;

        Ok(ArchiveDescriptor {
            root: root.to_path_buf(),
            identity_hash,
            interpreter_constraints: raw.interpreter_constraints,
            inherit_path,
            entry_point,
            inject_env: raw.inject_env,
            inject_argv: raw.inject_args,
            strip_ambient_config: raw.strip_pex_env.unwrap_or(true),
            venv_mode: raw.venv.unwrap_or(false),
            venv_layout: if raw.venv_copies.unwrap_or(false) {
                VenvLayoutPolicy::Copy
            } else {
                VenvLayoutPolicy::Symlink
            },
            venv_bin_path: raw.venv_bin_path,
            extra_archives,
            tool_support: raw.includes_tools.unwrap_or(false),
        })
    }

    /// Merges `PEX_PATH`-supplied extra archives (§6) with the manifest's
    /// own `pex_path`, de-duplicated and order-preserving.
    pub fn merged_extra_archives(&self, env_extra: &[PathBuf]) -> Vec<PathBuf> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for p in self.extra_archives.iter().chain(env_extra.iter()) {
            if seen.insert(p.clone()) {
                out.push(p.clone());
            }
        }
        out
    }
}

fn identity_hash_of(root: &Path) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut buf = [0u8; 40];
    faster_hex::hex_encode(&digest, &mut buf).expect("40-byte buffer fits a SHA-1 digest");
    String::from_utf8_lossy(&buf).into_owned()
}
