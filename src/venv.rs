//! Venv Materializer (C6), §4.6.
//!
//! Keying and short-alias hashing follow §3's "venv directory keyed by
//! archive identity + interpreter identity" and "short-alias directory":
//! an 8-hex-character prefix of the SHA-1 of the full key, expanded one
//! character at a time on collision up to the full 40-character digest,
//! mirroring pex's venv short-dir scheme referenced in
//! `pex_bootstrapper.py`. Atomic acquisition is delegated to
//! [`crate::atomic::populate_then_rename`], shared with archive
//! extraction.

use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::errors::{CollisionOverflow, VenvError};
use crate::manifest::VenvLayoutPolicy;

const SHEBANG_WARN_LEN: usize = 128;
const SHORT_ALIAS_MIN_LEN: usize = 8;

/// §3 "venv directory keyed by archive identity + interpreter identity".
pub fn venv_key(archive_identity_hash: &str, interpreter_realpath: &Path) -> String {
    format!("{archive_identity_hash}-{}", interpreter_realpath.display())
}

fn full_digest_hex(key: &str) -> [u8; 40] {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut buf = [0u8; 40];
    faster_hex::hex_encode(&digest, &mut buf).expect("40-byte buffer fits a SHA-1 digest");
    buf
}

/// Computes the short-alias directory name for `key` under `venv_root`,
/// expanding the hex prefix one character at a time until it no longer
/// collides with an existing alias that maps to a *different* key (§3).
/// `resolve_existing` maps an already-materialized alias back to the key
/// it was created for, so genuine re-use (same key, same alias) is not
/// treated as a collision.
pub fn short_alias(
    key: &str,
    venv_root: &Path,
    resolve_existing: impl Fn(&Path) -> Option<String>,
) -> Result<PathBuf, CollisionOverflow> {
    let digest_hex = full_digest_hex(key);
    let digest_str = std::str::from_utf8(&digest_hex).expect("hex digest is ASCII");

    let mut colliding = Vec::new();
    for len in SHORT_ALIAS_MIN_LEN..=digest_str.len() {
        let candidate = venv_root.join(&digest_str[..len]);
        match resolve_existing(&candidate) {
            None => return Ok(candidate),
            Some(existing_key) if existing_key == key => return Ok(candidate),
            Some(_) => colliding.push(candidate),
        }
    }
    Err(CollisionOverflow { colliding })
}

/// Population is delegated (§4.6 "surrounding concern... delegated to an
/// external collaborator"); this trait is the seam.
pub trait VenvPopulator {
    fn populate(
        &self,
        work_dir: &Path,
        interpreter: &crate::interpreter::InterpreterHandle,
        distributions: &[crate::activate::Distribution],
        layout: VenvLayoutPolicy,
    ) -> std::io::Result<()>;
}

/// The concrete populator this launcher ships: a minimal bare-venv layout
/// grounded on gourgeist's `create_bare_venv` (`crates/gourgeist/src/bare.rs`)
/// — a `bin/` with the interpreter linked in under its conventional names
/// and a `pyvenv.cfg`, plus each distribution's chroot linked (or copied)
/// into `site-packages` per the archive's layout policy. Unlike gourgeist
/// this does not install `pip`/`setuptools`/activate scripts: a PEX venv is
/// meant to be run directly, never activated interactively.
pub struct DefaultVenvPopulator;

impl VenvPopulator for DefaultVenvPopulator {
    fn populate(
        &self,
        work_dir: &Path,
        interpreter: &crate::interpreter::InterpreterHandle,
        distributions: &[crate::activate::Distribution],
        layout: VenvLayoutPolicy,
    ) -> std::io::Result<()> {
        let bin_dir = work_dir.join("bin");
        std::fs::create_dir_all(&bin_dir)?;

        let venv_python = bin_dir.join(bin_name(interpreter));
        link_or_copy_file(&interpreter.binary, &venv_python, layout)?;

        let version = &interpreter.version;
        let site_packages = work_dir
            .join("lib")
            .join(format!("python{}.{}", version.major, version.minor))
            .join("site-packages");
        std::fs::create_dir_all(&site_packages)?;

        for dist in distributions {
            let dest = site_packages.join(format!("{}-{}", dist.project_name, dist.version));
            match layout {
                VenvLayoutPolicy::Symlink => symlink_dir(&dist.location, &dest)?,
                VenvLayoutPolicy::Copy => copy_dir_recursive(&dist.location, &dest)?,
            }
        }

        let home = interpreter
            .binary
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let pyvenv_cfg = format!(
            "home = {home}\nimplementation = {}\nversion_info = {version}\ninclude-system-site-packages = false\nbase-executable = {}\n",
            interpreter.implementation,
            interpreter.binary.display(),
        );
        std::fs::write(work_dir.join("pyvenv.cfg"), pyvenv_cfg)?;

        Ok(())
    }
}

fn link_or_copy_file(src: &Path, dest: &Path, layout: VenvLayoutPolicy) -> std::io::Result<()> {
    match layout {
        VenvLayoutPolicy::Symlink => symlink_file(src, dest),
        VenvLayoutPolicy::Copy => std::fs::copy(src, dest).map(|_| ()),
    }
}

fn symlink_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            std::os::unix::fs::symlink(src, dest)
        } else {
            std::fs::copy(src, dest).map(|_| ())
        }
    }
}

fn symlink_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            std::os::unix::fs::symlink(src, dest)
        } else {
            copy_dir_recursive(src, dest)
        }
    }
}

pub struct Materializer<'a> {
    pub venv_root: PathBuf,
    pub populator: &'a dyn VenvPopulator,
}

pub struct MaterializedVenv {
    pub alias_dir: PathBuf,
    pub launcher: PathBuf,
}

impl<'a> Materializer<'a> {
    /// §4.6 steps 1-4: compute key, acquire the venv directory under
    /// atomic-directory discipline, populate if not already finalized,
    /// compute the short alias, and validate the shebang length.
    pub fn materialize(
        &self,
        archive_identity_hash: &str,
        interpreter: &crate::interpreter::InterpreterHandle,
        distributions: &[crate::activate::Distribution],
        layout: VenvLayoutPolicy,
    ) -> Result<MaterializedVenv, VenvError> {
        let key = venv_key(archive_identity_hash, &interpreter.realpath);
        let venv_dir = self.venv_root.join(finalized_name(&key));

        if !venv_dir.join("FINALIZED").exists() {
            // Suffixed with a random token so two processes racing to
            // materialize the same venv populate distinct work directories
            // rather than stomping on each other's in-progress tree; only
            // the rename in `populate_then_rename` is the actual race point.
            let work_dir = self
                .venv_root
                .join(format!("{}.work-{:x}", finalized_name(&key), rand::random::<u64>()));
            std::fs::create_dir_all(&work_dir)?;
            self.populator
                .populate(&work_dir, interpreter, distributions, layout)?;
            std::fs::write(work_dir.join("FINALIZED"), key.as_bytes())?;
            crate::atomic::populate_then_rename(&work_dir, &venv_dir)?;
        }

        let resolve_existing = |candidate: &Path| -> Option<String> {
            std::fs::read_to_string(candidate.join("FINALIZED")).ok()
        };
        let alias_dir = short_alias(&key, &self.venv_root, resolve_existing)?;
        if !alias_dir.join("FINALIZED").exists() {
            // Same atomic-directory discipline as the venv directory
            // itself (§5): populate a sibling work dir in full, including
            // the FINALIZED marker, then rename it into place in one
            // filesystem operation, so a concurrent reader never observes
            // an alias with FINALIZED written but `bin/` still missing.
            let alias_name = alias_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("alias")
                .to_string();
            let alias_work_dir = self
                .venv_root
                .join(format!("{alias_name}.work-{:x}", rand::random::<u64>()));
            std::fs::create_dir_all(&alias_work_dir)?;
            symlink_or_copy_bin(&venv_dir, &alias_work_dir, layout)?;
            std::fs::write(alias_work_dir.join("FINALIZED"), key.as_bytes())?;
            crate::atomic::populate_then_rename(&alias_work_dir, &alias_dir)?;
        }

        let launcher = alias_dir.join("bin").join(bin_name(interpreter));
        let shebang_len = format!("#!{}", launcher.display()).len();
        if shebang_len >= SHEBANG_WARN_LEN {
            // Non-fatal (§7): an oversize shebang is emitted on the warnings
            // channel, not raised — the launcher path itself still works
            // when invoked directly, only `#!`-based invocation would break.
            tracing::warn!(
                launcher = %launcher.display(),
                shebang_len,
                "venv launcher shebang exceeds the typical kernel limit of {SHEBANG_WARN_LEN} characters"
            );
        }

        Ok(MaterializedVenv { alias_dir, launcher })
    }
}

fn finalized_name(key: &str) -> String {
    let digest = full_digest_hex(key);
    std::str::from_utf8(&digest).expect("hex digest is ASCII").to_string()
}

fn bin_name(interpreter: &crate::interpreter::InterpreterHandle) -> String {
    interpreter
        .binary
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("python")
        .to_string()
}

fn symlink_or_copy_bin(venv_dir: &Path, alias_dir: &Path, layout: VenvLayoutPolicy) -> std::io::Result<()> {
    let src = venv_dir.join("bin");
    let dest = alias_dir.join("bin");
    match layout {
        VenvLayoutPolicy::Symlink => symlink_dir(&src, &dest),
        VenvLayoutPolicy::Copy => copy_dir_recursive(&src, &dest),
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    if !src.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn short_alias_starts_at_eight_chars() {
        let root = PathBuf::from("/venvs");
        let alias = short_alias("some-key", &root, |_| None).unwrap();
        let name = alias.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), SHORT_ALIAS_MIN_LEN);
    }

    #[test]
    fn short_alias_reuses_same_key() {
        let root = PathBuf::from("/venvs");
        let key = "stable-key";
        let first = short_alias(key, &root, |_| None).unwrap();
        let resolve = |_: &Path| Some(key.to_string());
        let second = short_alias(key, &root, resolve).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn short_alias_expands_on_collision_with_different_key() {
        let root = PathBuf::from("/venvs");
        let key = "key-a";
        let prefix = {
            let digest = full_digest_hex(key);
            std::str::from_utf8(&digest).unwrap()[..SHORT_ALIAS_MIN_LEN].to_string()
        };
        let mut known: HashMap<PathBuf, String> = HashMap::new();
        known.insert(root.join(&prefix), "different-key".to_string());

        let resolve = |candidate: &Path| known.get(candidate).cloned();
        let alias = short_alias(key, &root, resolve).unwrap();
        let name = alias.file_name().unwrap().to_str().unwrap();
        assert!(name.len() > SHORT_ALIAS_MIN_LEN);
    }

    #[test]
    fn venv_key_combines_archive_and_interpreter_identity() {
        let key_a = venv_key("hash1", Path::new("/usr/bin/python3.9"));
        let key_b = venv_key("hash2", Path::new("/usr/bin/python3.9"));
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn default_populator_writes_pyvenv_cfg_and_links_distributions() {
        use crate::activate::Distribution;
        use crate::interpreter::InterpreterHandle;

        let dir = tempfile::tempdir().unwrap();
        let python = dir.path().join("system-python3.11");
        std::fs::write(&python, b"").unwrap();
        let dist_location = dir.path().join("dist-chroot");
        std::fs::create_dir_all(&dist_location).unwrap();

        let interpreter = InterpreterHandle {
            binary: python.clone(),
            realpath: python.clone(),
            version: semver::Version::new(3, 11, 4),
            implementation: "cpython".into(),
            sys_path: vec![],
            site_packages: vec![],
            extras_paths: vec![],
            is_virtualenv: false,
        };
        let distributions = vec![Distribution {
            project_name: "requests".into(),
            version: "2.31.0".into(),
            location: dist_location,
            namespace_packages: vec![],
        }];

        let work_dir = dir.path().join("work");
        std::fs::create_dir_all(&work_dir).unwrap();
        DefaultVenvPopulator
            .populate(&work_dir, &interpreter, &distributions, VenvLayoutPolicy::Copy)
            .unwrap();

        assert!(work_dir.join("pyvenv.cfg").is_file());
        assert!(work_dir.join("bin").join("system-python3.11").exists());
        assert!(work_dir
            .join("lib/python3.11/site-packages/requests-2.31.0")
            .is_dir());
    }
}
