//! Archive mounting, §4.4's "Mounts the primary archive and every archive
//! named by the transitively-merged extra archive path."
//!
//! An archive is either a directory already laid out on disk or a zip
//! file that must be unpacked first; zip handling (extraction, zip-slip
//! rejection) is grounded on jpmacdonald-apl's `src/io/extract.rs`.
//! Distribution discovery within a mounted root follows
//! `PEXEnvironment.mount` (`pex/pex.py`, via `pex/environment.py`, not
//! retrieved): distributions live as installed wheel chroots under a
//! `.deps/` directory, one subdirectory per `<project>-<version>` chroot.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::activate::Distribution;
use crate::manifest::{ArchiveDescriptor, MANIFEST_FILE};

const DEPS_DIR: &str = ".deps";
const DIST_INFO_SUFFIX: &str = ".dist-info";
const NAMESPACE_PACKAGES_FILE: &str = "namespace_packages.txt";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive at '{}' is neither a directory nor a zip file", .0.display())]
    UnknownFormat(PathBuf),
    #[error("failed to extract zip archive '{}': {1}", .0.display())]
    Extract(PathBuf, zip::result::ZipError),
    #[error("zip entry '{1}' in '{}' would escape the extraction root", .0.display())]
    ZipSlip(PathBuf, String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Manifest(#[from] crate::errors::ManifestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Directory,
    Zip,
}

pub fn detect_format(path: &Path) -> Result<ArchiveFormat, ArchiveError> {
    if path.is_dir() {
        return Ok(ArchiveFormat::Directory);
    }
    if path.is_file() {
        let mut f = File::open(path)?;
        let mut magic = [0u8; 4];
        use std::io::Read;
        if f.read_exact(&mut magic).is_ok() && &magic[..2] == b"PK" {
            return Ok(ArchiveFormat::Zip);
        }
    }
    Err(ArchiveError::UnknownFormat(path.to_path_buf()))
}

pub struct MountedArchive {
    pub root: PathBuf,
    pub descriptor: ArchiveDescriptor,
    pub distributions: Vec<Distribution>,
}

/// Mounts `path`, extracting it first if it is a zip archive, parsing its
/// manifest, and discovering its distribution chroots.
pub fn mount(path: &Path) -> Result<MountedArchive, ArchiveError> {
    let root = match detect_format(path)? {
        ArchiveFormat::Directory => path.to_path_buf(),
        ArchiveFormat::Zip => extract_zip(path)?,
    };

    let descriptor = ArchiveDescriptor::load(&root)?;
    let distributions = discover_distributions(&root)?;

    Ok(MountedArchive {
        root,
        descriptor,
        distributions,
    })
}

/// Extracts a zip archive into a cache directory keyed by the archive
/// file's own path, rejecting any entry that would write outside the
/// extraction root (zip-slip), mirroring jpmacdonald-apl's
/// `extract_zip`.
fn extract_zip(path: &Path) -> Result<PathBuf, ArchiveError> {
    let dest_dir = path.with_extension("extracted");
    if dest_dir.join(MANIFEST_FILE).exists() {
        return Ok(dest_dir);
    }

    let file = File::open(path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Extract(path.to_path_buf(), e))?;

    // Suffixed with a random token so two processes racing to extract the
    // same archive populate distinct work directories; `populate_then_rename`
    // is the actual race point, and only one extraction's rename wins.
    let work_dir = path.with_extension(format!("extracting-{:x}", rand::random::<u64>()));
    fs::create_dir_all(&work_dir)?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ArchiveError::Extract(path.to_path_buf(), e))?;
        let entry_name = entry.name().to_string();
        let Some(enclosed) = entry.enclosed_name() else {
            return Err(ArchiveError::ZipSlip(path.to_path_buf(), entry_name));
        };
        let out_path = work_dir.join(enclosed);
        if !out_path.starts_with(&work_dir) {
            return Err(ArchiveError::ZipSlip(path.to_path_buf(), entry_name));
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    crate::atomic::populate_then_rename(&work_dir, &dest_dir)?;
    Ok(dest_dir)
}

/// Discovers the distribution chroots under `root/.deps/` (§4.4).
/// Each subdirectory name is expected as `<project>-<version>`; a
/// `*.dist-info/namespace_packages.txt` inside it, if present, declares
/// namespace packages the distribution contributes.
fn discover_distributions(root: &Path) -> Result<Vec<Distribution>, ArchiveError> {
    let deps_dir = root.join(DEPS_DIR);
    if !deps_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut distributions = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(&deps_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    for chroot in entries {
        let Some(dirname) = chroot.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let (project_name, version) = split_project_version(dirname);
        let namespace_packages = read_namespace_packages(&chroot)?;
        distributions.push(Distribution {
            project_name,
            version,
            location: chroot,
            namespace_packages,
        });
    }

    Ok(distributions)
}

/// Scans a `sys.path` entry for the filesystem locations of distributions
/// it makes importable that live somewhere other than the entry itself
/// (§4.2 "scan it with the distribution-metadata probe"), mirroring pex's
/// `all_distribution_paths` (`pex/pex.py:329-334`). An ordinary
/// site-packages style entry contributes no extra locations; an
/// `.egg-link` indirection resolves to the location its first line names.
pub fn distribution_metadata_locations(entry: &Path) -> Vec<PathBuf> {
    let mut locations = Vec::new();
    let Ok(read) = fs::read_dir(entry) else {
        return locations;
    };
    for item in read.flatten() {
        let path = item.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".egg-link") {
            if let Ok(contents) = fs::read_to_string(&path) {
                if let Some(target) = contents.lines().next().map(str::trim).filter(|s| !s.is_empty()) {
                    locations.push(PathBuf::from(target));
                }
            }
        }
    }
    locations
}

fn split_project_version(dirname: &str) -> (String, String) {
    match dirname.rsplit_once('-') {
        Some((name, version)) => (name.to_string(), version.to_string()),
        None => (dirname.to_string(), String::new()),
    }
}

fn read_namespace_packages(chroot: &Path) -> Result<Vec<String>, ArchiveError> {
    let Ok(entries) = fs::read_dir(chroot) else {
        return Ok(Vec::new());
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(DIST_INFO_SUFFIX) {
            let candidate = path.join(NAMESPACE_PACKAGES_FILE);
            if candidate.exists() {
                let contents = fs::read_to_string(candidate)?;
                return Ok(contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect());
            }
        }
    }
    Ok(Vec::new())
}
