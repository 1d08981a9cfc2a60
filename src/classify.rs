//! Path Classifier (C1), §4.1.
//!
//! Builds a sanctioned-path structure from an interpreter handle and one
//! or more archive roots, and answers whether a given path belongs to the
//! archive/interpreter core ("sanctioned") or to host site-packages, user
//! site, or extras ("tainted"). Grounded on pex's `IsolatedSysPath`
//! (`pex/pex.py:49-118`): the same "triple" trick (given / abspath /
//! realpath) and the same rejection-before-acceptance ordering.

use std::path::{Path, PathBuf};

/// A path stored three ways so prefix tests are transitive under
/// symlinks and relative/absolute spelling (§3 "Sanctioned path set").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTriple {
    pub given: PathBuf,
    pub absolute: PathBuf,
    pub real: PathBuf,
}

impl PathTriple {
    pub fn expand(path: &Path, cwd: &Path) -> Self {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        };
        let real = std::fs::canonicalize(&absolute).unwrap_or_else(|_| absolute.clone());
        PathTriple {
            given: path.to_path_buf(),
            absolute,
            real,
        }
    }

    fn forms(&self) -> [&Path; 3] {
        [&self.given, &self.absolute, &self.real]
    }

    fn is_prefix_of(&self, other: &PathTriple) -> bool {
        other
            .forms()
            .into_iter()
            .any(|form| form.starts_with(&self.real) || form.starts_with(&self.absolute))
    }
}

/// §3: "Sanctioned path set. Three ordered sets of absolute paths... (a)
/// allowed search-path roots, (b) rejected site-package roots, (c)
/// rejected extras roots."
#[derive(Debug, Clone, Default)]
pub struct SanctionedPaths {
    allowed: Vec<PathTriple>,
    rejected_site: Vec<PathTriple>,
    rejected_extras: Vec<PathTriple>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Sanctioned,
    NotSanctioned,
}

impl SanctionedPaths {
    pub fn builder(cwd: PathBuf) -> SanctionedPathsBuilder {
        SanctionedPathsBuilder {
            cwd,
            paths: SanctionedPaths::default(),
        }
    }

    /// §4.1 membership test, `contains(p)`.
    pub fn contains(&self, p: &Path, cwd: &Path) -> Membership {
        let candidate = PathTriple::expand(p, cwd);

        for rejected in self.rejected_site.iter().chain(self.rejected_extras.iter()) {
            if rejected.is_prefix_of(&candidate) {
                return Membership::NotSanctioned;
            }
        }
        for allowed in &self.allowed {
            if allowed.is_prefix_of(&candidate) {
                return Membership::Sanctioned;
            }
        }
        Membership::NotSanctioned
    }

    pub fn allowed(&self) -> &[PathTriple] {
        &self.allowed
    }

    pub fn rejected_site(&self) -> &[PathTriple] {
        &self.rejected_site
    }

    pub fn rejected_extras(&self) -> &[PathTriple] {
        &self.rejected_extras
    }
}

pub struct SanctionedPathsBuilder {
    cwd: PathBuf,
    paths: SanctionedPaths,
}

impl SanctionedPathsBuilder {
    pub fn allow(mut self, path: &Path) -> Self {
        self.paths.allowed.push(PathTriple::expand(path, &self.cwd));
        self
    }

    pub fn allow_many<'a>(mut self, paths: impl IntoIterator<Item = &'a Path>) -> Self {
        for p in paths {
            self.paths.allowed.push(PathTriple::expand(p, &self.cwd));
        }
        self
    }

    pub fn reject_site(mut self, path: &Path) -> Self {
        self.paths
            .rejected_site
            .push(PathTriple::expand(path, &self.cwd));
        self
    }

    pub fn reject_site_many<'a>(mut self, paths: impl IntoIterator<Item = &'a Path>) -> Self {
        for p in paths {
            self.paths.rejected_site.push(PathTriple::expand(p, &self.cwd));
        }
        self
    }

    pub fn reject_extras_many<'a>(mut self, paths: impl IntoIterator<Item = &'a Path>) -> Self {
        for p in paths {
            self.paths
                .rejected_extras
                .push(PathTriple::expand(p, &self.cwd));
        }
        self
    }

    pub fn build(self) -> SanctionedPaths {
        self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_take_priority_over_nested_allow() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        let site = core.join("site-packages");
        std::fs::create_dir_all(&site).unwrap();

        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .reject_site(&site)
            .build();

        assert_eq!(
            sanctioned.contains(&site, dir.path()),
            Membership::NotSanctioned
        );
        assert_eq!(
            sanctioned.contains(&core, dir.path()),
            Membership::Sanctioned
        );
    }

    #[test]
    fn unrelated_path_is_not_sanctioned() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        std::fs::create_dir_all(&core).unwrap();
        let other = dir.path().join("elsewhere");
        std::fs::create_dir_all(&other).unwrap();

        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();

        assert_eq!(
            sanctioned.contains(&other, dir.path()),
            Membership::NotSanctioned
        );
    }

    #[test]
    fn relative_paths_expand_against_cwd() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        std::fs::create_dir_all(&core).unwrap();

        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(Path::new("core"))
            .build();

        assert_eq!(
            sanctioned.contains(&core, dir.path()),
            Membership::Sanctioned
        );
    }
}
