//! Environment Scrubber (C2), §4.2.
//!
//! Grounded on `PEX.minimum_sys`/`minimum_sys_path`/`minimum_sys_modules`
//! (`pex/pex.py:319-432`): the Rust core models the host runtime as an
//! explicit collaborator value (`RuntimeSnapshot`) rather than mutating
//! process globals directly, per §9's design note — `compute` is pure over
//! that value, and `apply` is the single impure operation that actually
//! hands the new snapshot back to the host runtime collaborator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::classify::{Membership, SanctionedPaths};
use crate::errors::ScrubError;
use crate::manifest::InheritPath;

/// §3: "Runtime state snapshot. A triple: ordered search path, map from
/// path-prefix to importer handle, map from module name to module
/// record." `importer_handle` and the loaded-module table are modeled
/// abstractly (an opaque label / a [`ModuleRecord`]) since this core does
/// not itself host a module system — the host runtime does.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSnapshot {
    pub search_path: Vec<PathBuf>,
    pub importer_cache: BTreeMap<PathBuf, String>,
    pub modules: BTreeMap<String, ModuleRecord>,
}

/// A loaded module's file backing and, for packages, the internal path
/// list the scrubber must filter (§3 post-scrub invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub file: Option<PathBuf>,
    pub package_path: PackagePath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackagePath {
    /// Not a package (ordinary module, or a builtin with no file backing).
    NotAPackage,
    /// A regular package with an internal search-path list.
    List(Vec<PathBuf>),
    /// A PEP 420 style namespace-package path that is not a plain list —
    /// the "namespace-package leakage guard" (§4.2) drops these records.
    NonList,
}

const VIRTUALENV_SHIM_MODULE: &str = "_virtualenv";

/// Scrubbing is a one-shot operation per process (§4.2, §5). This guard
/// enforces the "exactly once" invariant the spec calls out explicitly.
static SCRUBBED: AtomicBool = AtomicBool::new(false);

pub struct Scrubber<'a> {
    pub sanctioned: &'a SanctionedPaths,
    pub inherit_path: InheritPath,
    pub extra_sys_path: &'a [PathBuf],
    pub restored_user_path: Option<Vec<PathBuf>>,
    pub is_virtualenv_host: bool,
    pub cwd: PathBuf,
}

/// The result of the pure `compute` step: the new values to hand back to
/// the host runtime collaborator, plus a log of what was dropped.
pub struct ScrubPlan {
    pub search_path: Vec<PathBuf>,
    pub importer_cache: BTreeMap<PathBuf, String>,
    pub modules: BTreeMap<String, ModuleRecord>,
    pub dropped_search_path: Vec<PathBuf>,
    pub dropped_modules: Vec<String>,
}

impl<'a> Scrubber<'a> {
    /// Pure: computes the new runtime state from the current snapshot
    /// without mutating anything (§9's "the Scrubber is pure over that
    /// value").
    pub fn compute(&self, current: &RuntimeSnapshot) -> ScrubPlan {
        let mut scrub_locations: Vec<PathBuf> = Vec::new();
        let mut retained_path = Vec::new();

        for entry in &current.search_path {
            match self.sanctioned.contains(entry, &self.cwd) {
                Membership::Sanctioned => retained_path.push(entry.clone()),
                Membership::NotSanctioned => {
                    // §4.2 "all filesystem locations currently contributing
                    // distributions reachable from each non-sanctioned
                    // entry": a tainted entry isn't necessarily where its
                    // distributions actually live (an `.egg-link` style
                    // indirection points elsewhere), so scan it the way
                    // pex's `all_distribution_paths` does before deciding
                    // what to scrub.
                    let reachable = crate::archive::distribution_metadata_locations(entry);

                    if self.inherit_path == InheritPath::None {
                        scrub_locations.push(entry.clone());
                    } else {
                        // Tainted but retained because inherit-path isn't
                        // NONE: this path element stops contributing
                        // distributions but stays on the path itself,
                        // matching pex's user-PYTHONPATH handling
                        // (`pex/pex.py:minimum_sys_path`) — only sites
                        // reachable from `sys.path` (not the caller's own
                        // PYTHONPATH re-add below) are ever scrubbed here.
                        retained_path.push(entry.clone());
                    }

                    for location in reachable {
                        if !scrub_locations.contains(&location) {
                            scrub_locations.push(location);
                        }
                    }
                }
            }
        }

        let mut search_path = if self.inherit_path == InheritPath::None {
            retained_path
        } else {
            current
                .search_path
                .iter()
                .filter(|e| !scrub_locations.contains(e))
                .cloned()
                .collect()
        };

        match (self.inherit_path, &self.restored_user_path) {
            (InheritPath::None, _) => {}
            (InheritPath::Prefer, Some(user_path)) => {
                for p in user_path.iter().rev() {
                    if !search_path.contains(p) {
                        search_path.insert(0, p.clone());
                    }
                }
            }
            (InheritPath::Fallback, Some(user_path)) => {
                for p in user_path {
                    if !search_path.contains(p) {
                        search_path.push(p.clone());
                    }
                }
            }
            (_, None) => {}
        }

        for extra in self.extra_sys_path {
            if !search_path.contains(extra) {
                search_path.push(extra.clone());
            }
        }

        let importer_cache = current
            .importer_cache
            .iter()
            .filter(|(key, _)| !scrub_locations.iter().any(|loc| key.starts_with(loc)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut dropped_modules = Vec::new();
        let mut modules = BTreeMap::new();
        for (name, record) in &current.modules {
            if name == VIRTUALENV_SHIM_MODULE && self.is_virtualenv_host {
                modules.insert(name.clone(), record.clone());
                continue;
            }

            if let Some(file) = &record.file {
                if self.sanctioned.contains(file, &self.cwd) == Membership::NotSanctioned {
                    dropped_modules.push(name.clone());
                    continue;
                }
            }

            match &record.package_path {
                PackagePath::NotAPackage => {
                    modules.insert(name.clone(), record.clone());
                }
                PackagePath::NonList => {
                    // §9 Open Question: conservative reading — drop.
                    dropped_modules.push(name.clone());
                }
                PackagePath::List(paths) => {
                    let filtered: Vec<PathBuf> = paths
                        .iter()
                        .filter(|p| self.sanctioned.contains(p, &self.cwd) == Membership::Sanctioned)
                        .cloned()
                        .collect();
                    if filtered.is_empty() {
                        dropped_modules.push(name.clone());
                    } else {
                        modules.insert(
                            name.clone(),
                            ModuleRecord {
                                file: record.file.clone(),
                                package_path: PackagePath::List(filtered),
                            },
                        );
                    }
                }
            }
        }

        ScrubPlan {
            search_path,
            importer_cache,
            modules,
            dropped_search_path: scrub_locations,
            dropped_modules,
        }
    }

    /// Impure: applies a computed plan to the host runtime collaborator.
    /// Must run exactly once per process (§4.2 "irreversible... must run
    /// exactly once per process").
    pub fn apply(
        host: &mut dyn HostRuntime,
        plan: ScrubPlan,
    ) -> Result<(), ScrubError> {
        if SCRUBBED.swap(true, Ordering::SeqCst) {
            return Err(ScrubError::AlreadyScrubbed);
        }
        host.set_state(RuntimeSnapshot {
            search_path: plan.search_path,
            importer_cache: plan.importer_cache,
            modules: plan.modules,
        });
        host.reset_hooks();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn reset_once_guard_for_tests() {
        SCRUBBED.store(false, Ordering::SeqCst);
    }
}

/// The host runtime collaborator (§9): `get_state`/`set_state` are the
/// only impure surface the scrubber touches.
pub trait HostRuntime {
    fn get_state(&self) -> RuntimeSnapshot;
    fn set_state(&mut self, snapshot: RuntimeSnapshot);
    /// Restores `sys.displayhook`/`sys.excepthook` (or the host-runtime
    /// equivalent) to factory defaults (§4.2 "Apply").
    fn reset_hooks(&mut self);
}

/// An in-memory host runtime used by tests and, conceptually, documents
/// what a real embedding would implement against an actual interpreter's
/// C API or FFI boundary.
#[derive(Default)]
pub struct InMemoryHost {
    pub state: RuntimeSnapshot,
    pub hooks_reset: bool,
}

impl HostRuntime for InMemoryHost {
    fn get_state(&self) -> RuntimeSnapshot {
        self.state.clone()
    }
    fn set_state(&mut self, snapshot: RuntimeSnapshot) {
        self.state = snapshot;
    }
    fn reset_hooks(&mut self) {
        self.hooks_reset = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SanctionedPaths;
    use tempfile::tempdir;

    fn snapshot_with(entries: &[&Path]) -> RuntimeSnapshot {
        RuntimeSnapshot {
            search_path: entries.iter().map(|p| p.to_path_buf()).collect(),
            importer_cache: BTreeMap::new(),
            modules: BTreeMap::new(),
        }
    }

    #[test]
    fn drops_non_sanctioned_and_keeps_sanctioned() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        let tainted = dir.path().join("site-packages");
        std::fs::create_dir_all(&core).unwrap();
        std::fs::create_dir_all(&tainted).unwrap();

        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();

        let scrubber = Scrubber {
            sanctioned: &sanctioned,
            inherit_path: InheritPath::None,
            extra_sys_path: &[],
            restored_user_path: None,
            is_virtualenv_host: false,
            cwd: dir.path().to_path_buf(),
        };

        let snapshot = snapshot_with(&[&core, &tainted]);
        let plan = scrubber.compute(&snapshot);
        assert_eq!(plan.search_path, vec![core.clone()]);
        assert_eq!(plan.dropped_search_path, vec![tainted]);
    }

    #[test]
    fn egg_link_indirection_target_is_scrubbed_too() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        let tainted = dir.path().join("site-packages");
        let indirect_target = dir.path().join("src/mypkg");
        std::fs::create_dir_all(&core).unwrap();
        std::fs::create_dir_all(&tainted).unwrap();
        std::fs::create_dir_all(&indirect_target).unwrap();
        std::fs::write(
            tainted.join("mypkg.egg-link"),
            format!("{}\n.\n", indirect_target.display()),
        )
        .unwrap();

        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();

        let scrubber = Scrubber {
            sanctioned: &sanctioned,
            inherit_path: InheritPath::None,
            extra_sys_path: &[],
            restored_user_path: None,
            is_virtualenv_host: false,
            cwd: dir.path().to_path_buf(),
        };

        let mut snapshot = snapshot_with(&[&core, &tainted]);
        snapshot
            .importer_cache
            .insert(indirect_target.join("mypkg"), "zipimporter".to_string());

        let plan = scrubber.compute(&snapshot);
        assert!(plan.dropped_search_path.contains(&indirect_target));
        assert!(!plan
            .importer_cache
            .contains_key(&indirect_target.join("mypkg")));
    }

    #[test]
    fn prefer_prepends_restored_user_path() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        let user_lib = dir.path().join("u_lib");
        std::fs::create_dir_all(&core).unwrap();
        std::fs::create_dir_all(&user_lib).unwrap();

        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();

        let scrubber = Scrubber {
            sanctioned: &sanctioned,
            inherit_path: InheritPath::Prefer,
            extra_sys_path: &[],
            restored_user_path: Some(vec![user_lib.clone()]),
            is_virtualenv_host: false,
            cwd: dir.path().to_path_buf(),
        };

        let snapshot = snapshot_with(&[&core]);
        let plan = scrubber.compute(&snapshot);
        assert_eq!(plan.search_path, vec![user_lib, core]);
    }

    #[test]
    fn fallback_appends_and_extra_sys_path_appends_after() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        let user_lib = dir.path().join("u_lib");
        let extra = dir.path().join("extra");
        std::fs::create_dir_all(&core).unwrap();
        std::fs::create_dir_all(&user_lib).unwrap();
        std::fs::create_dir_all(&extra).unwrap();

        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();
        let extras = vec![extra.clone()];

        let scrubber = Scrubber {
            sanctioned: &sanctioned,
            inherit_path: InheritPath::Fallback,
            extra_sys_path: &extras,
            restored_user_path: Some(vec![user_lib.clone()]),
            is_virtualenv_host: false,
            cwd: dir.path().to_path_buf(),
        };

        let snapshot = snapshot_with(&[&core]);
        let plan = scrubber.compute(&snapshot);
        assert_eq!(plan.search_path, vec![core, user_lib, extra]);
    }

    #[test]
    fn virtualenv_shim_module_is_retained_in_virtualized_host() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        std::fs::create_dir_all(&core).unwrap();
        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();

        let mut modules = BTreeMap::new();
        modules.insert(
            "_virtualenv".to_string(),
            ModuleRecord {
                file: Some(dir.path().join("tainted_shim.py")),
                package_path: PackagePath::NotAPackage,
            },
        );
        let snapshot = RuntimeSnapshot {
            search_path: vec![core.clone()],
            importer_cache: BTreeMap::new(),
            modules,
        };

        let scrubber = Scrubber {
            sanctioned: &sanctioned,
            inherit_path: InheritPath::None,
            extra_sys_path: &[],
            restored_user_path: None,
            is_virtualenv_host: true,
            cwd: dir.path().to_path_buf(),
        };

        let plan = scrubber.compute(&snapshot);
        assert!(plan.modules.contains_key("_virtualenv"));
        assert!(plan.dropped_modules.is_empty());
    }

    #[test]
    fn non_list_package_path_is_dropped() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        std::fs::create_dir_all(&core).unwrap();
        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();

        let mut modules = BTreeMap::new();
        modules.insert(
            "ns_pkg".to_string(),
            ModuleRecord {
                file: None,
                package_path: PackagePath::NonList,
            },
        );
        let snapshot = RuntimeSnapshot {
            search_path: vec![core.clone()],
            importer_cache: BTreeMap::new(),
            modules,
        };

        let scrubber = Scrubber {
            sanctioned: &sanctioned,
            inherit_path: InheritPath::None,
            extra_sys_path: &[],
            restored_user_path: None,
            is_virtualenv_host: false,
            cwd: dir.path().to_path_buf(),
        };

        let plan = scrubber.compute(&snapshot);
        assert!(!plan.modules.contains_key("ns_pkg"));
        assert_eq!(plan.dropped_modules, vec!["ns_pkg".to_string()]);
    }

    #[test]
    fn package_path_emptied_drops_record() {
        let dir = tempdir().unwrap();
        let core = dir.path().join("core");
        let tainted = dir.path().join("tainted");
        std::fs::create_dir_all(&core).unwrap();
        std::fs::create_dir_all(&tainted).unwrap();
        let sanctioned = SanctionedPaths::builder(dir.path().to_path_buf())
            .allow(&core)
            .build();

        let mut modules = BTreeMap::new();
        modules.insert(
            "pkg".to_string(),
            ModuleRecord {
                file: Some(core.join("pkg/__init__.py")),
                package_path: PackagePath::List(vec![tainted.clone()]),
            },
        );
        let snapshot = RuntimeSnapshot {
            search_path: vec![core.clone()],
            importer_cache: BTreeMap::new(),
            modules,
        };

        let scrubber = Scrubber {
            sanctioned: &sanctioned,
            inherit_path: InheritPath::None,
            extra_sys_path: &[],
            restored_user_path: None,
            is_virtualenv_host: false,
            cwd: dir.path().to_path_buf(),
        };

        let plan = scrubber.compute(&snapshot);
        assert!(!plan.modules.contains_key("pkg"));
    }

    #[test]
    fn apply_runs_exactly_once() {
        Scrubber::reset_once_guard_for_tests();
        let mut host = InMemoryHost::default();
        let plan = ScrubPlan {
            search_path: vec![],
            importer_cache: BTreeMap::new(),
            modules: BTreeMap::new(),
            dropped_search_path: vec![],
            dropped_modules: vec![],
        };
        let plan2 = ScrubPlan {
            search_path: vec![],
            importer_cache: BTreeMap::new(),
            modules: BTreeMap::new(),
            dropped_search_path: vec![],
            dropped_modules: vec![],
        };
        Scrubber::apply(&mut host, plan).unwrap();
        assert!(host.hooks_reset);
        let err = Scrubber::apply(&mut host, plan2).unwrap_err();
        assert!(matches!(err, ScrubError::AlreadyScrubbed));
    }
}
