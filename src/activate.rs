//! Distribution Activator (C4), §4.4.
//!
//! Grounded on `PEX.activate`/`PEX._activate` (`pex/pex.py`, adjacent to
//! the `minimum_sys_path`/`patch_sys` code read for [`crate::scrub`]):
//! mount every archive, register each yielded distribution, then — only
//! once every mount has contributed its distributions — declare
//! namespace-package split paths in a second pass, so namespace-package
//! machinery itself is never imported before the full distribution list
//! is known.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::archive::{self, MountedArchive};
use crate::errors::ActivateError;
use crate::scrub::HostRuntime;

/// §4.4 "distribution records (project name, version, location,
/// metadata)".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub project_name: String,
    pub version: String,
    pub location: PathBuf,
    pub namespace_packages: Vec<String>,
}

impl Distribution {
    fn identity(&self) -> (String, String, PathBuf) {
        (self.project_name.clone(), self.version.clone(), self.location.clone())
    }
}

/// §4.4 "The activator is idempotent: subsequent calls return the cached
/// distribution list."
#[derive(Default)]
pub struct Activator {
    activated: Option<Vec<Distribution>>,
}

impl Activator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(
        &mut self,
        host: &mut dyn HostRuntime,
        archive_roots: &[PathBuf],
    ) -> Result<&[Distribution], ActivateError> {
        if self.activated.is_some() {
            return Ok(self.activated.as_ref().unwrap());
        }

        let mut by_identity: BTreeMap<(String, String, PathBuf), Distribution> = BTreeMap::new();
        let mut order = Vec::new();

        for root in archive_roots {
            let mounted: MountedArchive = archive::mount(root)
                .map_err(|e| ActivateError::MountFailed(root.clone(), e.to_string()))?;
            for dist in mounted.distributions {
                let key = dist.identity();
                if by_identity.insert(key.clone(), dist).is_none() {
                    order.push(key);
                }
            }
        }

        let mut state = host.get_state();
        for key in &order {
            let dist = &by_identity[key];
            if !state.search_path.contains(&dist.location) {
                state.search_path.push(dist.location.clone());
            }
        }

        // Second phase, deferred until every mount has registered: declare
        // namespace-package split paths across the combined list (§4.4).
        let mut namespace_paths: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for key in &order {
            let dist = &by_identity[key];
            for ns in &dist.namespace_packages {
                namespace_paths
                    .entry(ns.clone())
                    .or_default()
                    .push(dist.location.clone());
            }
        }
        for (package, paths) in namespace_paths {
            let record = state
                .modules
                .entry(package)
                .or_insert_with(|| crate::scrub::ModuleRecord {
                    file: None,
                    package_path: crate::scrub::PackagePath::List(Vec::new()),
                });
            match &mut record.package_path {
                crate::scrub::PackagePath::List(existing) => {
                    for p in paths {
                        if !existing.contains(&p) {
                            existing.push(p);
                        }
                    }
                }
                other => *other = crate::scrub::PackagePath::List(paths),
            }
        }
        host.set_state(state);

        let distributions: Vec<Distribution> = order.into_iter().map(|k| by_identity.remove(&k).unwrap()).collect();
        self.activated = Some(distributions);
        Ok(self.activated.as_ref().unwrap())
    }
}
