//! Recursive fetching of repositories and the repositories their resources depend on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use tracing::{info, warn};

use crate::error::{FetchError, FetchResult, ManifestError};
use crate::model::config::{AppConfig, CyclePolicy};
use crate::model::resource::{RepositoryReference, Resource};
use crate::package::discovery;
use crate::package::manifest::ManifestLoader;
use crate::package::vcs::Vcs;

pub struct Installer<V> {
    vcs: V,
    loader: ManifestLoader,
    storage_root: PathBuf,
    bracket_packages: bool,
    cycle_policy: CyclePolicy,
    skipped: Vec<ManifestError>,
}

impl<V: Vcs> Installer<V> {
    pub fn new(vcs: V, config: &AppConfig) -> Self {
        Self {
            vcs,
            loader: ManifestLoader::from_config(config),
            storage_root: config.storage_root(),
            bracket_packages: config.storage.bracket_packages,
            cycle_policy: config.resolve.cycle_policy,
            skipped: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Manifests that failed to load since the last call.
    pub fn take_skipped(&mut self) -> Vec<ManifestError> {
        std::mem::take(&mut self.skipped)
    }

    /// Fetch `reference` and, depth first, every repository its resources
    /// declare under `dependency_url`. Dependencies' resources come first.
    ///
    /// Any repository-level failure aborts the whole resolution.
    pub fn resolve(
        &mut self,
        reference: &RepositoryReference,
        force: bool,
    ) -> FetchResult<Vec<Resource>> {
        let mut active = Vec::new();
        self.resolve_on_path(reference, force, &mut active)
    }

    fn resolve_on_path(
        &mut self,
        reference: &RepositoryReference,
        force: bool,
        active: &mut Vec<RepositoryReference>,
    ) -> FetchResult<Vec<Resource>> {
        if active.contains(reference) {
            let mut chain: Vec<String> = active.iter().map(ToString::to_string).collect();
            chain.push(reference.to_string());

            return match self.cycle_policy {
                CyclePolicy::Fail => Err(FetchError::Cycle { chain }),
                CyclePolicy::Skip => {
                    warn!("ignoring cyclic dependency: {}", chain.join(" -> "));
                    Ok(Vec::new())
                }
            };
        }

        active.push(reference.clone());
        let resolved = self.fetch_tree(reference, force, active);
        active.pop();
        resolved
    }

    fn fetch_tree(
        &mut self,
        reference: &RepositoryReference,
        force: bool,
        active: &mut Vec<RepositoryReference>,
    ) -> FetchResult<Vec<Resource>> {
        let local = self.sync(reference, force)?;

        let report = discovery::discover(&local, &self.loader);
        self.skipped.extend(report.skipped);
        let own = report.resources;
        info!("{reference}: {} resources", own.len());

        // Collapse duplicate references, keeping first-seen order.
        let dependencies: IndexSet<String> = own
            .iter()
            .flat_map(|resource| resource.manifest.dependencies().iter().cloned())
            .collect();

        let mut resolved = Vec::new();
        for dependency in dependencies {
            let dependency = RepositoryReference::new(dependency);
            resolved.extend(self.resolve_on_path(&dependency, force, active)?);
        }

        resolved.extend(own);
        Ok(resolved)
    }

    /// Clone `reference` if it has no checkout yet, otherwise pull it.
    /// A dirty checkout is only updated when `force` is set.
    pub fn sync(&self, reference: &RepositoryReference, force: bool) -> FetchResult<PathBuf> {
        let local = reference.local_path(&self.storage_root, self.bracket_packages)?;

        if dir_exists(&local)? {
            if !self.vcs.is_clean(&local)? {
                if !force {
                    let changes = self.vcs.status(&local)?.describe();
                    return Err(FetchError::Dirty {
                        path: local,
                        changes,
                    });
                }
                warn!("updating {} despite local changes", local.display());
            }
            self.vcs.pull(&local)?;
        } else {
            self.vcs.clone_repo(reference, &local)?;
        }

        Ok(local)
    }
}

fn dir_exists(path: &Path) -> FetchResult<bool> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(true),
        Ok(_) => Err(FetchError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(FetchError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
