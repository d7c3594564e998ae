use std::path::Path;

use tracing::info;

use crate::error::{FetchResult, ManifestError};
use crate::model::config::AppConfig;
use crate::model::resource::{RepositoryReference, Resource};
use crate::package::installer::Installer;
use crate::package::registry;
use crate::package::vcs::Vcs;

/// Result of `fx get`.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub resources: Vec<Resource>,
    pub skipped: Vec<ManifestError>,
}

/// Result of `fx add`.
#[derive(Debug, Default)]
pub struct RegisterOutcome {
    pub resources: Vec<Resource>,
    pub added: Vec<String>,
    pub skipped: Vec<ManifestError>,
}

pub struct PackageManager<V> {
    installer: Installer<V>,
}

impl<V: Vcs> PackageManager<V> {
    pub fn new(vcs: V, config: &AppConfig) -> Self {
        Self {
            installer: Installer::new(vcs, config),
        }
    }

    #[cfg(test)]
    pub fn installer(&self) -> &Installer<V> {
        &self.installer
    }

    /// Resolve `reference` without touching any registry.
    pub fn fetch_only(&mut self, reference: &str, force: bool) -> FetchResult<FetchOutcome> {
        let Some(reference) = parse_reference(reference) else {
            return Ok(FetchOutcome::default());
        };

        let resources = self.installer.resolve(&reference, force)?;
        Ok(FetchOutcome {
            resources,
            skipped: self.installer.take_skipped(),
        })
    }

    /// Resolve `reference` and append its resources to the registry at `registry_file`.
    pub fn fetch_and_register(
        &mut self,
        reference: &str,
        force: bool,
        registry_file: &Path,
    ) -> FetchResult<RegisterOutcome> {
        let Some(reference) = parse_reference(reference) else {
            return Ok(RegisterOutcome::default());
        };

        let resources = self.installer.resolve(&reference, force)?;
        let skipped = self.installer.take_skipped();

        let existing = registry::read_names(registry_file)?;
        let known = existing.len();
        let names = registry::merge(existing, &resources);
        registry::write_names(registry_file, &names)?;

        let added = names[known..].to_vec();
        info!(
            "registered {} new resources in {}",
            added.len(),
            registry_file.display()
        );

        Ok(RegisterOutcome {
            resources,
            added,
            skipped,
        })
    }
}

fn parse_reference(raw: &str) -> Option<RepositoryReference> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(RepositoryReference::new(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::package::installer::tests::{FixtureVcs, Workspace};
    use crate::package::manifest::DEFAULT_FILE_NAME;
    use std::fs;

    const PACK: &str = "https://example.test/pack.git";
    const DEP: &str = "https://example.test/dep.git";

    fn pack_with_dependency(ws: &Workspace) -> FixtureVcs {
        let bar = format!(r#"dependency_url "{DEP}""#);
        FixtureVcs::default()
            .with_repo(
                PACK,
                ws.repo("pack", &[("foo", r#"description "foo""#), ("bar", bar.as_str())]),
            )
            .with_repo(DEP, ws.repo("dep", &[("baz", "")]))
    }

    fn names(resources: &[Resource]) -> Vec<&str> {
        resources.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn fetch_only_lists_resolved_resources() {
        let ws = Workspace::new();
        let mut manager = PackageManager::new(pack_with_dependency(&ws), &ws.config());

        let outcome = manager.fetch_only(PACK, false).unwrap();

        assert_eq!(names(&outcome.resources), vec!["baz", "bar", "foo"]);
        assert!(outcome.skipped.is_empty());
        assert!(ws.storage().join("[pack]").is_dir());
    }

    #[test]
    fn blank_reference_is_a_no_op() {
        let ws = Workspace::new();
        let registry_file = ws.dir.path().join("resources.cfg");
        let mut manager = PackageManager::new(FixtureVcs::default(), &ws.config());

        assert!(manager.fetch_only("   ", false).unwrap().resources.is_empty());
        assert!(
            manager
                .fetch_and_register("", false, &registry_file)
                .unwrap()
                .added
                .is_empty()
        );
        assert!(!registry_file.exists());
        assert!(manager.installer().vcs().calls.borrow().is_empty());
    }

    #[test]
    fn register_appends_new_names_after_existing_ones() {
        let ws = Workspace::new();
        let registry_file = ws.dir.path().join("resources.cfg");
        fs::write(&registry_file, "start chat\r\nstart foo\r\n").unwrap();
        let mut manager = PackageManager::new(pack_with_dependency(&ws), &ws.config());

        let outcome = manager
            .fetch_and_register(PACK, false, &registry_file)
            .unwrap();

        assert_eq!(outcome.added, vec!["baz", "bar"]);
        assert_eq!(
            registry::read_names(&registry_file).unwrap(),
            vec!["chat", "foo", "baz", "bar"]
        );
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let ws = Workspace::new();
        let registry_file = ws.dir.path().join("resources.cfg");
        let mut manager = PackageManager::new(pack_with_dependency(&ws), &ws.config());

        manager
            .fetch_and_register(PACK, false, &registry_file)
            .unwrap();
        let first = fs::read_to_string(&registry_file).unwrap();

        let second_run = manager
            .fetch_and_register(PACK, false, &registry_file)
            .unwrap();
        let second = fs::read_to_string(&registry_file).unwrap();

        assert_eq!(first, second);
        assert!(second_run.added.is_empty());
        assert_eq!(names(&second_run.resources), vec!["baz", "bar", "foo"]);
    }

    #[test]
    fn dirty_checkout_leaves_registry_untouched() {
        let ws = Workspace::new();
        let registry_file = ws.dir.path().join("resources.cfg");
        fs::write(&registry_file, "start chat\n").unwrap();
        let local = ws.storage().join("[pack]").join("foo");
        fs::create_dir_all(&local).unwrap();
        fs::write(local.join(DEFAULT_FILE_NAME), "").unwrap();
        let mut vcs = FixtureVcs::default();
        vcs.dirty.insert(ws.storage().join("[pack]"));
        let mut manager = PackageManager::new(vcs, &ws.config());

        let err = manager
            .fetch_and_register(PACK, false, &registry_file)
            .unwrap_err();

        assert!(matches!(err, FetchError::Dirty { .. }));
        assert_eq!(fs::read_to_string(&registry_file).unwrap(), "start chat\n");

        let forced = manager
            .fetch_and_register(PACK, true, &registry_file)
            .unwrap();
        assert_eq!(forced.added, vec!["foo"]);
    }

    #[test]
    fn skipped_manifests_are_reported() {
        let ws = Workspace::new();
        let vcs = FixtureVcs::default().with_repo(
            PACK,
            ws.repo("pack", &[("bad", r#"io.write("x")"#), ("good", "")]),
        );
        let mut manager = PackageManager::new(vcs, &ws.config());

        let outcome = manager.fetch_only(PACK, false).unwrap();

        assert_eq!(names(&outcome.resources), vec!["good"]);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].path().ends_with("bad/__resource.lua"));
    }
}
