use std::ffi::OsStr;
use std::path::Path;

use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::error::ManifestError;
use crate::model::resource::Resource;
use crate::package::manifest::ManifestLoader;

const VCS_DIR: &str = ".git";

/// Resources found under one repository, plus manifests that failed to load.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub resources: Vec<Resource>,
    pub skipped: Vec<ManifestError>,
}

/// Walk `root` and turn every directory with a loadable manifest into a resource.
///
/// Entries are visited in file-name order and symlinks are not followed, so a
/// directory is never visited twice. Unreadable subtrees are logged and skipped.
pub fn discover(root: &Path, loader: &ManifestLoader) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| entry.file_name() != OsStr::new(VCS_DIR))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable path under {}: {err}", root.display());
                continue;
            }
        };

        if !entry.file_type().is_some_and(|kind| kind.is_dir()) {
            continue;
        }

        let dir = entry.path();
        match loader.interpret(dir) {
            Ok(manifest) => {
                let name = dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| dir.display().to_string());

                debug!(
                    description = manifest.get("description").unwrap_or_default(),
                    "found resource {name} at {}",
                    dir.display()
                );
                report.resources.push(Resource {
                    name,
                    path: dir.to_path_buf(),
                    manifest,
                });
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!("skipping resource in {}: {err}", dir.display());
                report.skipped.push(err);
            }
        }
    }

    report
}
