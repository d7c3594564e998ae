use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{FetchError, FetchResult};

/// Manifest key listing further repositories a resource depends on.
pub const DEPENDENCY_KEY: &str = "dependency_url";

/// Ordered multi-map of metadata declared by a resource manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    values: IndexMap<String, SmallVec<[String; 1]>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` to the list stored at `key`.
    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    /// First value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value recorded for `key`, in declaration order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values
            .get(key)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependencies(&self) -> &[String] {
        self.get_all(DEPENDENCY_KEY)
    }
}

/// A directory inside a fetched repository carrying a loadable manifest.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub path: PathBuf,
    pub manifest: Manifest,
}

/// Opaque locator of a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryReference(String);

impl RepositoryReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, cut at the first `.`, lower-cased.
    pub fn package_name(&self) -> FetchResult<String> {
        let trimmed = self.0.trim().trim_end_matches('/');
        let segment = trimmed.rsplit('/').next().unwrap_or_default();
        let name = segment.split('.').next().unwrap_or_default().to_lowercase();

        if name.is_empty() {
            return Err(FetchError::InvalidReference {
                reference: self.0.clone(),
            });
        }

        Ok(name)
    }

    /// Deterministic checkout directory for this reference under `storage_root`.
    pub fn local_path(&self, storage_root: &Path, bracketed: bool) -> FetchResult<PathBuf> {
        let name = self.package_name()?;
        let dir_name = if bracketed { format!("[{name}]") } else { name };
        Ok(storage_root.join(dir_name))
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
