use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULTS: &str = include_str!("../../config/default.toml");
const PROJECT_CONFIG: &str = "fx.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub manifest: ManifestConfig,
    pub resolve: ResolveConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub root: String,
    pub bracket_packages: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
    pub file_name: String,
    /// Zero disables the execution deadline.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveConfig {
    pub cycle_policy: CyclePolicy,
}

/// What to do when a reference reappears on its own resolution path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    #[default]
    Fail,
    Skip,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config → project config.
    pub fn load() -> Result<Self> {
        let mut layers = Vec::new();

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "fx") {
            layers.push(proj_dirs.config_dir().join("config.toml"));
        }
        layers.push(PathBuf::from(PROJECT_CONFIG));

        let mut sources = Vec::new();
        for path in layers.iter().filter(|path| path.exists()) {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            tracing::debug!("config layer {}", path.display());
            sources.push(text);
        }

        Self::from_layers(sources.iter().map(String::as_str))
    }

    /// Deep-merge TOML documents over the compiled-in defaults.
    pub fn from_layers<'a>(layers: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut merged: toml::Table = toml::from_str(DEFAULTS)?;

        for layer in layers {
            let table: toml::Table = toml::from_str(layer)?;
            merge_tables(&mut merged, table);
        }

        let mut config: AppConfig = toml::Value::Table(merged).try_into()?;

        // Expand ~ in storage root
        if config.storage.root.starts_with('~') {
            let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
            config.storage.root = config
                .storage
                .root
                .replacen('~', &home.to_string_lossy(), 1);
        }

        Ok(config)
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.root)
    }

    pub fn registry_path(&self) -> PathBuf {
        PathBuf::from(&self.registry.file)
    }

    pub fn manifest_timeout(&self) -> Option<Duration> {
        match self.manifest.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn with_storage_root(mut self, root: &Path) -> Self {
        self.storage.root = root.to_string_lossy().into_owned();
        self
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };

        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }

        base.insert(key, toml::Value::Table(incoming));
    }
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
