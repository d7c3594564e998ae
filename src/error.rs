use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to turn a resource directory into a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no manifest at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("syntax error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("manifest {} raised an error: {message}", path.display())]
    Runtime { path: PathBuf, message: String },

    #[error("manifest {} did not finish within {limit:?}", path.display())]
    Deadline { path: PathBuf, limit: Duration },
}

impl ManifestError {
    /// A missing manifest only means the directory is not a resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Self::NotFound { path }
            | Self::Io { path, .. }
            | Self::Parse { path, .. }
            | Self::Runtime { path, .. }
            | Self::Deadline { path, .. } => path,
        }
    }
}

/// Repository-level failures. Any of these aborts the whole resolution.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cannot derive a package name from reference `{reference}`")]
    InvalidReference { reference: String },

    #[error("failed to clone {reference}: {message}")]
    Clone { reference: String, message: String },

    #[error("failed to pull {}: {message}", path.display())]
    Pull { path: PathBuf, message: String },

    #[error("failed to read status of {}: {message}", path.display())]
    Status { path: PathBuf, message: String },

    #[error(
        "git repository {} is dirty, can't update (use --force to bypass):\n{changes}",
        path.display()
    )]
    Dirty { path: PathBuf, changes: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dependency cycle: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("registry {}: {source}", path.display())]
    Registry {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_is_benign() {
        let missing = ManifestError::NotFound {
            path: PathBuf::from("a/__resource.lua"),
        };
        let broken = ManifestError::Parse {
            path: PathBuf::from("b/__resource.lua"),
            message: "unexpected symbol".to_string(),
        };

        assert!(missing.is_not_found());
        assert!(!broken.is_not_found());
        assert_eq!(broken.path(), &PathBuf::from("b/__resource.lua"));
    }

    #[test]
    fn cycle_message_lists_the_chain() {
        let err = FetchError::Cycle {
            chain: vec!["a.git".to_string(), "b.git".to_string(), "a.git".to_string()],
        };

        assert_eq!(err.to_string(), "dependency cycle: a.git -> b.git -> a.git");
    }
}
