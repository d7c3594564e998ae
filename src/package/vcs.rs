use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, info};

use crate::error::{FetchError, FetchResult};
use crate::model::resource::RepositoryReference;

/// Version-control operations the installer depends on.
pub trait Vcs {
    /// Materialise `reference` at `dest`, which does not exist yet.
    fn clone_repo(&self, reference: &RepositoryReference, dest: &Path) -> FetchResult<()>;

    fn status(&self, path: &Path) -> FetchResult<WorktreeStatus>;

    /// Update an existing checkout. Being already up to date is not an error.
    fn pull(&self, path: &Path) -> FetchResult<()>;

    fn is_clean(&self, path: &Path) -> FetchResult<bool> {
        self.status(path).map(|status| status.is_clean())
    }
}

/// Local modifications of a checkout, one porcelain line per change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    pub changes: Vec<String>,
}

impl WorktreeStatus {
    pub fn from_porcelain(text: &str) -> Self {
        Self {
            changes: text
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn describe(&self) -> String {
        self.changes.join("\n")
    }
}

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run<I, S>(&self, args: I) -> std::io::Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.program).args(args).output()
    }
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        stderr
    }
}

impl Vcs for GitCli {
    fn clone_repo(&self, reference: &RepositoryReference, dest: &Path) -> FetchResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| FetchError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        info!("cloning {reference} into {}", dest.display());
        let output = self
            .run([
                OsStr::new("clone"),
                OsStr::new("--quiet"),
                OsStr::new(reference.as_str()),
                dest.as_os_str(),
            ])
            .map_err(|err| FetchError::Clone {
                reference: reference.to_string(),
                message: format!("failed to run git: {err}"),
            })?;

        if !output.status.success() {
            return Err(FetchError::Clone {
                reference: reference.to_string(),
                message: stderr_message(&output),
            });
        }

        Ok(())
    }

    fn status(&self, path: &Path) -> FetchResult<WorktreeStatus> {
        let output = self
            .run([
                OsStr::new("-C"),
                path.as_os_str(),
                OsStr::new("status"),
                OsStr::new("--porcelain"),
            ])
            .map_err(|err| FetchError::Status {
                path: path.to_path_buf(),
                message: format!("failed to run git: {err}"),
            })?;

        if !output.status.success() {
            return Err(FetchError::Status {
                path: path.to_path_buf(),
                message: stderr_message(&output),
            });
        }

        Ok(WorktreeStatus::from_porcelain(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    fn pull(&self, path: &Path) -> FetchResult<()> {
        info!("pulling {}", path.display());
        let output = self
            .run([
                OsStr::new("-C"),
                path.as_os_str(),
                OsStr::new("pull"),
                OsStr::new("--ff-only"),
                OsStr::new("--quiet"),
                OsStr::new("origin"),
            ])
            .map_err(|err| FetchError::Pull {
                path: path.to_path_buf(),
                message: format!("failed to run git: {err}"),
            })?;

        if !output.status.success() {
            return Err(FetchError::Pull {
                path: path.to_path_buf(),
                message: stderr_message(&output),
            });
        }

        debug!("{} is up to date", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_parsing() {
        let status = WorktreeStatus::from_porcelain(" M fxmanifest.lua\n?? notes.txt\n\n");

        assert!(!status.is_clean());
        assert_eq!(status.changes, vec![" M fxmanifest.lua", "?? notes.txt"]);
        assert_eq!(status.describe(), " M fxmanifest.lua\n?? notes.txt");
        assert!(WorktreeStatus::from_porcelain("").is_clean());
    }

    #[test]
    fn missing_git_binary_is_a_clone_error() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path().join("no-such-git"));
        let reference = RepositoryReference::new("https://example.test/pack.git");

        let err = git
            .clone_repo(&reference, &dir.path().join("resources").join("[pack]"))
            .unwrap_err();

        assert!(matches!(err, FetchError::Clone { .. }), "{err:?}");
        assert!(dir.path().join("resources").is_dir());
    }

    #[test]
    fn status_outside_a_checkout_fails() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path().join("no-such-git"));

        assert!(matches!(
            git.is_clean(dir.path()),
            Err(FetchError::Status { .. })
        ));
    }
}
