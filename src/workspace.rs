//! Repository fetching into isolated, self-cleaning working trees.
//!
//! Every fetch gets its own staging directory under the workspace root:
//!
//! ```text
//! <root>/.ingest-XXXXXX/checkout   while `git clone` runs
//! <root>/.ingest-XXXXXX/tree       after a successful clone
//! ```
//!
//! A [`WorkingTree`] is only handed out once the clone has exited
//! successfully, so callers never observe a partial checkout. Dropping the
//! tree deletes the staging directory and releases the ingest permit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::WorkspaceConfig;
use crate::error::{Result, WizardError};

const STAGING_PREFIX: &str = ".ingest-";

/// Owner of the clone root and the ingest admission semaphore.
#[derive(Clone)]
pub struct Workspace {
    root: PathBuf,
    shallow: bool,
    clone_timeout: Duration,
    permits: Arc<Semaphore>,
}

/// A successfully fetched repository. Exclusively owned by one request.
#[derive(Debug)]
pub struct WorkingTree {
    path: PathBuf,
    url: String,
    // Field order matters: the directory is removed before the permit is
    // released.
    _staging: TempDir,
    _permit: OwnedSemaphorePermit,
}

impl WorkingTree {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Workspace {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            root: config.root.clone(),
            shallow: config.shallow,
            clone_timeout: Duration::from_secs(config.clone_timeout_secs),
            permits: Arc::new(Semaphore::new(config.max_concurrent_ingests.max(1))),
        }
    }

    /// Clone `url` into a fresh staging directory.
    ///
    /// Waits for an ingest permit first; the permit travels with the
    /// returned tree.
    pub async fn fetch(&self, url: &str) -> Result<WorkingTree> {
        let url = validate_url(url)?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| WizardError::Internal(anyhow::anyhow!("ingest semaphore closed: {}", e)))?;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            WizardError::Fetch(format!(
                "cannot create workspace root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| WizardError::Fetch(format!("cannot create staging directory: {}", e)))?;

        let checkout = staging.path().join("checkout");
        info!(url = %url, staging = %staging.path().display(), "Cloning repository");
        self.git_clone(url, &checkout).await?;

        let tree = staging.path().join("tree");
        tokio::fs::rename(&checkout, &tree)
            .await
            .map_err(|e| WizardError::Fetch(format!("cannot finalize checkout: {}", e)))?;

        Ok(WorkingTree {
            path: tree,
            url: url.to_string(),
            _staging: staging,
            _permit: permit,
        })
    }

    async fn git_clone(&self, url: &str, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg("--").arg(url).arg(dest);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            WizardError::Fetch(format!("failed to execute 'git clone'. Is git installed? {}", e))
        })?;

        let output = match tokio::time::timeout(self.clone_timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| WizardError::Fetch(e.to_string()))?,
            Err(_) => {
                return Err(WizardError::timeout(
                    "git clone",
                    self.clone_timeout.as_secs(),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WizardError::Fetch(format!(
                "git clone failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Remove staging directories left behind by a previous process.
    /// Returns how many were deleted.
    pub fn sweep_stale(&self) -> usize {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let is_staging = name
                .to_str()
                .map(|n| n.starts_with(STAGING_PREFIX))
                .unwrap_or(false);
            if !is_staging || !entry.path().is_dir() {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!("Removed stale staging dir {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => warn!(
                    "Failed to remove stale staging dir {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
        removed
    }

    #[cfg(test)]
    fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

fn validate_url(url: &str) -> Result<&str> {
    let url = url.trim();
    if url.is_empty() {
        return Err(WizardError::invalid("Repository URL is required"));
    }
    if url.starts_with('-') {
        return Err(WizardError::invalid(format!(
            "Invalid repository URL: {}",
            url
        )));
    }
    Ok(url)
}

/// True when a `git` executable is on `PATH`.
pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(root: &Path) -> Workspace {
        Workspace::new(&WorkspaceConfig {
            root: root.to_path_buf(),
            shallow: true,
            clone_timeout_secs: 30,
            max_concurrent_ingests: 1,
        })
    }

    fn staging_dirs(root: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(root)
            .map(|rd| {
                rd.flatten()
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.starts_with(STAGING_PREFIX))
                            .unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn init_repo(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("a.py"), "print('a')\n").unwrap();
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(dir)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .unwrap();
            assert!(status.success(), "git {:?} failed", args);
        };
        run(&["init", "-q"]);
        run(&["add", "."]);
        run(&[
            "-c",
            "user.name=test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-q",
            "-m",
            "init",
        ]);
    }

    #[test]
    fn test_validate_url() {
        assert!(matches!(validate_url("  "), Err(WizardError::InvalidInput(_))));
        assert!(matches!(
            validate_url("--upload-pack=touch /tmp/x"),
            Err(WizardError::InvalidInput(_))
        ));
        assert_eq!(
            validate_url(" https://example.com/r.git ").unwrap(),
            "https://example.com/r.git"
        );
    }

    #[tokio::test]
    async fn test_empty_url_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let ws = workspace(&tmp.path().join("cache"));
        let err = ws.fetch("").await.unwrap_err();
        assert!(matches!(err, WizardError::InvalidInput(_)));
        assert!(!tmp.path().join("cache").exists());
        assert_eq!(ws.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_failed_clone_cleans_staging() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let ws = workspace(tmp.path());
        let missing = tmp.path().join("no-such-repo");
        let err = ws.fetch(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, WizardError::Fetch(_)), "got {:?}", err);
        assert!(staging_dirs(tmp.path()).is_empty());
        assert_eq!(ws.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_tree_is_removed_on_drop() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        init_repo(&origin);
        let ws = workspace(&tmp.path().join("cache"));

        let tree = ws.fetch(origin.to_str().unwrap()).await.unwrap();
        assert!(tree.path().join("a.py").is_file());
        assert!(tree.path().ends_with("tree"));
        assert_eq!(ws.available_permits(), 0);

        drop(tree);
        assert!(staging_dirs(&tmp.path().join("cache")).is_empty());
        assert_eq!(ws.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_get_distinct_trees() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        init_repo(&origin);
        let ws = Workspace::new(&WorkspaceConfig {
            root: tmp.path().join("cache"),
            shallow: false,
            clone_timeout_secs: 30,
            max_concurrent_ingests: 2,
        });

        let url = origin.to_str().unwrap();
        let (a, b) = tokio::join!(ws.fetch(url), ws.fetch(url));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path(), b.path());
        assert!(a.path().join("a.py").is_file());
        assert!(b.path().join("a.py").is_file());
    }

    #[test]
    fn test_sweep_stale() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".ingest-abc/checkout")).unwrap();
        std::fs::create_dir_all(tmp.path().join("keep-me")).unwrap();
        let ws = workspace(tmp.path());
        assert_eq!(ws.sweep_stale(), 1);
        assert!(tmp.path().join("keep-me").exists());
        assert!(staging_dirs(tmp.path()).is_empty());
    }
}
