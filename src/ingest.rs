//! Ingestion orchestration: fetch → extract → cleanup.
//!
//! The walk runs on the blocking pool while the fetched [`WorkingTree`]
//! (and therefore its ingest permit) is still alive; the tree is dropped
//! as soon as the corpus is built.

use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::corpus::{self, ExtractOptions};
use crate::error::{Result, WizardError};
use crate::models::ExtractedRepo;
use crate::workspace::Workspace;

#[derive(Clone)]
pub struct Ingestor {
    workspace: Workspace,
    options: ExtractOptions,
}

impl Ingestor {
    pub fn new(config: &Config) -> Result<Self> {
        let options = ExtractOptions::from_config(&config.extract)?;
        Ok(Self {
            workspace: Workspace::new(&config.workspace),
            options,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Clone `url` and extract its index and corpus.
    pub async fn ingest(&self, url: &str) -> Result<ExtractedRepo> {
        let started = Instant::now();
        let tree = self.workspace.fetch(url).await?;
        let options = self.options.clone();

        let (tree, repo) = tokio::task::spawn_blocking(move || {
            let repo = corpus::extract(&tree, &options);
            (tree, repo)
        })
        .await
        .map_err(|e| WizardError::Internal(anyhow::anyhow!("extraction task failed: {}", e)))?;

        info!(
            url = tree.url(),
            files = repo.index.len(),
            segments = repo.corpus.segments().len(),
            chars = repo.char_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Repository ingested"
        );
        drop(tree);
        Ok(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::git_available;
    use std::process::{Command, Stdio};
    use tempfile::TempDir;

    fn git(dir: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_ingest_local_repo() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::write(origin.join("a.py"), "print('a')\n").unwrap();
        std::fs::write(origin.join("b.png"), b"\x89PNG\r\n\x1a\n\x00\x00").unwrap();
        git(&origin, &["init", "-q"]);
        git(&origin, &["add", "."]);
        git(
            &origin,
            &["-c", "user.name=t", "-c", "user.email=t@e.x", "commit", "-q", "-m", "init"],
        );

        let mut config = Config::default();
        config.workspace.root = tmp.path().join("cache");
        let ingestor = Ingestor::new(&config).unwrap();

        let repo = ingestor.ingest(origin.to_str().unwrap()).await.unwrap();
        assert_eq!(repo.index, vec!["a.py", "b.png"]);
        assert_eq!(repo.corpus.segments().len(), 1);
        assert!(repo.corpus.text().contains("----- File: a.py -----\nprint('a')\n"));

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("cache"))
            .unwrap()
            .flatten()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.workspace.root = tmp.path().join("cache");
        let ingestor = Ingestor::new(&config).unwrap();
        let err = ingestor.ingest("-oProxyCommand=x").await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }
}
