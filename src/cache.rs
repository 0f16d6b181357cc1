//! Context cache management on top of an [`LlmProvider`].
//!
//! Handles live on the provider; this manager remembers the ones it has
//! registered or listed, together with their expiry, so a question sent
//! to a handle that has already expired is rejected locally with
//! [`WizardError::CacheNotFound`] instead of a round trip.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, WizardError};
use crate::llm::{CacheRequest, LlmProvider};
use crate::models::CacheHandle;
use crate::prompts::{build_cache_contents, build_cached_question_prompt, CACHE_SYSTEM_INSTRUCTION};

pub struct CacheManager {
    provider: Arc<dyn LlmProvider>,
    model: String,
    default_ttl_hours: u64,
    max_ttl_hours: u64,
    known: Mutex<HashMap<String, CacheHandle>>,
}

impl CacheManager {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &Config) -> Self {
        Self {
            provider,
            model: config.cache_model(),
            default_ttl_hours: config.cache.default_ttl_hours,
            max_ttl_hours: config.cache.max_ttl_hours,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Apply the default TTL and check it against the configured bound.
    pub fn resolve_ttl(&self, ttl_hours: Option<u64>) -> Result<u64> {
        let ttl_hours = ttl_hours.unwrap_or(self.default_ttl_hours);
        if ttl_hours == 0 || ttl_hours > self.max_ttl_hours {
            return Err(WizardError::invalid(format!(
                "cache_ttl must be between 1 and {} hours",
                self.max_ttl_hours
            )));
        }
        Ok(ttl_hours)
    }

    /// Register a repository corpus with the provider.
    ///
    /// `ttl_hours` defaults to the configured default and must lie in
    /// `1..=max_ttl_hours`. Registering the same repository twice yields
    /// two independent handles.
    pub async fn register(
        &self,
        repo_url: &str,
        index: &[String],
        corpus: &str,
        ttl_hours: Option<u64>,
    ) -> Result<CacheHandle> {
        let ttl_hours = self.resolve_ttl(ttl_hours)?;
        if corpus.trim().is_empty() {
            return Err(WizardError::invalid(
                "Repository has no text content to cache",
            ));
        }

        let ttl = Duration::from_secs(ttl_hours * 3600);
        let request = CacheRequest {
            model: self.model.clone(),
            display_name: display_name(repo_url),
            system_instruction: CACHE_SYSTEM_INSTRUCTION.to_string(),
            contents: build_cache_contents(index, corpus),
            ttl,
        };

        let mut handle = self.provider.create_cache(&request).await?;
        if handle.expire_time.is_none() {
            handle.expire_time = chrono::Duration::from_std(ttl)
                .ok()
                .map(|d| Utc::now() + d);
        }
        info!(
            repo = repo_url,
            cache = %handle.name,
            ttl_hours,
            "Repository corpus cached"
        );
        self.known
            .lock()
            .await
            .insert(handle.name.clone(), handle.clone());
        Ok(handle)
    }

    /// Ask `question` against a cache handle.
    pub async fn query(&self, name: &str, question: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WizardError::invalid("cache_name is required"));
        }
        let prompt = build_cached_question_prompt(question)?;

        let model = {
            let mut known = self.known.lock().await;
            let found = find_known(&known, name)
                .map(|h| (h.name.clone(), h.model.clone(), h.is_expired_at(Utc::now())));
            match found {
                Some((key, _, true)) => {
                    known.remove(&key);
                    return Err(WizardError::CacheNotFound(format!("{} expired", name)));
                }
                Some((_, model, false)) => model,
                None => self.model.clone(),
            }
        };

        match self.provider.generate_cached(name, &model, &prompt).await {
            Err(WizardError::CacheNotFound(msg)) => {
                self.forget(name).await;
                Err(WizardError::CacheNotFound(msg))
            }
            other => other,
        }
    }

    /// List live handles and refresh the remembered set.
    pub async fn list(&self) -> Result<Vec<CacheHandle>> {
        let handles = self.provider.list_caches().await?;
        let mut known = self.known.lock().await;
        known.clear();
        for handle in &handles {
            known.insert(handle.name.clone(), handle.clone());
        }
        debug!("Listed {} context caches", handles.len());
        Ok(handles)
    }

    /// Delete a handle. A handle that does not exist is reported as
    /// [`WizardError::CacheNotFound`].
    pub async fn delete(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WizardError::invalid("cache name is required"));
        }
        let result = self.provider.delete_cache(name).await;
        if matches!(result, Ok(()) | Err(WizardError::CacheNotFound(_))) {
            self.forget(name).await;
        }
        result
    }

    async fn forget(&self, name: &str) {
        let mut known = self.known.lock().await;
        let key = find_known(&known, name).map(|h| h.name.clone());
        if let Some(key) = key {
            known.remove(&key);
        }
    }
}

/// Match on the full resource name or the bare id.
fn find_known<'a>(known: &'a HashMap<String, CacheHandle>, name: &str) -> Option<&'a CacheHandle> {
    known
        .get(name)
        .or_else(|| known.values().find(|h| h.short_id() == name))
}

fn display_name(repo_url: &str) -> String {
    let digest = Sha256::digest(repo_url.as_bytes());
    let hash: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();
    let repo = repo_url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit('/')
        .next()
        .unwrap_or("repo");
    let repo: String = repo
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(40)
        .collect();
    format!("wiz-{}-{}", repo, hash)
}
