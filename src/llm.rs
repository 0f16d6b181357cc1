//! LLM provider abstraction and the Vertex AI implementation.
//!
//! - **[`DisabledProvider`]** answers every call with
//!   [`WizardError::ProviderUnavailable`]; the server runs on it when the
//!   real provider could not be initialised.
//! - **[`VertexProvider`]** calls the Vertex AI REST API: `generateContent`
//!   for prompts and `cachedContents` for server-side context caches.
//!
//! # Authentication
//!
//! Requests carry a bearer token, either the static `llm.access_token` or
//! the output of `llm.token_command` (by default
//! `gcloud auth print-access-token`). Command tokens are reused for
//! [`TOKEN_LIFETIME`] and fetched again on the next call once stale. A 401
//! drops the cached token and the request is replayed once.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with backoff 1s, 2s, 4s, … (capped at 32s)
//! - other 4xx → fail immediately
//! - network errors → retry; client timeouts → [`WizardError::Timeout`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{Result, WizardError};
use crate::models::CacheHandle;

/// How long a command-issued access token is reused.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Everything needed to register a corpus with the provider's cache.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub model: String,
    pub display_name: String,
    pub system_instruction: String,
    pub contents: String,
    pub ttl: Duration,
}

/// A hosted model: prompt in, text out, plus context-cache management.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider identifier (`"vertex"`, `"disabled"`, …).
    fn name(&self) -> &str;

    /// False when every call is known to fail.
    fn is_ready(&self) -> bool;

    /// `Ok` when ready, otherwise [`WizardError::ProviderUnavailable`].
    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(WizardError::ProviderUnavailable(format!(
                "{} provider is not ready",
                self.name()
            )))
        }
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;

    async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle>;

    /// Answer `prompt` against a registered cache.
    async fn generate_cached(&self, cache_name: &str, model: &str, prompt: &str) -> Result<String>;

    async fn list_caches(&self) -> Result<Vec<CacheHandle>>;

    async fn delete_cache(&self, name: &str) -> Result<()>;
}

// ============ Disabled Provider ============

/// Provider used when the LLM subsystem is not available.
pub struct DisabledProvider {
    reason: String,
}

impl DisabledProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable<T>(&self) -> Result<T> {
        Err(WizardError::ProviderUnavailable(self.reason.clone()))
    }
}

#[async_trait]
impl LlmProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn ensure_ready(&self) -> Result<()> {
        self.unavailable()
    }

    async fn generate(&self, _model: &str, _prompt: &str) -> Result<String> {
        self.unavailable()
    }

    async fn create_cache(&self, _request: &CacheRequest) -> Result<CacheHandle> {
        self.unavailable()
    }

    async fn generate_cached(&self, _cache: &str, _model: &str, _prompt: &str) -> Result<String> {
        self.unavailable()
    }

    async fn list_caches(&self) -> Result<Vec<CacheHandle>> {
        self.unavailable()
    }

    async fn delete_cache(&self, _name: &str) -> Result<()> {
        self.unavailable()
    }
}

// ============ Token Source ============

enum TokenSource {
    Static(String),
    Command {
        argv: Vec<String>,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

impl TokenSource {
    async fn token(&self) -> std::result::Result<String, String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Command { argv, cached } => {
                let mut guard = cached.lock().await;
                if let Some((token, fetched_at)) = guard.as_ref() {
                    if fetched_at.elapsed() < TOKEN_LIFETIME {
                        return Ok(token.clone());
                    }
                }
                let token = run_token_command(argv).await?;
                *guard = Some((token.clone(), Instant::now()));
                Ok(token)
            }
        }
    }

    /// Forget a command-issued token. Returns false for static tokens,
    /// which cannot be refreshed.
    async fn invalidate(&self) -> bool {
        match self {
            TokenSource::Static(_) => false,
            TokenSource::Command { cached, .. } => {
                *cached.lock().await = None;
                true
            }
        }
    }
}

async fn run_token_command(argv: &[String]) -> std::result::Result<String, String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| "llm.token_command is empty".to_string())?;
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to run token command '{}': {}", program, e))?;
    if !output.status.success() {
        return Err(format!(
            "token command '{}' failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(format!("token command '{}' printed no token", program));
    }
    debug!("Fetched access token via '{}'", program);
    Ok(token)
}

/// True when `program` is a path that exists or resolves through `PATH`.
fn command_resolves(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        return std::path::Path::new(program).exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

// ============ Vertex Provider ============

/// Which error family a failed call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Generate,
    CachedGenerate,
    Cache,
}

#[derive(Debug)]
enum CallFailure {
    Status { status: StatusCode, body: String },
    Timeout,
    Transport(String),
    Auth(String),
    Decode(String),
}

/// Vertex AI REST client.
pub struct VertexProvider {
    client: reqwest::Client,
    base_url: String,
    project: String,
    location: String,
    token: TokenSource,
    max_retries: u32,
    backoff_base: Duration,
    timeout_secs: u64,
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
}

impl VertexProvider {
    /// # Errors
    ///
    /// Fails when no project is configured, or when neither a static token
    /// nor a resolvable token command is available.
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let project = config
            .project
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("llm.project (or GCP_PROJECT) is not set"))?;

        let token = match config.access_token.as_ref().filter(|t| !t.trim().is_empty()) {
            Some(token) => TokenSource::Static(token.trim().to_string()),
            None => {
                let program = config
                    .token_command
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("no access_token and llm.token_command is empty"))?;
                if !command_resolves(program) {
                    anyhow::bail!(
                        "no access_token and token command '{}' was not found",
                        program
                    );
                }
                TokenSource::Command {
                    argv: config.token_command.clone(),
                    cached: Mutex::new(None),
                }
            }
        };

        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", config.location));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project,
            location: config.location.clone(),
            token,
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(1),
            timeout_secs: config.timeout_secs,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }

    /// Override the first retry delay.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn location_path(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }

    fn model_resource(&self, model: &str) -> String {
        if model.starts_with("projects/") {
            model.to_string()
        } else {
            format!("{}/publishers/google/models/{}", self.location_path(), model)
        }
    }

    /// Expand a bare cache id to its full resource name.
    pub fn cache_resource_name(&self, name: &str) -> String {
        if name.starts_with("projects/") {
            name.to_string()
        } else {
            format!("{}/cachedContents/{}", self.location_path(), name)
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/{}", self.base_url, resource)
    }

    fn generation_config(&self) -> Value {
        json!({
            "maxOutputTokens": self.max_output_tokens,
            "temperature": self.temperature,
            "topP": self.top_p,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << (attempt - 1).min(5))
    }

    /// Send one request with retry, backoff and a single re-auth on 401.
    async fn call(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> std::result::Result<Value, CallFailure> {
        let mut last_err = None;
        let mut reauthenticated = false;
        let mut attempt = 0;

        while attempt <= self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }

            let token = self.token.token().await.map_err(CallFailure::Auth)?;
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(token)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| CallFailure::Decode(e.to_string()))?;
                        if text.trim().is_empty() {
                            return Ok(Value::Null);
                        }
                        return serde_json::from_str(&text)
                            .map_err(|e| CallFailure::Decode(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    if status == StatusCode::UNAUTHORIZED && !reauthenticated && self.token.invalidate().await {
                        debug!("Access token rejected; refreshing and retrying");
                        reauthenticated = true;
                        continue;
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        warn!("Vertex AI returned {} (attempt {})", status, attempt + 1);
                        last_err = Some(CallFailure::Status {
                            status,
                            body: body_text,
                        });
                        attempt += 1;
                        continue;
                    }

                    return Err(CallFailure::Status {
                        status,
                        body: body_text,
                    });
                }
                Err(e) if e.is_timeout() => return Err(CallFailure::Timeout),
                Err(e) => {
                    warn!("Vertex AI request failed (attempt {}): {}", attempt + 1, e);
                    last_err = Some(CallFailure::Transport(e.to_string()));
                    attempt += 1;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CallFailure::Transport("request failed after retries".into())))
    }

    fn map_failure(&self, kind: CallKind, failure: CallFailure) -> WizardError {
        match failure {
            CallFailure::Timeout => WizardError::timeout("LLM request", self.timeout_secs),
            CallFailure::Auth(msg) | CallFailure::Transport(msg) | CallFailure::Decode(msg) => match kind {
                CallKind::Cache => WizardError::Cache(msg),
                _ => WizardError::LlmCall(msg),
            },
            CallFailure::Status { status, body } => {
                let message = format!("{}: {}", status, error_message(&body));
                if kind != CallKind::Generate && is_missing_cache(status, &body) {
                    return WizardError::CacheNotFound(message);
                }
                match kind {
                    CallKind::Cache => WizardError::Cache(message),
                    _ => WizardError::LlmCall(message),
                }
            }
        }
    }

    async fn generate_with(&self, kind: CallKind, model: &str, body: Value) -> Result<String> {
        let url = self.url(&format!("{}:generateContent", self.model_resource(model)));
        let started = Instant::now();
        let response = self
            .call(Method::POST, &url, &[], Some(&body))
            .await
            .map_err(|f| self.map_failure(kind, f))?;
        let text = extract_text(&response)?;
        info!(
            model,
            cached = kind == CallKind::CachedGenerate,
            chars = text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(text)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedContentResource {
    name: String,
    #[serde(default)]
    model: String,
    display_name: Option<String>,
    create_time: Option<DateTime<Utc>>,
    expire_time: Option<DateTime<Utc>>,
}

impl From<CachedContentResource> for CacheHandle {
    fn from(r: CachedContentResource) -> Self {
        CacheHandle {
            name: r.name,
            model: short_model_name(&r.model).to_string(),
            display_name: r.display_name.filter(|d| !d.is_empty()),
            create_time: r.create_time,
            expire_time: r.expire_time,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCachedContentsResponse {
    #[serde(default)]
    cached_contents: Vec<CachedContentResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[async_trait]
impl LlmProvider for VertexProvider {
    fn name(&self) -> &str {
        "vertex"
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [user_content(prompt)],
            "generationConfig": self.generation_config(),
        });
        self.generate_with(CallKind::Generate, model, body).await
    }

    async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle> {
        let body = json!({
            "model": self.model_resource(&request.model),
            "displayName": request.display_name,
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "contents": [user_content(&request.contents)],
            "ttl": format!("{}s", request.ttl.as_secs()),
        });
        let url = self.url(&format!("{}/cachedContents", self.location_path()));
        let response = self
            .call(Method::POST, &url, &[], Some(&body))
            .await
            .map_err(|f| self.map_failure(CallKind::Cache, f))?;
        let resource: CachedContentResource = serde_json::from_value(response)
            .map_err(|e| WizardError::Cache(format!("unexpected cache response: {}", e)))?;
        let mut handle = CacheHandle::from(resource);
        if handle.model.is_empty() {
            handle.model = request.model.clone();
        }
        info!(cache = %handle.name, model = %handle.model, "Registered context cache");
        Ok(handle)
    }

    async fn generate_cached(&self, cache_name: &str, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "cachedContent": self.cache_resource_name(cache_name),
            "contents": [user_content(prompt)],
            "generationConfig": self.generation_config(),
        });
        self.generate_with(CallKind::CachedGenerate, model, body).await
    }

    async fn list_caches(&self) -> Result<Vec<CacheHandle>> {
        let url = self.url(&format!("{}/cachedContents", self.location_path()));
        let mut handles = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", DEFAULT_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let response = self
                .call(Method::GET, &url, &query, None)
                .await
                .map_err(|f| self.map_failure(CallKind::Cache, f))?;
            let page: ListCachedContentsResponse = if response.is_null() {
                ListCachedContentsResponse {
                    cached_contents: Vec::new(),
                    next_page_token: None,
                }
            } else {
                serde_json::from_value(response)
                    .map_err(|e| WizardError::Cache(format!("unexpected list response: {}", e)))?
            };
            handles.extend(page.cached_contents.into_iter().map(CacheHandle::from));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(handles)
    }

    async fn delete_cache(&self, name: &str) -> Result<()> {
        let url = self.url(&self.cache_resource_name(name));
        self.call(Method::DELETE, &url, &[], None)
            .await
            .map_err(|f| self.map_failure(CallKind::Cache, f))?;
        info!(cache = name, "Deleted context cache");
        Ok(())
    }
}

fn user_content(text: &str) -> Value {
    json!({ "role": "user", "parts": [{ "text": text }] })
}

/// `projects/…/models/gemini-2.5-flash` → `gemini-2.5-flash`.
fn short_model_name(model: &str) -> &str {
    model.rsplit("models/").next().unwrap_or(model)
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &Value) -> Result<String> {
    let candidate = response
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first());

    let Some(candidate) = candidate else {
        let reason = response
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates returned");
        return Err(WizardError::LlmCall(format!("empty response: {}", reason)));
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .unwrap_or("no text");
        return Err(WizardError::LlmCall(format!("empty response: {}", reason)));
    }
    Ok(text)
}

/// Pull `error.message` out of a Google API error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn is_missing_cache(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    if status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN {
        let lower = body.to_ascii_lowercase();
        return lower.contains("cachedcontent")
            && (lower.contains("not found") || lower.contains("expired"));
    }
    false
}

/// Build the provider named by `config.provider`. Never fails: when the
/// real provider cannot start, a [`DisabledProvider`] carrying the reason
/// is returned instead.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    match config.provider.as_str() {
        "vertex" => match VertexProvider::new(config) {
            Ok(provider) => {
                info!(location = %config.location, "Vertex AI provider initialized");
                Arc::new(provider)
            }
            Err(e) => {
                warn!("Vertex AI provider unavailable: {:#}", e);
                Arc::new(DisabledProvider::new(e.to_string()))
            }
        },
        "disabled" => Arc::new(DisabledProvider::new("LLM provider is disabled in configuration")),
        other => Arc::new(DisabledProvider::new(format!("unknown LLM provider '{}'", other))),
    }
}
