//! JSON HTTP API.
//!
//! Every wizard workflow and both repository workflows are served from one
//! axum router sharing an [`AppState`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, and LLM provider readiness |
//! | `GET`  | `/` | Workflow catalogue |
//! | `GET`  | `/{workflow}/` | Static options (languages, models, question list) |
//! | `POST` | `/{workflow}/generate/{stage}` | Render one stage prompt and call the model |
//! | `POST` | `/{workflow}/run` | Run a workflow's stages in dependency order |
//! | `POST` | `/image_to_code/upload_image` | Multipart image → base64 data URI |
//! | `POST` | `/repo_inspection/clone_and_index` | Clone and extract a repository |
//! | `POST` | `/repo_inspection/analyze` | Ask a question about an extracted corpus |
//! | `POST` | `/repo_cache_analysis/process` | Clone, extract, and cache a repository |
//! | `POST` | `/repo_cache_analysis/analyze` | Ask against a cache handle or a corpus |
//! | `GET`  | `/repo_*/history` | Stored analyses, newest first |
//! | `GET`  | `/repo_cache_analysis/caches` | Live cache handles |
//! | `DELETE` | `/repo_cache_analysis/caches/{*name}` | Delete a cache handle |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "Missing required field 'user_story'", "code": "bad_request" }
//! ```
//!
//! `bad_request` (400), `not_found` / `cache_not_found` (404), `timeout`
//! (408); every other code is a 500.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request,
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::{Result, WizardError};
use crate::history::HistoryStore;
use crate::ingest::Ingestor;
use crate::llm::{create_provider, LlmProvider};
use crate::models::{CacheHandle, HistoryRecord};
use crate::pipeline::{run_pipeline, PipelineOutcome, PipelineRequest};
use crate::prompts::{build_analysis_prompt, ensure_within_budget, PromptVars};
use crate::workflows::{self, analysis_options, AnalysisOption, Workflow, WorkflowOptions};

/// Repository corpora travel inside JSON bodies.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

const REPO_INSPECTION: &str = "repo_inspection";
const REPO_CACHE_ANALYSIS: &str = "repo_cache_analysis";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    llm: Arc<dyn LlmProvider>,
    ingestor: Ingestor,
    cache: Arc<CacheManager>,
    history: HistoryStore,
}

impl AppState {
    pub fn new(config: &Config, llm: Arc<dyn LlmProvider>) -> anyhow::Result<Self> {
        let ingestor = Ingestor::new(config)?;
        Ok(Self {
            config: Arc::new(config.clone()),
            cache: Arc::new(CacheManager::new(llm.clone(), config)),
            history: HistoryStore::new(&config.history.dir),
            ingestor,
            llm,
        })
    }

    fn ensure_ready(&self) -> Result<()> {
        self.llm.ensure_ready()
    }

    fn default_model(&self, requested: Option<String>) -> String {
        requested
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.llm.model_flash.clone())
    }

    /// Bound `fut` by `server.request_timeout_secs`.
    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let secs = self.config.server.request_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(WizardError::timeout(operation, secs)),
        }
    }
}

/// Starts the HTTP server with the provider named in `[llm]`.
///
/// A provider that cannot initialise does not stop the server: LLM
/// endpoints answer `provider_unavailable` instead.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_provider(config, create_provider(&config.llm)).await
}

/// Starts the HTTP server with an explicit [`LlmProvider`].
pub async fn run_server_with_provider(
    config: &Config,
    llm: Arc<dyn LlmProvider>,
) -> anyhow::Result<()> {
    let state = AppState::new(config, llm)?;
    let swept = state.ingestor.workspace().sweep_stale();
    if swept > 0 {
        info!("Removed {} stale staging directories", swept);
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("Wizard server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/", get(handle_index))
        .route("/repo_inspection", get(handle_inspection_options))
        .route("/repo_inspection/", get(handle_inspection_options))
        .route("/repo_inspection/clone_and_index", post(handle_clone_and_index))
        .route("/repo_inspection/generate_analysis", post(handle_analyze))
        .route("/repo_inspection/analyze", post(handle_analyze))
        .route("/repo_inspection/history", get(handle_history))
        .route("/repo_cache_analysis", get(handle_cache_options))
        .route("/repo_cache_analysis/", get(handle_cache_options))
        .route("/repo_cache_analysis/process", post(handle_process))
        .route("/repo_cache_analysis/analyze", post(handle_cache_analyze))
        .route("/repo_cache_analysis/history", get(handle_history))
        .route("/repo_cache_analysis/caches", get(handle_list_caches))
        .route("/repo_cache_analysis/caches/{*name}", delete(handle_delete_cache))
        .route("/image_to_code/upload_image", post(handle_upload_image))
        .route("/{workflow}", get(handle_workflow_options))
        .route("/{workflow}/", get(handle_workflow_options))
        .route("/{workflow}/generate/{stage}", post(handle_generate))
        .route("/{workflow}/run", post(handle_run))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Internal error type that converts into an axum response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<WizardError> for AppError {
    fn from(err: WizardError) -> Self {
        let status = match &err {
            WizardError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            WizardError::NotFound(_) | WizardError::CacheNotFound(_) => StatusCode::NOT_FOUND,
            WizardError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, "{}", self.message);
        }
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, AppError>;

/// `Json` whose rejection uses the API error body.
struct AppJson<T>(T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    WizardError::invalid(format!("Invalid JSON body: {}", rejection.body_text())).into()
}

// ============ GET /health, GET / ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    provider_ready: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.llm.name().to_string(),
        provider_ready: state.llm.is_ready(),
    })
}

#[derive(Serialize)]
struct WorkflowSummary {
    slug: &'static str,
    title: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stages: Vec<&'static str>,
}

#[derive(Serialize)]
struct IndexResponse {
    workflows: Vec<WorkflowSummary>,
    repository_workflows: Vec<WorkflowSummary>,
}

async fn handle_index() -> Json<IndexResponse> {
    let workflows = Workflow::ALL
        .iter()
        .map(|w| WorkflowSummary {
            slug: w.slug(),
            title: w.title(),
            stages: w.stage_names(),
        })
        .collect();
    let repository_workflows = vec![
        WorkflowSummary {
            slug: REPO_INSPECTION,
            title: "Repository Inspection",
            stages: Vec::new(),
        },
        WorkflowSummary {
            slug: REPO_CACHE_ANALYSIS,
            title: "Repository Analysis with Context Caching",
            stages: Vec::new(),
        },
    ];
    Json(IndexResponse {
        workflows,
        repository_workflows,
    })
}

// ============ Wizard workflows ============

#[derive(Deserialize)]
struct OptionsQuery {
    industry: Option<String>,
    lang: Option<String>,
}

async fn handle_workflow_options(
    State(state): State<AppState>,
    Path(workflow): Path<String>,
    Query(query): Query<OptionsQuery>,
) -> ApiResult<WorkflowOptions> {
    let workflow = Workflow::from_slug(&workflow)?;
    let options = workflows::workflow_options(
        workflow,
        &state.config,
        query.industry.as_deref(),
        query.lang.as_deref(),
    )?;
    Ok(Json(options))
}

/// Body shared by stage generation and pipeline runs. Every field other
/// than the named ones is a stage input.
#[derive(Deserialize)]
struct StageRequest {
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    until: Option<String>,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl StageRequest {
    /// String-valued inputs; numbers and booleans are stringified, other
    /// values ignored.
    fn string_fields(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((k.clone(), value))
            })
            .collect()
    }
}

#[derive(Serialize)]
struct StageResponse {
    content: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_uri: Option<String>,
}

async fn handle_generate(
    State(state): State<AppState>,
    Path((workflow, stage)): Path<(String, String)>,
    AppJson(body): AppJson<StageRequest>,
) -> ApiResult<StageResponse> {
    let workflow = Workflow::from_slug(&workflow)?;
    let stage = workflow.stage(&stage)?;
    state.ensure_ready()?;

    let vars: PromptVars = body.string_fields().into_iter().collect();
    let prompt = stage.build_prompt(&vars)?;
    ensure_within_budget(&prompt.prompt, state.config.llm.max_prompt_chars)?;

    let model = state.default_model(body.model_name);
    let content = state
        .bounded(
            &format!("{} stage", stage.name),
            state.llm.generate(&model, &prompt.prompt),
        )
        .await?;
    info!(
        workflow = workflow.slug(),
        stage = stage.name,
        model = %model,
        "Stage generated"
    );

    Ok(Json(StageResponse {
        content,
        prompt: prompt.prompt,
        video_uri: prompt.video_uri,
    }))
}

async fn handle_run(
    State(state): State<AppState>,
    Path(workflow): Path<String>,
    AppJson(body): AppJson<StageRequest>,
) -> ApiResult<PipelineOutcome> {
    let workflow = Workflow::from_slug(&workflow)?;
    state.ensure_ready()?;

    let request = PipelineRequest {
        fields: body.string_fields(),
        until: body.until.clone().filter(|s| !s.trim().is_empty()),
        model: state.default_model(body.model_name),
    };
    let outcome = state
        .bounded(
            &format!("{} run", workflow.slug()),
            run_pipeline(state.llm.clone(), workflow, &request),
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    image_data: String,
    filename: String,
}

async fn handle_upload_image(mut multipart: Multipart) -> ApiResult<UploadResponse> {
    let bad = |e: axum::extract::multipart::MultipartError| {
        AppError::from(WizardError::invalid(format!("Invalid upload: {}", e.body_text())))
    };

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.trim().is_empty() {
            return Err(WizardError::invalid("No file selected").into());
        }
        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(bad)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        info!(filename = %filename, bytes = bytes.len(), "Image uploaded");
        return Ok(Json(UploadResponse {
            success: true,
            image_data: format!("data:{};base64,{}", mime, encoded),
            filename,
        }));
    }
    Err(WizardError::invalid("No image file provided").into())
}

// ============ Repository workflows ============

#[derive(Serialize)]
struct RepoOptions {
    models: Vec<String>,
    analysis_options: Vec<AnalysisOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<CacheOptions>,
}

#[derive(Serialize)]
struct CacheOptions {
    enabled: bool,
    default_ttl_hours: u64,
    max_ttl_hours: u64,
    model: String,
}

async fn handle_inspection_options(State(state): State<AppState>) -> Json<RepoOptions> {
    Json(RepoOptions {
        models: state.config.llm.models(),
        analysis_options: analysis_options(),
        cache: None,
    })
}

async fn handle_cache_options(State(state): State<AppState>) -> Json<RepoOptions> {
    let cache = &state.config.cache;
    Json(RepoOptions {
        models: state.config.llm.models(),
        analysis_options: analysis_options(),
        cache: Some(CacheOptions {
            enabled: cache.enabled,
            default_ttl_hours: cache.default_ttl_hours,
            max_ttl_hours: cache.max_ttl_hours,
            model: state.cache.model().to_string(),
        }),
    })
}

#[derive(Deserialize)]
struct IngestRequest {
    #[serde(default)]
    repo_url: Option<String>,
    /// Cache lifetime in hours (`/process` only).
    #[serde(default)]
    cache_ttl: Option<u64>,
}

impl IngestRequest {
    fn url(&self) -> Result<&str> {
        self.repo_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| WizardError::invalid("Repository URL is required"))
    }
}

#[derive(Serialize)]
struct IngestResponse {
    message: String,
    index: Vec<String>,
    text: String,
    char_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_expire_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_error: Option<String>,
}

async fn handle_clone_and_index(
    State(state): State<AppState>,
    AppJson(body): AppJson<IngestRequest>,
) -> ApiResult<IngestResponse> {
    let url = body.url()?;
    let repo = state
        .bounded("repository ingestion", state.ingestor.ingest(url))
        .await?;
    Ok(Json(IngestResponse {
        message: "Repository cloned and indexed successfully!".to_string(),
        char_count: repo.char_count,
        index: repo.index,
        text: repo.corpus.into_text(),
        cache_name: None,
        cache_expire_time: None,
        cache_error: None,
    }))
}

async fn handle_process(
    State(state): State<AppState>,
    AppJson(body): AppJson<IngestRequest>,
) -> ApiResult<IngestResponse> {
    let url = body.url()?;
    let caching = state.config.cache.enabled;
    let ttl = if caching {
        state.ensure_ready()?;
        Some(state.cache.resolve_ttl(body.cache_ttl)?)
    } else {
        None
    };

    let repo = state
        .bounded("repository ingestion", state.ingestor.ingest(url))
        .await?;
    let text = repo.corpus.into_text();

    let mut response = IngestResponse {
        message: format!(
            "Repository processed successfully ({} characters)",
            repo.char_count
        ),
        index: repo.index,
        char_count: repo.char_count,
        text,
        cache_name: None,
        cache_expire_time: None,
        cache_error: None,
    };

    if caching {
        let registered = state
            .bounded(
                "cache registration",
                state
                    .cache
                    .register(url, &response.index, &response.text, ttl),
            )
            .await;
        match registered {
            Ok(handle) => {
                response.cache_name = Some(handle.name);
                response.cache_expire_time = handle.expire_time;
            }
            Err(e) => {
                warn!(repo = url, "Cache registration failed, continuing without cache: {}", e);
                response.cache_error = Some(e.to_string());
            }
        }
    }
    Ok(Json(response))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    code_index: Option<Vec<String>>,
    #[serde(default)]
    code_text: Option<String>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    repo_url: Option<String>,
    #[serde(default)]
    analysis_type: Option<String>,
    #[serde(default)]
    cache_name: Option<String>,
}

impl AnalyzeRequest {
    fn question(&self) -> Result<String> {
        workflows::analysis_question(self.analysis_type.as_deref(), self.question.as_deref())
    }

    fn corpus(&self) -> Result<(&[String], &str)> {
        let index = self.code_index.as_deref().filter(|i| !i.is_empty());
        let text = self.code_text.as_deref().filter(|t| !t.trim().is_empty());
        match (index, text) {
            (Some(index), Some(text)) => Ok((index, text)),
            _ => Err(WizardError::invalid(
                "Missing required data for analysis: code_index and code_text",
            )),
        }
    }
}

#[derive(Serialize)]
struct AnalyzeResponse {
    analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
}

/// Send the full analysis prompt for an extracted corpus.
async fn analyze_corpus(state: &AppState, body: &AnalyzeRequest) -> Result<(String, String)> {
    let question = body.question()?;
    let (index, text) = body.corpus()?;
    let prompt = build_analysis_prompt(&question, index, text)?;
    ensure_within_budget(&prompt, state.config.llm.max_prompt_chars)?;

    let model = state.default_model(body.model_name.clone());
    let analysis = state
        .bounded("analysis", state.llm.generate(&model, &prompt))
        .await?;
    info!(model = %model, files = index.len(), "Analysis generated");
    Ok((analysis, prompt))
}

async fn record_history(state: &AppState, body: &AnalyzeRequest, analysis: &str) {
    let Some(url) = body.repo_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        return;
    };
    let kind = body
        .analysis_type
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .unwrap_or("custom");
    state.history.record_best_effort(kind, analysis, url).await;
}

async fn handle_analyze(
    State(state): State<AppState>,
    AppJson(body): AppJson<AnalyzeRequest>,
) -> ApiResult<AnalyzeResponse> {
    state.ensure_ready()?;
    let (analysis, prompt) = analyze_corpus(&state, &body).await?;
    record_history(&state, &body, &analysis).await;
    Ok(Json(AnalyzeResponse {
        analysis,
        prompt: Some(prompt),
    }))
}

async fn handle_cache_analyze(
    State(state): State<AppState>,
    AppJson(body): AppJson<AnalyzeRequest>,
) -> ApiResult<AnalyzeResponse> {
    state.ensure_ready()?;
    let cache_name = body
        .cache_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let analysis = match cache_name {
        Some(name) => {
            let question = body.question()?;
            state
                .bounded("cached analysis", state.cache.query(name, &question))
                .await?
        }
        None => analyze_corpus(&state, &body).await?.0,
    };
    record_history(&state, &body, &analysis).await;
    Ok(Json(AnalyzeResponse {
        analysis,
        prompt: None,
    }))
}

async fn handle_history(State(state): State<AppState>) -> ApiResult<Vec<HistoryRecord>> {
    Ok(Json(state.history.list().await?))
}

async fn handle_list_caches(State(state): State<AppState>) -> ApiResult<Vec<CacheHandle>> {
    state.ensure_ready()?;
    let handles = state.bounded("cache listing", state.cache.list()).await?;
    Ok(Json(handles))
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_delete_cache(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<MessageResponse> {
    state.ensure_ready()?;
    state
        .bounded("cache deletion", state.cache.delete(&name))
        .await?;
    info!(cache = %name, "Cache deleted");
    Ok(Json(MessageResponse {
        message: format!("Cache {} deleted", name),
    }))
}
