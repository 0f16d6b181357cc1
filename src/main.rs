//! # Wizard Harness CLI (`wiz`)
//!
//! Starts the HTTP server and exposes the same operations for scripting:
//! repository ingestion, one-shot analysis, stage prompt rendering, and
//! pipeline runs.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wiz serve` | Start the JSON HTTP server |
//! | `wiz ingest <url>` | Clone and extract a repository |
//! | `wiz analyze <url>` | Ingest, then ask the model about the repository |
//! | `wiz prompt <workflow> <stage>` | Render a stage prompt without calling the model |
//! | `wiz run <workflow>` | Run a workflow's stages end to end |
//! | `wiz workflows` | List workflows and their stages |
//! | `wiz history` | Show stored analyses, newest first |
//! | `wiz caches list` / `wiz caches delete <name>` | Manage context caches |
//!
//! ## Examples
//!
//! ```bash
//! wiz --config ./config/wiz.toml serve
//! wiz analyze https://github.com/org/repo.git --kind summary
//! wiz prompt story_to_code tasks --lang English --field user_story="As a shopper..."
//! wiz run image_to_code --lang English --field use_case="Sprint Planning" --until backend
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wizard_harness::cache::CacheManager;
use wizard_harness::config::{load_config, Config};
use wizard_harness::history::HistoryStore;
use wizard_harness::ingest::Ingestor;
use wizard_harness::llm::create_provider;
use wizard_harness::pipeline::{run_pipeline, PipelineRequest};
use wizard_harness::prompts::{build_analysis_prompt, ensure_within_budget, PromptVars};
use wizard_harness::server;
use wizard_harness::workflows::{analysis_question, build_stage_prompt, Workflow, LANGUAGE_FIELD};

/// Guided LLM workflows and repository analysis.
///
/// All commands accept `--config` pointing to a TOML file. See
/// `config/wiz.example.toml` for every setting.
#[derive(Parser)]
#[command(name = "wiz", about = "Guided LLM workflows and repository analysis", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,
    /// Clone and extract a repository, printing its file index.
    Ingest {
        url: String,
        /// Also print the extracted corpus.
        #[arg(long)]
        text: bool,
    },
    /// Ingest a repository and ask the model about it.
    Analyze {
        url: String,
        /// Preset question (`summary`, `readme`, `onboarding`, `issues`, `bug_fix`, `troubleshooting`).
        #[arg(long, default_value = "summary")]
        kind: String,
        /// Free-form question; overrides the preset.
        #[arg(long)]
        question: Option<String>,
        /// Model identifier (defaults to `[llm].model_flash`).
        #[arg(long)]
        model: Option<String>,
        /// Do not record the answer in the history directory.
        #[arg(long)]
        no_history: bool,
    },
    /// Render a stage prompt without calling the model.
    Prompt {
        workflow: String,
        stage: String,
        /// Output language.
        #[arg(long)]
        lang: String,
        /// Stage input as `name=value`; repeatable.
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },
    /// Run a workflow's stages, feeding each output to the next.
    Run {
        workflow: String,
        #[arg(long)]
        lang: String,
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
        /// Stop after this stage.
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// List workflows and their stages.
    Workflows,
    /// Show stored analyses, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Manage provider context caches.
    Caches {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List live cache handles.
    List,
    /// Delete a cache handle by full resource name or id.
    Delete { name: String },
}

/// Parse a `key=value` pair for `--field` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "wizard_harness=debug,tower_http=debug"
    } else {
        "wizard_harness=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn stage_fields(lang: String, fields: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = fields.into_iter().collect();
    map.insert(LANGUAGE_FIELD.to_string(), lang);
    map
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Ingest { url, text } => {
            let repo = Ingestor::new(&cfg)?.ingest(&url).await?;
            for path in &repo.index {
                println!("{}", path);
            }
            println!(
                "\n{} files, {} in corpus, {} characters",
                repo.index.len(),
                repo.corpus.segments().len(),
                repo.char_count
            );
            if text {
                println!("\n{}", repo.corpus.text());
            }
        }
        Commands::Analyze {
            url,
            kind,
            question,
            model,
            no_history,
        } => analyze(&cfg, &url, &kind, question, model, no_history).await?,
        Commands::Prompt {
            workflow,
            stage,
            lang,
            fields,
        } => {
            let workflow = Workflow::from_slug(&workflow)?;
            let vars: PromptVars = stage_fields(lang, fields).into_iter().collect();
            let prompt = build_stage_prompt(workflow, &stage, &vars)?;
            if let Some(uri) = &prompt.video_uri {
                eprintln!("video: {}", uri);
            }
            println!("{}", prompt.prompt);
        }
        Commands::Run {
            workflow,
            lang,
            fields,
            until,
            model,
        } => {
            let workflow = Workflow::from_slug(&workflow)?;
            let llm = create_provider(&cfg.llm);
            llm.ensure_ready()?;
            let request = PipelineRequest {
                model: model.unwrap_or_else(|| cfg.llm.model_flash.clone()),
                fields: stage_fields(lang, fields),
                until,
            };
            let outcome = run_pipeline(llm, workflow, &request).await?;
            for step in &outcome.steps {
                println!("## {}\n\n{}\n", step.stage, step.content);
            }
        }
        Commands::Workflows => {
            for workflow in Workflow::ALL {
                println!("{:<16} {}", workflow.slug(), workflow.title());
                println!("{:<16} stages: {}", "", workflow.stage_names().join(" → "));
            }
            println!("{:<16} {}", "repo_inspection", "Repository Inspection");
            println!(
                "{:<16} {}",
                "repo_cache_analysis", "Repository Analysis with Context Caching"
            );
        }
        Commands::History { limit } => {
            let records = HistoryStore::new(&cfg.history.dir).list().await?;
            if records.is_empty() {
                println!("No analyses recorded in {}", cfg.history.dir.display());
            }
            for record in records.iter().take(limit) {
                let first_line = record.text.lines().next().unwrap_or("");
                println!(
                    "{}  {:<16} {}\n    {}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.kind,
                    record.repo_url,
                    first_line
                );
            }
        }
        Commands::Caches { action } => {
            let llm = create_provider(&cfg.llm);
            llm.ensure_ready()?;
            let cache = CacheManager::new(llm, &cfg);
            match action {
                CacheAction::List => {
                    let handles = cache.list().await?;
                    if handles.is_empty() {
                        println!("No context caches.");
                    }
                    for handle in handles {
                        let expires = handle
                            .expire_time
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "{}  {}  expires {}  {}",
                            handle.name,
                            handle.model,
                            expires,
                            handle.display_name.as_deref().unwrap_or("")
                        );
                    }
                }
                CacheAction::Delete { name } => {
                    cache.delete(&name).await?;
                    println!("Cache {} deleted", name);
                }
            }
        }
    }

    Ok(())
}

async fn analyze(
    cfg: &Config,
    url: &str,
    kind: &str,
    question: Option<String>,
    model: Option<String>,
    no_history: bool,
) -> anyhow::Result<()> {
    let question = analysis_question(Some(kind), question.as_deref())?;
    let llm = create_provider(&cfg.llm);
    llm.ensure_ready()?;

    let repo = Ingestor::new(cfg)?.ingest(url).await?;
    let prompt = build_analysis_prompt(&question, &repo.index, repo.corpus.text())?;
    ensure_within_budget(&prompt, cfg.llm.max_prompt_chars)?;

    let model = model.unwrap_or_else(|| cfg.llm.model_flash.clone());
    let analysis = llm
        .generate(&model, &prompt)
        .await
        .with_context(|| format!("analysis of {} failed", url))?;
    println!("{}", analysis);

    if !no_history {
        let kind = if question_is_preset(kind, &question) {
            kind
        } else {
            "custom"
        };
        HistoryStore::new(&cfg.history.dir)
            .record_best_effort(kind, &analysis, url)
            .await;
    }
    Ok(())
}

fn question_is_preset(kind: &str, question: &str) -> bool {
    analysis_question(Some(kind), None)
        .map(|preset| preset == question)
        .unwrap_or(false)
}
