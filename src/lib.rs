//! # Wizard Harness
//!
//! Guided LLM workflows and repository analysis behind a JSON HTTP API.
//!
//! Wizard workflows turn a user story, an image, or a video into a chain
//! of generated artifacts (tasks, code, tests, API specs), each stage
//! feeding the next. Repository workflows clone a git repository, build a
//! file index and a delimited text corpus, and ask a hosted model about
//! it, optionally through a provider-side context cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │ Workspace  │──▶│  Corpus    │──▶│  Prompts   │
//! │ git clone  │   │ index+text │   │ templates  │
//! └────────────┘   └────────────┘   └─────┬──────┘
//!                                         │
//!                  ┌──────────────────────┤
//!                  ▼                      ▼
//!            ┌────────────┐         ┌────────────┐
//!            │   Cache    │────────▶│    LLM     │
//!            │  handles   │         │  provider  │
//!            └────────────┘         └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Error taxonomy and HTTP error codes |
//! | [`models`] | Shared records |
//! | [`workspace`] | Isolated per-request clones |
//! | [`classify`] | Text/code/binary file classification |
//! | [`corpus`] | File index and delimited corpus extraction |
//! | [`ingest`] | Fetch + extract orchestration |
//! | [`prompts`] | Prompt templates and the analysis prompt |
//! | [`workflows`] | Workflow and stage catalogue |
//! | [`pipeline`] | Run a workflow's stages in dependency order |
//! | [`llm`] | Hosted model provider abstraction |
//! | [`cache`] | Context cache handles |
//! | [`history`] | Analysis history on disk |
//! | [`server`] | HTTP server |

pub mod cache;
pub mod classify;
pub mod config;
pub mod corpus;
pub mod error;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod workflows;
pub mod workspace;
