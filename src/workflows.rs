//! Guided workflow catalogue.
//!
//! Each [`Workflow`] is a fixed set of [`Stage`]s. A stage names the
//! request fields it consumes and the field its output is published
//! under, which is how later stages find it:
//!
//! ```text
//! story_to_code:  story ──► tasks ──► code ──► test
//!                 (story_content) (tasks_content) (code_content)
//! ```
//!
//! Every stage additionally needs `story_lang`. A stage called without
//! one of its inputs fails with [`WizardError::InvalidInput`] before any
//! prompt is rendered.

mod templates;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::error::{Result, WizardError};
use crate::prompts::{PromptTemplate, PromptVars};

pub const LANGUAGE_FIELD: &str = "story_lang";

pub const INDUSTRIES: &[&str] = &["retail", "energy", "health", "finance", "beauty"];
pub const LANGUAGES: &[&str] = &["English", "Portuguese", "Spanish"];
pub const EXPERIMENTAL_MODEL: &str = "gemini-experimental";

const IMAGE_USE_CASES: &[&str] = &[
    "Sprint Planning",
    "Random Jokes Website",
    "Test Plan Generation",
    "Custom Use Case",
];
const ACCESSIBILITY_USE_CASES: &[&str] = &["Retail (Nike)", "Pharmacy (Raia)"];

/// Preset questions for the repository workflows.
pub const ANALYSIS_OPTIONS: &[(&str, &str)] = &[
    ("summary", "Provide a comprehensive summary of the codebase, highlighting its architecture, main components, and top 3 key learnings for developers."),
    ("readme", "Generate a detailed README for the application, including project overview, setup instructions, main features, and contribution guidelines."),
    ("onboarding", "Create an in-depth getting started guide for new developers, covering setup process, code structure, development workflow, and best practices."),
    ("issues", "Conduct a thorough code review to identify and explain the top 3 most critical issues or areas for improvement in the codebase."),
    ("bug_fix", "Identify the most severe potential bug or vulnerability in the codebase, explain its impact, and provide a detailed fix with code examples."),
    ("troubleshooting", "Develop a comprehensive troubleshooting guide for common issues, including potential error scenarios, diagnostics steps, and resolution procedures."),
    ("custom", "Custom analysis (specify your own prompt)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    StoryToData,
    StoryToCode,
    StoryToApi,
    ImageToCode,
    Accessibility,
}

#[derive(Debug, Clone, Copy)]
enum PromptSource {
    Template(&'static str),
    /// Template chosen by `use_case`, optionally replaced by `custom_prompt`.
    ImageDescription,
    /// Business description and sample video chosen by `use_case`.
    WcagAnalysis,
}

/// One step of a workflow.
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    /// Fields that must be present and non-blank, besides `story_lang`.
    pub inputs: &'static [&'static str],
    /// Field the stage's output is published under.
    pub output: &'static str,
    source: PromptSource,
}

const fn stage(
    name: &'static str,
    inputs: &'static [&'static str],
    output: &'static str,
    template: &'static str,
) -> Stage {
    Stage {
        name,
        inputs,
        output,
        source: PromptSource::Template(template),
    }
}

const STORY_STAGE: Stage = stage(
    "story",
    &["persona_name", "user_story"],
    "story_content",
    templates::STORY,
);
const TASKS_STAGE: Stage = stage("tasks", &["story_content"], "tasks_content", templates::TASKS);

const STORY_TO_DATA: &[Stage] = &[
    STORY_STAGE,
    TASKS_STAGE,
    stage("dw", &["tasks_content"], "dw_content", templates::DW),
    stage("bigquery", &["dw_content"], "bigquery_content", templates::BIGQUERY),
];

const STORY_TO_CODE: &[Stage] = &[
    STORY_STAGE,
    TASKS_STAGE,
    stage("code", &["tasks_content"], "code_content", templates::CODE),
    stage("test", &["code_content"], "test_content", templates::TEST),
];

const STORY_TO_API: &[Stage] = &[
    STORY_STAGE,
    TASKS_STAGE,
    stage("openapi", &["tasks_content"], "openapi_content", templates::OPENAPI),
    stage("apigee", &["openapi_content"], "apigee_content", templates::APIGEE),
];

const IMAGE_TO_CODE: &[Stage] = &[
    Stage {
        name: "description",
        inputs: &["use_case"],
        output: "description_content",
        source: PromptSource::ImageDescription,
    },
    stage("backend", &["description_content"], "backend_content", templates::BACKEND),
    stage("frontend", &["backend_content"], "frontend_content", templates::FRONTEND),
    stage(
        "deployment",
        &["backend_content", "frontend_content"],
        "deployment_content",
        templates::DEPLOYMENT,
    ),
    stage("test_cases", &["description_content"], "test_cases_content", templates::TEST_CASES),
    stage("test_script", &["test_cases_content"], "test_script_content", templates::TEST_SCRIPT),
    stage("selenium", &["test_cases_content"], "selenium_content", templates::SELENIUM),
];

const ACCESSIBILITY: &[Stage] = &[
    Stage {
        name: "wcag_analysis",
        inputs: &["use_case"],
        output: "wcag_analysis",
        source: PromptSource::WcagAnalysis,
    },
    stage("user_stories", &["wcag_analysis"], "user_stories", templates::USER_STORIES),
    stage("implementation", &["user_stories"], "implementation", templates::IMPLEMENTATION),
    stage("test_plan", &["implementation"], "test_plan", templates::TEST_PLAN),
];

impl Workflow {
    pub const ALL: [Workflow; 5] = [
        Workflow::StoryToData,
        Workflow::StoryToCode,
        Workflow::StoryToApi,
        Workflow::ImageToCode,
        Workflow::Accessibility,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Workflow::StoryToData => "story_to_data",
            Workflow::StoryToCode => "story_to_code",
            Workflow::StoryToApi => "story_to_api",
            Workflow::ImageToCode => "image_to_code",
            Workflow::Accessibility => "accessibility",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Workflow::StoryToData => "User Story to Data Warehouse",
            Workflow::StoryToCode => "User Story to Code",
            Workflow::StoryToApi => "User Story to API",
            Workflow::ImageToCode => "Image to Code",
            Workflow::Accessibility => "Accessibility Analysis",
        }
    }

    pub fn from_slug(slug: &str) -> Result<Workflow> {
        Workflow::ALL
            .into_iter()
            .find(|w| w.slug() == slug)
            .ok_or_else(|| WizardError::NotFound(format!("Unknown workflow: '{}'", slug)))
    }

    pub fn stages(self) -> &'static [Stage] {
        match self {
            Workflow::StoryToData => STORY_TO_DATA,
            Workflow::StoryToCode => STORY_TO_CODE,
            Workflow::StoryToApi => STORY_TO_API,
            Workflow::ImageToCode => IMAGE_TO_CODE,
            Workflow::Accessibility => ACCESSIBILITY,
        }
    }

    pub fn stage(self, name: &str) -> Result<&'static Stage> {
        self.stages().iter().find(|s| s.name == name).ok_or_else(|| {
            WizardError::NotFound(format!(
                "Unknown stage '{}' for workflow '{}'",
                name,
                self.slug()
            ))
        })
    }

    pub fn stage_names(self) -> Vec<&'static str> {
        self.stages().iter().map(|s| s.name).collect()
    }

    /// Inputs no stage of this workflow produces; a full run needs them
    /// up front.
    pub fn seed_inputs(self) -> Vec<&'static str> {
        let stages = self.stages();
        let mut seeds = Vec::new();
        for stage in stages {
            for input in stage.inputs {
                let produced = stages.iter().any(|s| s.output == *input);
                if !produced && !seeds.contains(input) {
                    seeds.push(*input);
                }
            }
        }
        seeds
    }

    fn uses_questions(self) -> bool {
        matches!(
            self,
            Workflow::StoryToData | Workflow::StoryToCode | Workflow::StoryToApi
        )
    }

    fn use_cases(self) -> &'static [&'static str] {
        match self {
            Workflow::ImageToCode => IMAGE_USE_CASES,
            Workflow::Accessibility => ACCESSIBILITY_USE_CASES,
            _ => &[],
        }
    }
}

/// A rendered stage prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompt {
    pub prompt: String,
    /// Sample recording analysed by the accessibility workflow.
    pub video_uri: Option<String>,
}

impl Stage {
    /// Check that `story_lang` and every input is present and non-blank.
    pub fn validate(&self, vars: &PromptVars) -> Result<()> {
        for field in std::iter::once(&LANGUAGE_FIELD).chain(self.inputs.iter()) {
            if vars.get(field).is_none() {
                return Err(WizardError::invalid(format!(
                    "Missing required field '{}' for stage '{}'",
                    field, self.name
                )));
            }
        }
        Ok(())
    }

    pub fn build_prompt(&self, vars: &PromptVars) -> Result<StagePrompt> {
        self.validate(vars)?;
        match self.source {
            PromptSource::Template(body) => Ok(StagePrompt {
                prompt: PromptTemplate::new(self.name, body)?.render(vars)?,
                video_uri: None,
            }),
            PromptSource::ImageDescription => {
                let use_case = vars.get("use_case").unwrap_or_default();
                let mut prompt = match (use_case, vars.get("custom_prompt")) {
                    ("Sprint Planning", _) => render(self.name, templates::DESCRIPTION_SPRINT_PLANNING, vars)?,
                    ("Random Jokes Website", _) => render(self.name, templates::DESCRIPTION_RANDOM_JOKES, vars)?,
                    ("Test Plan Generation", _) => render(self.name, templates::DESCRIPTION_TEST_PLAN, vars)?,
                    (_, Some(custom)) => custom.to_string(),
                    (_, None) => render(self.name, templates::DESCRIPTION_CUSTOM, vars)?,
                };
                prompt.push_str(templates::TEXT_ONLY_NOTE);
                Ok(StagePrompt {
                    prompt,
                    video_uri: None,
                })
            }
            PromptSource::WcagAnalysis => {
                let (business_type, video_uri) = match vars.get("use_case") {
                    Some("Retail (Nike)") => ("Nike online store", "gs://convento-samples/nike-sbf.mp4"),
                    _ => ("online pharmacy app", "gs://convento-samples/raia.mp4"),
                };
                let mut vars = vars.clone();
                vars.set("business_type", business_type);
                vars.set("video_uri", video_uri);
                Ok(StagePrompt {
                    prompt: render(self.name, templates::WCAG_ANALYSIS, &vars)?,
                    video_uri: Some(video_uri.to_string()),
                })
            }
        }
    }
}

fn render(name: &str, body: &str, vars: &PromptVars) -> Result<String> {
    PromptTemplate::new(name, body)?.render(vars)
}

/// Render the prompt for `workflow`/`stage` from request fields.
pub fn build_stage_prompt(workflow: Workflow, stage: &str, vars: &PromptVars) -> Result<StagePrompt> {
    workflow.stage(stage)?.build_prompt(vars)
}

/// Static choices offered by a workflow's start page.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOptions {
    pub workflow: &'static str,
    pub title: &'static str,
    pub stages: Vec<&'static str>,
    pub seed_inputs: Vec<&'static str>,
    pub languages: Vec<&'static str>,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub industries: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub use_cases: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
}

pub fn workflow_options(
    workflow: Workflow,
    config: &Config,
    industry: Option<&str>,
    lang: Option<&str>,
) -> Result<WorkflowOptions> {
    let mut models = config.llm.models();
    if workflow == Workflow::Accessibility {
        models.insert(0, EXPERIMENTAL_MODEL.to_string());
    }

    let questions = if workflow.uses_questions() {
        Some(load_questions(
            &config.workflows.data_dir,
            industry.unwrap_or("retail"),
            lang.unwrap_or("en"),
        )?)
    } else {
        None
    };

    Ok(WorkflowOptions {
        workflow: workflow.slug(),
        title: workflow.title(),
        stages: workflow.stage_names(),
        seed_inputs: workflow.seed_inputs(),
        languages: LANGUAGES.to_vec(),
        models,
        industries: if workflow.uses_questions() {
            INDUSTRIES.to_vec()
        } else {
            Vec::new()
        },
        use_cases: workflow.use_cases().to_vec(),
        questions,
    })
}

/// Normalise a language name or code to the two-letter suffix used by
/// question files. Unknown values fall back to English.
pub fn language_code(lang: &str) -> &'static str {
    match lang.trim().to_ascii_lowercase().as_str() {
        "pt" | "portuguese" | "português" => "pt",
        "es" | "spanish" | "español" => "es",
        _ => "en",
    }
}

/// Read `<data_dir>/<industry>-<lang>.txt`, falling back to the English
/// file and then to an empty list.
pub fn load_questions(data_dir: &Path, industry: &str, lang: &str) -> Result<Vec<String>> {
    if !INDUSTRIES.contains(&industry) {
        return Err(WizardError::invalid(format!(
            "Unknown industry '{}'. Available: {}",
            industry,
            INDUSTRIES.join(", ")
        )));
    }
    let code = language_code(lang);
    let mut candidates = vec![data_dir.join(format!("{}-{}.txt", industry, code))];
    if code != "en" {
        candidates.push(data_dir.join(format!("{}-en.txt", industry)));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                return Ok(text
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => warn!("Failed to read question file {}: {}", path.display(), e),
        }
    }
    Ok(Vec::new())
}

/// Resolve the question for an analysis: an explicit question wins,
/// otherwise the preset named by `kind`.
pub fn analysis_question(kind: Option<&str>, question: Option<&str>) -> Result<String> {
    if let Some(q) = question.map(str::trim).filter(|q| !q.is_empty()) {
        return Ok(q.to_string());
    }
    match kind {
        Some("custom") | None => Err(WizardError::invalid(
            "A question is required for a custom analysis",
        )),
        Some(kind) => ANALYSIS_OPTIONS
            .iter()
            .find(|(key, _)| *key == kind)
            .map(|(_, text)| text.to_string())
            .ok_or_else(|| {
                WizardError::invalid(format!("Unknown analysis type: '{}'", kind))
            }),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOption {
    pub key: &'static str,
    pub description: &'static str,
}

pub fn analysis_options() -> Vec<AnalysisOption> {
    ANALYSIS_OPTIONS
        .iter()
        .map(|&(key, description)| AnalysisOption { key, description })
        .collect()
}
