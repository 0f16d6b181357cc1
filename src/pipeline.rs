//! Run a workflow's stages end to end.
//!
//! Stages run in waves: every stage whose inputs are all available is
//! started together on a [`JoinSet`], and its output becomes available to
//! the next wave. A stage therefore never starts before the outputs it
//! consumes exist, while independent branches (for example `frontend` and
//! `test_cases` in `image_to_code`) run concurrently.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{Result, WizardError};
use crate::llm::LlmProvider;
use crate::prompts::PromptVars;
use crate::workflows::{Stage, Workflow, LANGUAGE_FIELD};

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub model: String,
    /// Seed fields (`story_lang`, `persona_name`, `use_case`, …).
    pub fields: BTreeMap<String, String>,
    /// Stop once this stage and its prerequisites have run.
    pub until: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: &'static str,
    pub prompt: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Results in catalogue order.
    pub steps: Vec<StageResult>,
    /// Every stage output keyed by its output field.
    pub outputs: BTreeMap<String, String>,
}

/// Stages needed to reach `until`, or every stage.
fn plan(workflow: Workflow, until: Option<&str>) -> Result<Vec<&'static Stage>> {
    let stages = workflow.stages();
    let Some(until) = until else {
        return Ok(stages.iter().collect());
    };
    let target = workflow.stage(until)?;

    let mut needed: HashSet<&str> = HashSet::new();
    let mut pending: Vec<&Stage> = vec![target];
    while let Some(stage) = pending.pop() {
        if !needed.insert(stage.name) {
            continue;
        }
        for input in stage.inputs {
            if let Some(producer) = stages.iter().find(|s| s.output == *input) {
                pending.push(producer);
            }
        }
    }
    Ok(stages.iter().filter(|s| needed.contains(s.name)).collect())
}

/// Check that every planned stage can eventually get all of its inputs.
fn check_seeds(planned: &[&Stage], fields: &BTreeMap<String, String>) -> Result<()> {
    let has = |name: &str| fields.get(name).map(|v| !v.trim().is_empty()).unwrap_or(false);
    if !has(LANGUAGE_FIELD) {
        return Err(WizardError::invalid(format!(
            "Missing required field '{}'",
            LANGUAGE_FIELD
        )));
    }
    for stage in planned {
        for input in stage.inputs {
            let produced = planned.iter().any(|s| s.output == *input);
            if !produced && !has(input) {
                return Err(WizardError::invalid(format!(
                    "Missing required field '{}' for stage '{}'",
                    input, stage.name
                )));
            }
        }
    }
    Ok(())
}

pub async fn run_pipeline(
    llm: Arc<dyn LlmProvider>,
    workflow: Workflow,
    request: &PipelineRequest,
) -> Result<PipelineOutcome> {
    let planned = plan(workflow, request.until.as_deref())?;
    check_seeds(&planned, &request.fields)?;

    // A field some planned stage produces only exists once that stage has
    // run; a caller-supplied value for it is dropped.
    let mut vars: PromptVars = request
        .fields
        .iter()
        .filter(|(k, _)| {
            let produced = planned.iter().any(|s| s.output == k.as_str());
            if produced {
                debug!(field = k.as_str(), "Ignoring supplied value for a stage output");
            }
            !produced
        })
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let mut remaining: Vec<&'static Stage> = planned;
    let mut done: Vec<StageResult> = Vec::new();
    let mut outputs = BTreeMap::new();

    while !remaining.is_empty() {
        let (ready, waiting): (Vec<&Stage>, Vec<&Stage>) = remaining
            .into_iter()
            .partition(|s| s.inputs.iter().all(|i| vars.get(i).is_some()));
        if ready.is_empty() {
            let blocked: Vec<&str> = waiting.iter().map(|s| s.name).collect();
            return Err(WizardError::invalid(format!(
                "Stages cannot run, inputs never became available: {}",
                blocked.join(", ")
            )));
        }
        remaining = waiting;

        let mut wave = JoinSet::new();
        for stage in ready {
            let prompt = stage.build_prompt(&vars)?;
            let llm = llm.clone();
            let model = request.model.clone();
            wave.spawn(async move {
                let content = llm.generate(&model, &prompt.prompt).await?;
                if content.trim().is_empty() {
                    return Err(WizardError::LlmCall(format!(
                        "stage '{}' returned empty output",
                        stage.name
                    )));
                }
                Ok::<_, WizardError>(StageResult {
                    stage: stage.name,
                    prompt: prompt.prompt,
                    content,
                    video_uri: prompt.video_uri,
                })
            });
        }

        while let Some(joined) = wave.join_next().await {
            let result = joined
                .map_err(|e| WizardError::Internal(anyhow::anyhow!("stage task failed: {}", e)))??;
            let stage = workflow.stage(result.stage)?;
            info!(
                workflow = workflow.slug(),
                stage = result.stage,
                chars = result.content.len(),
                "Stage complete"
            );
            vars.set(stage.output, result.content.clone());
            outputs.insert(stage.output.to_string(), result.content.clone());
            done.push(result);
        }
    }

    let order = workflow.stage_names();
    done.sort_by_key(|r| order.iter().position(|n| *n == r.stage));
    Ok(PipelineOutcome {
        steps: done,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CacheRequest;
    use crate::models::CacheHandle;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records each prompt and answers with a numbered marker.
    #[derive(Default)]
    struct ScriptedProvider {
        prompts: Mutex<Vec<String>>,
        /// Fixed reply instead of the numbered marker.
        reply: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn is_ready(&self) -> bool {
            true
        }
        async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
            let n = {
                let mut prompts = self.prompts.lock().unwrap();
                prompts.push(prompt.to_string());
                prompts.len()
            };
            Ok(self
                .reply
                .clone()
                .unwrap_or_else(|| format!("output #{} from {}", n, model)))
        }
        async fn create_cache(&self, _r: &CacheRequest) -> Result<CacheHandle> {
            unimplemented!()
        }
        async fn generate_cached(&self, _c: &str, _m: &str, _p: &str) -> Result<String> {
            unimplemented!()
        }
        async fn list_caches(&self) -> Result<Vec<CacheHandle>> {
            unimplemented!()
        }
        async fn delete_cache(&self, _n: &str) -> Result<()> {
            unimplemented!()
        }
    }

    fn request(fields: &[(&str, &str)], until: Option<&str>) -> PipelineRequest {
        PipelineRequest {
            model: "gemini-2.5-flash".into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            until: until.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_full_run_chains_outputs() {
        let llm = Arc::new(ScriptedProvider::default());
        let outcome = run_pipeline(
            llm.clone(),
            Workflow::StoryToCode,
            &request(
                &[
                    ("story_lang", "English"),
                    ("persona_name", "Ana"),
                    ("user_story", "buy shoes"),
                ],
                None,
            ),
        )
        .await
        .unwrap();

        let stages: Vec<&str> = outcome.steps.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec!["story", "tasks", "code", "test"]);
        // Each stage's prompt embeds the previous stage's output.
        assert!(outcome.steps[1].prompt.contains(&outcome.steps[0].content));
        assert!(outcome.steps[2].prompt.contains(&outcome.steps[1].content));
        assert!(outcome.steps[3].prompt.contains(&outcome.steps[2].content));
        assert_eq!(outcome.outputs.len(), 4);
        assert_eq!(llm.prompts.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_until_runs_only_prerequisites() {
        let llm = Arc::new(ScriptedProvider::default());
        let outcome = run_pipeline(
            llm,
            Workflow::ImageToCode,
            &request(&[("story_lang", "English"), ("use_case", "Sprint Planning")], Some("deployment")),
        )
        .await
        .unwrap();
        let stages: Vec<&str> = outcome.steps.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec!["description", "backend", "frontend", "deployment"]);
        let deployment = &outcome.steps[3];
        assert!(deployment.prompt.contains(&outcome.outputs["backend_content"]));
        assert!(deployment.prompt.contains(&outcome.outputs["frontend_content"]));
    }

    #[tokio::test]
    async fn test_missing_seed_fails_before_any_call() {
        let llm = Arc::new(ScriptedProvider::default());
        let err = run_pipeline(
            llm.clone(),
            Workflow::StoryToData,
            &request(&[("story_lang", "English"), ("persona_name", "Ana")], None),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WizardError::InvalidInput(_)));
        assert!(err.to_string().contains("user_story"));
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accessibility_run_carries_video_uri() {
        let llm = Arc::new(ScriptedProvider::default());
        let outcome = run_pipeline(
            llm,
            Workflow::Accessibility,
            &request(
                &[("story_lang", "Spanish"), ("use_case", "Retail (Nike)")],
                Some("user_stories"),
            ),
        )
        .await
        .unwrap();
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(
            outcome.steps[0].video_uri.as_deref(),
            Some("gs://convento-samples/nike-sbf.mp4")
        );
    }

    #[tokio::test]
    async fn test_supplied_stage_output_waits_for_its_stage() {
        let llm = Arc::new(ScriptedProvider::default());
        let outcome = run_pipeline(
            llm.clone(),
            Workflow::StoryToCode,
            &request(
                &[
                    ("story_lang", "English"),
                    ("persona_name", "Ana"),
                    ("user_story", "buy shoes"),
                    ("story_content", "STALE"),
                ],
                Some("tasks"),
            ),
        )
        .await
        .unwrap();

        let stages: Vec<&str> = outcome.steps.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec!["story", "tasks"]);
        let tasks = &outcome.steps[1];
        assert!(tasks.prompt.contains(&outcome.steps[0].content));
        assert!(!tasks.prompt.contains("STALE"));
        assert_eq!(outcome.outputs["story_content"], outcome.steps[0].content);

        // The story prompt went out first, alone in its wave.
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1], tasks.prompt);
    }

    #[tokio::test]
    async fn test_blank_stage_output_is_an_llm_error() {
        let llm = Arc::new(ScriptedProvider {
            reply: Some("  \n".into()),
            ..Default::default()
        });
        let err = run_pipeline(
            llm.clone(),
            Workflow::StoryToCode,
            &request(
                &[
                    ("story_lang", "English"),
                    ("persona_name", "Ana"),
                    ("user_story", "buy shoes"),
                ],
                None,
            ),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WizardError::LlmCall(ref m) if m.contains("'story'")));
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_until_stage() {
        let llm = Arc::new(ScriptedProvider::default());
        let err = run_pipeline(
            llm,
            Workflow::StoryToApi,
            &request(&[("story_lang", "English")], Some("bigquery")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WizardError::NotFound(_)));
    }
}
