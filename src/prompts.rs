//! Prompt templates and the repository analysis prompt.
//!
//! A [`PromptTemplate`] is parsed once into literal text and named
//! `{placeholder}` slots. Rendering fails if any slot has no value, so a
//! prompt with a hole in it never reaches the model.
//!
//! Syntax: `{name}` is a placeholder (`[A-Za-z0-9_]+`), `{{` and `}}` are
//! literal braces. Values are inserted verbatim and never re-parsed.

use std::collections::BTreeMap;

use crate::error::{Result, WizardError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Slot(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: String,
    pieces: Vec<Piece>,
}

/// Named values for [`PromptTemplate::render`].
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    values: BTreeMap<String, String>,
}

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// The value for `name` if present and not blank.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PromptVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl PromptTemplate {
    pub fn new(name: &str, body: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = body.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut slot = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        slot.push(c);
                    }
                    if !closed {
                        return Err(WizardError::invalid(format!(
                            "{}: unterminated placeholder '{{{}'",
                            name, slot
                        )));
                    }
                    if slot.is_empty() || !slot.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        return Err(WizardError::invalid(format!(
                            "{}: invalid placeholder '{{{}}}'",
                            name, slot
                        )));
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Slot(slot));
                }
                '}' => {
                    return Err(WizardError::invalid(format!(
                        "{}: unmatched '}}' in template",
                        name
                    )));
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            name: name.to_string(),
            pieces,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names in first-appearance order, without duplicates.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for piece in &self.pieces {
            if let Piece::Slot(name) = piece {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn render(&self, vars: &PromptVars) -> Result<String> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Slot(name) => {
                    let value = vars.get(name).ok_or_else(|| {
                        WizardError::invalid(format!(
                            "{}: missing required field '{}'",
                            self.name, name
                        ))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

const ANALYSIS_TEMPLATE: &str = "Task: {question}

Context:
- You are an expert code analyzer and technical writer.
- The entire codebase is provided below.
- Here is an index of all the files in the codebase:

{index}

- The content of each file is concatenated below:

{corpus}

{instructions}

Response:
";

const CACHED_QUESTION_TEMPLATE: &str = "Task: {question}

Context:
- You are an expert code analyzer and technical writer.
- The file index and the content of every file are provided in the cached context.

{instructions}

Response:
";

const ANALYSIS_INSTRUCTIONS: &str = "Instructions:
1. Carefully analyze the provided codebase.
2. Focus on addressing the specific task or question given.
3. Provide a comprehensive and well-structured response.
4. Use markdown formatting to enhance readability.
5. If relevant, include code snippets or examples from the codebase.
6. Ensure your analysis is accurate, insightful, and actionable.";

/// System instruction registered with every cached corpus.
pub const CACHE_SYSTEM_INSTRUCTION: &str = "You are an expert code analyzer and technical writer. \
The cached content holds the file index of a source repository followed by the concatenated \
content of each of its text files, each delimited by a '----- File: <path> -----' header. \
Answer questions about this codebase accurately, using markdown and quoting code where relevant.";

/// Format a file index as a markdown bullet list.
pub fn format_index(index: &[String]) -> String {
    index
        .iter()
        .map(|path| format!("- {}", path))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full analysis prompt: question, file index, and corpus.
pub fn build_analysis_prompt(question: &str, index: &[String], corpus: &str) -> Result<String> {
    let template = PromptTemplate::new("analysis", ANALYSIS_TEMPLATE)?;
    let vars = PromptVars::new()
        .with("question", question.trim())
        .with("index", format_index(index))
        .with("corpus", corpus)
        .with("instructions", ANALYSIS_INSTRUCTIONS);
    template.render(&vars)
}

/// Build the question prompt sent against a cache handle. The index and
/// corpus already live in the cached context.
pub fn build_cached_question_prompt(question: &str) -> Result<String> {
    let template = PromptTemplate::new("cached_analysis", CACHED_QUESTION_TEMPLATE)?;
    let vars = PromptVars::new()
        .with("question", question.trim())
        .with("instructions", ANALYSIS_INSTRUCTIONS);
    template.render(&vars)
}

/// The content registered with a cache: index then corpus.
pub fn build_cache_contents(index: &[String], corpus: &str) -> String {
    format!(
        "File index:\n\n{}\n\nFile contents:\n\n{}",
        format_index(index),
        corpus
    )
}

/// Reject prompts longer than `max_chars` characters when a bound is set.
pub fn ensure_within_budget(prompt: &str, max_chars: Option<usize>) -> Result<()> {
    let Some(limit) = max_chars else {
        return Ok(());
    };
    let len = prompt.chars().count();
    if len > limit {
        return Err(WizardError::invalid(format!(
            "prompt is {} characters, exceeding the configured limit of {}",
            len, limit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let t = PromptTemplate::new("greet", "Hello {name}, answer in {lang}.").unwrap();
        assert_eq!(t.placeholders(), vec!["name", "lang"]);
        let out = t
            .render(&PromptVars::new().with("name", "Ana").with("lang", "Spanish"))
            .unwrap();
        assert_eq!(out, "Hello Ana, answer in Spanish.");
    }

    #[test]
    fn test_missing_or_blank_field_is_rejected() {
        let t = PromptTemplate::new("tasks", "Split this:\n{story_content}").unwrap();
        let err = t.render(&PromptVars::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "tasks: missing required field 'story_content'"
        );
        let err = t
            .render(&PromptVars::new().with("story_content", "   \n"))
            .unwrap_err();
        assert!(matches!(err, WizardError::InvalidInput(_)));
    }

    #[test]
    fn test_escaped_braces_and_verbatim_values() {
        let t = PromptTemplate::new("json", "Return {{\"a\": 1}} for {x}").unwrap();
        assert_eq!(t.placeholders(), vec!["x"]);
        let out = t.render(&PromptVars::new().with("x", "{not_a_slot}")).unwrap();
        assert_eq!(out, "Return {\"a\": 1} for {not_a_slot}");
    }

    #[test]
    fn test_malformed_templates_fail_at_construction() {
        assert!(PromptTemplate::new("a", "open {name").is_err());
        assert!(PromptTemplate::new("b", "empty {}").is_err());
        assert!(PromptTemplate::new("c", "stray } brace").is_err());
        assert!(PromptTemplate::new("d", "spaced {two words}").is_err());
    }

    #[test]
    fn test_analysis_prompt_layout() {
        let index = vec!["a.py".to_string(), "b.png".to_string()];
        let corpus = "----- File: a.py -----\nprint('a')\n-------------------------\n";
        let prompt = build_analysis_prompt("Summarize it", &index, corpus).unwrap();

        assert!(prompt.starts_with("Task: Summarize it\n"));
        assert!(prompt.contains("- a.py\n- b.png"));
        assert!(prompt.contains(corpus));
        assert!(prompt.contains("6. Ensure your analysis is accurate"));
        assert!(prompt.trim_end().ends_with("Response:"));

        let task = prompt.find("Task:").unwrap();
        let index_pos = prompt.find("- a.py").unwrap();
        let corpus_pos = prompt.find("----- File: a.py").unwrap();
        let instr = prompt.find("Instructions:").unwrap();
        assert!(task < index_pos && index_pos < corpus_pos && corpus_pos < instr);
    }

    #[test]
    fn test_analysis_prompt_requires_question_and_corpus() {
        let index = vec!["a.py".to_string()];
        assert!(build_analysis_prompt(" ", &index, "x").is_err());
        assert!(build_analysis_prompt("q", &index, "").is_err());
        assert!(build_analysis_prompt("q", &[], "x").is_err());
    }

    #[test]
    fn test_cached_prompt_omits_corpus() {
        let prompt = build_cached_question_prompt("Find bugs").unwrap();
        assert!(prompt.starts_with("Task: Find bugs"));
        assert!(!prompt.contains("----- File:"));
        assert!(prompt.contains("Instructions:"));
    }

    #[test]
    fn test_budget() {
        assert!(ensure_within_budget("abc", None).is_ok());
        assert!(ensure_within_budget("abc", Some(3)).is_ok());
        assert!(ensure_within_budget("ábcd", Some(3)).is_err());
    }
}
