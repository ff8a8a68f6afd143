//! Prompt-driven evaluator backed by an injected structured-completion client.
//!
//! The client is a capability boundary: whatever it fails with is wrapped in
//! [`TransformationError`] and nothing else leaks out.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use unirecon_core::{Row, Value};

use crate::error::TransformationError;
use crate::evaluator::{TransformationEvaluator, TransformationKind};

const TEMPLATE_TOKEN: &str = r"\{\{\s*([a-zA-Z0-9_.]+)\s*\}\}";

/// One completion call: the rendered prompt plus optional response schema and tuning.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub schema: Option<&'a serde_json::Value>,
    pub model: Option<&'a str>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

/// `complete(prompt, schema) -> raw text`, expected to be JSON.
pub trait StructuredCompletion: Send + Sync {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, Box<dyn StdError + Send + Sync>>;
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PromptConfig {
    #[serde(alias = "promptTemplate")]
    prompt_template: Option<String>,
    #[serde(alias = "jsonSchema")]
    json_schema: Option<serde_json::Value>,
    #[serde(alias = "resultPath")]
    result_path: Option<String>,
    #[serde(alias = "includeRawRecord")]
    include_raw_record: bool,
    model: Option<String>,
    temperature: Option<f64>,
    #[serde(alias = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            prompt_template: None,
            json_schema: None,
            result_path: None,
            include_raw_record: true,
            model: None,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl PromptConfig {
    fn parse(config: &str) -> Result<Self, TransformationError> {
        if config.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(config)
            .map_err(|e| TransformationError::with_source("Invalid prompt configuration JSON", e))
    }

    fn template(&self) -> Option<&str> {
        self.prompt_template.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

pub struct PromptEvaluator {
    client: Option<Arc<dyn StructuredCompletion>>,
}

impl PromptEvaluator {
    pub fn new(client: Option<Arc<dyn StructuredCompletion>>) -> Self {
        Self { client }
    }
}

impl TransformationEvaluator for PromptEvaluator {
    fn kind(&self) -> TransformationKind {
        TransformationKind::Prompt
    }

    fn validate(&self, config: &str) -> Result<(), TransformationError> {
        let parsed = PromptConfig::parse(config).map_err(|e| TransformationError::Validation(e.to_string()))?;
        if parsed.template().is_none() {
            return Err(TransformationError::validation("LLM prompt template is required"));
        }
        Ok(())
    }

    fn evaluate(&self, value: &Value, row: &Row, config: &str) -> Result<Value, TransformationError> {
        let parsed = PromptConfig::parse(config)?;
        let template = parsed
            .template()
            .ok_or_else(|| TransformationError::evaluation("LLM prompt template is required"))?;
        let Some(client) = self.client.as_ref() else {
            log::debug!("prompt transformation requested without a completion client");
            return Err(TransformationError::Disabled(
                "prompt transformations require a structured completion client".into(),
            ));
        };

        let mut substitutions = HashMap::new();
        substitutions.insert("value", value.to_string());
        let raw_record = if parsed.include_raw_record {
            serde_json::to_string(row)
                .map_err(|e| TransformationError::with_source("Failed to serialize row to JSON", e))?
        } else {
            "{}".to_string()
        };
        substitutions.insert("rawRecord", raw_record);
        let schema = parsed
            .json_schema
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "{}".to_string());
        substitutions.insert("schema", schema);

        let prompt = render_template(template, &substitutions)?;
        let request = CompletionRequest {
            prompt: &prompt,
            schema: parsed.json_schema.as_ref(),
            model: parsed.model.as_deref(),
            temperature: parsed.temperature,
            max_output_tokens: parsed.max_output_tokens,
        };
        let response = client.complete(&request).map_err(|e| TransformationError::Evaluation {
            message: format!("Structured completion failed: {}", e),
            source: Some(e),
        })?;

        let root: serde_json::Value = serde_json::from_str(strip_code_fence(&response))
            .map_err(|e| TransformationError::with_source("Unable to parse LLM response as JSON", e))?;
        let path = parsed.result_path.as_deref().unwrap_or("");
        let target = navigate(&root, path).ok_or_else(|| {
            TransformationError::evaluation(format!(
                "LLM response did not contain the configured result path: {}",
                path
            ))
        })?;
        Ok(Value::from(target.clone()))
    }
}

/// Replace `{{ token }}` occurrences; unknown tokens render empty.
pub fn render_template(template: &str, substitutions: &HashMap<&str, String>) -> Result<String, TransformationError> {
    let re = Regex::new(TEMPLATE_TOKEN)
        .map_err(|e| TransformationError::with_source("Invalid template token pattern", e))?;
    Ok(re
        .replace_all(template, |caps: &regex::Captures| {
            substitutions.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// Navigate a dot-separated path; `\.` escapes a literal dot. An empty path is the root.
pub fn navigate<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.trim().is_empty() {
        return Some(root);
    }
    split_segments(path)
        .iter()
        .try_fold(root, |current, segment| match current {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn split_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut escaping = false;
    for ch in path.chars() {
        if escaping {
            current.push(ch);
            escaping = false;
        } else if ch == '\\' {
            escaping = true;
        } else if ch == '.' {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if escaping {
        current.push('\\');
    }
    segments.push(current);
    segments
}

/// Models often wrap JSON in a markdown fence; drop it.
fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
