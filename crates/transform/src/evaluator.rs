//! Evaluator trait and the registry the processor and projector dispatch through.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unirecon_core::{Row, Value};

use crate::error::TransformationError;
use crate::formula::FormulaEvaluator;
use crate::pipeline::PipelineEvaluator;
use crate::prompt::{PromptEvaluator, StructuredCompletion};
use crate::script::ScriptEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    Script,
    Formula,
    Pipeline,
    Prompt,
}

impl TransformationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformationKind::Script => "script",
            TransformationKind::Formula => "formula",
            TransformationKind::Pipeline => "pipeline",
            TransformationKind::Prompt => "prompt",
        }
    }

    /// Script and formula steps carry an expression; the others a JSON configuration.
    pub fn uses_expression(self) -> bool {
        matches!(self, TransformationKind::Script | TransformationKind::Formula)
    }
}

impl fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Given a value and the row it came from, produce a transformed value.
///
/// `config` is the step's expression (script, formula) or JSON configuration
/// (pipeline, prompt). Implementations hold no per-call state.
pub trait TransformationEvaluator: Send + Sync {
    fn kind(&self) -> TransformationKind;

    fn validate(&self, config: &str) -> Result<(), TransformationError>;

    fn evaluate(&self, value: &Value, row: &Row, config: &str) -> Result<Value, TransformationError>;
}

/// The set of evaluators available to one run.
pub struct Evaluators {
    script: Option<ScriptEvaluator>,
    formula: FormulaEvaluator,
    pipeline: PipelineEvaluator,
    prompt: PromptEvaluator,
}

impl Default for Evaluators {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluators {
    /// All evaluators enabled; prompt steps fail until a completion client is attached.
    pub fn new() -> Self {
        Self {
            script: Some(ScriptEvaluator::default()),
            formula: FormulaEvaluator,
            pipeline: PipelineEvaluator,
            prompt: PromptEvaluator::new(None),
        }
    }

    /// Switch off embedded scripting (field scripts and dataset scripts).
    pub fn without_scripting(mut self) -> Self {
        self.script = None;
        self
    }

    pub fn with_script_evaluator(mut self, script: ScriptEvaluator) -> Self {
        self.script = Some(script);
        self
    }

    pub fn with_completion(mut self, client: Arc<dyn StructuredCompletion>) -> Self {
        self.prompt = PromptEvaluator::new(Some(client));
        self
    }

    pub fn scripting_enabled(&self) -> bool {
        self.script.is_some()
    }

    pub fn script(&self) -> Result<&ScriptEvaluator, TransformationError> {
        self.script.as_ref().ok_or_else(|| {
            log::debug!("script evaluation requested while scripting is disabled");
            TransformationError::Disabled("script transformations are disabled".into())
        })
    }

    pub fn pipeline(&self) -> &PipelineEvaluator {
        &self.pipeline
    }

    pub fn get(&self, kind: TransformationKind) -> Result<&dyn TransformationEvaluator, TransformationError> {
        let evaluator: &dyn TransformationEvaluator = match kind {
            TransformationKind::Script => self.script()?,
            TransformationKind::Formula => &self.formula,
            TransformationKind::Pipeline => &self.pipeline,
            TransformationKind::Prompt => &self.prompt,
        };
        Ok(evaluator)
    }

    pub fn validate(&self, kind: TransformationKind, config: &str) -> Result<(), TransformationError> {
        self.get(kind)?.validate(config)
    }

    pub fn evaluate(
        &self,
        kind: TransformationKind,
        value: &Value,
        row: &Row,
        config: &str,
    ) -> Result<Value, TransformationError> {
        self.get(kind)?.evaluate(value, row, config).map_err(|e| {
            log::debug!("{kind} transformation failed: {e}");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_dispatches_by_kind() {
        let evaluators = Evaluators::new();
        for kind in [
            TransformationKind::Script,
            TransformationKind::Formula,
            TransformationKind::Pipeline,
            TransformationKind::Prompt,
        ] {
            assert_eq!(evaluators.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn disabled_scripting_is_reported() {
        let evaluators = Evaluators::new().without_scripting();
        assert!(!evaluators.scripting_enabled());
        let err = evaluators
            .evaluate(TransformationKind::Script, &Value::text("x"), &Row::new(), "return value")
            .unwrap_err();
        assert!(matches!(err, TransformationError::Disabled(_)));

        // other evaluators keep working
        let out = evaluators
            .evaluate(TransformationKind::Formula, &Value::text("x"), &Row::new(), "=UPPER(VALUE)")
            .unwrap();
        assert_eq!(out, Value::text("X"));
    }

    #[test]
    fn kind_parses_snake_case() {
        let kind: TransformationKind = serde_json::from_str("\"pipeline\"").unwrap();
        assert_eq!(kind, TransformationKind::Pipeline);
        assert!(TransformationKind::Formula.uses_expression());
        assert!(!TransformationKind::Prompt.uses_expression());
    }
}
