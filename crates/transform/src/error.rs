use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Every failure raised while validating or applying a transformation.
#[derive(Debug, thiserror::Error)]
pub enum TransformationError {
    /// A plan, operation or evaluator configuration is structurally invalid.
    #[error("{0}")]
    Validation(String),
    /// An evaluator or operation failed on actual data.
    #[error("{message}")]
    Evaluation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The requested evaluator is switched off in this deployment.
    #[error("{0}")]
    Disabled(String),
}

impl TransformationError {
    pub fn validation(message: impl Into<String>) -> Self {
        TransformationError::Validation(message.into())
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        TransformationError::Evaluation { message: message.into(), source: None }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TransformationError::Evaluation { message: message.into(), source: Some(source.into()) }
    }

    /// Prefix the message with context, keeping the variant and cause.
    pub fn context(self, prefix: &str) -> Self {
        match self {
            TransformationError::Validation(m) => {
                TransformationError::Validation(format!("{prefix}: {m}"))
            }
            TransformationError::Evaluation { message, source } => TransformationError::Evaluation {
                message: format!("{prefix}: {message}"),
                source,
            },
            TransformationError::Disabled(m) => TransformationError::Disabled(format!("{prefix}: {m}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_variant_and_source() {
        let cause: BoxError = "bad digit".into();
        let err = TransformationError::with_source("round failed", cause).context("field amount");
        assert_eq!(err.to_string(), "field amount: round failed");
        assert!(err.source().is_some());

        let err = TransformationError::validation("missing column").context("split");
        assert!(matches!(err, TransformationError::Validation(ref m) if m == "split: missing column"));
    }
}
