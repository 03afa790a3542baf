//! Rewrite failures. Both variants abort the rewrite of the whole command.

use eyre::Report;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// Constant folding, coercion or function resolution failed.
    Processing { expression: String, message: String },
    /// The command can be shown to be invalid without running it.
    Validation(String),
}

impl RewriteError {
    pub fn processing(expression: impl ToString, message: impl ToString) -> Self {
        RewriteError::Processing {
            expression: expression.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_validation(report: &Report) -> bool {
        matches!(
            report.downcast_ref::<RewriteError>(),
            Some(RewriteError::Validation(_))
        )
    }

    pub fn is_processing(report: &Report) -> bool {
        matches!(
            report.downcast_ref::<RewriteError>(),
            Some(RewriteError::Processing { .. })
        )
    }
}

impl std::fmt::Display for RewriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteError::Processing {
                expression,
                message,
            } => write!(f, "error evaluating '{}': {}", expression, message),
            RewriteError::Validation(message) => write!(f, "validation failed: {}", message),
        }
    }
}

impl std::error::Error for RewriteError {}
