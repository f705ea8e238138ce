//! Formula error types

use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that can occur during formula parsing or evaluation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// Formula parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// The formula is not one of the supported operation kinds
    #[error("Unrecognized formula: {0}")]
    Unrecognized(String),

    /// An operand has the wrong type for the operation
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A referenced value is absent
    #[error("Missing value for '{reference}'")]
    MissingValue { reference: String },

    /// A referenced input could not be read as its declared type
    #[error("Invalid input for '{reference}': {reason}")]
    InvalidInput { reference: String, reason: String },

    /// Reference to an unknown cell or name
    #[error("Invalid reference: {0}")]
    UnresolvedReference(String),

    /// Case selector does not address an entry of the case table
    #[error("Case {index} selected by '{selector}' is outside the case table (0..{len})")]
    CaseOutOfRange {
        selector: String,
        index: i64,
        len: usize,
    },

    /// Case selector is not a whole number
    #[error("Case selector '{selector}' is not a whole number: {value}")]
    InvalidCaseSelector { selector: String, value: f64 },

    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Date arithmetic left the supported calendar range
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Other evaluation error
    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

impl FormulaError {
    /// Whether the error comes from a missing or malformed dependency value
    /// rather than from the formula itself
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            FormulaError::MissingValue { .. } | FormulaError::InvalidInput { .. }
        )
    }
}
