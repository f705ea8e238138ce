//! Error types for finmodel-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building or querying a field registry
#[derive(Debug, Error)]
pub enum Error {
    /// No field with the given id or alias
    #[error("Field not found: {0}")]
    NotFound(String),

    /// No section/heading with the given id
    #[error("Section not found: {0}")]
    SectionNotFound(String),

    /// The catalog configuration is invalid; every problem found is listed
    #[error("Invalid catalog configuration ({} problem(s)): {}", .0.len(), join_problems(.0))]
    Config(Vec<ConfigError>),

    /// Catalog file could not be read
    #[error("Failed to read catalog '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Configuration problems carried by this error, if any
    pub fn config_errors(&self) -> &[ConfigError] {
        match self {
            Error::Config(errors) => errors,
            _ => &[],
        }
    }
}

fn join_problems(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A structural defect in the field catalog, detected once at registry build time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Catalog document could not be parsed
    #[error("Catalog parse error: {0}")]
    Parse(String),

    /// Two different definitions share one field id
    #[error("Duplicate field id '{id}'")]
    DuplicateId { id: String },

    /// Two sections share one id
    #[error("Duplicate section id '{id}'")]
    DuplicateSection { id: String },

    /// Two headings of one section share one id
    #[error("Duplicate heading '{heading}' in section '{section}'")]
    DuplicateHeading { section: String, heading: String },

    /// Two fields claim the same named-cell alias
    #[error("Named cell '{alias}' is claimed by both '{first}' and '{second}'")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    /// A formula references something no field answers to
    #[error("Field '{field}' references unknown cell '{reference}'")]
    DanglingReference { field: String, reference: String },

    /// A formula reference resolves to more than one field
    #[error("Field '{field}' references '{reference}', which matches {}", candidates.join(", "))]
    AmbiguousReference {
        field: String,
        reference: String,
        candidates: Vec<String>,
    },

    /// An input or named-cell field carries a formula
    #[error("Field '{field}' is not computed but carries a formula")]
    UnexpectedFormula { field: String },

    /// A calculated or formula field has no formula
    #[error("Field '{field}' is computed but has no formula")]
    MissingFormula { field: String },

    /// A named-cell field declares no alias
    #[error("Field '{field}' is a named cell but declares no alias")]
    MissingAlias { field: String },

    /// The default value does not fit the field's data type
    #[error("Field '{field}' has an invalid default value: {reason}")]
    InvalidDefault { field: String, reason: String },

    /// The case table of an INDEX row is unusable
    #[error("Field '{field}' has an invalid case table: {reason}")]
    InvalidCaseTable { field: String, reason: String },

    /// A validation pattern is not a valid regular expression
    #[error("Field '{field}' has an invalid validation pattern: {reason}")]
    InvalidPattern { field: String, reason: String },

    /// A heading lists a field id that is defined nowhere
    #[error("Heading '{section}/{heading}' lists unknown field '{id}'")]
    UnknownFieldRef {
        section: String,
        heading: String,
        id: String,
    },

    /// The formula dependency graph contains a cycle
    ///
    /// `path` runs in depends-on order: each field's formula references the
    /// field after it (`a -> b` means `a` reads `b`), so it is the reverse of
    /// the precedent-to-dependent edge direction. It starts at the cycle member
    /// registered first and repeats it at the end.
    #[error("Circular dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = ConfigError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");
    }

    #[test]
    fn test_config_lists_every_problem() {
        let err = Error::Config(vec![
            ConfigError::DuplicateId { id: "x".into() },
            ConfigError::MissingFormula { field: "y".into() },
        ]);
        let text = err.to_string();
        assert!(text.contains("2 problem(s)"));
        assert!(text.contains("Duplicate field id 'x'"));
        assert!(text.contains("'y' is computed"));
        assert_eq!(err.config_errors().len(), 2);
    }
}
