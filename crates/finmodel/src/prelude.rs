//! Prelude module - common imports for finmodel users
//!
//! ```rust
//! use finmodel::prelude::*;
//! ```

pub use crate::{
    // Catalog types
    CatalogConfig,
    HeadingConfig,
    SectionConfig,
    Registry,
    Section,
    Heading,
    RegistryStatistics,

    // Field types
    DataType,
    FieldDefinition,
    FieldType,
    FieldValidation,
    FieldValue,
    RawValue,

    // Evaluation types
    Evaluation,
    EvaluationOptions,
    FallbackPolicy,
    FieldIssue,
    FormData,
    IssueKind,
    CalculatedValues,

    // Formula types
    classify,
    FormulaError,
    FormulaKindTag,

    // Error types
    ConfigError,
    Error,
    Result,
    ValidationError,
    ValidationErrorKind,

    // Extension traits
    RegistryEvaluationExt,
};
