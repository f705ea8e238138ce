//! # finmodel
//!
//! A formula evaluation engine for renewable-energy project financial models.
//!
//! The model is a catalog of fields transplanted from a spreadsheet: user inputs,
//! named constants, and computed fields whose spreadsheet formulas are classified
//! into a small set of recognized shapes and evaluated in dependency order.
//!
//! ## Features
//!
//! - JSON field catalogs with sections and headings over one canonical field table
//! - Load-time validation: duplicate ids and aliases, dangling references, cycles
//! - Case lookups (`INDEX`), month offsets (`EDATE`/`EOMONTH`), conditionals and arithmetic
//! - Partial-failure evaluation with an explicit default-fallback policy
//! - Catalog statistics and introspection
//!
//! ## Example
//!
//! ```rust
//! use finmodel::prelude::*;
//!
//! let config = CatalogConfig::new()
//!     .with_field(FieldDefinition::input("field_37", "Construction period", DataType::Number).with_row(37))
//!     .with_field(FieldDefinition::input("field_32", "Construction start", DataType::Date).with_row(32))
//!     .with_field(FieldDefinition::calculated(
//!         "field_41",
//!         "Construction end",
//!         DataType::Date,
//!         "= EDATE( F32, F37 ) - 1",
//!     ));
//! let registry = Registry::load(config).unwrap();
//!
//! let mut form = FormData::new();
//! form.insert("field_32".into(), RawValue::from("2025-01-01"));
//! form.insert("field_37".into(), RawValue::from(6.0));
//!
//! let evaluation = registry.evaluate(&form);
//! assert!(evaluation.is_clean());
//! assert_eq!(evaluation.value("field_41").unwrap().to_string(), "2025-06-30");
//! ```

pub mod calculation;
pub mod config;
pub mod prelude;
pub mod registry;
pub mod statistics;

// Re-export calculation types
pub use calculation::{
    evaluate, validate, CalculatedValues, Evaluation, EvaluationOptions, FallbackPolicy,
    FieldIssue, FormData, IssueKind, RegistryEvaluationExt,
};

// Re-export catalog types
pub use config::{CatalogConfig, HeadingConfig, HeadingEntry, SectionConfig};
pub use registry::{Heading, Registry, Section};
pub use statistics::{RegistryStatistics, RowRange};

// Re-export core types
pub use finmodel_core::{
    ConfigError, DataType, Error, FieldDefinition, FieldType, FieldValidation, FieldValue,
    ParseFieldTypeError, RawValue, Result, ValidationError, ValidationErrorKind, VALUE_COLUMN,
};

// Re-export formula types
pub use finmodel_formula::{
    classify, parse_formula, Classification, FormulaError, FormulaExpr, FormulaKind,
    FormulaKindTag, FormulaResult,
};
