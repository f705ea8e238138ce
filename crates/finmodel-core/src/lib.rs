//! # finmodel-core
//!
//! Core data structures for the finmodel formula engine.
//!
//! This crate provides the fundamental types used throughout finmodel:
//! - [`FieldDefinition`] - One field of the financial model (input, calculated, formula, named cell)
//! - [`RawValue`] and [`FieldValue`] - Form input and typed evaluation values
//! - [`FieldValidation`] and [`validate_value`] - Input constraints
//! - [`Error`] and [`ConfigError`] - Registry build and lookup errors
//!
//! ## Example
//!
//! ```rust
//! use finmodel_core::{DataType, FieldDefinition, FieldValue, RawValue};
//!
//! let field = FieldDefinition::input("field_32", "Construction start", DataType::Date);
//! let value = RawValue::from("2025-01-01").coerce(field.data_type).unwrap();
//! assert!(matches!(value, FieldValue::Date(_)));
//! ```

pub mod error;
pub mod field;
pub mod validation;
pub mod value;

// Re-exports for convenience
pub use error::{ConfigError, Error, Result};
pub use field::{DataType, FieldDefinition, FieldType, FieldValidation, ParseFieldTypeError};
pub use validation::{validate_value, ValidationError, ValidationErrorKind};
pub use value::{format_number, parse_date_text, CoerceError, FieldValue, RawValue};

/// Spreadsheet column that holds each row's live value; `F<row>` references resolve by row
pub const VALUE_COLUMN: &str = "F";
