//! Input validation
//!
//! Checks a raw form value against its field's [`FieldValidation`] constraints and
//! coerces it to a typed [`FieldValue`].
//!
//! ## Example
//!
//! ```rust
//! use finmodel_core::{validate_value, DataType, FieldDefinition, FieldValidation, RawValue};
//!
//! let field = FieldDefinition::input("inflation", "Inflation", DataType::Percentage)
//!     .with_validation(FieldValidation::range(0.0, 100.0));
//!
//! assert!(validate_value(&field, Some(&RawValue::from(99.9)), None).is_ok());
//! assert!(validate_value(&field, Some(&RawValue::from(150.0)), None).is_err());
//! ```

use crate::field::{DataType, FieldDefinition};
use crate::value::{format_number, FieldValue, RawValue};
use regex::Regex;
use thiserror::Error;

/// A raw input value violates its field's constraints
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field_id}: {kind}")]
pub struct ValidationError {
    pub field_id: String,
    pub kind: ValidationErrorKind,
}

/// What constraint was violated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationErrorKind {
    #[error("value is required")]
    Required,

    #[error("expected a {expected} value, got '{value}'")]
    InvalidType { expected: DataType, value: String },

    #[error("{} is below the minimum of {}", format_number(*value), format_number(*min))]
    BelowMinimum { value: f64, min: f64 },

    #[error("{} is above the maximum of {}", format_number(*value), format_number(*max))]
    AboveMaximum { value: f64, max: f64 },

    #[error("'{value}' does not match pattern '{pattern}'")]
    PatternMismatch { value: String, pattern: String },
}

impl ValidationError {
    pub fn new(field_id: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_id: field_id.into(),
            kind,
        }
    }
}

/// Validate a raw value and coerce it to the field's data type
///
/// `pattern` is the compiled form of `field.validation.pattern`; callers that hold
/// a registry pass the pre-compiled regex. A missing value that is not required
/// yields [`FieldValue::Empty`].
pub fn validate_value(
    field: &FieldDefinition,
    raw: Option<&RawValue>,
    pattern: Option<&Regex>,
) -> Result<FieldValue, ValidationError> {
    let fail = |kind| ValidationError::new(field.id.as_str(), kind);

    let raw = match raw {
        Some(raw) if !raw.is_missing() => raw,
        _ => {
            if field.is_required() {
                return Err(fail(ValidationErrorKind::Required));
            }
            return Ok(FieldValue::Empty);
        }
    };

    let value = raw.coerce(field.data_type).map_err(|e| {
        fail(ValidationErrorKind::InvalidType {
            expected: e.expected,
            value: e.found,
        })
    })?;

    if field.data_type.is_numeric() {
        // Bounds are expressed in the unit the user typed (percent points for percentages)
        if let Some(entered) = raw.as_entered_number() {
            if let Some(min) = field.validation.min {
                if entered < min {
                    return Err(fail(ValidationErrorKind::BelowMinimum {
                        value: entered,
                        min,
                    }));
                }
            }
            if let Some(max) = field.validation.max {
                if entered > max {
                    return Err(fail(ValidationErrorKind::AboveMaximum {
                        value: entered,
                        max,
                    }));
                }
            }
        }
    }

    if let Some(re) = pattern {
        let text = raw.to_string();
        if !re.is_match(&text) {
            return Err(fail(ValidationErrorKind::PatternMismatch {
                value: text,
                pattern: re.as_str().to_string(),
            }));
        }
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValidation;

    fn percentage_field() -> FieldDefinition {
        FieldDefinition::input("field_58", "Shareholding", DataType::Percentage)
            .with_validation(FieldValidation::range(0.0, 100.0))
    }

    #[test]
    fn test_percentage_bounds_in_points() {
        let field = percentage_field();

        let err = validate_value(&field, Some(&RawValue::from(150.0)), None).unwrap_err();
        assert_eq!(err.field_id, "field_58");
        assert_eq!(
            err.kind,
            ValidationErrorKind::AboveMaximum {
                value: 150.0,
                max: 100.0
            }
        );

        let ok = validate_value(&field, Some(&RawValue::from(99.9)), None).unwrap();
        assert!((ok.as_number().unwrap() - 0.999).abs() < 1e-12);
    }

    #[test]
    fn test_below_minimum() {
        let field = FieldDefinition::input("capex", "Capex", DataType::Currency)
            .with_validation(FieldValidation::new().with_min(0.0));
        let err = validate_value(&field, Some(&RawValue::from(-5.0)), None).unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::BelowMinimum { .. }));
        assert_eq!(err.to_string(), "capex: -5 is below the minimum of 0");
    }

    #[test]
    fn test_required() {
        let field = FieldDefinition::input("name", "Project Name", DataType::Text)
            .with_validation(FieldValidation::new().required());
        let err = validate_value(&field, None, None).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Required);
        let err = validate_value(&field, Some(&RawValue::from("  ")), None).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Required);

        let optional = FieldDefinition::input("city", "City", DataType::Text);
        assert_eq!(validate_value(&optional, None, None).unwrap(), FieldValue::Empty);
    }

    #[test]
    fn test_invalid_type() {
        let field = FieldDefinition::input("cod", "COD", DataType::Date);
        let err = validate_value(&field, Some(&RawValue::from("next spring")), None).unwrap_err();
        assert_eq!(
            err.kind,
            ValidationErrorKind::InvalidType {
                expected: DataType::Date,
                value: "next spring".into()
            }
        );
    }

    #[test]
    fn test_pattern() {
        let field = FieldDefinition::input("reference", "Project Reference", DataType::Text)
            .with_validation(FieldValidation::new().with_pattern("^PRJ-[0-9]{4}$"));
        let re = Regex::new("^PRJ-[0-9]{4}$").unwrap();

        assert!(validate_value(&field, Some(&RawValue::from("PRJ-0042")), Some(&re)).is_ok());
        let err = validate_value(&field, Some(&RawValue::from("42")), Some(&re)).unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::PatternMismatch { .. }));
    }
}
