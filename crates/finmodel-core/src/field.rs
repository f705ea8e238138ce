//! Field definitions
//!
//! A field is one "cell" transplanted from the source spreadsheet model: a user
//! input, a calculated value, or a named constant that formulas refer to by alias.
//!
//! ## Example
//!
//! ```rust
//! use finmodel_core::{DataType, FieldDefinition, FieldValidation};
//!
//! let share = FieldDefinition::input("field_58", "Total shareholding", DataType::Percentage)
//!     .with_row(58)
//!     .with_validation(FieldValidation::range(0.0, 100.0));
//!
//! let check = FieldDefinition::calculated(
//!     "field_59",
//!     "Project shareholding check",
//!     DataType::Number,
//!     "= IF( F58 = 100%, 0, 1 )",
//! )
//! .with_row(59);
//!
//! assert!(share.field_type.is_input());
//! assert!(check.field_type.is_computed());
//! ```

use crate::value::RawValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Role of a field in the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Value entered by the user
    Input,
    /// Value derived from a formula
    Calculated,
    /// Value derived from a formula (spreadsheet "formula" cells)
    Formula,
    /// Named constant referenced by alias
    NamedCell,
}

impl FieldType {
    /// Whether fields of this type are computed from a formula
    pub fn is_computed(self) -> bool {
        matches!(self, FieldType::Calculated | FieldType::Formula)
    }

    /// Whether fields of this type read their value from form data
    pub fn is_input(self) -> bool {
        !self.is_computed()
    }

    /// Name as written in catalog files
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Input => "input",
            FieldType::Calculated => "calculated",
            FieldType::Formula => "formula",
            FieldType::NamedCell => "named_cell",
        }
    }

}

/// Unknown field type name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown field type '{0}' (expected input, calculated, formula or named_cell)")]
pub struct ParseFieldTypeError(pub String);

impl FromStr for FieldType {
    type Err = ParseFieldTypeError;

    /// Parse a catalog type name, ignoring case and surrounding whitespace
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" => Ok(FieldType::Input),
            "calculated" => Ok(FieldType::Calculated),
            "formula" => Ok(FieldType::Formula),
            "named_cell" | "namedcell" => Ok(FieldType::NamedCell),
            _ => Err(ParseFieldTypeError(s.to_string())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of value a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Number,
    Text,
    Date,
    /// Entered in percent points, computed as a fraction
    Percentage,
    Currency,
    Boolean,
}

impl DataType {
    /// Number, percentage and currency fields
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Number | DataType::Percentage | DataType::Currency
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Number => "number",
            DataType::Text => "text",
            DataType::Date => "date",
            DataType::Percentage => "percentage",
            DataType::Currency => "currency",
            DataType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input constraints for a field
///
/// `min`/`max` apply to numeric data types; for percentages they are expressed in
/// percent points, the same unit the user types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Regular expression the textual form of the value must match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldValidation {
    /// No constraints
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive numeric range
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::default()
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Whether any constraint is set
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && !self.required && self.pattern.is_none()
    }
}

/// Definition of one field of the financial model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Unique id (e.g. "field_838")
    pub id: String,
    /// Display name
    pub name: String,
    /// Row of the source spreadsheet; `F<row>` references resolve through it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<u32>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Formula text; present iff the field is computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Spreadsheet alias (e.g. "F838", "LiveCase")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_cell: Option<String>,
    #[serde(default, skip_serializing_if = "FieldValidation::is_empty")]
    pub validation: FieldValidation,
    /// Static default, in the same unit as form input
    #[serde(default, alias = "value", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<RawValue>,
    /// Pre-resolved per-case values of an `INDEX` row, one entry per case
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cases: Vec<RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDefinition {
    /// Create a field with no formula, alias, or constraints
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        field_type: FieldType,
        data_type: DataType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            row: None,
            field_type,
            data_type,
            unit: None,
            formula: None,
            named_cell: None,
            validation: FieldValidation::default(),
            default_value: None,
            cases: Vec::new(),
            description: None,
        }
    }

    /// Create an input field
    pub fn input(id: impl Into<String>, name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(id, name, FieldType::Input, data_type)
    }

    /// Create a calculated field
    pub fn calculated(
        id: impl Into<String>,
        name: impl Into<String>,
        data_type: DataType,
        formula: impl Into<String>,
    ) -> Self {
        Self::new(id, name, FieldType::Calculated, data_type).with_formula(formula)
    }

    /// Create a named-cell constant
    pub fn named_cell(
        id: impl Into<String>,
        name: impl Into<String>,
        data_type: DataType,
        alias: impl Into<String>,
    ) -> Self {
        Self::new(id, name, FieldType::NamedCell, data_type).with_named_cell(alias)
    }

    pub fn with_row(mut self, row: u32) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_named_cell(mut self, alias: impl Into<String>) -> Self {
        self.named_cell = Some(alias.into());
        self
    }

    pub fn with_validation(mut self, validation: FieldValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_default(mut self, value: impl Into<RawValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_cases<I, V>(mut self, cases: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<RawValue>,
    {
        self.cases = cases.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the field is computed from a formula
    pub fn is_computed(&self) -> bool {
        self.field_type.is_computed()
    }

    pub fn is_required(&self) -> bool {
        self.validation.required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deserialize_source_shape() {
        let json = r#"{
            "id": "field_838",
            "name": "Project capacity - AC",
            "row": 838,
            "type": "formula",
            "dataType": "number",
            "value": 1351,
            "formula": "= INDEX( $K838:$Q838, 0, LiveCase + 1 )",
            "namedCell": "F838",
            "unit": "MW",
            "cases": [1351, 1351, 1200, 1351, 1351, 1351, 1351]
        }"#;
        let field: FieldDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(field.row, Some(838));
        assert_eq!(field.field_type, FieldType::Formula);
        assert_eq!(field.default_value, Some(RawValue::Number(1351.0)));
        assert_eq!(field.named_cell.as_deref(), Some("F838"));
        assert_eq!(field.cases.len(), 7);
        assert!(field.is_computed());
    }

    #[test]
    fn test_named_cell_type_name() {
        let t: FieldType = serde_json::from_str("\"named_cell\"").unwrap();
        assert_eq!(t, FieldType::NamedCell);
        assert_eq!("Named_Cell".parse::<FieldType>(), Ok(FieldType::NamedCell));
        assert_eq!(" formula ".parse::<FieldType>(), Ok(FieldType::Formula));
        assert_eq!(
            "lookup".parse::<FieldType>(),
            Err(ParseFieldTypeError("lookup".into()))
        );
        assert!(FieldType::NamedCell.is_input());
    }

    #[test]
    fn test_validation_serialization_skips_unset() {
        let field = FieldDefinition::input("a", "A", DataType::Number);
        let json = serde_json::to_string(&field).unwrap();
        assert!(!json.contains("validation"));
        assert!(!json.contains("formula"));
    }

    #[test]
    fn test_builder() {
        let field = FieldDefinition::named_cell("thousand", "Thousand", DataType::Number, "thousand")
            .with_default(1000.0)
            .with_validation(FieldValidation::new().required().with_min(0.0));
        assert_eq!(field.named_cell.as_deref(), Some("thousand"));
        assert!(field.is_required());
        assert_eq!(field.validation.min, Some(0.0));
    }
}
