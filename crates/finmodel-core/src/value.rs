//! Field value types
//!
//! [`RawValue`] is what the draft layer hands over: whatever the form captured.
//! [`FieldValue`] is the typed value the engine computes with, obtained by coercing
//! a raw value against a field's [`DataType`].

use crate::field::DataType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raw input value as supplied by form data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

/// A raw value could not be coerced to the requested data type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected a {expected} value, got '{found}'")]
pub struct CoerceError {
    pub expected: DataType,
    pub found: String,
}

impl RawValue {
    /// Null or blank text
    pub fn is_missing(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Read the value as a number in the unit the user typed
    ///
    /// Percentages stay in percent points here; see [`RawValue::coerce`] for the
    /// normalized form.
    pub fn as_entered_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) if n.is_finite() => Some(*n),
            RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RawValue::Text(s) => parse_number_text(s),
            _ => None,
        }
    }

    /// Coerce to a typed value
    ///
    /// Missing values coerce to [`FieldValue::Empty`].
    pub fn coerce(&self, data_type: DataType) -> Result<FieldValue, CoerceError> {
        if self.is_missing() {
            return Ok(FieldValue::Empty);
        }

        let invalid = || CoerceError {
            expected: data_type,
            found: self.to_string(),
        };

        match data_type {
            DataType::Number | DataType::Currency => self
                .as_entered_number()
                .map(FieldValue::Number)
                .ok_or_else(invalid),
            DataType::Percentage => self
                .as_entered_number()
                .map(|points| FieldValue::Number(points / 100.0))
                .ok_or_else(invalid),
            DataType::Date => match self {
                RawValue::Text(s) => parse_date_text(s).map(FieldValue::Date).ok_or_else(invalid),
                _ => Err(invalid()),
            },
            DataType::Boolean => match self {
                RawValue::Bool(b) => Ok(FieldValue::Boolean(*b)),
                RawValue::Number(n) => Ok(FieldValue::Boolean(*n != 0.0)),
                RawValue::Text(s) => parse_bool_text(s).map(FieldValue::Boolean).ok_or_else(invalid),
                RawValue::Null => Ok(FieldValue::Empty),
            },
            DataType::Text => Ok(FieldValue::Text(self.to_string())),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => Ok(()),
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::Number(n) => f.write_str(&format_number(*n)),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

impl From<i32> for RawValue {
    fn from(n: i32) -> Self {
        RawValue::Number(n as f64)
    }
}

impl From<i64> for RawValue {
    fn from(n: i64) -> Self {
        RawValue::Number(n as f64)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Bool(b)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

/// Typed value used during evaluation
///
/// Percentages are fractions (`0.25` for 25%); currencies are plain numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Empty,
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Boolean(bool),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }

    /// Try to get the value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Boolean(true) => Some(1.0),
            FieldValue::Boolean(false) => Some(0.0),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            FieldValue::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Empty => "empty",
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "text",
            FieldValue::Date(_) => "date",
            FieldValue::Boolean(_) => "boolean",
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Empty
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Empty => Ok(()),
            FieldValue::Number(n) => f.write_str(&format_number(*n)),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// Format a number without a trailing ".0" for integral values
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parse a number as typed into a form: "1,351", "$2 000.50", "12.5%"
fn parse_number_text(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
    let trimmed = trimmed
        .strip_prefix(|c| matches!(c, '$' | '€' | '£'))
        .unwrap_or(trimmed)
        .trim_start();
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse the calendar date of an ISO date or date-time string
///
/// Accepts "2025-01-01", "2028-01-31 00:00:00+00:00" and "2025-01-01T00:00:00Z".
pub fn parse_date_text(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let date_part = match s.find(|c| c == 'T' || c == ' ') {
        Some(pos) => &s[..pos],
        None => s,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn parse_bool_text(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
