//! Registry evaluation engine
//!
//! Produces the derived values of every computed field from one snapshot of form
//! data. Fields are evaluated in dependency order; a field that fails records an
//! issue and evaluation carries on with everything that does not depend on it.
//!
//! # Example
//!
//! ```rust
//! use finmodel::prelude::*;
//!
//! let registry = Registry::builtin().unwrap();
//! let mut form = FormData::new();
//! form.insert("field_58".into(), RawValue::from(80.0));
//!
//! let evaluation = registry.evaluate(&form);
//! assert_eq!(evaluation.value("field_59"), Some(&FieldValue::Number(1.0)));
//! ```

use crate::registry::{Registry, Resolution};
use finmodel_core::{validate_value, DataType, FieldValue, RawValue, ValidationError, ValidationErrorKind};
use finmodel_formula::{
    evaluate as evaluate_formula, EvaluationContext, FormulaError, FormulaResult, RangeReference,
    Reference,
};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;

/// Raw form input: field id or named-cell alias → value
pub type FormData = BTreeMap<String, RawValue>;

/// Derived values: field id → value
pub type CalculatedValues = BTreeMap<String, FieldValue>;

/// What to store for a field whose dependencies are missing or invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Store the field's declared default, and report the substitution
    #[default]
    UseDefault,
    /// Store nothing
    Strict,
}

/// Options for registry evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOptions {
    /// Case index used by every case selector instead of the form value
    pub case_override: Option<i64>,
    /// Handling of fields whose dependencies failed (default: use declared default)
    pub fallback: FallbackPolicy,
    /// Read an input's declared default when the form leaves it empty (default: true)
    pub input_defaults: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            case_override: None,
            fallback: FallbackPolicy::UseDefault,
            input_defaults: true,
        }
    }
}

impl EvaluationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate every lookup for the given case
    pub fn with_case(mut self, case: i64) -> Self {
        self.case_override = Some(case);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Never substitute defaults for failed fields
    pub fn strict(self) -> Self {
        self.with_fallback(FallbackPolicy::Strict)
    }

    /// Treat inputs missing from the form as missing, even when they declare a default
    pub fn without_input_defaults(mut self) -> Self {
        self.input_defaults = false;
        self
    }
}

/// Problem attached to one field
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    Validation(ValidationError),
    Formula(FormulaError),
}

/// A per-field problem found during evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct FieldIssue {
    pub field_id: String,
    pub kind: IssueKind,
    /// The field's declared default was stored in place of a computed value
    pub fallback_applied: bool,
}

impl FieldIssue {
    pub fn message(&self) -> String {
        match &self.kind {
            IssueKind::Validation(e) => e.kind.to_string(),
            IssueKind::Formula(e) => e.to_string(),
        }
    }
}

impl Serialize for FieldIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = match self.kind {
            IssueKind::Validation(_) => "validation",
            IssueKind::Formula(_) => "formula",
        };
        let mut state = serializer.serialize_struct("FieldIssue", 4)?;
        state.serialize_field("field_id", &self.field_id)?;
        state.serialize_field("kind", kind)?;
        state.serialize_field("message", &self.message())?;
        state.serialize_field("fallback_applied", &self.fallback_applied)?;
        state.end()
    }
}

/// Result of evaluating a registry against one form snapshot
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Evaluation {
    pub values: CalculatedValues,
    pub issues: Vec<FieldIssue>,
}

impl Evaluation {
    /// No validation or formula issues were recorded
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn value(&self, id: &str) -> Option<&FieldValue> {
        self.values.get(id)
    }

    /// Formula errors with the id of the field they belong to
    pub fn formula_errors(&self) -> impl Iterator<Item = (&str, &FormulaError)> + '_ {
        self.issues.iter().filter_map(|issue| match &issue.kind {
            IssueKind::Formula(e) => Some((issue.field_id.as_str(), e)),
            IssueKind::Validation(_) => None,
        })
    }

    pub fn validation_errors(&self) -> impl Iterator<Item = &ValidationError> + '_ {
        self.issues.iter().filter_map(|issue| match &issue.kind {
            IssueKind::Validation(e) => Some(e),
            IssueKind::Formula(_) => None,
        })
    }

    /// Issues recorded for one field
    pub fn issues_for<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a FieldIssue> + 'a {
        self.issues.iter().filter(move |issue| issue.field_id == id)
    }
}

/// Extension trait for Registry to add evaluation methods
pub trait RegistryEvaluationExt {
    /// Evaluate all computed fields with default options
    fn evaluate(&self, form_data: &FormData) -> Evaluation;

    /// Evaluate all computed fields with custom options
    fn evaluate_with_options(&self, form_data: &FormData, options: &EvaluationOptions) -> Evaluation;

    /// Validate the form inputs without evaluating formulas
    fn validate(&self, form_data: &FormData) -> Vec<ValidationError>;
}

impl RegistryEvaluationExt for Registry {
    fn evaluate(&self, form_data: &FormData) -> Evaluation {
        evaluate(self, form_data, &EvaluationOptions::default())
    }

    fn evaluate_with_options(&self, form_data: &FormData, options: &EvaluationOptions) -> Evaluation {
        evaluate(self, form_data, options)
    }

    fn validate(&self, form_data: &FormData) -> Vec<ValidationError> {
        validate(self, form_data)
    }
}

/// Evaluate every computed field of a registry
///
/// Pure: reads the registry and form data, returns a fresh [`Evaluation`].
pub fn evaluate(registry: &Registry, form_data: &FormData, options: &EvaluationOptions) -> Evaluation {
    let mut engine = CalculationEngine::new(registry, options);
    let mut issues = engine.read_inputs(form_data);
    let values = engine.calculate_all(&mut issues);

    log::trace!(
        "Evaluated {} computed fields: {} values, {} issue(s)",
        registry.order_indices().len(),
        values.len(),
        issues.len()
    );

    Evaluation { values, issues }
}

/// Validate every input present in the form, plus required inputs that are absent
pub fn validate(registry: &Registry, form_data: &FormData) -> Vec<ValidationError> {
    let options = EvaluationOptions::default();
    let mut engine = CalculationEngine::new(registry, &options);
    engine
        .read_inputs(form_data)
        .into_iter()
        .filter_map(|issue| match issue.kind {
            IssueKind::Validation(e) => Some(e),
            IssueKind::Formula(_) => None,
        })
        .collect()
}

/// Evaluation state of one field
#[derive(Debug, Clone)]
enum Slot {
    Value(FieldValue),
    Missing,
    Invalid(String),
}

/// The calculation engine
struct CalculationEngine<'a> {
    registry: &'a Registry,
    options: &'a EvaluationOptions,
    /// One slot per registry field
    slots: Vec<Slot>,
}

impl<'a> CalculationEngine<'a> {
    fn new(registry: &'a Registry, options: &'a EvaluationOptions) -> Self {
        Self {
            registry,
            options,
            slots: vec![Slot::Missing; registry.len()],
        }
    }

    /// Phase 1: validate and coerce every non-computed field
    fn read_inputs(&mut self, form_data: &FormData) -> Vec<FieldIssue> {
        let registry = self.registry;
        let options = self.options;
        let mut issues = Vec::new();
        let raw_values = collect_form_values(registry, form_data);

        for (idx, field) in registry.fields().iter().enumerate() {
            if field.is_computed() {
                continue;
            }

            let raw = raw_values[idx];
            let compiled = registry.compiled(idx);
            let default = || match (&compiled.default, options.input_defaults) {
                (Some(value), true) => Slot::Value(value.clone()),
                _ => Slot::Missing,
            };

            self.slots[idx] = match validate_value(field, raw, compiled.pattern.as_ref()) {
                Ok(FieldValue::Empty) => default(),
                Ok(value) => Slot::Value(value),
                Err(e) => {
                    log::debug!("{}", e);
                    let slot = match e.kind {
                        ValidationErrorKind::Required => default(),
                        _ => Slot::Invalid(e.kind.to_string()),
                    };
                    issues.push(FieldIssue {
                        field_id: field.id.clone(),
                        kind: IssueKind::Validation(e),
                        fallback_applied: false,
                    });
                    slot
                }
            };
        }

        issues
    }

    /// Phase 2: evaluate computed fields in dependency order
    fn calculate_all(&mut self, issues: &mut Vec<FieldIssue>) -> CalculatedValues {
        let registry = self.registry;
        let mut values = CalculatedValues::new();

        for &idx in registry.order_indices() {
            let field = registry.field_at(idx);
            let compiled = registry.compiled(idx);
            let Some(classification) = &compiled.formula else {
                continue;
            };

            let result = evaluate_formula(classification, &*self)
                .and_then(|value| conform(value, field.data_type));

            let slot = match result {
                Ok(value) => {
                    values.insert(field.id.clone(), value.clone());
                    Slot::Value(value)
                }
                Err(e) => {
                    log::debug!("{}: {}", field.id, e);
                    let fallback = match (&compiled.default, self.options.fallback) {
                        (Some(default), FallbackPolicy::UseDefault) if e.is_dependency_failure() => {
                            Some(default.clone())
                        }
                        _ => None,
                    };
                    issues.push(FieldIssue {
                        field_id: field.id.clone(),
                        kind: IssueKind::Formula(e),
                        fallback_applied: fallback.is_some(),
                    });
                    match fallback {
                        Some(value) => {
                            values.insert(field.id.clone(), value.clone());
                            Slot::Value(value)
                        }
                        None => Slot::Missing,
                    }
                }
            };
            self.slots[idx] = slot;
        }

        values
    }
}

impl EvaluationContext for CalculationEngine<'_> {
    fn resolve(&self, reference: &Reference) -> FormulaResult<FieldValue> {
        let idx = match self.registry.resolve_index(reference) {
            Resolution::Field(idx) => idx,
            _ => return Err(FormulaError::UnresolvedReference(reference.to_string())),
        };

        if let Some(case) = self.options.case_override {
            if self.registry.compiled(idx).case_selector {
                return Ok(FieldValue::Number(case as f64));
            }
        }

        match &self.slots[idx] {
            Slot::Value(value) => Ok(value.clone()),
            Slot::Missing => Ok(FieldValue::Empty),
            Slot::Invalid(reason) => Err(FormulaError::InvalidInput {
                reference: reference.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    fn case_table(&self, range: &RangeReference) -> FormulaResult<&[FieldValue]> {
        self.registry
            .case_table(range)
            .ok_or_else(|| FormulaError::UnresolvedReference(range.to_string()))
    }

    fn case_override(&self) -> Option<i64> {
        self.options.case_override
    }
}

/// Match form keys to registry fields, case-insensitively
///
/// A key naming the field id beats one naming its alias. Among keys of the
/// same kind the first in key order wins.
fn collect_form_values<'f>(registry: &Registry, form_data: &'f FormData) -> Vec<Option<&'f RawValue>> {
    let mut values = vec![None; registry.len()];
    let mut by_alias = vec![false; registry.len()];

    for (key, raw) in form_data {
        let (idx, via_alias) = match registry.index_of(key) {
            Some(idx) => (idx, false),
            None => match registry.key_index(key) {
                Some(idx) => (idx, true),
                None => {
                    log::debug!("Ignoring form value for unknown field '{}'", key);
                    continue;
                }
            },
        };

        if registry.field_at(idx).is_computed() {
            log::debug!("Ignoring form value for computed field '{}'", key);
            continue;
        }

        match values[idx] {
            None => {}
            Some(_) if by_alias[idx] && !via_alias => {}
            Some(_) => {
                log::debug!(
                    "Ignoring duplicate form value '{}' for field '{}'",
                    key,
                    registry.field_at(idx).id
                );
                continue;
            }
        }
        values[idx] = Some(raw);
        by_alias[idx] = via_alias;
    }

    values
}

/// Coerce a computed value to the field's data type
fn conform(value: FieldValue, data_type: DataType) -> FormulaResult<FieldValue> {
    let mismatch = |value: &FieldValue| FormulaError::TypeMismatch {
        expected: data_type.as_str(),
        actual: value.type_name(),
    };

    match data_type {
        DataType::Number | DataType::Currency | DataType::Percentage => value
            .as_number()
            .map(FieldValue::Number)
            .ok_or_else(|| mismatch(&value)),
        DataType::Date => match value {
            FieldValue::Date(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        DataType::Boolean => value
            .as_bool()
            .map(FieldValue::Boolean)
            .ok_or_else(|| mismatch(&value)),
        DataType::Text => Ok(FieldValue::Text(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use finmodel_core::{FieldDefinition, FieldType, FieldValidation};
    use pretty_assertions::assert_eq;

    fn form(entries: &[(&str, RawValue)]) -> FormData {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn ld_cap_registry() -> Registry {
        let config = CatalogConfig::new()
            .with_field(FieldDefinition::input("field_2125", "LD rate", DataType::Number).with_row(2125))
            .with_field(FieldDefinition::input("field_2126", "LD cap", DataType::Number).with_row(2126))
            .with_field(
                FieldDefinition::named_cell("days", "Days per bank month", DataType::Number, "Days_per_bank_month")
                    .with_default(30),
            )
            .with_field(FieldDefinition::named_cell("thousand", "Thousand", DataType::Number, "thousand").with_default(1000))
            .with_field(
                FieldDefinition::calculated(
                    "field_2128",
                    "Cap",
                    DataType::Number,
                    "= F2125 * F2126 * Days_per_bank_month / thousand",
                )
                .with_default(0),
            )
            .with_field(FieldDefinition::calculated("irr", "IRR", DataType::Number, "=IRR(K1:Q1)"))
            .with_field(FieldDefinition::calculated("double_cap", "Double cap", DataType::Number, "=field_2128 * 2"));
        Registry::load(config).unwrap()
    }

    #[test]
    fn test_arithmetic_over_inputs_and_named_cells() {
        let registry = ld_cap_registry();
        let evaluation = evaluate(
            &registry,
            &form(&[("field_2125", 0.02.into()), ("field_2126", 3.into())]),
            &EvaluationOptions::default(),
        );
        let cap = evaluation.value("field_2128").unwrap().as_number().unwrap();
        assert!((cap - 0.0018).abs() < 1e-12);
        let double = evaluation.value("double_cap").unwrap().as_number().unwrap();
        assert!((double - 0.0036).abs() < 1e-12);
    }

    #[test]
    fn test_unrecognized_formula_is_isolated() {
        let registry = ld_cap_registry();
        let evaluation = registry.evaluate(&form(&[("field_2125", 0.02.into()), ("field_2126", 3.into())]));

        let errors: Vec<_> = evaluation.formula_errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "irr");
        assert!(matches!(errors[0].1, FormulaError::Unrecognized(_)));
        assert!(evaluation.value("irr").is_none());
        assert!(evaluation.value("field_2128").is_some());
    }

    #[test]
    fn test_missing_dependency_uses_default() {
        let registry = ld_cap_registry();
        let evaluation = registry.evaluate(&form(&[("field_2125", 0.02.into())]));

        assert_eq!(evaluation.value("field_2128"), Some(&FieldValue::Number(0.0)));
        let issue = evaluation.issues_for("field_2128").next().unwrap();
        assert!(issue.fallback_applied);
        assert_eq!(
            issue.kind,
            IssueKind::Formula(FormulaError::MissingValue {
                reference: "F2126".into()
            })
        );
        // Dependents see the substituted value
        assert_eq!(evaluation.value("double_cap"), Some(&FieldValue::Number(0.0)));
    }

    #[test]
    fn test_strict_stores_nothing() {
        let registry = ld_cap_registry();
        let evaluation = registry.evaluate_with_options(
            &form(&[("field_2125", 0.02.into())]),
            &EvaluationOptions::new().strict(),
        );

        assert!(evaluation.value("field_2128").is_none());
        assert!(evaluation.value("double_cap").is_none());
        assert!(evaluation.issues.iter().all(|issue| !issue.fallback_applied));
        assert!(matches!(
            evaluation.issues_for("double_cap").next().map(|i| &i.kind),
            Some(IssueKind::Formula(FormulaError::MissingValue { .. }))
        ));
    }

    #[test]
    fn test_invalid_input_propagates() {
        let config = CatalogConfig::new()
            .with_field(
                FieldDefinition::input("field_58", "Total shareholding", DataType::Percentage)
                    .with_row(58)
                    .with_validation(FieldValidation::range(0.0, 100.0)),
            )
            .with_field(
                FieldDefinition::calculated("field_59", "Check", DataType::Number, "= IF( F58 = 100%, 0, 1 )")
                    .with_row(59),
            );
        let registry = Registry::load(config).unwrap();

        let evaluation = registry.evaluate(&form(&[("field_58", 150.into())]));
        assert_eq!(evaluation.validation_errors().count(), 1);
        assert!(matches!(
            evaluation.issues_for("field_59").next().map(|i| &i.kind),
            Some(IssueKind::Formula(FormulaError::InvalidInput { reference, .. })) if reference == "F58"
        ));
        assert!(evaluation.value("field_59").is_none());

        let evaluation = registry.evaluate(&form(&[("field_58", 100.into())]));
        assert!(evaluation.is_clean());
        assert_eq!(evaluation.value("field_59"), Some(&FieldValue::Number(0.0)));
    }

    #[test]
    fn test_input_defaults_option() {
        let config = CatalogConfig::new()
            .with_field(FieldDefinition::input("a", "A", DataType::Number).with_default(4))
            .with_field(FieldDefinition::calculated("b", "B", DataType::Number, "=a * 2"));
        let registry = Registry::load(config).unwrap();

        let evaluation = registry.evaluate(&FormData::new());
        assert_eq!(evaluation.value("b"), Some(&FieldValue::Number(8.0)));

        let evaluation = registry.evaluate_with_options(
            &FormData::new(),
            &EvaluationOptions::new().without_input_defaults(),
        );
        assert!(evaluation.value("b").is_none());
    }

    #[test]
    fn test_form_keys_may_be_aliases() {
        let config = CatalogConfig::new()
            .with_field(
                FieldDefinition::named_cell("live_case", "Live case", DataType::Number, "LiveCase").with_default(0),
            )
            .with_field(FieldDefinition::calculated("next", "Next case", DataType::Number, "=LiveCase + 1"));
        let registry = Registry::load(config).unwrap();

        let evaluation = registry.evaluate(&form(&[("LiveCase", 3.into())]));
        assert_eq!(evaluation.value("next"), Some(&FieldValue::Number(4.0)));
    }

    #[test]
    fn test_type_mismatch_never_falls_back() {
        let config = CatalogConfig::new()
            .with_field(FieldDefinition::input("start", "Start", DataType::Date).with_default("2025-01-01"))
            .with_field(
                FieldDefinition::new("n", "N", FieldType::Formula, DataType::Number)
                    .with_formula("=start + 1")
                    .with_default(0),
            );
        let registry = Registry::load(config).unwrap();

        let evaluation = registry.evaluate(&FormData::new());
        assert!(evaluation.value("n").is_none());
        let issue = evaluation.issues_for("n").next().unwrap();
        assert!(!issue.fallback_applied);
        assert_eq!(
            issue.kind,
            IssueKind::Formula(FormulaError::TypeMismatch {
                expected: "number",
                actual: "date",
            })
        );
    }

    #[test]
    fn test_validate_reports_required_inputs() {
        let config = CatalogConfig::new().with_field(
            FieldDefinition::input("field_10", "Project Name", DataType::Text)
                .with_validation(FieldValidation::new().required()),
        );
        let registry = Registry::load(config).unwrap();

        let errors = validate(&registry, &FormData::new());
        assert_eq!(
            errors,
            vec![ValidationError::new("field_10", ValidationErrorKind::Required)]
        );
        assert!(validate(&registry, &form(&[("field_10", "NJN".into())])).is_empty());
    }

    #[test]
    fn test_form_keys_match_case_insensitively() {
        let registry = ld_cap_registry();
        let evaluation = registry.evaluate(&form(&[
            ("FIELD_2125", 0.02.into()),
            ("Field_2126", 3.into()),
            ("DAYS_PER_BANK_MONTH", 60.into()),
        ]));

        assert!(evaluation.issues_for("field_2128").next().is_none());
        let cap = evaluation.value("field_2128").unwrap().as_number().unwrap();
        assert!((cap - 0.0036).abs() < 1e-12);
    }

    #[test]
    fn test_form_id_key_beats_alias_key() {
        let registry = ld_cap_registry();
        let evaluation = registry.evaluate(&form(&[
            ("field_2125", 0.02.into()),
            ("field_2126", 3.into()),
            ("Days_per_bank_month", 60.into()),
            ("days", 30.into()),
        ]));

        let cap = evaluation.value("field_2128").unwrap().as_number().unwrap();
        assert!((cap - 0.0018).abs() < 1e-12);
    }

    #[test]
    fn test_form_values_for_computed_fields_are_ignored() {
        let registry = ld_cap_registry();
        let evaluation = registry.evaluate(&form(&[
            ("field_2125", 0.02.into()),
            ("field_2126", 3.into()),
            ("FIELD_2128", 99.into()),
        ]));

        let cap = evaluation.value("field_2128").unwrap().as_number().unwrap();
        assert!((cap - 0.0018).abs() < 1e-12);
    }

    #[test]
    fn test_issue_serialization() {
        let issue = FieldIssue {
            field_id: "field_2128".into(),
            kind: IssueKind::Formula(FormulaError::DivisionByZero),
            fallback_applied: false,
        };
        assert_eq!(
            serde_json::to_string(&issue).unwrap(),
            r#"{"field_id":"field_2128","kind":"formula","message":"Division by zero","fallback_applied":false}"#
        );
    }
}
