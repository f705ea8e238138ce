//! Formula evaluator
//!
//! Evaluates classified formulas to produce values. Reference lookups go through
//! an [`EvaluationContext`], so the evaluator itself has no notion of registries,
//! form data or evaluation order.

use crate::ast::{BinaryOperator, FormulaExpr, RangeReference, Reference, UnaryOperator};
use crate::classifier::{Classification, FormulaKind, MonthAnchor};
use crate::date;
use crate::error::{FormulaError, FormulaResult};
use ahash::AHashMap;
use finmodel_core::FieldValue;
use std::cmp::Ordering;

/// Tolerance for numeric equality in comparisons
pub const EQUALITY_TOLERANCE: f64 = 1e-9;

/// Source of reference values during evaluation
pub trait EvaluationContext {
    /// Current value of a referenced field; [`FieldValue::Empty`] when it has none
    fn resolve(&self, reference: &Reference) -> FormulaResult<FieldValue>;

    /// Pre-resolved case table addressed by an `INDEX` range
    fn case_table(&self, range: &RangeReference) -> FormulaResult<&[FieldValue]>;

    /// Case index forced for every case selector, if any
    fn case_override(&self) -> Option<i64> {
        None
    }
}

/// In-memory context keyed by reference name, for tests and one-off evaluation
#[derive(Debug, Default, Clone)]
pub struct SimpleContext {
    values: AHashMap<String, FieldValue>,
    tables: AHashMap<u32, Vec<FieldValue>>,
    case: Option<i64>,
}

impl SimpleContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value to a name or cell reference (`"F32"`, `"LiveCase"`)
    pub fn with_value(mut self, reference: &str, value: impl Into<FieldValue>) -> Self {
        self.values.insert(reference.to_uppercase(), value.into());
        self
    }

    /// Bind the case table of a model row
    pub fn with_case_table(mut self, row: u32, table: Vec<FieldValue>) -> Self {
        self.tables.insert(row, table);
        self
    }

    pub fn with_case_override(mut self, case: i64) -> Self {
        self.case = Some(case);
        self
    }
}

impl EvaluationContext for SimpleContext {
    fn resolve(&self, reference: &Reference) -> FormulaResult<FieldValue> {
        self.values
            .get(&reference.key())
            .cloned()
            .ok_or_else(|| FormulaError::UnresolvedReference(reference.to_string()))
    }

    fn case_table(&self, range: &RangeReference) -> FormulaResult<&[FieldValue]> {
        self.tables
            .get(&range.start.row)
            .map(Vec::as_slice)
            .ok_or_else(|| FormulaError::UnresolvedReference(range.to_string()))
    }

    fn case_override(&self) -> Option<i64> {
        self.case
    }
}

/// Evaluate a classified formula
pub fn evaluate(
    classification: &Classification,
    ctx: &dyn EvaluationContext,
) -> FormulaResult<FieldValue> {
    match &classification.kind {
        FormulaKind::IndexedLookup { range, selector } => {
            let table = ctx.case_table(range)?;
            let index = match ctx.case_override() {
                Some(case) => case,
                None => case_index(selector, ctx)?,
            };
            usize::try_from(index)
                .ok()
                .and_then(|i| table.get(i))
                .cloned()
                .ok_or_else(|| FormulaError::CaseOutOfRange {
                    selector: selector.to_string(),
                    index,
                    len: table.len(),
                })
        }

        FormulaKind::DateOffset {
            base,
            months,
            anchor,
            day_offset,
        } => {
            let base = resolve_present(base, ctx)?;
            let start = base.as_date().ok_or_else(|| FormulaError::TypeMismatch {
                expected: "date",
                actual: base.type_name(),
            })?;
            let months = date::whole_months(to_number(&evaluate_expr(months, ctx)?)?)?;
            let shifted = match anchor {
                MonthAnchor::SameDay => date::edate(start, months)?,
                MonthAnchor::MonthEnd => date::eomonth(start, months)?,
            };
            Ok(FieldValue::Date(date::add_days(shifted, *day_offset)?))
        }

        FormulaKind::Conditional {
            op,
            left,
            right,
            then_branch,
            else_branch,
        } => {
            let l = evaluate_expr(left, ctx)?;
            let r = evaluate_expr(right, ctx)?;
            if compare(*op, &l, &r)? {
                evaluate_expr(then_branch, ctx)
            } else {
                evaluate_expr(else_branch, ctx)
            }
        }

        FormulaKind::Arithmetic(expr) => evaluate_expr(expr, ctx),

        FormulaKind::Unrecognized { reason } => Err(FormulaError::Unrecognized(reason.clone())),
    }
}

/// Evaluate an expression tree
///
/// Functions are not evaluated here; they only appear inside classified shapes.
pub fn evaluate_expr(expr: &FormulaExpr, ctx: &dyn EvaluationContext) -> FormulaResult<FieldValue> {
    match expr {
        // === Literals ===
        FormulaExpr::Number(n) => Ok(FieldValue::Number(*n)),
        FormulaExpr::String(s) => Ok(FieldValue::Text(s.clone())),
        FormulaExpr::Boolean(b) => Ok(FieldValue::Boolean(*b)),

        // === References ===
        FormulaExpr::CellRef(cell) => resolve_present(&Reference::Cell(cell.clone()), ctx),
        FormulaExpr::NameRef(name) => resolve_present(&Reference::Name(name.clone()), ctx),
        FormulaExpr::RangeRef(range) => Err(FormulaError::Evaluation(format!(
            "Range {} cannot be used as a value",
            range
        ))),

        // === Operators ===
        FormulaExpr::BinaryOp { op, left, right } => {
            let l = evaluate_expr(left, ctx)?;
            let r = evaluate_expr(right, ctx)?;
            evaluate_binary_op(*op, &l, &r)
        }

        FormulaExpr::UnaryOp { op, operand } => {
            let n = to_number(&evaluate_expr(operand, ctx)?)?;
            match op {
                UnaryOperator::Negate => Ok(FieldValue::Number(-n)),
                UnaryOperator::Percent => Ok(FieldValue::Number(n / 100.0)),
            }
        }

        // === Functions ===
        FormulaExpr::Function { name, .. } => Err(FormulaError::Unrecognized(format!(
            "function {} outside a supported formula shape",
            name
        ))),
    }
}

fn resolve_present(reference: &Reference, ctx: &dyn EvaluationContext) -> FormulaResult<FieldValue> {
    match ctx.resolve(reference)? {
        FieldValue::Empty => Err(FormulaError::MissingValue {
            reference: reference.to_string(),
        }),
        value => Ok(value),
    }
}

fn case_index(selector: &Reference, ctx: &dyn EvaluationContext) -> FormulaResult<i64> {
    let value = to_number(&resolve_present(selector, ctx)?)?;
    if value.fract() != 0.0 || value.abs() >= 1e15 {
        return Err(FormulaError::InvalidCaseSelector {
            selector: selector.to_string(),
            value,
        });
    }
    Ok(value as i64)
}

fn to_number(value: &FieldValue) -> FormulaResult<f64> {
    value.as_number().ok_or_else(|| FormulaError::TypeMismatch {
        expected: "number",
        actual: value.type_name(),
    })
}

fn finite(n: f64) -> FormulaResult<FieldValue> {
    if n.is_finite() {
        Ok(FieldValue::Number(n))
    } else {
        Err(FormulaError::Evaluation("Result is not a finite number".into()))
    }
}

fn whole_days(n: f64) -> FormulaResult<i64> {
    if !n.is_finite() || n.abs() >= 1e9 {
        return Err(FormulaError::InvalidDate(format!("day offset {} is out of range", n)));
    }
    Ok(n.trunc() as i64)
}

/// Evaluate a binary operation
fn evaluate_binary_op(
    op: BinaryOperator,
    left: &FieldValue,
    right: &FieldValue,
) -> FormulaResult<FieldValue> {
    use FieldValue::{Date, Number};

    match op {
        // Date arithmetic: date ± days, days + date, date - date
        BinaryOperator::Add => match (left, right) {
            (Date(d), other) | (other, Date(d)) if !matches!(other, Date(_)) => {
                let days = whole_days(to_number(other)?)?;
                Ok(Date(date::add_days(*d, days)?))
            }
            _ => finite(to_number(left)? + to_number(right)?),
        },
        BinaryOperator::Subtract => match (left, right) {
            (Date(a), Date(b)) => Ok(Number(date::days_between(*b, *a) as f64)),
            (Date(d), other) => {
                let days = whole_days(to_number(other)?)?;
                Ok(Date(date::add_days(*d, -days)?))
            }
            _ => finite(to_number(left)? - to_number(right)?),
        },
        BinaryOperator::Multiply => finite(to_number(left)? * to_number(right)?),
        BinaryOperator::Divide => {
            let l = to_number(left)?;
            let r = to_number(right)?;
            if r == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            finite(l / r)
        }
        BinaryOperator::Power => finite(to_number(left)?.powf(to_number(right)?)),

        // Comparison operators
        BinaryOperator::Equal
        | BinaryOperator::NotEqual
        | BinaryOperator::LessThan
        | BinaryOperator::LessEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterEqual => compare(op, left, right).map(FieldValue::Boolean),

        // Concatenation
        BinaryOperator::Concat => Ok(FieldValue::Text(format!("{}{}", left, right))),
    }
}

/// Apply a comparison operator
///
/// Numbers are equal within [`EQUALITY_TOLERANCE`]; text compares case-insensitively.
pub fn compare(op: BinaryOperator, left: &FieldValue, right: &FieldValue) -> FormulaResult<bool> {
    let ordering = match (left, right) {
        (FieldValue::Date(l), FieldValue::Date(r)) => l.cmp(r),
        (FieldValue::Text(l), FieldValue::Text(r)) => l.to_lowercase().cmp(&r.to_lowercase()),
        (FieldValue::Boolean(l), FieldValue::Boolean(r)) => l.cmp(r),
        _ => {
            let l = to_number(left)?;
            let r = match right.as_number() {
                Some(r) => r,
                None => {
                    return Err(FormulaError::TypeMismatch {
                        expected: left.type_name(),
                        actual: right.type_name(),
                    })
                }
            };
            if (l - r).abs() <= EQUALITY_TOLERANCE {
                Ordering::Equal
            } else if l < r {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    };

    Ok(match op {
        BinaryOperator::Equal => ordering == Ordering::Equal,
        BinaryOperator::NotEqual => ordering != Ordering::Equal,
        BinaryOperator::LessThan => ordering == Ordering::Less,
        BinaryOperator::LessEqual => ordering != Ordering::Greater,
        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
        BinaryOperator::GreaterEqual => ordering != Ordering::Less,
        _ => {
            return Err(FormulaError::Evaluation(format!(
                "{:?} is not a comparison",
                op
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn eval(formula: &str, ctx: &SimpleContext) -> FormulaResult<FieldValue> {
        evaluate(&classify(formula), ctx)
    }

    fn numbers(values: &[f64]) -> Vec<FieldValue> {
        values.iter().copied().map(FieldValue::Number).collect()
    }

    #[test]
    fn test_indexed_lookup() {
        let ctx = SimpleContext::new()
            .with_value("LiveCase", 2.0)
            .with_case_table(61, numbers(&[10.0, 20.0, 30.0, 40.0]));
        assert_eq!(
            eval("=INDEX($K61:$N61, 0, LiveCase + 1)", &ctx).unwrap(),
            FieldValue::Number(30.0)
        );
    }

    #[test]
    fn test_indexed_lookup_out_of_range() {
        let ctx = SimpleContext::new()
            .with_value("LiveCase", 4.0)
            .with_case_table(61, numbers(&[10.0, 20.0, 30.0, 40.0]));
        assert_eq!(
            eval("=INDEX($K61:$N61, 0, LiveCase + 1)", &ctx),
            Err(FormulaError::CaseOutOfRange {
                selector: "LiveCase".into(),
                index: 4,
                len: 4,
            })
        );

        let ctx = ctx.with_value("LiveCase", -1.0);
        assert!(matches!(
            eval("=INDEX($K61:$N61, 0, LiveCase + 1)", &ctx),
            Err(FormulaError::CaseOutOfRange { index: -1, .. })
        ));

        let ctx = ctx.with_value("LiveCase", 1.5);
        assert!(matches!(
            eval("=INDEX($K61:$N61, 0, LiveCase + 1)", &ctx),
            Err(FormulaError::InvalidCaseSelector { .. })
        ));
    }

    #[test]
    fn test_case_override_wins() {
        let ctx = SimpleContext::new()
            .with_value("LiveCase", 0.0)
            .with_case_table(61, numbers(&[10.0, 20.0, 30.0]))
            .with_case_override(1);
        assert_eq!(
            eval("=INDEX($K61:$M61, 0, LiveCase + 1)", &ctx).unwrap(),
            FieldValue::Number(20.0)
        );
    }

    #[test]
    fn test_date_offset() {
        let ctx = SimpleContext::new()
            .with_value("F32", ymd(2025, 1, 1))
            .with_value("F37", 4.0)
            .with_value("F40", 2.0);
        assert_eq!(
            eval("= EDATE( F32, F37 + F40 ) - 1", &ctx).unwrap(),
            FieldValue::Date(ymd(2025, 6, 30))
        );

        let ctx = SimpleContext::new()
            .with_value("F32", ymd(2024, 1, 31))
            .with_value("F37", 1.0);
        assert_eq!(
            eval("=EDATE(F32, F37)", &ctx).unwrap(),
            FieldValue::Date(ymd(2024, 2, 29))
        );
    }

    #[test]
    fn test_date_offset_truncates_months() {
        let ctx = SimpleContext::new()
            .with_value("F32", ymd(2025, 1, 15))
            .with_value("F37", 2.9);
        assert_eq!(
            eval("=EDATE(F32, F37)", &ctx).unwrap(),
            FieldValue::Date(ymd(2025, 3, 15))
        );
    }

    #[test]
    fn test_eomonth() {
        let ctx = SimpleContext::new()
            .with_value("F45", ymd(2028, 1, 31))
            .with_value("F46", 25.0)
            .with_value("Months_per_year", 12.0);
        assert_eq!(
            eval("= EOMONTH( F45, F46 * Months_per_year)", &ctx).unwrap(),
            FieldValue::Date(ymd(2053, 1, 31))
        );
    }

    #[test]
    fn test_date_offset_requires_date() {
        let ctx = SimpleContext::new()
            .with_value("F32", 45000.0)
            .with_value("F37", 1.0);
        assert_eq!(
            eval("=EDATE(F32, F37)", &ctx),
            Err(FormulaError::TypeMismatch {
                expected: "date",
                actual: "number",
            })
        );
    }

    #[test]
    fn test_conditional() {
        let ctx = SimpleContext::new().with_value("F58", 1.0);
        assert_eq!(
            eval("= IF( F58 = 100%, 0, 1 )", &ctx).unwrap(),
            FieldValue::Number(0.0)
        );

        let ctx = SimpleContext::new().with_value("F58", 0.8);
        assert_eq!(
            eval("= IF( F58 = 100%, 0, 1 )", &ctx).unwrap(),
            FieldValue::Number(1.0)
        );
    }

    #[test]
    fn test_conditional_tolerance() {
        let ctx = SimpleContext::new()
            .with_value("F1214", 0.1)
            .with_value("F1219", 0.2)
            .with_value("F1224", 0.7);
        assert_eq!(
            eval("= IF( ( F1214 + F1219 + F1224 ) <> 1, 1, 0 )", &ctx).unwrap(),
            FieldValue::Number(0.0)
        );
    }

    #[test]
    fn test_arithmetic() {
        let ctx = SimpleContext::new()
            .with_value("F2125", 0.02)
            .with_value("F2126", 3.0)
            .with_value("Days_per_bank_month", 30.0)
            .with_value("thousand", 1000.0);
        let result = eval("= F2125 * F2126 * Days_per_bank_month / thousand", &ctx)
            .unwrap()
            .as_number()
            .unwrap();
        assert!((result - 0.0018).abs() < 1e-12);
    }

    #[test]
    fn test_division_by_zero() {
        let ctx = SimpleContext::new().with_value("F1", 5.0).with_value("F2", 0.0);
        assert_eq!(eval("=F1 / F2", &ctx), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn test_missing_value() {
        let ctx = SimpleContext::new()
            .with_value("F1", 5.0)
            .with_value("F2", FieldValue::Empty);
        assert_eq!(
            eval("=F1 + F2", &ctx),
            Err(FormulaError::MissingValue {
                reference: "F2".into()
            })
        );
    }

    #[test]
    fn test_date_arithmetic() {
        let ctx = SimpleContext::new()
            .with_value("F1", ymd(2025, 3, 1))
            .with_value("F2", ymd(2025, 1, 1));
        assert_eq!(eval("=F1 - F2", &ctx).unwrap(), FieldValue::Number(59.0));
        assert_eq!(
            eval("=F1 + 30", &ctx).unwrap(),
            FieldValue::Date(ymd(2025, 3, 31))
        );
        assert_eq!(
            eval("=F2 - 1", &ctx).unwrap(),
            FieldValue::Date(ymd(2024, 12, 31))
        );
        assert!(matches!(
            eval("=F1 * 2", &ctx),
            Err(FormulaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unrecognized_is_an_error() {
        let ctx = SimpleContext::new();
        assert!(matches!(
            eval("=PMT(F1, F2, F3)", &ctx),
            Err(FormulaError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_compare_text_and_dates() {
        assert!(compare(
            BinaryOperator::Equal,
            &FieldValue::from("Solar"),
            &FieldValue::from("SOLAR")
        )
        .unwrap());
        assert!(compare(
            BinaryOperator::LessThan,
            &FieldValue::Date(ymd(2025, 1, 1)),
            &FieldValue::Date(ymd(2025, 1, 2))
        )
        .unwrap());
        assert!(compare(
            BinaryOperator::Equal,
            &FieldValue::from("x"),
            &FieldValue::Number(1.0)
        )
        .is_err());
    }
}
