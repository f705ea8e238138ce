//! Formula classification
//!
//! Every formula in the model is one of a small, closed set of operation kinds.
//! [`classify`] parses the text and matches the tree shape against them; anything
//! else becomes [`FormulaKind::Unrecognized`], which is a value, not an error.

use crate::ast::{BinaryOperator, FormulaExpr, RangeReference, Reference};
use crate::parser::parse_formula;
use serde::Serialize;
use std::fmt;

/// Day anchoring for date offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthAnchor {
    /// `EDATE`: same day of month, clamped to the month end
    SameDay,
    /// `EOMONTH`: last day of the target month
    MonthEnd,
}

/// Operation kind with its extracted operands
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaKind {
    /// `INDEX($K61:$Q61, 0, LiveCase + 1)`
    IndexedLookup {
        range: RangeReference,
        selector: Reference,
    },
    /// `EDATE(F32, F37 + F40) - 1`, `EOMONTH(F45, F46 * Months_per_year)`
    DateOffset {
        base: Reference,
        months: FormulaExpr,
        anchor: MonthAnchor,
        day_offset: i64,
    },
    /// `IF(F58 = 100%, 0, 1)`
    Conditional {
        op: BinaryOperator,
        left: FormulaExpr,
        right: FormulaExpr,
        then_branch: FormulaExpr,
        else_branch: FormulaExpr,
    },
    /// `F2125 * F2126 * Days_per_bank_month / thousand`
    Arithmetic(FormulaExpr),
    /// Anything else
    Unrecognized { reason: String },
}

/// Bare kind, used for reporting and histograms
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaKindTag {
    IndexedLookup,
    DateOffset,
    Conditional,
    Arithmetic,
    Unrecognized,
}

impl FormulaKindTag {
    pub fn as_str(self) -> &'static str {
        match self {
            FormulaKindTag::IndexedLookup => "indexed_lookup",
            FormulaKindTag::DateOffset => "date_offset",
            FormulaKindTag::Conditional => "conditional",
            FormulaKindTag::Arithmetic => "arithmetic",
            FormulaKindTag::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for FormulaKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FormulaKind {
    pub fn tag(&self) -> FormulaKindTag {
        match self {
            FormulaKind::IndexedLookup { .. } => FormulaKindTag::IndexedLookup,
            FormulaKind::DateOffset { .. } => FormulaKindTag::DateOffset,
            FormulaKind::Conditional { .. } => FormulaKindTag::Conditional,
            FormulaKind::Arithmetic(_) => FormulaKindTag::Arithmetic,
            FormulaKind::Unrecognized { .. } => FormulaKindTag::Unrecognized,
        }
    }
}

/// Result of classifying a formula string
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: FormulaKind,
    /// Referenced fields in source order, without repeats. Case-table ranges are not operands.
    pub operands: Vec<Reference>,
}

impl Classification {
    pub fn tag(&self) -> FormulaKindTag {
        self.kind.tag()
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self.kind, FormulaKind::Unrecognized { .. })
    }

    fn unrecognized(reason: impl Into<String>) -> Self {
        Self {
            kind: FormulaKind::Unrecognized {
                reason: reason.into(),
            },
            operands: Vec::new(),
        }
    }
}

/// Classify a formula string
///
/// Never fails: unparseable or unsupported formulas classify as
/// [`FormulaKind::Unrecognized`] with a reason.
///
/// # Example
/// ```rust
/// use finmodel_formula::{classify, FormulaKindTag};
///
/// let c = classify("= EDATE( F32, F37 + F40 ) - 1");
/// assert_eq!(c.tag(), FormulaKindTag::DateOffset);
/// assert_eq!(c.operands.len(), 3);
///
/// assert_eq!(classify("=PMT(F1, F2, F3)").tag(), FormulaKindTag::Unrecognized);
/// ```
pub fn classify(formula: &str) -> Classification {
    let expr = match parse_formula(formula) {
        Ok(expr) => expr,
        Err(e) => return Classification::unrecognized(e.to_string()),
    };

    let kind = match classify_expr(expr) {
        Ok(kind) => kind,
        Err(reason) => return Classification::unrecognized(reason),
    };

    let operands = operands_of(&kind);
    Classification { kind, operands }
}

fn classify_expr(expr: FormulaExpr) -> Result<FormulaKind, String> {
    match expr {
        FormulaExpr::Function { name, args } => match name.as_str() {
            "INDEX" => indexed_lookup(args),
            "EDATE" | "EOMONTH" => date_offset(&name, args, 0),
            "IF" => conditional(args),
            _ => Err(format!("unsupported function {}", name)),
        },

        // EDATE(...) - 1 and friends
        FormulaExpr::BinaryOp { op, left, right }
            if matches!(op, BinaryOperator::Add | BinaryOperator::Subtract)
                && matches!(*left, FormulaExpr::Function { .. }) =>
        {
            let days = whole_number(&right)
                .ok_or_else(|| "date offset must be a whole number of days".to_string())?;
            let day_offset = if op == BinaryOperator::Subtract { -days } else { days };
            match *left {
                FormulaExpr::Function { name, args } if name == "EDATE" || name == "EOMONTH" => {
                    date_offset(&name, args, day_offset)
                }
                FormulaExpr::Function { name, .. } => {
                    Err(format!("unsupported function {}", name))
                }
                _ => Err("unsupported expression".into()),
            }
        }

        expr if expr.is_arithmetic() => Ok(FormulaKind::Arithmetic(expr)),

        expr => Err(describe_unsupported(&expr)),
    }
}

fn indexed_lookup(args: Vec<FormulaExpr>) -> Result<FormulaKind, String> {
    let [range_arg, row_arg, selector_expr]: [FormulaExpr; 3] = args
        .try_into()
        .map_err(|args: Vec<FormulaExpr>| format!("INDEX expects 3 arguments, got {}", args.len()))?;

    let range = match range_arg {
        FormulaExpr::RangeRef(range) if range.is_single_row() => range,
        FormulaExpr::RangeRef(range) => {
            return Err(format!("INDEX range {} must span a single row", range))
        }
        _ => return Err("INDEX expects a range as its first argument".into()),
    };

    if whole_number(&row_arg) != Some(0) {
        return Err("INDEX row argument must be 0".into());
    }

    let selector = plus_one_selector(&selector_expr)
        .ok_or_else(|| "INDEX column argument must be <case selector> + 1".to_string())?;

    Ok(FormulaKind::IndexedLookup { range, selector })
}

/// `<ref> + 1` or `1 + <ref>`
fn plus_one_selector(expr: &FormulaExpr) -> Option<Reference> {
    let FormulaExpr::BinaryOp {
        op: BinaryOperator::Add,
        left,
        right,
    } = expr
    else {
        return None;
    };
    match (reference_of(left), reference_of(right)) {
        (Some(reference), None) if whole_number(right) == Some(1) => Some(reference),
        (None, Some(reference)) if whole_number(left) == Some(1) => Some(reference),
        _ => None,
    }
}

fn date_offset(name: &str, args: Vec<FormulaExpr>, day_offset: i64) -> Result<FormulaKind, String> {
    let [base, months]: [FormulaExpr; 2] = args
        .try_into()
        .map_err(|args: Vec<FormulaExpr>| format!("{} expects 2 arguments, got {}", name, args.len()))?;

    let base = reference_of(&base)
        .ok_or_else(|| format!("{} base date must be a field reference", name))?;
    if !months.is_arithmetic() {
        return Err(format!("{} months must be an arithmetic expression", name));
    }

    let anchor = if name == "EOMONTH" {
        MonthAnchor::MonthEnd
    } else {
        MonthAnchor::SameDay
    };

    Ok(FormulaKind::DateOffset {
        base,
        months,
        anchor,
        day_offset,
    })
}

fn conditional(args: Vec<FormulaExpr>) -> Result<FormulaKind, String> {
    let [condition, then_branch, else_branch]: [FormulaExpr; 3] = args
        .try_into()
        .map_err(|args: Vec<FormulaExpr>| format!("IF expects 3 arguments, got {}", args.len()))?;

    let FormulaExpr::BinaryOp { op, left, right } = condition else {
        return Err("IF condition must be a comparison".into());
    };
    if !op.is_comparison() {
        return Err("IF condition must be a comparison".into());
    }
    if !(left.is_arithmetic() && right.is_arithmetic()) {
        return Err("IF condition must compare arithmetic expressions".into());
    }
    if !(then_branch.is_arithmetic() && else_branch.is_arithmetic()) {
        return Err("IF branches must be arithmetic expressions".into());
    }

    Ok(FormulaKind::Conditional {
        op,
        left: *left,
        right: *right,
        then_branch,
        else_branch,
    })
}

fn reference_of(expr: &FormulaExpr) -> Option<Reference> {
    match expr {
        FormulaExpr::CellRef(cell) => Some(Reference::Cell(cell.clone())),
        FormulaExpr::NameRef(name) => Some(Reference::Name(name.clone())),
        _ => None,
    }
}

fn whole_number(expr: &FormulaExpr) -> Option<i64> {
    match expr {
        FormulaExpr::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(*n as i64),
        _ => None,
    }
}

fn describe_unsupported(expr: &FormulaExpr) -> String {
    match expr {
        FormulaExpr::String(_) => "text literals are not supported".into(),
        FormulaExpr::Boolean(_) => "boolean literals are not supported".into(),
        FormulaExpr::RangeRef(range) => format!("range {} outside INDEX", range),
        FormulaExpr::BinaryOp { op, left, right } => {
            if !op.is_arithmetic() {
                format!("operator {:?} outside IF condition", op)
            } else if !left.is_arithmetic() {
                describe_unsupported(left)
            } else {
                describe_unsupported(right)
            }
        }
        FormulaExpr::UnaryOp { operand, .. } => describe_unsupported(operand),
        FormulaExpr::Function { name, .. } => format!("unsupported function {}", name),
        _ => "unsupported expression".into(),
    }
}

fn operands_of(kind: &FormulaKind) -> Vec<Reference> {
    let refs = match kind {
        FormulaKind::IndexedLookup { selector, .. } => vec![selector.clone()],
        FormulaKind::DateOffset { base, months, .. } => {
            let mut refs = vec![base.clone()];
            refs.extend(months.references());
            refs
        }
        FormulaKind::Conditional {
            left,
            right,
            then_branch,
            else_branch,
            ..
        } => [left, right, then_branch, else_branch]
            .into_iter()
            .flat_map(|e| e.references())
            .collect(),
        FormulaKind::Arithmetic(expr) => expr.references(),
        FormulaKind::Unrecognized { .. } => Vec::new(),
    };

    let mut seen = Vec::with_capacity(refs.len());
    let mut operands = Vec::with_capacity(refs.len());
    for reference in refs {
        let key = reference.key();
        if !seen.contains(&key) {
            seen.push(key);
            operands.push(reference);
        }
    }
    operands
}
