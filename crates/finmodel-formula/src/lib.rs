//! # finmodel-formula
//!
//! Formula parser and evaluator for finmodel.
//!
//! This crate provides:
//! - Formula parsing (text → AST)
//! - Classification into the supported operation kinds (`INDEX`, `EDATE`/`EOMONTH`, `IF`, arithmetic)
//! - Evaluation (classified formula → value) against a pluggable [`EvaluationContext`]
//! - Dependency tracking for calculation order
//!
//! ## Example
//!
//! ```rust
//! use finmodel_core::FieldValue;
//! use finmodel_formula::{classify, evaluate, SimpleContext};
//!
//! let formula = classify("= IF( F58 = 100%, 0, 1 )");
//! let ctx = SimpleContext::new().with_value("F58", 0.8);
//! assert_eq!(evaluate(&formula, &ctx).unwrap(), FieldValue::Number(1.0));
//! ```

pub mod ast;
pub mod classifier;
pub mod date;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod parser;

pub use ast::{
    BinaryOperator, CellReference, FormulaExpr, RangeReference, Reference, UnaryOperator,
};
pub use classifier::{classify, Classification, FormulaKind, FormulaKindTag, MonthAnchor};
pub use dependency::DependencyGraph;
pub use error::{FormulaError, FormulaResult};
pub use evaluator::{evaluate, evaluate_expr, EvaluationContext, SimpleContext};
pub use parser::parse_formula;
