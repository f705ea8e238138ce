//! Formula Abstract Syntax Tree types

use std::fmt;

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    // === Literals ===
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),

    // === References ===
    /// Single cell reference (`F32`, `$F$838`)
    CellRef(CellReference),
    /// Range reference (`$K61:$Q61`)
    RangeRef(RangeReference),
    /// Named cell or field id (`LiveCase`, `Days_per_bank_month`)
    NameRef(String),

    // === Operators ===
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },

    // === Function call ===
    Function { name: String, args: Vec<FormulaExpr> },
}

impl FormulaExpr {
    /// Build a binary operation node
    pub fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> Self {
        FormulaExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Single-value references in source order (ranges excluded)
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<Reference>) {
        match self {
            FormulaExpr::CellRef(cell) => refs.push(Reference::Cell(cell.clone())),
            FormulaExpr::NameRef(name) => refs.push(Reference::Name(name.clone())),
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.collect_references(refs);
                right.collect_references(refs);
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.collect_references(refs),
            FormulaExpr::Function { args, .. } => {
                for arg in args {
                    arg.collect_references(refs);
                }
            }
            // Literals have no references; ranges address static case tables
            FormulaExpr::Number(_)
            | FormulaExpr::String(_)
            | FormulaExpr::Boolean(_)
            | FormulaExpr::RangeRef(_) => {}
        }
    }

    /// Whether the tree only uses numeric literals, references and arithmetic operators
    pub fn is_arithmetic(&self) -> bool {
        match self {
            FormulaExpr::Number(_) | FormulaExpr::CellRef(_) | FormulaExpr::NameRef(_) => true,
            FormulaExpr::BinaryOp { op, left, right } => {
                op.is_arithmetic() && left.is_arithmetic() && right.is_arithmetic()
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.is_arithmetic(),
            _ => false,
        }
    }
}

/// Reference to a single field, either by cell address or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Cell(CellReference),
    Name(String),
}

impl Reference {
    /// Case-insensitive lookup key (`F32`, `LIVECASE`)
    pub fn key(&self) -> String {
        match self {
            Reference::Cell(cell) => format!("{}{}", cell.column, cell.row),
            Reference::Name(name) => name.to_uppercase(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Cell(cell) => write!(f, "{}", cell),
            Reference::Name(name) => f.write_str(name),
        }
    }
}

/// Cell reference such as `F32` or `$F$838`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellReference {
    /// Column letters, uppercase
    pub column: String,
    /// 1-based row number, as written
    pub row: u32,
    pub absolute_column: bool,
    pub absolute_row: bool,
}

impl CellReference {
    /// Parse an A1-style reference; `$` markers are recorded, case is normalized
    pub fn parse(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        let mut i = 0;

        let absolute_column = bytes.first() == Some(&b'$');
        if absolute_column {
            i += 1;
        }

        let col_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        // Columns run A..XFD
        if i == col_start || i - col_start > 3 {
            return None;
        }
        let column = text[col_start..i].to_ascii_uppercase();

        let absolute_row = bytes.get(i) == Some(&b'$');
        if absolute_row {
            i += 1;
        }

        let row_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == row_start || i != bytes.len() {
            return None;
        }
        let row: u32 = text[row_start..].parse().ok()?;
        if row == 0 {
            return None;
        }

        Some(Self {
            column,
            row,
            absolute_column,
            absolute_row,
        })
    }

    /// 0-based column index (A=0, B=1, ..., AA=26)
    pub fn column_index(&self) -> u32 {
        column_index(&self.column)
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column, self.row)
    }
}

/// Convert column letters to a 0-based index
pub fn column_index(letters: &str) -> u32 {
    letters
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + u32::from(b.to_ascii_uppercase() - b'A') + 1)
        .saturating_sub(1)
}

/// Range reference such as `$K61:$Q61`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeReference {
    pub start: CellReference,
    pub end: CellReference,
}

impl RangeReference {
    pub fn new(start: CellReference, end: CellReference) -> Self {
        Self { start, end }
    }

    /// Whether the range spans exactly one row
    pub fn is_single_row(&self) -> bool {
        self.start.row == self.end.row
    }

    /// Number of columns covered
    pub fn width(&self) -> usize {
        let (a, b) = (self.start.column_index(), self.end.column_index());
        (a.max(b) - a.min(b)) as usize + 1
    }
}

impl fmt::Display for RangeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Text
    Concat,
}

impl BinaryOperator {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Power
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterEqual
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Percent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_reference_parse() {
        let cell = CellReference::parse("$f$838").unwrap();
        assert_eq!(cell.column, "F");
        assert_eq!(cell.row, 838);
        assert!(cell.absolute_column && cell.absolute_row);

        assert!(CellReference::parse("LiveCase").is_none());
        assert!(CellReference::parse("F0").is_none());
        assert!(CellReference::parse("YEAR1").is_none());
        assert!(CellReference::parse("F12x").is_none());
    }

    #[test]
    fn test_range_width() {
        let range = RangeReference::new(
            CellReference::parse("$K61").unwrap(),
            CellReference::parse("$Q61").unwrap(),
        );
        assert!(range.is_single_row());
        assert_eq!(range.width(), 7);
        assert_eq!(column_index("AA"), 26);
    }

    #[test]
    fn test_reference_keys() {
        let cell = Reference::Cell(CellReference::parse("$F$32").unwrap());
        assert_eq!(cell.key(), "F32");
        assert_eq!(cell.to_string(), "F32");
        assert_eq!(Reference::Name("LiveCase".into()).key(), "LIVECASE");
    }
}
