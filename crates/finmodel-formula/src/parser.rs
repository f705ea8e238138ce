//! Formula parser
//!
//! A recursive descent parser for spreadsheet formulas with proper operator precedence.

use crate::ast::{BinaryOperator, CellReference, FormulaExpr, RangeReference, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};

/// Nesting limit for parentheses, function calls and prefix operators
const MAX_DEPTH: usize = 128;

/// Limit on operands and operators in one formula. Bounds the height of
/// operator chains like `1+1+...`, which nest without parentheses.
pub const MAX_NODES: usize = 1024;

/// Parse a formula string into an AST
///
/// The leading `=` is optional and surrounding whitespace is ignored.
///
/// # Example
/// ```rust
/// use finmodel_formula::parse_formula;
///
/// let ast = parse_formula("= EDATE( F32, F37 + F40 ) - 1").unwrap();
/// let ast = parse_formula("=INDEX( $K61:$Q61, 0, LiveCase + 1 )").unwrap();
/// let ast = parse_formula("F2125 * F2126 * Days_per_bank_month / thousand").unwrap();
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<FormulaExpr> {
    let formula = formula.trim();
    let formula = formula.strip_prefix('=').unwrap_or(formula);

    if formula.trim().is_empty() {
        return Err(FormulaError::Parse("Empty formula".into()));
    }

    let mut parser = FormulaParser::new(formula);
    let expr = parser.parse_expression()?;

    // Make sure we consumed all input
    if !matches!(parser.current_token(), Token::Eof) {
        return Err(FormulaError::Parse(format!(
            "Unexpected {:?} after expression",
            parser.current_token()
        )));
    }

    Ok(expr)
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Number(f64),
    String(String),
    Boolean(bool),

    // Identifiers and references
    Identifier(String), // Function name or named cell
    CellRef(String),    // Cell reference like F32, $K61

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Ampersand,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Colon,
    Comma,

    // Delimiters
    LeftParen,
    RightParen,

    // Lexical problems, reported when the parser reaches them
    Invalid(String),

    // End of input
    Eof,
}

/// Formula parser
struct FormulaParser<'a> {
    input: &'a str,
    pos: usize,
    current_token: Token,
    depth: usize,
    nodes: usize,
}

impl<'a> FormulaParser<'a> {
    fn new(input: &'a str) -> Self {
        let mut parser = Self {
            input,
            pos: 0,
            current_token: Token::Eof,
            depth: 0,
            nodes: 0,
        };
        parser.advance_token();
        parser
    }

    // === Token scanning ===

    fn advance_token(&mut self) {
        self.current_token = self.scan_token();
    }

    fn scan_token(&mut self) -> Token {
        self.skip_whitespace();

        let c = match self.peek_char() {
            Some(c) => c,
            None => return Token::Eof,
        };

        // Single-character tokens
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '%' => Some(Token::Percent),
            '&' => Some(Token::Ampersand),
            ':' => Some(Token::Colon),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '=' => Some(Token::Equal),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return token;
        }

        // Two-character operators
        if c == '<' {
            self.advance();
            if self.peek_char() == Some('=') {
                self.advance();
                return Token::LessEqual;
            } else if self.peek_char() == Some('>') {
                self.advance();
                return Token::NotEqual;
            }
            return Token::LessThan;
        }

        if c == '>' {
            self.advance();
            if self.peek_char() == Some('=') {
                self.advance();
                return Token::GreaterEqual;
            }
            return Token::GreaterThan;
        }

        // String literal
        if c == '"' {
            return self.scan_string();
        }

        // Number
        if c.is_ascii_digit()
            || (c == '.' && self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()))
        {
            return self.scan_number();
        }

        // Identifier, cell reference, or boolean
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            return self.scan_identifier_or_ref();
        }

        // Unknown character
        self.advance();
        Token::Invalid(format!("Unexpected character '{}'", c))
    }

    fn scan_string(&mut self) -> Token {
        self.advance(); // Skip opening quote

        let mut s = String::new();
        loop {
            match self.peek_char() {
                Some('"') => {
                    // Check for escaped quote ("")
                    if self.peek_char_at(1) == Some('"') {
                        s.push('"');
                        self.advance();
                        self.advance();
                    } else {
                        self.advance();
                        return Token::String(s);
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
                None => return Token::Invalid("Unterminated string literal".into()),
            }
        }
    }

    fn scan_number(&mut self) -> Token {
        let start = self.pos;

        // Integer part
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        // Decimal part
        if self.peek_char() == Some('.') {
            self.advance();
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Exponent part
        if self.peek_char().map_or(false, |c| c == 'e' || c == 'E') {
            self.advance();
            if self.peek_char().map_or(false, |c| c == '+' || c == '-') {
                self.advance();
            }
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let num_str = &self.input[start..self.pos];
        match num_str.parse::<f64>() {
            Ok(num) if num.is_finite() => Token::Number(num),
            _ => Token::Invalid(format!("Invalid number '{}'", num_str)),
        }
    }

    fn scan_identifier_or_ref(&mut self) -> Token {
        let start = self.pos;

        // Scan identifier/reference
        while self.peek_char().map_or(false, |c| {
            c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
        }) {
            self.advance();
        }

        let text = &self.input[start..self.pos];
        let followed_by_paren = self.next_non_space() == Some('(');

        // Check for boolean literals (but not if followed by '(' - then it's a function call)
        let upper = text.to_uppercase();
        if upper == "TRUE" && !followed_by_paren {
            return Token::Boolean(true);
        }
        if upper == "FALSE" && !followed_by_paren {
            return Token::Boolean(false);
        }

        // A cell reference followed by '(' is a function call (e.g. LOG10(100))
        if CellReference::parse(text).is_some() && !followed_by_paren {
            return Token::CellRef(text.to_string());
        }

        if text.contains('$') {
            return Token::Invalid(format!("Invalid reference '{}'", text));
        }

        // Otherwise it's an identifier (function name or named cell)
        Token::Identifier(text.to_string())
    }

    // === Helper methods ===

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn next_non_space(&self) -> Option<char> {
        self.input[self.pos..].chars().find(|c| !c.is_whitespace())
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn current_token(&self) -> &Token {
        &self.current_token
    }

    fn consume(&mut self) -> Token {
        let token = std::mem::replace(&mut self.current_token, Token::Eof);
        self.advance_token();
        token
    }

    fn expect(&mut self, expected: &Token) -> FormulaResult<()> {
        if self.current_token() == expected {
            self.consume();
            Ok(())
        } else {
            Err(FormulaError::Parse(format!(
                "Expected {:?}, got {:?}",
                expected,
                self.current_token()
            )))
        }
    }

    fn enter(&mut self) -> FormulaResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::Parse("Formula is nested too deeply".into()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn count_node(&mut self) -> FormulaResult<()> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(FormulaError::Parse(format!(
                "Formula has more than {} terms",
                MAX_NODES
            )));
        }
        Ok(())
    }

    // === Expression parsing with precedence ===
    // Precedence (lowest to highest):
    // 1. Comparison: =, <>, <, <=, >, >=
    // 2. Concatenation: &
    // 3. Addition/Subtraction: +, -
    // 4. Multiplication/Division: *, /
    // 5. Exponentiation: ^
    // 6. Unary: -, %
    // 7. Range: :
    // 8. Primary: literals, references, function calls, parentheses

    fn parse_expression(&mut self) -> FormulaResult<FormulaExpr> {
        self.enter()?;
        let expr = self.parse_comparison();
        self.leave();
        expr
    }

    fn parse_comparison(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match self.current_token() {
                Token::Equal => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.consume();
            self.count_node()?;
            let right = self.parse_concatenation()?;
            left = FormulaExpr::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;

        while matches!(self.current_token(), Token::Ampersand) {
            self.consume();
            self.count_node()?;
            let right = self.parse_additive()?;
            left = FormulaExpr::binary(BinaryOperator::Concat, left, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.consume();
            self.count_node()?;
            let right = self.parse_multiplicative()?;
            left = FormulaExpr::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_exponent()?;

        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };

            self.consume();
            self.count_node()?;
            let right = self.parse_exponent()?;
            left = FormulaExpr::binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_exponent(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_unary()?;

        if matches!(self.current_token(), Token::Caret) {
            self.consume();
            self.enter()?;
            let right = self.parse_exponent(); // Right associative
            self.leave();
            return Ok(FormulaExpr::binary(BinaryOperator::Power, left, right?));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        // Prefix unary minus
        if matches!(self.current_token(), Token::Minus) {
            self.consume();
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand?),
            });
        }

        // Prefix plus (no-op)
        if matches!(self.current_token(), Token::Plus) {
            self.consume();
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return operand;
        }

        // Parse primary, then check for postfix percent
        let mut expr = self.parse_range()?;

        while matches!(self.current_token(), Token::Percent) {
            self.consume();
            self.count_node()?;
            expr = FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                operand: Box::new(expr),
            };
        }

        Ok(expr)
    }

    fn parse_range(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_primary()?;

        // Check for range operator (:)
        if matches!(self.current_token(), Token::Colon) {
            self.consume();
            let right = self.parse_primary()?;

            if let (FormulaExpr::CellRef(start), FormulaExpr::CellRef(end)) = (left, right) {
                return Ok(FormulaExpr::RangeRef(RangeReference::new(start, end)));
            }

            return Err(FormulaError::Parse(
                "Range bounds must be cell references".into(),
            ));
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        self.count_node()?;
        match self.consume() {
            Token::Number(n) => Ok(FormulaExpr::Number(n)),

            Token::String(s) => Ok(FormulaExpr::String(s)),

            Token::Boolean(b) => Ok(FormulaExpr::Boolean(b)),

            Token::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }

            Token::CellRef(ref_str) => CellReference::parse(&ref_str)
                .map(FormulaExpr::CellRef)
                .ok_or_else(|| FormulaError::Parse(format!("Invalid cell reference '{}'", ref_str))),

            Token::Identifier(name) => {
                // Check if it's a function call
                if matches!(self.current_token(), Token::LeftParen) {
                    self.parse_function_call(name)
                } else {
                    Ok(FormulaExpr::NameRef(name))
                }
            }

            Token::Invalid(message) => Err(FormulaError::Parse(message)),

            Token::Eof => Err(FormulaError::Parse("Unexpected end of formula".into())),

            other => Err(FormulaError::Parse(format!("Unexpected token: {:?}", other))),
        }
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        self.expect(&Token::LeftParen)?;

        let mut args = Vec::new();

        // Parse arguments
        if !matches!(self.current_token(), Token::RightParen) {
            args.push(self.parse_expression()?);

            while matches!(self.current_token(), Token::Comma) {
                self.consume();
                args.push(self.parse_expression()?);
            }
        }

        self.expect(&Token::RightParen)?;

        Ok(FormulaExpr::Function {
            name: name.to_uppercase(),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cell(text: &str) -> FormulaExpr {
        FormulaExpr::CellRef(CellReference::parse(text).unwrap())
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_formula("=42").unwrap(), FormulaExpr::Number(42.0));
        assert_eq!(parse_formula("3.14").unwrap(), FormulaExpr::Number(3.14));
        assert_eq!(parse_formula("= 1e3").unwrap(), FormulaExpr::Number(1000.0));
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let ast = parse_formula("=1+2*3").unwrap();
        // Should parse as 1+(2*3) due to precedence
        if let FormulaExpr::BinaryOp { op, left, right } = ast {
            assert_eq!(op, BinaryOperator::Add);
            assert_eq!(*left, FormulaExpr::Number(1.0));
            assert!(matches!(
                *right,
                FormulaExpr::BinaryOp {
                    op: BinaryOperator::Multiply,
                    ..
                }
            ));
        } else {
            panic!("Expected BinaryOp");
        }
    }

    #[test]
    fn test_parse_references() {
        let ast = parse_formula("= F2125 * F2126 * Days_per_bank_month / thousand").unwrap();
        let refs: Vec<String> = ast.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["F2125", "F2126", "Days_per_bank_month", "thousand"]);
    }

    #[test]
    fn test_parse_index() {
        let ast = parse_formula("= INDEX( $K61:$Q61, 0, LiveCase + 1 )").unwrap();
        if let FormulaExpr::Function { name, args } = ast {
            assert_eq!(name, "INDEX");
            assert_eq!(args.len(), 3);
            assert!(matches!(&args[0], FormulaExpr::RangeRef(r) if r.width() == 7));
            assert_eq!(
                args[2],
                FormulaExpr::binary(
                    BinaryOperator::Add,
                    FormulaExpr::NameRef("LiveCase".into()),
                    FormulaExpr::Number(1.0)
                )
            );
        } else {
            panic!("Expected Function");
        }
    }

    #[test]
    fn test_parse_edate_with_offset() {
        let ast = parse_formula("= EDATE( F32, F37 + F40 ) - 1").unwrap();
        if let FormulaExpr::BinaryOp { op, left, right } = ast {
            assert_eq!(op, BinaryOperator::Subtract);
            assert!(matches!(*left, FormulaExpr::Function { ref name, .. } if name == "EDATE"));
            assert_eq!(*right, FormulaExpr::Number(1.0));
        } else {
            panic!("Expected BinaryOp");
        }
    }

    #[test]
    fn test_parse_percent_comparison() {
        let ast = parse_formula("= IF( F58 = 100%, 0, 1 )").unwrap();
        if let FormulaExpr::Function { args, .. } = ast {
            assert_eq!(
                args[0],
                FormulaExpr::binary(
                    BinaryOperator::Equal,
                    cell("F58"),
                    FormulaExpr::UnaryOp {
                        op: UnaryOperator::Percent,
                        operand: Box::new(FormulaExpr::Number(100.0)),
                    }
                )
            );
        } else {
            panic!("Expected Function");
        }
    }

    #[test]
    fn test_parse_not_equal() {
        let ast = parse_formula("= IF( ( F1214 + F1219 + F1224 ) <> 1, 1, 0 )").unwrap();
        if let FormulaExpr::Function { args, .. } = ast {
            assert!(matches!(
                args[0],
                FormulaExpr::BinaryOp {
                    op: BinaryOperator::NotEqual,
                    ..
                }
            ));
        } else {
            panic!("Expected Function");
        }
    }

    #[test]
    fn test_parse_unary() {
        let ast = parse_formula("=-5").unwrap();
        assert!(matches!(
            ast,
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                ..
            }
        ));
    }

    #[test]
    fn test_power_right_associative() {
        let ast = parse_formula("2^3^2").unwrap();
        if let FormulaExpr::BinaryOp { op, right, .. } = ast {
            assert_eq!(op, BinaryOperator::Power);
            assert!(matches!(
                *right,
                FormulaExpr::BinaryOp {
                    op: BinaryOperator::Power,
                    ..
                }
            ));
        } else {
            panic!("Expected BinaryOp");
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_formula("").is_err());
        assert!(parse_formula("=").is_err());
        assert!(parse_formula("=1+").is_err());
        assert!(parse_formula("=(1+2").is_err());
        assert!(parse_formula("=1 ? 2").is_err());
        assert!(parse_formula("=\"open").is_err());
        assert!(parse_formula("=F1:5").is_err());
        assert!(parse_formula("=SUM(Civil Works + Equipment)").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let formula = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_formula(&formula).is_err());
        let formula = format!("{}1", "-".repeat(500));
        assert!(parse_formula(&formula).is_err());
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let formula = format!("={}", vec!["1"; 50_000].join("+"));
        assert!(matches!(parse_formula(&formula), Err(FormulaError::Parse(_))));

        let formula = format!("={}", vec!["F1"; 50_000].join("*"));
        assert!(parse_formula(&formula).is_err());

        let formula = format!("=1{}", "%".repeat(50_000));
        assert!(parse_formula(&formula).is_err());

        // Realistic chains stay well inside the limit
        let formula = format!("={}", vec!["F1"; 200].join("+"));
        assert!(parse_formula(&formula).is_ok());
    }
}
