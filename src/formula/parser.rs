//! Recursive-descent parser for the formula grammar.
//!
//! Precedence, lowest first:
//!
//! ```text
//! conditional  :=  or_expr [ "if" or_expr "else" conditional ]
//! or_expr      :=  and_expr { "or" and_expr }
//! and_expr     :=  not_expr { "and" not_expr }
//! not_expr     :=  "not" not_expr | comparison
//! comparison   :=  additive { ("==" | "!=" | "<" | "<=" | ">" | ">=") additive }
//! additive     :=  term { ("+" | "-") term }
//! term         :=  unary { ("*" | "/" | "%") unary }
//! unary        :=  ("-" | "+") unary | primary
//! primary      :=  number | text | "True" | "False" | name | call | "(" conditional ")"
//! call         :=  ("min" | "max" | "abs" | "round") "(" conditional { "," conditional } ")"
//! ```
//!
//! Constructs outside this grammar that would give a general-purpose
//! interpreter its power (attribute access, subscripts, arbitrary calls,
//! comprehensions, assignment, statements) are reported as
//! [`FormulaError::Unsafe`] rather than as plain syntax errors.

use super::ast::{BinaryOp, CompareOp, Expr, Function, UnaryOp};
use super::lexer::{Spanned, Token, tokenize};
use super::value::Value;
use crate::error::FormulaError;

/// Longest formula text accepted, in bytes.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;

/// Deepest nesting of sub-expressions accepted.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Statement keywords and builtins that never belong in a formula.
const FORBIDDEN_WORDS: &[&str] = &[
    "import", "from", "lambda", "def", "class", "for", "while", "in", "is", "yield", "await",
    "async", "global", "nonlocal", "del", "with", "return", "assert", "raise", "try", "except",
    "finally", "pass", "break", "continue", "exec", "eval",
];

/// Parses formula text into an [`Expr`].
///
/// # Example
///
/// ```
/// use payroll_engine::formula::parse;
///
/// let expr = parse("max(gross - exempt, 0) * 0.15").unwrap();
/// assert!(expr.names().contains("gross"));
///
/// assert!(parse("gross.__class__").is_err());
/// ```
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    if source.len() > MAX_EXPRESSION_LENGTH {
        return Err(FormulaError::Unsafe {
            reason: format!(
                "expression longer than {} characters",
                MAX_EXPRESSION_LENGTH
            ),
        });
    }

    let tokens = tokenize(source)?;
    if matches!(tokens.first().map(|t| &t.token), Some(Token::Eof)) {
        return Err(FormulaError::Syntax {
            message: "empty expression".to_string(),
            position: 0,
        });
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(w) if w == word)
    }

    fn enter(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(FormulaError::Unsafe {
                reason: format!("expression nested deeper than {}", MAX_NESTING_DEPTH),
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Builds the error for the current token when `expected` was wanted.
    fn unexpected(&self, expected: &str) -> FormulaError {
        if let Some(reason) = forbidden_reason(self.peek()) {
            return FormulaError::Unsafe { reason };
        }
        let found = match self.peek() {
            Token::Eof => "end of expression".to_string(),
            Token::Ident(word) => format!("'{}'", word),
            Token::Number(n) => format!("number {}", n),
            Token::Text(t) => format!("text {:?}", t),
            other => format!("{:?}", other),
        };
        FormulaError::Syntax {
            message: format!("expected {}, found {}", expected, found),
            position: self.position(),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, FormulaError> {
        self.enter()?;
        let result = self.parse_conditional();
        self.leave();
        result
    }

    fn parse_conditional(&mut self) -> Result<Expr, FormulaError> {
        let value = self.parse_or()?;
        if !self.is_word("if") {
            return Ok(value);
        }
        self.advance();
        let condition = self.parse_or()?;
        if !self.is_word("else") {
            return Err(self.unexpected("'else'"));
        }
        self.advance();
        let if_false = self.parse_expression()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            if_true: Box::new(value),
            if_false: Box::new(if_false),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_and()?;
        while self.is_word("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_not()?;
        while self.is_word("and") {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, FormulaError> {
        if self.is_word("not") {
            self.advance();
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expr::Not(Box::new(operand?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, FormulaError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Token::EqEq => CompareOp::Eq,
                Token::NotEq => CompareOp::NotEq,
                Token::Lt => CompareOp::Lt,
                Token::Le => CompareOp::Le,
                Token::Gt => CompareOp::Gt,
                Token::Ge => CompareOp::Ge,
                _ => break,
            };
            self.advance();
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                Token::DoubleStar | Token::DoubleSlash => return Err(self.unexpected("operator")),
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, FormulaError> {
        let expr = self.parse_primary()?;
        match self.peek() {
            Token::Dot | Token::LBracket => Err(self.unexpected("operator")),
            Token::LParen => Err(FormulaError::Unsafe {
                reason: "only whitelisted functions may be called".to_string(),
            }),
            _ => Ok(expr),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Text(t) => {
                self.advance();
                Ok(Expr::Literal(Value::Text(t)))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                if self.peek() != &Token::RParen {
                    return Err(self.unexpected("')'"));
                }
                self.advance();
                Ok(inner)
            }
            Token::Ident(word) => self.parse_name(word),
            _ => Err(self.unexpected("a value")),
        }
    }

    fn parse_name(&mut self, word: String) -> Result<Expr, FormulaError> {
        match word.as_str() {
            "True" | "true" => {
                self.advance();
                return Ok(Expr::Literal(Value::Bool(true)));
            }
            "False" | "false" => {
                self.advance();
                return Ok(Expr::Literal(Value::Bool(false)));
            }
            "and" | "or" | "if" | "else" | "not" => return Err(self.unexpected("a value")),
            _ => {}
        }
        if let Some(reason) = forbidden_reason(self.peek()) {
            return Err(FormulaError::Unsafe { reason });
        }

        self.advance();
        if self.peek() != &Token::LParen {
            return Ok(Expr::Name(word));
        }

        let function = Function::from_name(&word).ok_or_else(|| FormulaError::Unsafe {
            reason: format!("call to '{}' is not allowed", word),
        })?;
        let call_position = self.position();
        self.advance();

        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                args.push(self.parse_expression()?);
                match self.peek() {
                    Token::Comma => {
                        self.advance();
                    }
                    Token::RParen => break,
                    _ => return Err(self.unexpected("',' or ')'")),
                }
            }
        }
        self.advance();

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(FormulaError::Syntax {
                message: format!(
                    "{}() takes {} argument(s), {} given",
                    function,
                    if min == max {
                        min.to_string()
                    } else if max == usize::MAX {
                        format!("at least {}", min)
                    } else {
                        format!("{} to {}", min, max)
                    },
                    args.len()
                ),
                position: call_position,
            });
        }
        Ok(Expr::Call { function, args })
    }
}

/// Returns why a token is forbidden outright, if it is.
fn forbidden_reason(token: &Token) -> Option<String> {
    let reason = match token {
        Token::Dot => "attribute access is not allowed",
        Token::LBracket | Token::RBracket => "subscripts and list displays are not allowed",
        Token::LBrace | Token::RBrace => "dict and set displays are not allowed",
        Token::Assign => "assignment is not allowed",
        Token::Semicolon => "multiple statements are not allowed",
        Token::Colon => "slices, lambdas and blocks are not allowed",
        Token::At => "decorators and matrix operators are not allowed",
        Token::DoubleStar => "exponentiation is not allowed",
        Token::DoubleSlash => "floor division is not allowed",
        Token::Ident(word) if word.starts_with("__") => {
            return Some(format!("dunder name '{}' is not allowed", word));
        }
        Token::Ident(word) if FORBIDDEN_WORDS.contains(&word.as_str()) => {
            return Some(format!("keyword '{}' is not allowed", word));
        }
        _ => return None,
    };
    Some(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn assert_unsafe(source: &str) {
        match parse(source) {
            Err(FormulaError::Unsafe { .. }) => {}
            other => panic!("Expected Unsafe for {:?}, got {:?}", source, other),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::Literal(Value::Number(Decimal::from(1)))),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(Expr::Literal(Value::Number(Decimal::from(2)))),
                    right: Box::new(Expr::Literal(Value::Number(Decimal::from(3)))),
                }),
            }
        );
    }

    #[test]
    fn test_parse_conditional() {
        let expr = parse("a if a > b else b").unwrap();
        assert!(matches!(expr, Expr::Conditional { .. }));
        assert_eq!(
            expr.names().into_iter().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_parse_chained_comparison() {
        let expr = parse("0 <= x < 10").unwrap();
        match expr {
            Expr::Compare { rest, .. } => assert_eq!(rest.len(), 2),
            other => panic!("Expected Compare, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_whitelisted_calls() {
        assert!(matches!(
            parse("round(max(a, b, 0), 2)").unwrap(),
            Expr::Call {
                function: Function::Round,
                ..
            }
        ));
    }

    #[test]
    fn test_attribute_access_is_unsafe() {
        assert_unsafe("salary.__class__");
        assert_unsafe("employee.name");
        assert_unsafe("(a + b).real");
    }

    #[test]
    fn test_non_whitelisted_calls_are_unsafe() {
        assert_unsafe("__import__('os')");
        assert_unsafe("open('/etc/passwd')");
        assert_unsafe("getattr(a, 'b')");
        assert_unsafe("exec('x = 1')");
        assert_unsafe("min(a, b)(c)");
    }

    #[test]
    fn test_statements_and_comprehensions_are_unsafe() {
        assert_unsafe("import os");
        assert_unsafe("lambda: 1");
        assert_unsafe("[x for x in items]");
        assert_unsafe("(x for x in items)");
        assert_unsafe("x = 1");
        assert_unsafe("a; b");
        assert_unsafe("{'a': 1}");
        assert_unsafe("rates[0]");
        assert_unsafe("a ** 1000000");
        assert_unsafe("round(a, ndigits=2)");
    }

    #[test]
    fn test_deep_nesting_is_unsafe() {
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_unsafe(&source);
        assert_unsafe(&"-".repeat(200));
    }

    #[test]
    fn test_overlong_expression_is_unsafe() {
        let source = vec!["a"; 3000].join("+");
        assert_unsafe(&source);
    }

    #[test]
    fn test_syntax_errors_are_not_unsafe() {
        assert!(matches!(parse(""), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("(a + b"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("a +"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("a if b"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("abs(a, b)"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("max()"), Err(FormulaError::Syntax { .. })));
    }
}
