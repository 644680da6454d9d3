//! Evaluator for the canonical C-like condition syntax.
//!
//! Supports integer literals (decimal or `0x` hex), dotted identifiers,
//! string literals, `!`, unary `-`, `&`, comparisons, `&&` and `||` with the
//! usual C precedence. Comparisons and logical operators yield `1` or `0`.

use std::collections::BTreeSet;
use std::fmt;

/// Parsed canonical expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(i128),
    /// Dotted field access path resolved at evaluation time.
    Variable(String),
    Str(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub struct ParseError {
    msg: String,
}

impl ParseError {
    fn new<S: Into<String>>(msg: S) -> Self {
        Self { msg: msg.into() }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone)]
pub enum EvalError {
    UnknownVariable(String),
    /// String operands cannot be evaluated over an integer resolver.
    StringOperand(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnknownVariable(var) => write!(f, "unknown variable {var}"),
            EvalError::StringOperand(text) => write!(f, "string operand \"{text}\" is not supported"),
        }
    }
}

impl std::error::Error for EvalError {}

pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse_or()?;
    if !matches!(parser.lookahead, Token::End) {
        return Err(ParseError::new("unexpected trailing tokens"));
    }
    Ok(expr)
}

/// Evaluate `ast`, asking `vars` for the value of every variable it reads.
///
/// `&&` and `||` short-circuit, so unused branches never query `vars`.
pub fn evaluate(
    ast: &Expr,
    vars: &mut dyn FnMut(&str) -> Result<i128, EvalError>,
) -> Result<i128, EvalError> {
    match ast {
        Expr::Number(value) => Ok(*value),
        Expr::Variable(name) => vars(name),
        Expr::Str(text) => Err(EvalError::StringOperand(text.clone())),
        Expr::Unary { op, expr } => {
            let inner = evaluate(expr, vars)?;
            Ok(match op {
                UnaryOp::Not => i128::from(inner == 0),
                UnaryOp::Neg => -inner,
            })
        }
        Expr::Binary { op, left, right } => {
            let lhs = evaluate(left, vars)?;
            match op {
                BinaryOp::Or if lhs != 0 => return Ok(1),
                BinaryOp::And if lhs == 0 => return Ok(0),
                _ => {}
            }
            let rhs = evaluate(right, vars)?;
            Ok(match op {
                BinaryOp::Or | BinaryOp::And => i128::from(rhs != 0),
                BinaryOp::BitAnd => lhs & rhs,
                BinaryOp::Eq => i128::from(lhs == rhs),
                BinaryOp::Ne => i128::from(lhs != rhs),
                BinaryOp::Lt => i128::from(lhs < rhs),
                BinaryOp::Le => i128::from(lhs <= rhs),
                BinaryOp::Gt => i128::from(lhs > rhs),
                BinaryOp::Ge => i128::from(lhs >= rhs),
            })
        }
    }
}

pub fn collect_identifiers(ast: &Expr, out: &mut BTreeSet<String>) {
    match ast {
        Expr::Number(_) | Expr::Str(_) => {}
        Expr::Variable(name) => {
            out.insert(name.clone());
        }
        Expr::Unary { expr, .. } => collect_identifiers(expr, out),
        Expr::Binary { left, right, .. } => {
            collect_identifiers(left, out);
            collect_identifiers(right, out);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i128),
    Ident(String),
    Str(String),
    OrOr,
    AndAnd,
    Amp,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,
    Minus,
    LParen,
    RParen,
    End,
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_ws();
        let Some(&byte) = self.input.get(self.pos) else {
            return Ok(Token::End);
        };
        let next = self.input.get(self.pos + 1).copied();
        let (token, width) = match (byte, next) {
            (b'0'..=b'9', _) => return self.lex_number(),
            (b'a'..=b'z' | b'A'..=b'Z' | b'_', _) => return self.lex_ident(),
            (b'"', _) => return self.lex_string(),
            (b'|', Some(b'|')) => (Token::OrOr, 2),
            (b'&', Some(b'&')) => (Token::AndAnd, 2),
            (b'&', _) => (Token::Amp, 1),
            (b'=', Some(b'=')) => (Token::EqEq, 2),
            (b'!', Some(b'=')) => (Token::NotEq, 2),
            (b'!', _) => (Token::Bang, 1),
            (b'<', Some(b'=')) => (Token::Le, 2),
            (b'<', _) => (Token::Lt, 1),
            (b'>', Some(b'=')) => (Token::Ge, 2),
            (b'>', _) => (Token::Gt, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            _ => {
                return Err(ParseError::new(format!(
                    "unexpected character '{}'",
                    byte as char
                )))
            }
        };
        self.pos += width;
        Ok(token)
    }

    fn skip_ws(&mut self) {
        while let Some(&byte) = self.input.get(self.pos) {
            if byte.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        while let Some(&byte) = self.input.get(self.pos) {
            if byte.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| ParseError::new("invalid UTF-8 in number"))?;
        let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => i128::from_str_radix(hex, 16),
            None => text.parse::<i128>(),
        };
        value
            .map(Token::Number)
            .map_err(|_| ParseError::new(format!("invalid number literal '{text}'")))
    }

    fn lex_ident(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(&byte) = self.input.get(self.pos) {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| ParseError::new("invalid UTF-8 in identifier"))?;
        if text.ends_with('.') || text.contains("..") {
            return Err(ParseError::new(format!("malformed access path '{text}'")));
        }
        Ok(Token::Ident(text.to_string()))
    }

    fn lex_string(&mut self) -> Result<Token, ParseError> {
        self.pos += 1;
        let start = self.pos;
        while let Some(&byte) = self.input.get(self.pos) {
            if byte == b'"' {
                let text = String::from_utf8_lossy(&self.input[start..self.pos]).to_string();
                self.pos += 1;
                return Ok(Token::Str(text));
            }
            self.pos += 1;
        }
        Err(ParseError::new("unterminated string literal"))
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Parser { lexer, lookahead })
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_and()?;
        while matches!(self.lookahead, Token::OrOr) {
            self.advance()?;
            let rhs = self.parse_and()?;
            node = binary(BinaryOp::Or, node, rhs);
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_bit_and()?;
        while matches!(self.lookahead, Token::AndAnd) {
            self.advance()?;
            let rhs = self.parse_bit_and()?;
            node = binary(BinaryOp::And, node, rhs);
        }
        Ok(node)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_equality()?;
        while matches!(self.lookahead, Token::Amp) {
            self.advance()?;
            let rhs = self.parse_equality()?;
            node = binary(BinaryOp::BitAnd, node, rhs);
        }
        Ok(node)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_relational()?;
        loop {
            let op = match self.lookahead {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_relational()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.lookahead {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_unary()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.lookahead.clone() {
            Token::Bang => {
                self.advance()?;
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            Token::Minus => {
                self.advance()?;
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                })
            }
            Token::Number(value) => {
                self.advance()?;
                Ok(Expr::Number(value))
            }
            Token::Ident(name) => {
                self.advance()?;
                Ok(Expr::Variable(name))
            }
            Token::Str(text) => {
                self.advance()?;
                Ok(Expr::Str(text))
            }
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_or()?;
                if !matches!(self.lookahead, Token::RParen) {
                    return Err(ParseError::new("missing closing ')'"));
                }
                self.advance()?;
                Ok(expr)
            }
            Token::End => Err(ParseError::new("unexpected end of expression")),
            other => Err(ParseError::new(format!("unexpected token {other:?}"))),
        }
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.lookahead = self.lexer.next_token()?;
        Ok(())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_with(expr: &str, vars: &[(&str, i128)]) -> i128 {
        let ast = parse_expression(expr).expect("parse expression");
        let mut lookup = |name: &str| {
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| *value)
                .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
        };
        evaluate(&ast, &mut lookup).expect("eval")
    }

    #[test]
    fn comparisons_and_logic() {
        let expr = "(mode == 1) && ((hdr.len > 0x10) || (kind != -2))";
        assert_eq!(eval_with(expr, &[("mode", 1), ("hdr.len", 17), ("kind", -2)]), 1);
        assert_eq!(eval_with(expr, &[("mode", 1), ("hdr.len", 16), ("kind", -2)]), 0);
        assert_eq!(eval_with(expr, &[("mode", 1), ("hdr.len", 3), ("kind", 7)]), 1);
    }

    #[test]
    fn bit_tests_follow_c_precedence() {
        assert_eq!(eval_with("((flags & 0x4) != 0)", &[("flags", 5)]), 1);
        assert_eq!(eval_with("((flags & 0x4) == 0)", &[("flags", 5)]), 0);
        // `==` binds tighter than `&`.
        assert_eq!(eval_with("flags & 4 == 4", &[("flags", 1)]), 1);
        assert_eq!(eval_with("!(a < b)", &[("a", 1), ("b", 2)]), 0);
    }

    #[test]
    fn short_circuit_skips_unknown_variables() {
        assert_eq!(eval_with("(a == 0) || (missing == 1)", &[("a", 0)]), 1);
        let ast = parse_expression("(a == 1) && (missing == 1)").expect("parse");
        let mut vars = |name: &str| match name {
            "a" => Ok(1),
            _ => Err(EvalError::UnknownVariable(name.to_string())),
        };
        let err = evaluate(&ast, &mut vars).expect_err("unknown variable");
        assert!(matches!(err, EvalError::UnknownVariable(ref v) if v == "missing"));
    }

    #[test]
    fn identifiers_and_errors() {
        let ast = parse_expression("(a.b == 1) && (c >= a.b)").expect("parse");
        let mut names = BTreeSet::new();
        collect_identifiers(&ast, &mut names);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), ["a.b", "c"]);
        assert!(parse_expression("(a == 1").is_err());
        assert!(parse_expression("a == 1 )").is_err());
        assert!(parse_expression("a. == 1").is_err());
        assert!(parse_expression("a = 1").is_err());
    }
}
