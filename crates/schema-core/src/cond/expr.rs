//! Parser for single condition expressions such as `$mode = 1`.

use tracing::trace;

use super::{CmpOp, CondError, CondExpr, FieldPath, Literal, Operand};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(FieldPath),
    Number(i128),
    Ident(String),
    Str(String),
    Op(CmpOp),
    Bang,
}

/// Parse one expression: `$a op b`, `b op $a`, `$a op $b` or a bare
/// (optionally negated) `$set.bit` reference.
pub fn parse_expr(input: &str) -> Result<CondExpr, CondError> {
    let tokens = Lexer::new(input).tokenize()?;
    trace!(expr = input, ?tokens, "condition tokens");
    let syntax = |message: &str| CondError::Syntax {
        expr: input.to_string(),
        message: message.to_string(),
    };
    match tokens.as_slice() {
        [] => Err(syntax("empty expression")),
        [Token::Path(path)] => Ok(CondExpr::BitTest {
            path: path.clone(),
            negated: false,
        }),
        [Token::Bang, Token::Path(path)] => Ok(CondExpr::BitTest {
            path: path.clone(),
            negated: true,
        }),
        [lhs, Token::Op(op), rhs] => {
            let lhs = operand(lhs).ok_or_else(|| syntax("expected an operand before the operator"))?;
            let rhs = operand(rhs).ok_or_else(|| syntax("expected an operand after the operator"))?;
            match (lhs, rhs) {
                (Operand::Field(left), right) => Ok(CondExpr::Compare {
                    left,
                    op: *op,
                    right,
                }),
                (Operand::Literal(value), Operand::Field(left)) => Ok(CondExpr::Compare {
                    left,
                    op: op.flipped(),
                    right: Operand::Literal(value),
                }),
                (Operand::Literal(_), Operand::Literal(_)) => {
                    Err(syntax("at least one operand must reference a field with '$'"))
                }
            }
        }
        _ => Err(syntax("expected '$field op value' or a bare '$field.bit'")),
    }
}

fn operand(token: &Token) -> Option<Operand> {
    match token {
        Token::Path(path) => Some(Operand::Field(path.clone())),
        Token::Number(value) => Some(Operand::Literal(Literal::Number(*value))),
        Token::Ident(name) => Some(Operand::Literal(Literal::Name(name.clone()))),
        Token::Str(text) => Some(Operand::Literal(Literal::Str(text.clone()))),
        Token::Op(_) | Token::Bang => None,
    }
}

struct Lexer<'a> {
    text: &'a str,
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            input: text.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> CondError {
        CondError::Syntax {
            expr: self.text.to_string(),
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, CondError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ws();
            let Some(&byte) = self.input.get(self.pos) else {
                return Ok(tokens);
            };
            let token = match byte {
                b'$' => {
                    self.pos += 1;
                    Token::Path(self.lex_path()?)
                }
                b'0'..=b'9' | b'-' => self.lex_number()?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => Token::Ident(self.lex_word().to_string()),
                b'\'' | b'"' => self.lex_string(byte)?,
                b'&' | b'|' if self.peek(1) == Some(byte) => {
                    return Err(CondError::InlineCombinator(self.text.to_string()))
                }
                b'!' if self.peek(1) == Some(b'=') => {
                    self.pos += 2;
                    Token::Op(CmpOp::Ne)
                }
                b'!' => {
                    self.pos += 1;
                    Token::Bang
                }
                b'=' => {
                    self.pos += if self.peek(1) == Some(b'=') { 2 } else { 1 };
                    Token::Op(CmpOp::Eq)
                }
                b'<' | b'>' => {
                    let or_equal = self.peek(1) == Some(b'=');
                    self.pos += if or_equal { 2 } else { 1 };
                    Token::Op(match (byte, or_equal) {
                        (b'<', false) => CmpOp::Lt,
                        (b'<', true) => CmpOp::Le,
                        (_, false) => CmpOp::Gt,
                        (_, true) => CmpOp::Ge,
                    })
                }
                other => return Err(self.error(format!("unexpected character '{}'", other as char))),
            };
            tokens.push(token);
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn skip_ws(&mut self) {
        while self.input.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn lex_word(&mut self) -> &'a str {
        let text = self.text;
        let start = self.pos;
        while self
            .input
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }
        &text[start..self.pos]
    }

    fn lex_path(&mut self) -> Result<FieldPath, CondError> {
        let mut segments = Vec::new();
        loop {
            let word = self.lex_word();
            if !crate::props::is_identifier(word) {
                return Err(self.error("expected a field name after '$' or '.'"));
            }
            segments.push(word.to_string());
            if self.peek(0) == Some(b'.') {
                self.pos += 1;
            } else {
                return Ok(FieldPath::new(segments));
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token, CondError> {
        let start = self.pos;
        if self.peek(0) == Some(b'-') {
            self.pos += 1;
        }
        self.lex_word();
        let text = &self.text[start..self.pos];
        if self.peek(0) == Some(b'.') {
            return Err(self.error(format!(
                "fractional number after '{text}'; conditions compare integer values only"
            )));
        }
        crate::props::parse_number(text)
            .map(Token::Number)
            .ok_or_else(|| self.error(format!("invalid number '{text}'")))
    }

    fn lex_string(&mut self, quote: u8) -> Result<Token, CondError> {
        self.pos += 1;
        let start = self.pos;
        while let Some(&byte) = self.input.get(self.pos) {
            if byte == quote {
                let text = self.text[start..self.pos].to_string();
                if text.contains('"') {
                    return Err(self.error("string literals cannot contain '\"'"));
                }
                self.pos += 1;
                return Ok(Token::Str(text));
            }
            self.pos += 1;
        }
        Err(self.error("unterminated string literal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> FieldPath {
        FieldPath::new(text.split('.').map(str::to_string).collect())
    }

    #[test]
    fn legacy_equal_maps_to_equality() {
        let expr = parse_expr("$mode = 1").expect("parse");
        assert_eq!(
            expr,
            CondExpr::Compare {
                left: path("mode"),
                op: CmpOp::Eq,
                right: Operand::Literal(Literal::Number(1)),
            }
        );
        let same = parse_expr("$mode==1").expect("parse");
        assert_eq!(expr, same);
    }

    #[test]
    fn literal_on_the_left_is_flipped() {
        let expr = parse_expr("0x10 < $hdr.len").expect("parse");
        assert_eq!(
            expr,
            CondExpr::Compare {
                left: path("hdr.len"),
                op: CmpOp::Gt,
                right: Operand::Literal(Literal::Number(16)),
            }
        );
    }

    #[test]
    fn fractional_literals_are_named() {
        let err = parse_expr("$gain > 1.5").expect_err("fraction");
        assert!(
            matches!(err, CondError::Syntax { ref message, .. } if message.contains("fractional")),
            "{err}"
        );
    }

    #[test]
    fn double_quote_inside_single_quotes_is_rejected() {
        assert!(parse_expr("$label = 'ab'").is_ok());
        let err = parse_expr(r#"$label = 'a"b'"#).expect_err("quote");
        assert!(matches!(err, CondError::Syntax { .. }), "{err}");
    }

    #[test]
    fn bit_tests() {
        assert_eq!(
            parse_expr("!$flags.ack").expect("parse"),
            CondExpr::BitTest {
                path: path("flags.ack"),
                negated: true,
            }
        );
        assert!(matches!(
            parse_expr(" $flags.ack ").expect("parse"),
            CondExpr::BitTest { negated: false, .. }
        ));
    }

    #[test]
    fn field_to_field_and_names() {
        assert!(matches!(
            parse_expr("$a != $b").expect("parse"),
            CondExpr::Compare {
                op: CmpOp::Ne,
                right: Operand::Field(_),
                ..
            }
        ));
        assert!(matches!(
            parse_expr("$kind >= Big").expect("parse"),
            CondExpr::Compare {
                right: Operand::Literal(Literal::Name(_)),
                ..
            }
        ));
        assert!(matches!(
            parse_expr("$label = 'ab c'").expect("parse"),
            CondExpr::Compare {
                right: Operand::Literal(Literal::Str(_)),
                ..
            }
        ));
    }

    #[test]
    fn rejects_inline_combinators_and_garbage() {
        assert!(matches!(
            parse_expr("$a = 1 && $b = 2"),
            Err(CondError::InlineCombinator(_))
        ));
        assert!(matches!(parse_expr("1 = 2"), Err(CondError::Syntax { .. })));
        assert!(matches!(parse_expr("$a ="), Err(CondError::Syntax { .. })));
        assert!(matches!(parse_expr("$ = 1"), Err(CondError::Syntax { .. })));
        assert!(matches!(parse_expr("$a = 'x"), Err(CondError::Syntax { .. })));
        assert!(matches!(parse_expr(""), Err(CondError::Syntax { .. })));
    }
}
