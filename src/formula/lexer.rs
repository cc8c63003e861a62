//! Tokenizer for formula text.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::FormulaError;

/// A lexical token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(Decimal),
    Text(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    // Tokens below never appear in a valid formula. They are lexed so the
    // parser can name the rejected construct instead of a generic syntax error.
    Dot,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Assign,
    Colon,
    Semicolon,
    At,
    Eof,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, FormulaError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && next_is_digit(bytes, pos)) {
            while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
                pos += 1;
            }
            if pos < bytes.len() && bytes[pos] == b'.' && next_is_digit(bytes, pos) {
                pos += 1;
                while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
                    pos += 1;
                }
            }
            let literal = &source[start..pos];
            let number = Decimal::from_str(literal).map_err(|e| FormulaError::Syntax {
                message: format!("invalid number '{}': {}", literal, e),
                position: start,
            })?;
            tokens.push(Spanned {
                token: Token::Number(number),
                position: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while pos < bytes.len()
                && ((bytes[pos] as char).is_ascii_alphanumeric() || bytes[pos] == b'_')
            {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(source[start..pos].to_string()),
                position: start,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            pos += 1;
            let mut text = String::new();
            loop {
                match source[pos..].chars().next() {
                    None => {
                        return Err(FormulaError::Syntax {
                            message: "unterminated string literal".to_string(),
                            position: start,
                        });
                    }
                    Some(ch) if ch == c => {
                        pos += 1;
                        break;
                    }
                    Some('\\') => {
                        return Err(FormulaError::Unsafe {
                            reason: "escape sequences in string literals are not allowed"
                                .to_string(),
                        });
                    }
                    Some(ch) => {
                        text.push(ch);
                        pos += ch.len_utf8();
                    }
                }
            }
            tokens.push(Spanned {
                token: Token::Text(text),
                position: start,
            });
            continue;
        }

        let next = bytes.get(pos + 1).map(|b| *b as char);
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            ('=', _) => (Token::Assign, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semicolon, 1),
            ('@', _) => (Token::At, 1),
            _ => {
                let ch = source[pos..].chars().next().unwrap_or(c);
                return Err(FormulaError::Syntax {
                    message: format!("unexpected character '{}'", ch),
                    position: start,
                });
            }
        };
        tokens.push(Spanned {
            token,
            position: start,
        });
        pos += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: source.len(),
    });
    Ok(tokens)
}

fn next_is_digit(bytes: &[u8], pos: usize) -> bool {
    bytes
        .get(pos + 1)
        .is_some_and(|b| (*b as char).is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_tokenize_arithmetic() {
        assert_eq!(
            kinds("salary * 0.10"),
            vec![
                Token::Ident("salary".to_string()),
                Token::Star,
                Token::Number(Decimal::new(10, 2)),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_comparisons() {
        assert_eq!(
            kinds("a <= b != c"),
            vec![
                Token::Ident("a".to_string()),
                Token::Le,
                Token::Ident("b".to_string()),
                Token::NotEq,
                Token::Ident("c".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_attribute_access_keeps_dot() {
        assert_eq!(
            kinds("x.y"),
            vec![
                Token::Ident("x".to_string()),
                Token::Dot,
                Token::Ident("y".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_leading_dot_number() {
        assert_eq!(kinds(".5"), vec![Token::Number(Decimal::new(5, 1)), Token::Eof]);
    }

    #[test]
    fn test_tokenize_string_literals() {
        assert_eq!(
            kinds("'monthly' == \"monthly\""),
            vec![
                Token::Text("monthly".to_string()),
                Token::EqEq,
                Token::Text("monthly".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_syntax_error() {
        let err = tokenize("'abc").unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { position: 0, .. }));
    }

    #[test]
    fn test_unknown_character_is_syntax_error() {
        let err = tokenize("a $ b").unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { position: 2, .. }));
    }
}
