//! Condition lexer
//!
//! Turns a condition string into a token stream. The token set is closed:
//! anything outside it (bare identifiers, quotes, semicolons, assignment)
//! is a lex error, which is what keeps stored conditions from smuggling
//! code into the evaluator.

use crate::error::{Result, RuleError};
use std::str::FromStr;

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    Boolean(bool),
    /// `{channel/path}` placeholder
    Channel(String),

    // Windowed function keywords (case-sensitive)
    Change,
    Sustained,
    Last,

    // Operators
    Plus,
    Minus,
    Multiply,
    Divide,
    And,
    Or,
    Not,

    // Comparison operators
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Equal,
    NotEqual,

    // Punctuation
    LeftParen,
    RightParen,
    Comma,
}

/// Split a condition string into tokens
pub fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => continue,
            '(' => tokens.push(Token::LeftParen),
            ')' => tokens.push(Token::RightParen),
            ',' => tokens.push(Token::Comma),
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' => tokens.push(Token::Multiply),
            '/' => tokens.push(Token::Divide),
            '>' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::GreaterEqual);
                } else {
                    tokens.push(Token::Greater);
                }
            },
            '<' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::LessEqual);
                } else {
                    tokens.push(Token::Less);
                }
            },
            '=' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Equal);
                } else {
                    return Err(RuleError::ParseError("Invalid operator '='".to_string()));
                }
            },
            '!' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEqual);
                } else {
                    tokens.push(Token::Not);
                }
            },
            '&' => {
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::And);
                } else {
                    return Err(RuleError::ParseError("Invalid operator '&'".to_string()));
                }
            },
            '|' => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::Or);
                } else {
                    return Err(RuleError::ParseError("Invalid operator '|'".to_string()));
                }
            },
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next_ch in chars.by_ref() {
                    if next_ch == '}' {
                        closed = true;
                        break;
                    }
                    if next_ch == '{' {
                        return Err(RuleError::ParseError(
                            "Nested '{' in channel placeholder".to_string(),
                        ));
                    }
                    name.push(next_ch);
                }
                if !closed {
                    return Err(RuleError::ParseError(
                        "Unterminated channel placeholder".to_string(),
                    ));
                }
                if name.trim().is_empty() {
                    return Err(RuleError::ParseError(
                        "Empty channel placeholder".to_string(),
                    ));
                }
                tokens.push(Token::Channel(name));
            },
            '0'..='9' | '.' => {
                let mut number = String::new();
                number.push(ch);

                while let Some(&next_ch) = chars.peek() {
                    if next_ch.is_ascii_digit() || next_ch == '.' {
                        number.push(next_ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                let value = f64::from_str(&number)
                    .map_err(|_| RuleError::ParseError(format!("Invalid number: {}", number)))?;
                tokens.push(Token::Number(value));
            },
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut identifier = String::new();
                identifier.push(ch);

                while let Some(&next_ch) = chars.peek() {
                    if next_ch.is_alphanumeric() || next_ch == '_' {
                        identifier.push(next_ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                // Function keywords are uppercase-only; booleans are
                // case-insensitive to match the payload decoder.
                match identifier.as_str() {
                    "CHANGE" => tokens.push(Token::Change),
                    "SUSTAINED" => tokens.push(Token::Sustained),
                    "LAST" => tokens.push(Token::Last),
                    other if other.eq_ignore_ascii_case("true") => {
                        tokens.push(Token::Boolean(true));
                    },
                    other if other.eq_ignore_ascii_case("false") => {
                        tokens.push(Token::Boolean(false));
                    },
                    other => {
                        return Err(RuleError::ParseError(format!(
                            "Unexpected identifier: '{}'",
                            other
                        )));
                    },
                }
            },
            _ => {
                return Err(RuleError::ParseError(format!("Invalid character: {}", ch)));
            },
        }
    }

    Ok(tokens)
}
