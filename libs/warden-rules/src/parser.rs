//! Condition parser
//!
//! Recursive descent over the token stream, lowest precedence first:
//! `||`, `&&`, equality, ordering, additive, multiplicative, unary,
//! primary. Windowed function calls are parsed as primaries with a
//! fixed argument shape.

use crate::ast::{ArithmeticOp, ChangeDirection, CompareOp, Expr, LogicOp, UnaryOp};
use crate::error::{Result, RuleError};
use crate::token::{tokenize, Token};
use warden_model::TypedValue;

/// Parse a condition string into an expression tree
pub fn parse(expression: &str) -> Result<Expr> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err(RuleError::ParseError("Empty condition".to_string()));
    }

    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(tokens);
    let parsed = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(parsed)
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;

        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            expr = Expr::Logic {
                op: LogicOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_equality()?;

        while self.match_token(&Token::And) {
            let right = self.parse_equality()?;
            expr = Expr::Logic {
                op: LogicOp::And,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut expr = self.parse_comparison()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Equal => CompareOp::Eq,
                Token::NotEqual => CompareOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            expr = Expr::Compare {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut expr = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Greater => CompareOp::Gt,
                Token::GreaterEqual => CompareOp::Gte,
                Token::Less => CompareOp::Lt,
                Token::LessEqual => CompareOp::Lte,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = Expr::Compare {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut expr = self.parse_factor()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            expr = Expr::Arithmetic {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Multiply => ArithmeticOp::Mul,
                Token::Divide => ArithmeticOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = Expr::Arithmetic {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(token) = self.peek() {
            match token {
                Token::Not => {
                    self.advance();
                    let operand = self.parse_unary()?;
                    return Ok(Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    });
                },
                Token::Minus => {
                    self.advance();
                    let operand = self.parse_unary()?;
                    return Ok(Expr::Unary {
                        op: UnaryOp::Minus,
                        operand: Box::new(operand),
                    });
                },
                _ => {},
            }
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Boolean(b)) => Ok(Expr::Bool(b)),
            Some(Token::Channel(name)) => Ok(Expr::Channel(name)),
            Some(Token::Change) => self.parse_change(),
            Some(Token::Sustained) => self.parse_sustained(),
            Some(Token::Last) => self.parse_last(),
            Some(Token::LeftParen) => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen, "Expected ')' after expression")?;
                Ok(expr)
            },
            Some(token) => Err(RuleError::ParseError(format!(
                "Unexpected token: {:?}",
                token
            ))),
            None => Err(RuleError::ParseError(
                "Unexpected end of condition".to_string(),
            )),
        }
    }

    /// CHANGE(channel, seconds, direction)
    fn parse_change(&mut self) -> Result<Expr> {
        self.expect(&Token::LeftParen, "Expected '(' after CHANGE")?;
        let channel = self.expect_channel("CHANGE")?;
        self.expect(&Token::Comma, "Expected ',' after CHANGE channel")?;
        let seconds = self.expect_seconds("CHANGE")?;
        self.expect(&Token::Comma, "Expected ',' after CHANGE window")?;

        let direction = match self.advance() {
            Some(Token::Multiply) => ChangeDirection::Absolute,
            Some(Token::Plus) => ChangeDirection::Positive,
            Some(Token::Minus) => ChangeDirection::Negative,
            other => {
                return Err(RuleError::ParseError(format!(
                    "Invalid CHANGE direction: {:?} (expected *, + or -)",
                    other
                )));
            },
        };

        self.expect(&Token::RightParen, "Expected ')' after CHANGE arguments")?;
        Ok(Expr::Change {
            channel,
            seconds,
            direction,
        })
    }

    /// SUSTAINED(channel, op threshold, seconds)
    fn parse_sustained(&mut self) -> Result<Expr> {
        self.expect(&Token::LeftParen, "Expected '(' after SUSTAINED")?;
        let channel = self.expect_channel("SUSTAINED")?;
        self.expect(&Token::Comma, "Expected ',' after SUSTAINED channel")?;

        let op = match self.advance() {
            Some(Token::Greater) => CompareOp::Gt,
            Some(Token::GreaterEqual) => CompareOp::Gte,
            Some(Token::Less) => CompareOp::Lt,
            Some(Token::LessEqual) => CompareOp::Lte,
            Some(Token::Equal) => CompareOp::Eq,
            Some(Token::NotEqual) => CompareOp::Ne,
            other => {
                return Err(RuleError::ParseError(format!(
                    "Invalid SUSTAINED comparison: {:?}",
                    other
                )));
            },
        };

        let threshold = match self.advance().cloned() {
            Some(Token::Number(n)) => TypedValue::Float(n),
            Some(Token::Boolean(b)) => TypedValue::Bool(b),
            Some(Token::Minus) => match self.advance() {
                Some(Token::Number(n)) => TypedValue::Float(-n),
                other => {
                    return Err(RuleError::ParseError(format!(
                        "Invalid SUSTAINED threshold: {:?}",
                        other
                    )));
                },
            },
            other => {
                return Err(RuleError::ParseError(format!(
                    "Invalid SUSTAINED threshold: {:?}",
                    other
                )));
            },
        };

        self.expect(&Token::Comma, "Expected ',' after SUSTAINED comparison")?;
        let seconds = self.expect_seconds("SUSTAINED")?;
        self.expect(&Token::RightParen, "Expected ')' after SUSTAINED arguments")?;

        Ok(Expr::Sustained {
            channel,
            op,
            threshold,
            seconds,
        })
    }

    /// LAST(channel)
    fn parse_last(&mut self) -> Result<Expr> {
        self.expect(&Token::LeftParen, "Expected '(' after LAST")?;
        let channel = self.expect_channel("LAST")?;
        self.expect(&Token::RightParen, "Expected ')' after LAST channel")?;
        Ok(Expr::Last { channel })
    }

    fn expect_channel(&mut self, func: &str) -> Result<String> {
        match self.advance().cloned() {
            Some(Token::Channel(name)) => Ok(name),
            other => Err(RuleError::ParseError(format!(
                "{} requires a {{channel}} argument, found {:?}",
                func, other
            ))),
        }
    }

    fn expect_seconds(&mut self, func: &str) -> Result<f64> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(*n),
            other => Err(RuleError::ParseError(format!(
                "{} window must be a number of seconds, found {:?}",
                func, other
            ))),
        }
    }

    fn expect(&mut self, expected: &Token, message: &str) -> Result<()> {
        if self.match_token(expected) {
            Ok(())
        } else {
            Err(RuleError::ParseError(format!(
                "{}, found {:?}",
                message,
                self.peek()
            )))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(RuleError::ParseError(format!(
                "Unexpected trailing token: {:?}",
                token
            ))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn advance(&mut self) -> Option<&Token> {
        if self.current < self.tokens.len() {
            let token = &self.tokens[self.current];
            self.current += 1;
            Some(token)
        } else {
            None
        }
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if let Some(token) = self.peek() {
            if std::mem::discriminant(token) == std::mem::discriminant(expected) {
                self.advance();
                return true;
            }
        }
        false
    }
}
