//! Condition expression syntax tree
//!
//! Conditions are stored as text and compiled into this tree before
//! evaluation. The tree is closed: there are no identifiers, calls or
//! statements beyond the three windowed functions, so a condition can
//! never reach anything outside the reading store it is given.

use std::collections::BTreeSet;
use warden_model::TypedValue;

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

/// Logical operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
}

/// Window direction selector for CHANGE
///
/// For FLOAT channels: Absolute and Positive give max - min over the
/// window, Negative gives min - max. For BOOLEAN channels the direction
/// selects which edges to count: Positive rising, Negative falling,
/// Absolute both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDirection {
    Absolute,
    Positive,
    Negative,
}

impl ChangeDirection {
    pub fn symbol(&self) -> char {
        match self {
            ChangeDirection::Absolute => '*',
            ChangeDirection::Positive => '+',
            ChangeDirection::Negative => '-',
        }
    }
}

/// Condition expression tree
///
/// `Text` never comes out of the parser (the grammar has no string
/// literals); it is produced by substitution when a TEXT channel value
/// flows into the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Text(String),
    /// A `{channel}` placeholder, resolved from live memory at evaluation
    Channel(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// CHANGE(channel, seconds, direction) over the trailing window
    Change {
        channel: String,
        seconds: f64,
        direction: ChangeDirection,
    },
    /// SUSTAINED(channel, op threshold, seconds): every reading in the
    /// trailing window satisfies the comparison
    Sustained {
        channel: String,
        op: CompareOp,
        threshold: TypedValue,
        seconds: f64,
    },
    /// LAST(channel): most recent durable value, bypassing memory
    Last {
        channel: String,
    },
}

impl Expr {
    /// Collect every channel the expression references.
    pub fn collect_channels(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Text(_) => {},
            Expr::Channel(name) => {
                out.insert(name.clone());
            },
            Expr::Unary { operand, .. } => operand.collect_channels(out),
            Expr::Arithmetic { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::Logic { left, right, .. } => {
                left.collect_channels(out);
                right.collect_channels(out);
            },
            Expr::Change { channel, .. }
            | Expr::Sustained { channel, .. }
            | Expr::Last { channel } => {
                out.insert(channel.clone());
            },
        }
    }
}
