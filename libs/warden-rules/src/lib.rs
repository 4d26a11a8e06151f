//! Warden Rules - Condition Engine Library
//!
//! A windowed-expression rule engine for Warden providing:
//! - Condition parsing into a typed expression tree
//! - Edit-time validation against the known channel kinds
//! - Two-pass evaluation over live values and reading history
//! - SQLite persistence for batched rule changes
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐     ┌─────────────┐     ┌──────────────┐
//! │   Parser   │────▶│  Evaluator  │────▶│ WindowSource │
//! │ (tokenize) │     │ (two-pass)  │     │  (history)   │
//! └────────────┘     └─────────────┘     └──────────────┘
//!        │                  ▲
//!        ▼                  │
//! ┌────────────┐     ┌─────────────┐
//! │ Repository │     │ Working set │
//! │  (SQLite)  │     │  (latest)   │
//! └────────────┘     └─────────────┘
//! ```

mod ast;
mod error;
mod eval;
mod parser;
mod repository;
mod token;
mod types;
mod window;

// Re-export public API
pub use ast::{ArithmeticOp, ChangeDirection, CompareOp, Expr, LogicOp, UnaryOp};
pub use error::{Result, RuleError};
pub use eval::{check, evaluate, evaluate_checked, evaluate_expr, validate, EvalContext};
pub use parser::parse;
pub use repository::{
    apply_changes, ensure_rules_schema, get_rule, load_all_rules, load_rules_for_owner,
};
pub use window::{change_over, compare_values, sustained_over, WindowSource};

// Re-export rule types for convenience
pub use types::{
    collect_placeholders, render_template, Rule, RuleChangeSet, RuleDraft, Severity,
};
