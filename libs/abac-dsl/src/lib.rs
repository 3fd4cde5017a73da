//! Policy DSL: grammar, AST, parser, deterministic renderer and fail-safe
//! evaluator for the Holomush ABAC core.
//!
//! A policy source string goes in through [`parser::parse_policy`] and comes
//! out as a [`ast::Policy`]. [`ast::compile`] serializes that AST to the
//! self-describing JSON form `abac-store` persists; [`ast::decompile`]
//! reverses it. [`evaluator::evaluate`] runs a compiled policy against a
//! request's resolved attributes.

pub mod ast;
pub mod evaluator;
pub mod parser;
pub mod render;
pub mod validator;

pub use ast::{
    ActionClause, AttributeRef, CompareOp, Condition, ConditionBlock, Effect, Expression, Literal,
    Policy, PrincipalClause, ResourceClause, Root, Target,
};
pub use evaluator::{evaluate, evaluate_with_depth_limit, AttributeBag, AttributeBags, AttributeValue, GlobCache};
pub use parser::parse_policy;
pub use render::render;

use thiserror::Error;

/// Errors produced anywhere in the DSL pipeline: parsing, post-parse
/// validation, and AST (de)serialization. Parsing and validation failures
/// are deliberately the same variant - the distilled grammar treats them as
/// a single failure classification carrying a message and an optional
/// source position.
#[derive(Debug, Error)]
pub enum PolicyDslError {
    #[error("{message}")]
    ParseError {
        message: String,
        location: Option<(usize, usize)>,
    },

    #[error("invalid policy AST: {reason}")]
    InvalidAst { reason: String },
}
