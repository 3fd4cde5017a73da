//! Typed representation of a compiled policy.
//!
//! The AST is a plain algebraic data type with only down-pointing edges
//! (`Condition` is self-referential through `Not`, `Group` and `IfThenElse`,
//! but never cyclic). Every node round-trips through `serde_json`; the
//! wire form additionally carries a top-level `grammar_version` integer,
//! added by [`compile`] rather than stored on `Policy` itself so that an
//! in-memory `Policy` never has to lie about which grammar version it was
//! parsed under.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::PolicyDslError;

/// Current grammar version emitted by [`compile`]. Bumped whenever the AST
/// shape changes in a way that is not backward compatible.
pub const GRAMMAR_VERSION: u32 = 1;

/// Reserved words that may never appear as an attribute-path segment.
pub const RESERVED_WORDS: &[&str] = &[
    "permit",
    "forbid",
    "when",
    "principal",
    "resource",
    "action",
    "env",
    "is",
    "in",
    "has",
    "like",
    "true",
    "false",
    "if",
    "then",
    "else",
    "containsAll",
    "containsAny",
];

pub fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.iter().any(|reserved| *reserved == word)
}

/// A complete policy declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub effect: Effect,
    pub target: Target,
    /// `None` means the policy has no `when { ... }` clause at all, which
    /// the evaluator treats identically to an empty condition block (both
    /// evaluate to `true`).
    pub conditions: Option<ConditionBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Copy)]
pub enum Effect {
    Permit,
    Forbid,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Permit => "permit",
            Effect::Forbid => "forbid",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three clauses every policy target is made of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub principal: PrincipalClause,
    pub action: ActionClause,
    pub resource: ResourceClause,
}

/// `principal` or `principal is <type>`. `type_name: None` matches any
/// principal entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PrincipalClause {
    pub type_name: Option<String>,
}

/// `action` or `action in ["a", "b"]`. `names: None` matches every action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActionClause {
    pub names: Option<Vec<String>>,
}

/// `resource`, `resource is <type>`, or `resource == "<literal>"`. The two
/// non-default forms are mutually exclusive by construction: this is an
/// enum, not a struct with two optional fields, so "both set" is
/// unrepresentable rather than merely disallowed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResourceClause {
    Any,
    OfType(String),
    Literal(String),
}

impl Default for ResourceClause {
    fn default() -> Self {
        ResourceClause::Any
    }
}

/// The four roots a condition's attribute references may select.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Copy)]
pub enum Root {
    Principal,
    Resource,
    Action,
    Env,
}

impl Root {
    pub fn as_str(&self) -> &'static str {
        match self {
            Root::Principal => "principal",
            Root::Resource => "resource",
            Root::Action => "action",
            Root::Env => "env",
        }
    }
}

/// A dotted attribute reference such as `principal.roles` or
/// `resource.owner.tenant_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeRef {
    pub root: Root,
    pub path: Vec<String>,
}

/// Expressions: either an attribute reference or a literal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Expression {
    Attribute(AttributeRef),
    StringLiteral(String),
    NumberLiteral(f64),
    BooleanLiteral(bool),
}

/// A literal permitted inside `[ ... ]` lists (`containsAll`, `in`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Literal {
    StringLiteral(String),
    NumberLiteral(f64),
    BooleanLiteral(bool),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Copy)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A single tagged-variant condition node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Condition {
    Not(Box<Condition>),
    Group(Box<ConditionBlock>),
    IfThenElse {
        condition: Box<Condition>,
        then_branch: Box<Condition>,
        else_branch: Box<Condition>,
    },
    Has {
        root: Root,
        path: Vec<String>,
    },
    ContainsAll {
        root: Root,
        path: Vec<String>,
        list: Vec<Literal>,
    },
    ContainsAny {
        root: Root,
        path: Vec<String>,
        list: Vec<Literal>,
    },
    Like {
        expr: Expression,
        pattern: String,
    },
    InList {
        expr: Expression,
        list: Vec<Literal>,
    },
    InAttribute {
        expr: Expression,
        attribute: AttributeRef,
    },
    Compare {
        left: Expression,
        op: CompareOp,
        right: Expression,
    },
    BoolLiteral(bool),
}

/// A disjunction of conjunctions: `[[a, b], [c]]` renders as
/// `(a && b) || c`. A bare condition `c` is represented as `[[c]]`, so the
/// "two shapes" the distilled grammar describes collapse to one
/// representation here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionBlock {
    pub disjuncts: Vec<Vec<Condition>>,
}

impl ConditionBlock {
    pub fn bare(condition: Condition) -> Self {
        ConditionBlock {
            disjuncts: vec![vec![condition]],
        }
    }
}

/// Serializes `policy` and inserts `grammar_version` at the top level,
/// producing the self-describing wire form persisted by `abac-store`.
pub fn compile(policy: &Policy) -> Result<JsonValue, PolicyDslError> {
    let mut value = serde_json::to_value(policy).map_err(|err| PolicyDslError::InvalidAst {
        reason: format!("failed to serialize policy AST: {err}"),
    })?;

    match value.as_object_mut() {
        Some(map) => {
            map.insert("grammar_version".to_string(), JsonValue::from(GRAMMAR_VERSION));
        }
        None => {
            return Err(PolicyDslError::InvalidAst {
                reason: "serialized policy is not a JSON object".into(),
            })
        }
    }

    Ok(value)
}

/// Validates that `value` deserializes to an object carrying an integer
/// `grammar_version > 0`. Does not otherwise inspect the AST shape -
/// forward-compatible grammar evolution is exactly what this gate exists
/// to allow.
pub fn validate_grammar_version(value: &JsonValue) -> Result<(), PolicyDslError> {
    let version = value
        .as_object()
        .and_then(|map| map.get("grammar_version"))
        .and_then(|v| v.as_i64());

    match version {
        Some(v) if v > 0 => Ok(()),
        _ => Err(PolicyDslError::InvalidAst {
            reason: "missing or non-positive grammar_version".into(),
        }),
    }
}

/// Deserializes a stored AST JSON value back into a [`Policy`], first
/// checking the grammar version gate.
pub fn decompile(value: &JsonValue) -> Result<Policy, PolicyDslError> {
    validate_grammar_version(value)?;
    serde_json::from_value(value.clone()).map_err(|err| PolicyDslError::InvalidAst {
        reason: format!("failed to deserialize policy AST: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> Policy {
        Policy {
            effect: Effect::Permit,
            target: Target {
                principal: PrincipalClause {
                    type_name: Some("character".into()),
                },
                action: ActionClause {
                    names: Some(vec!["read".into()]),
                },
                resource: ResourceClause::OfType("location".into()),
            },
            conditions: Some(ConditionBlock::bare(Condition::Compare {
                left: Expression::Attribute(AttributeRef {
                    root: Root::Principal,
                    path: vec!["role".into()],
                }),
                op: CompareOp::Eq,
                right: Expression::StringLiteral("admin".into()),
            })),
        }
    }

    #[test]
    fn compile_adds_grammar_version() {
        let policy = sample_policy();
        let json = compile(&policy).unwrap();
        assert_eq!(json["grammar_version"], GRAMMAR_VERSION);
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        let policy = sample_policy();
        let json = compile(&policy).unwrap();
        let decoded = decompile(&json).unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn grammar_version_guard_rejects_missing_field() {
        let value = serde_json::json!({"effect": "permit"});
        let err = validate_grammar_version(&value).unwrap_err();
        assert!(matches!(err, PolicyDslError::InvalidAst { .. }));
    }

    #[test]
    fn grammar_version_guard_rejects_zero() {
        let value = serde_json::json!({"grammar_version": 0});
        let err = validate_grammar_version(&value).unwrap_err();
        assert!(matches!(err, PolicyDslError::InvalidAst { .. }));
    }

    #[test]
    fn reserved_words_are_recognized() {
        assert!(is_reserved_word("has"));
        assert!(is_reserved_word("containsAll"));
        assert!(!is_reserved_word("tenant_id"));
    }
}
