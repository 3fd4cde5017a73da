//! Fail-safe evaluation of a [`ConditionBlock`] against the four-bag
//! attribute record. The evaluator never errors: a missing attribute, a
//! type mismatch, or exceeding the nesting-depth bound all collapse to
//! `false`, matching Cedar-style fail-safe semantics. There is
//! deliberately no teacher precedent for this module - the compiled
//! policies it evaluates never existed as a standalone concept upstream.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::ast::{CompareOp, Condition, ConditionBlock, Expression, Literal, Policy, Root};

/// Evaluation recurses one level per nested condition/block; beyond this
/// many levels every enclosing evaluation folds to `false` rather than
/// risking a stack overflow. Matches the parser's own static nesting bound.
pub const DEFAULT_DEPTH_LIMIT: usize = 32;

/// A single dynamically-tagged attribute value. Matches the data model's
/// "string, boolean, canonical float, or list-of-string" scalar set exactly
/// - there is no polymorphic list type to keep the evaluator's coercion
/// rules total.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Float(f64),
    StringList(Vec<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::StringList(items) => Some(items),
            _ => None,
        }
    }
}

/// A flat attribute bag: dotted condition paths are joined with `.` into
/// the literal lookup key before reaching here - providers emit flat keys
/// directly.
pub type AttributeBag = HashMap<String, AttributeValue>;

/// The four named bags a request produces.
#[derive(Debug, Clone, Default)]
pub struct AttributeBags {
    pub subject: AttributeBag,
    pub resource: AttributeBag,
    pub action: AttributeBag,
    pub environment: AttributeBag,
}

fn bag_for<'a>(root: Root, bags: &'a AttributeBags) -> &'a AttributeBag {
    match root {
        Root::Principal => &bags.subject,
        Root::Resource => &bags.resource,
        Root::Action => &bags.action,
        Root::Env => &bags.environment,
    }
}

/// A single glob segment token. `:` never appears inside a token - it is
/// the separator that splits a pattern (and the matched text) into
/// segments before matching.
#[derive(Debug, Clone, PartialEq)]
enum GlobToken {
    Literal(char),
    Star,
    Question,
}

#[derive(Debug, Clone)]
struct CompiledGlob {
    segments: Vec<Vec<GlobToken>>,
}

const MAX_GLOB_LENGTH: usize = 100;
const MAX_GLOB_WILDCARDS: usize = 5;

fn compile_glob(pattern: &str) -> Option<CompiledGlob> {
    if pattern.len() > MAX_GLOB_LENGTH {
        return None;
    }
    if pattern.contains(['[', ']', '{', '}']) || pattern.contains("**") {
        return None;
    }
    let wildcard_count = pattern.chars().filter(|c| *c == '*' || *c == '?').count();
    if wildcard_count > MAX_GLOB_WILDCARDS {
        return None;
    }

    let segments = pattern
        .split(':')
        .map(|segment| {
            segment
                .chars()
                .map(|c| match c {
                    '*' => GlobToken::Star,
                    '?' => GlobToken::Question,
                    other => GlobToken::Literal(other),
                })
                .collect()
        })
        .collect();

    Some(CompiledGlob { segments })
}

/// Classic greedy wildcard matcher with backtracking on the last `*`
/// encountered, applied within a single `:`-delimited segment.
fn segment_matches(pattern: &[GlobToken], text: &[char]) -> bool {
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star_pi, mut star_ti): (Option<usize>, usize) = (None, 0);

    while ti < text.len() {
        if pi < pattern.len() {
            match pattern[pi] {
                GlobToken::Literal(c) if c == text[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                GlobToken::Question => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                GlobToken::Star => {
                    star_pi = Some(pi);
                    star_ti = ti;
                    pi += 1;
                    continue;
                }
                _ => {}
            }
        }
        if let Some(sp) = star_pi {
            pi = sp + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == GlobToken::Star {
        pi += 1;
    }
    pi == pattern.len()
}

fn glob_matches_compiled(glob: &CompiledGlob, text: &str) -> bool {
    let text_segments: Vec<&str> = text.split(':').collect();
    if text_segments.len() != glob.segments.len() {
        return false;
    }
    glob.segments
        .iter()
        .zip(text_segments.iter())
        .all(|(pattern, segment)| {
            let chars: Vec<char> = segment.chars().collect();
            segment_matches(pattern, &chars)
        })
}

/// Process-wide, read-mostly cache of compiled `like` patterns. Repeated
/// patterns across many policy evaluations compile exactly once.
#[derive(Debug, Default)]
pub struct GlobCache {
    compiled: DashMap<String, Option<CompiledGlob>>,
}

impl GlobCache {
    pub fn new() -> Self {
        Self {
            compiled: DashMap::new(),
        }
    }

    fn matches(&self, pattern: &str, text: &str) -> bool {
        if let Some(entry) = self.compiled.get(pattern) {
            return match entry.value() {
                Some(glob) => glob_matches_compiled(glob, text),
                None => false,
            };
        }
        let compiled = compile_glob(pattern);
        let matched = compiled
            .as_ref()
            .map(|glob| glob_matches_compiled(glob, text))
            .unwrap_or(false);
        self.compiled.insert(pattern.to_string(), compiled);
        matched
    }
}

/// Evaluates `policy`'s condition block against `bags` using the default
/// depth bound.
pub fn evaluate(policy: &Policy, bags: &AttributeBags, cache: &GlobCache) -> bool {
    evaluate_with_depth_limit(policy, bags, cache, DEFAULT_DEPTH_LIMIT)
}

pub fn evaluate_with_depth_limit(
    policy: &Policy,
    bags: &AttributeBags,
    cache: &GlobCache,
    depth_limit: usize,
) -> bool {
    match &policy.conditions {
        None => true,
        Some(block) => evaluate_block(block, bags, cache, 1, depth_limit),
    }
}

fn evaluate_block(
    block: &ConditionBlock,
    bags: &AttributeBags,
    cache: &GlobCache,
    depth: usize,
    depth_limit: usize,
) -> bool {
    if depth > depth_limit {
        return false;
    }
    if block.disjuncts.is_empty() {
        return true;
    }
    block.disjuncts.iter().any(|conjunction| {
        if conjunction.is_empty() {
            return true;
        }
        conjunction
            .iter()
            .all(|condition| evaluate_condition(condition, bags, cache, depth, depth_limit))
    })
}

fn evaluate_condition(
    condition: &Condition,
    bags: &AttributeBags,
    cache: &GlobCache,
    depth: usize,
    depth_limit: usize,
) -> bool {
    if depth > depth_limit {
        return false;
    }
    match condition {
        Condition::Not(inner) => !evaluate_condition(inner, bags, cache, depth + 1, depth_limit),
        Condition::Group(block) => evaluate_block(block, bags, cache, depth + 1, depth_limit),
        Condition::IfThenElse {
            condition,
            then_branch,
            else_branch,
        } => {
            if evaluate_condition(condition, bags, cache, depth + 1, depth_limit) {
                evaluate_condition(then_branch, bags, cache, depth + 1, depth_limit)
            } else {
                evaluate_condition(else_branch, bags, cache, depth + 1, depth_limit)
            }
        }
        Condition::Has { root, path } => {
            bag_for(*root, bags).contains_key(&path.join("."))
        }
        Condition::ContainsAll { root, path, list } => {
            contains_check(*root, path, list, bags, true)
        }
        Condition::ContainsAny { root, path, list } => {
            contains_check(*root, path, list, bags, false)
        }
        Condition::Like { expr, pattern } => match evaluate_expression(expr, bags) {
            Some(AttributeValue::String(value)) => cache.matches(pattern, &value),
            _ => false,
        },
        Condition::InList { expr, list } => match evaluate_expression(expr, bags) {
            Some(value) => list
                .iter()
                .any(|literal| compare_values(&value, CompareOp::Eq, &literal_to_value(literal))),
            None => false,
        },
        Condition::InAttribute { expr, attribute } => {
            let left = match evaluate_expression(expr, bags) {
                Some(value) => value,
                None => return false,
            };
            let bag = bag_for(attribute.root, bags);
            match bag.get(&attribute.path.join(".")) {
                Some(AttributeValue::StringList(items)) => items
                    .iter()
                    .any(|item| compare_values(&left, CompareOp::Eq, &AttributeValue::String(item.clone()))),
                _ => false,
            }
        }
        Condition::Compare { left, op, right } => {
            let left = evaluate_expression(left, bags);
            let right = evaluate_expression(right, bags);
            match (left, right) {
                (Some(left), Some(right)) => compare_values(&left, *op, &right),
                _ => false,
            }
        }
        Condition::BoolLiteral(value) => *value,
    }
}

fn contains_check(
    root: Root,
    path: &[String],
    list: &[Literal],
    bags: &AttributeBags,
    require_all: bool,
) -> bool {
    let bag = bag_for(root, bags);
    let items = match bag.get(&path.join(".")) {
        Some(AttributeValue::StringList(items)) => items,
        _ => return false,
    };

    if require_all {
        list.iter()
            .all(|literal| items.iter().any(|item| literal_matches_string(literal, item)))
    } else {
        if list.is_empty() {
            return false;
        }
        list.iter()
            .any(|literal| items.iter().any(|item| literal_matches_string(literal, item)))
    }
}

fn literal_matches_string(literal: &Literal, item: &str) -> bool {
    match literal {
        Literal::StringLiteral(value) => value == item,
        Literal::BooleanLiteral(value) => value.to_string() == item,
        Literal::NumberLiteral(value) => literal_number_matches(*value, item),
    }
}

fn literal_number_matches(value: f64, item: &str) -> bool {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        item == format!("{}", value as i64)
    } else {
        item == format!("{value}")
    }
}

fn literal_to_value(literal: &Literal) -> AttributeValue {
    match literal {
        Literal::StringLiteral(value) => AttributeValue::String(value.clone()),
        Literal::NumberLiteral(value) => AttributeValue::Float(*value),
        Literal::BooleanLiteral(value) => AttributeValue::Bool(*value),
    }
}

fn evaluate_expression(expr: &Expression, bags: &AttributeBags) -> Option<AttributeValue> {
    match expr {
        Expression::Attribute(attr) => bag_for(attr.root, bags).get(&attr.path.join(".")).cloned(),
        Expression::StringLiteral(value) => Some(AttributeValue::String(value.clone())),
        Expression::NumberLiteral(value) => Some(AttributeValue::Float(*value)),
        Expression::BooleanLiteral(value) => Some(AttributeValue::Bool(*value)),
    }
}

/// Comparison across the three scalar kinds. Lists never compare (the
/// grammar never routes a list into a comparison expression); any other
/// cross-type pairing is a fail-safe `false`, not an error.
fn compare_values(left: &AttributeValue, op: CompareOp, right: &AttributeValue) -> bool {
    match (left, right) {
        (AttributeValue::Float(a), AttributeValue::Float(b)) => apply_ordering(op, a.partial_cmp(b)),
        (AttributeValue::String(a), AttributeValue::String(b)) => {
            apply_ordering(op, Some(a.as_bytes().cmp(b.as_bytes())))
        }
        (AttributeValue::Bool(a), AttributeValue::Bool(b)) => match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            _ => false,
        },
        _ => false,
    }
}

fn apply_ordering(op: CompareOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    match ordering {
        None => false,
        Some(ord) => match op {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
        },
    }
}
