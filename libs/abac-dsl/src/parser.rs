//! Text-to-AST parser built on `nom`.
//!
//! The `Condition` nonterminal is ordered choice over ten alternatives
//! (see the module-level grammar in the crate README / distilled spec),
//! several of which share a common `expr` prefix. Each alternative is
//! written as an independent parser over the original input slice, so
//! `nom::branch::alt` backtracks fully - reparsing the shared prefix - when
//! an earlier alternative fails rather than committing early.

use crate::{
    ast::{
        ActionClause, AttributeRef, CompareOp, Condition, ConditionBlock, Effect, Expression,
        Literal, Policy, PrincipalClause, ResourceClause, Root, Target,
    },
    PolicyDslError,
};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{cut, map, map_res, opt, recognize, verify},
    error::{convert_error, ErrorKind, ParseError, VerboseError},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use std::num::ParseFloatError;

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Maximum nesting depth a condition tree may reach before parsing fails.
pub const MAX_CONDITION_DEPTH: usize = 32;

pub fn parse_policy(source: &str) -> Result<Policy, PolicyDslError> {
    let input = source.trim();
    if input.is_empty() {
        return Err(PolicyDslError::ParseError {
            message: "policy source is empty".into(),
            location: None,
        });
    }

    let policy = match policy_parser(input) {
        Ok((remaining, policy)) => {
            let remaining = remaining.trim();
            if !remaining.is_empty() {
                let offset = input.len() - remaining.len();
                return Err(PolicyDslError::ParseError {
                    message: format!("unexpected trailing input: {remaining:?}"),
                    location: compute_location(input, offset),
                });
            }
            policy
        }
        Err(err) => return Err(parse_failure(input, err)),
    };

    crate::validator::validate_policy(&policy)?;
    Ok(policy)
}

fn parse_failure(input: &str, err: nom::Err<VerboseError<&str>>) -> PolicyDslError {
    let (message, location) = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let message = convert_error(input, e.clone());
            let location = e.errors.first().and_then(|(fragment, _)| {
                let offset = input.len().saturating_sub(fragment.len());
                compute_location(input, offset)
            });
            (message, location)
        }
        nom::Err::Incomplete(_) => ("incomplete input".to_string(), None),
    };
    PolicyDslError::ParseError { message, location }
}

fn policy_parser(input: &str) -> Res<'_, Policy> {
    let (input, effect) = ws(effect_parser)(input)?;
    let (input, _) = ws(char('('))(input)?;
    let (input, principal) = cut(ws(principal_clause_parser))(input)?;
    let (input, _) = cut(ws(char(',')))(input)?;
    let (input, action) = cut(ws(action_clause_parser))(input)?;
    let (input, _) = cut(ws(char(',')))(input)?;
    let (input, resource) = cut(ws(resource_clause_parser))(input)?;
    let (input, _) = cut(ws(char(')')))(input)?;
    let (input, conditions) = opt(preceded(
        ws(keyword("when")),
        cut(delimited(
            ws(char('{')),
            condition_block_parser,
            ws(char('}')),
        )),
    ))(input)?;
    let (input, _) = cut(ws(char(';')))(input)?;

    Ok((
        input,
        Policy {
            effect,
            target: Target {
                principal,
                action,
                resource,
            },
            conditions,
        },
    ))
}

fn effect_parser(input: &str) -> Res<'_, Effect> {
    alt((
        map(keyword("permit"), |_| Effect::Permit),
        map(keyword("forbid"), |_| Effect::Forbid),
    ))(input)
}

fn principal_clause_parser(input: &str) -> Res<'_, PrincipalClause> {
    let (input, _) = keyword("principal")(input)?;
    let (input, type_name) = opt(preceded(ws(keyword("is")), ws(plain_identifier)))(input)?;
    Ok((
        input,
        PrincipalClause {
            type_name: type_name.map(str::to_string),
        },
    ))
}

fn action_clause_parser(input: &str) -> Res<'_, ActionClause> {
    let (input, _) = keyword("action")(input)?;
    let (input, names) = opt(preceded(
        ws(keyword("in")),
        delimited(
            ws(char('[')),
            separated_list1(ws(char(',')), ws(string_literal_parser)),
            ws(char(']')),
        ),
    ))(input)?;
    Ok((input, ActionClause { names }))
}

fn resource_clause_parser(input: &str) -> Res<'_, ResourceClause> {
    let (input, _) = keyword("resource")(input)?;
    let (input, clause) = opt(alt((
        map(preceded(ws(keyword("is")), ws(plain_identifier)), |t| {
            ResourceClause::OfType(t.to_string())
        }),
        map(preceded(ws(tag("==")), ws(string_literal_parser)), ResourceClause::Literal),
    )))(input)?;
    Ok((input, clause.unwrap_or(ResourceClause::Any)))
}

fn condition_block_parser(input: &str) -> Res<'_, ConditionBlock> {
    let (input, first) = ws(conjunction_parser)(input)?;
    let (mut input, mut disjuncts) = (input, vec![first]);

    loop {
        let (next_input, connector) = opt(ws(tag("||")))(input)?;
        if connector.is_none() {
            break;
        }
        let (next_input, conjunction) = cut(ws(conjunction_parser))(next_input)?;
        disjuncts.push(conjunction);
        input = next_input;
    }

    Ok((input, ConditionBlock { disjuncts }))
}

fn conjunction_parser(input: &str) -> Res<'_, Vec<Condition>> {
    let (input, first) = condition_parser(input)?;
    let (mut input, mut conjuncts) = (input, vec![first]);

    loop {
        let (next_input, connector) = opt(ws(tag("&&")))(input)?;
        if connector.is_none() {
            break;
        }
        let (next_input, condition) = cut(ws(condition_parser))(next_input)?;
        conjuncts.push(condition);
        input = next_input;
    }

    Ok((input, conjuncts))
}

/// Ordered choice over the ten condition alternatives. Order matters: it is
/// the documented disambiguation strategy, not an implementation detail.
fn condition_parser(input: &str) -> Res<'_, Condition> {
    alt((
        negation_form,
        parenthesized_form,
        if_then_else_form,
        has_form,
        contains_form,
        like_form,
        in_list_form,
        in_attribute_form,
        compare_form,
        bool_literal_form,
    ))(input)
}

fn negation_form(input: &str) -> Res<'_, Condition> {
    let (input, _) = ws(char('!'))(input)?;
    let (input, inner) = cut(condition_parser)(input)?;
    Ok((input, Condition::Not(Box::new(inner))))
}

fn parenthesized_form(input: &str) -> Res<'_, Condition> {
    let (input, block) = delimited(
        ws(char('(')),
        cut(condition_block_parser),
        cut(ws(char(')'))),
    )(input)?;
    Ok((input, Condition::Group(Box::new(block))))
}

fn if_then_else_form(input: &str) -> Res<'_, Condition> {
    let (input, _) = ws(keyword("if"))(input)?;
    let (input, (condition, then_branch, else_branch)) = cut(tuple((
        condition_parser,
        preceded(ws(keyword("then")), condition_parser),
        preceded(ws(keyword("else")), condition_parser),
    )))(input)?;

    Ok((
        input,
        Condition::IfThenElse {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        },
    ))
}

fn has_form(input: &str) -> Res<'_, Condition> {
    let (input, root) = root_parser(input)?;
    let (input, _) = ws(keyword("has"))(input)?;
    let (input, path) = cut(separated_list1(char('.'), ws(plain_identifier)))(input)?;
    Ok((
        input,
        Condition::Has {
            root,
            path: path.into_iter().map(str::to_string).collect(),
        },
    ))
}

fn contains_form(input: &str) -> Res<'_, Condition> {
    let (input, root) = root_parser(input)?;
    let (input, path) = many0(preceded(char('.'), ws(plain_identifier)))(input)?;
    let (input, _) = char('.')(input)?;
    let (input, kind) = alt((
        map(keyword("containsAll"), |_| true),
        map(keyword("containsAny"), |_| false),
    ))(input)?;
    let (input, list) = cut(delimited(
        ws(char('(')),
        list_parser,
        ws(char(')')),
    ))(input)?;

    let path: Vec<String> = path.into_iter().map(str::to_string).collect();
    Ok((
        input,
        if kind {
            Condition::ContainsAll { root, path, list }
        } else {
            Condition::ContainsAny { root, path, list }
        },
    ))
}

fn like_form(input: &str) -> Res<'_, Condition> {
    let (input, expr) = expression_parser(input)?;
    let (input, _) = ws(keyword("like"))(input)?;
    let (input, pattern) = cut(ws(string_literal_parser))(input)?;
    Ok((input, Condition::Like { expr, pattern }))
}

fn in_list_form(input: &str) -> Res<'_, Condition> {
    let (input, expr) = expression_parser(input)?;
    let (input, _) = ws(keyword("in"))(input)?;
    let (input, list) = list_parser(input)?;
    Ok((input, Condition::InList { expr, list }))
}

fn in_attribute_form(input: &str) -> Res<'_, Condition> {
    let (input, expr) = expression_parser(input)?;
    let (input, _) = ws(keyword("in"))(input)?;
    let (input, attribute) = attribute_ref_parser(input)?;
    Ok((input, Condition::InAttribute { expr, attribute }))
}

fn compare_form(input: &str) -> Res<'_, Condition> {
    let (input, left) = expression_parser(input)?;
    let (input, op) = ws(compare_op_parser)(input)?;
    let (input, right) = cut(expression_parser)(input)?;
    Ok((input, Condition::Compare { left, op, right }))
}

fn bool_literal_form(input: &str) -> Res<'_, Condition> {
    alt((
        map(keyword("true"), |_| Condition::BoolLiteral(true)),
        map(keyword("false"), |_| Condition::BoolLiteral(false)),
    ))(input)
}

fn compare_op_parser(input: &str) -> Res<'_, CompareOp> {
    alt((
        map(tag("=="), |_| CompareOp::Eq),
        map(tag("!="), |_| CompareOp::Ne),
        map(tag("<="), |_| CompareOp::Le),
        map(tag(">="), |_| CompareOp::Ge),
        map(tag("<"), |_| CompareOp::Lt),
        map(tag(">"), |_| CompareOp::Gt),
    ))(input)
}

fn expression_parser(input: &str) -> Res<'_, Expression> {
    alt((
        map(attribute_ref_parser, Expression::Attribute),
        map(string_literal_parser, Expression::StringLiteral),
        map(boolean_literal_parser, Expression::BooleanLiteral),
        map(number_literal_parser, Expression::NumberLiteral),
    ))(input)
}

fn attribute_ref_parser(input: &str) -> Res<'_, AttributeRef> {
    let (input, root) = root_parser(input)?;
    let (input, path) = cut(separated_list1(char('.'), ws(plain_identifier)))(input)?;
    Ok((
        input,
        AttributeRef {
            root,
            path: path.into_iter().map(str::to_string).collect(),
        },
    ))
}

fn root_parser(input: &str) -> Res<'_, Root> {
    let (rest, word) = ws(identifier)(input)?;
    match word {
        "principal" => Ok((rest, Root::Principal)),
        "resource" => Ok((rest, Root::Resource)),
        "action" => Ok((rest, Root::Action)),
        "env" => Ok((rest, Root::Env)),
        _ => Err(nom::Err::Error(VerboseError::from_error_kind(
            input,
            ErrorKind::Tag,
        ))),
    }
}

fn list_parser(input: &str) -> Res<'_, Vec<Literal>> {
    delimited(
        ws(char('[')),
        separated_list0(ws(char(',')), ws(literal_parser)),
        ws(char(']')),
    )(input)
}

fn literal_parser(input: &str) -> Res<'_, Literal> {
    alt((
        map(string_literal_parser, Literal::StringLiteral),
        map(boolean_literal_parser, Literal::BooleanLiteral),
        map(number_literal_parser, Literal::NumberLiteral),
    ))(input)
}

fn string_literal_parser(input: &str) -> Res<'_, String> {
    map_res(
        recognize(delimited(
            char('"'),
            many0(alt((
                recognize(tuple((char('\\'), one_of(r#""\\/bfnrt"#)))),
                recognize(is_not("\\\"")),
            ))),
            char('"'),
        )),
        |raw: &str| serde_json::from_str::<String>(raw),
    )(input)
}

fn number_literal_parser(input: &str) -> Res<'_, f64> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(tuple((char('.'), cut(digit1)))),
        ))),
        |number_str: &str| -> Result<f64, ParseFloatError> { number_str.parse::<f64>() },
    )(input)
}

fn boolean_literal_parser(input: &str) -> Res<'_, bool> {
    alt((
        map(keyword("true"), |_| true),
        map(keyword("false"), |_| false),
    ))(input)
}

/// A generic identifier, `[a-zA-Z_][a-zA-Z0-9_-]*`.
fn identifier(input: &str) -> Res<'_, &str> {
    recognize(tuple((
        take_while1(is_identifier_start),
        take_while(is_identifier_char),
    )))(input)
}

/// An identifier that is not the composite `containsAll`/`containsAny`
/// keyword token - those are consumed whole by [`contains_form`] and must
/// never be re-read as an ordinary path segment.
fn plain_identifier(input: &str) -> Res<'_, &str> {
    verify(identifier, |ident: &str| {
        ident != "containsAll" && ident != "containsAny"
    })(input)
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
}

/// Parses an exact keyword, respecting identifier word boundaries (so
/// `"iffy"` does not parse as the keyword `"if"` followed by `"fy"`).
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    move |input: &'a str| {
        let (rest, ident) = identifier(input)?;
        if ident == word {
            Ok((rest, ident))
        } else {
            Err(nom::Err::Error(VerboseError::from_error_kind(
                input,
                ErrorKind::Tag,
            )))
        }
    }
}

fn ws<'a, F, O>(mut inner: F) -> impl FnMut(&'a str) -> Res<'a, O>
where
    F: FnMut(&'a str) -> Res<'a, O>,
{
    move |input: &'a str| {
        let (input, _) = multispace0(input)?;
        let (input, result) = inner(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, result))
    }
}

fn compute_location(input: &str, offset: usize) -> Option<(usize, usize)> {
    if offset > input.len() {
        return None;
    }

    let mut line = 1;
    let mut column = 1;

    for (idx, ch) in input.char_indices() {
        if idx == offset {
            return Some((line, column));
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    if offset == input.len() {
        Some((line, column))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CompareOp as Op, Effect as Eff};

    #[test]
    fn parses_unconditional_policy() {
        let policy =
            parse_policy(r#"permit(principal is character, action in ["read"], resource is location);"#)
                .unwrap();
        assert_eq!(policy.effect, Eff::Permit);
        assert!(policy.conditions.is_none());
    }

    #[test]
    fn parses_when_clause_with_comparison() {
        let policy =
            parse_policy(r#"permit(principal, action, resource) when { principal.role == "admin" };"#)
                .unwrap();
        let block = policy.conditions.unwrap();
        assert_eq!(block.disjuncts.len(), 1);
        match &block.disjuncts[0][0] {
            Condition::Compare { op, .. } => assert_eq!(*op, Op::Eq),
            other => panic!("unexpected condition: {other:?}"),
        }
    }

    #[test]
    fn parses_contains_all_with_no_path_segments() {
        let policy = parse_policy(
            r#"permit(principal, action, resource) when { principal.containsAll(["vip"]) };"#,
        )
        .unwrap();
        let block = policy.conditions.unwrap();
        match &block.disjuncts[0][0] {
            Condition::ContainsAll { path, .. } => assert!(path.is_empty()),
            other => panic!("unexpected condition: {other:?}"),
        }
    }

    #[test]
    fn rejects_reserved_word_in_attribute_path() {
        let result =
            parse_policy(r#"permit(principal, action, resource) when { principal.has == "x" };"#);
        assert!(result.is_err());
    }

    #[test]
    fn reports_line_and_column_on_failure() {
        let err = parse_policy("permit(principal, action, resource) when { !!! };").unwrap_err();
        match err {
            PolicyDslError::ParseError { location, .. } => assert!(location.is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
