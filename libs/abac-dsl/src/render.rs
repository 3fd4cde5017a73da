//! Deterministic textual rendering of the AST.
//!
//! `render(parse(text))` must parse back to an AST that is structurally
//! equal to `parse(text)` (position information aside - the AST carries
//! none). Precedence is made explicit with parentheses: `||` binds loosest,
//! then `&&`, then unary `!`, with atomic conditions (`has`, `like`,
//! comparisons, `if/then/else`, ...) innermost.

use crate::ast::{
    ActionClause, AttributeRef, Condition, ConditionBlock, Expression, Literal, Policy,
    PrincipalClause, ResourceClause, Root,
};

pub fn render(policy: &Policy) -> String {
    let mut out = String::new();
    out.push_str(policy.effect.as_str());
    out.push('(');
    out.push_str(&render_principal(&policy.target.principal));
    out.push_str(", ");
    out.push_str(&render_action(&policy.target.action));
    out.push_str(", ");
    out.push_str(&render_resource(&policy.target.resource));
    out.push(')');

    if let Some(block) = &policy.conditions {
        if !is_trivially_true(block) {
            out.push_str(" when { ");
            out.push_str(&render_block(block));
            out.push_str(" }");
        }
    }

    out.push(';');
    out
}

fn is_trivially_true(block: &ConditionBlock) -> bool {
    block.disjuncts.is_empty()
}

fn render_principal(clause: &PrincipalClause) -> String {
    match &clause.type_name {
        Some(type_name) => format!("principal is {type_name}"),
        None => "principal".to_string(),
    }
}

fn render_action(clause: &ActionClause) -> String {
    match &clause.names {
        Some(names) => {
            let rendered: Vec<String> = names.iter().map(|name| render_string(name)).collect();
            format!("action in [{}]", rendered.join(", "))
        }
        None => "action".to_string(),
    }
}

fn render_resource(clause: &ResourceClause) -> String {
    match clause {
        ResourceClause::Any => "resource".to_string(),
        ResourceClause::OfType(type_name) => format!("resource is {type_name}"),
        ResourceClause::Literal(literal) => format!("resource == {}", render_string(literal)),
    }
}

fn render_block(block: &ConditionBlock) -> String {
    let disjuncts: Vec<String> = block
        .disjuncts
        .iter()
        .map(|conjunction| {
            let rendered: Vec<String> = conjunction.iter().map(render_condition).collect();
            rendered.join(" && ")
        })
        .collect();
    disjuncts.join(" || ")
}

/// Renders `condition` in a context where it is a conjunct - the only
/// context the grammar allows a bare `Group` vs. non-`Group` condition to
/// need disambiguating parens.
fn render_condition(condition: &Condition) -> String {
    match condition {
        Condition::Not(inner) => format!("!{}", render_condition_atom(inner)),
        Condition::Group(block) => format!("({})", render_block(block)),
        Condition::IfThenElse {
            condition,
            then_branch,
            else_branch,
        } => format!(
            "if {} then {} else {}",
            render_condition_atom(condition),
            render_condition_atom(then_branch),
            render_condition_atom(else_branch)
        ),
        Condition::Has { root, path } => format!("{} has {}", root.as_str(), path.join(".")),
        Condition::ContainsAll { root, path, list } => format!(
            "{}.containsAll({})",
            render_containment_prefix(*root, path),
            render_literal_list(list)
        ),
        Condition::ContainsAny { root, path, list } => format!(
            "{}.containsAny({})",
            render_containment_prefix(*root, path),
            render_literal_list(list)
        ),
        Condition::Like { expr, pattern } => {
            format!("{} like {}", render_expression(expr), render_string(pattern))
        }
        Condition::InList { expr, list } => {
            format!("{} in {}", render_expression(expr), render_literal_list(list))
        }
        Condition::InAttribute { expr, attribute } => {
            format!("{} in {}", render_expression(expr), render_attribute_ref(attribute))
        }
        Condition::Compare { left, op, right } => format!(
            "{} {} {}",
            render_expression(left),
            op.as_str(),
            render_expression(right)
        ),
        Condition::BoolLiteral(value) => value.to_string(),
    }
}

/// `!` and `if/then/else` branches bind to a single atomic condition; a
/// nested disjunction/conjunction must be parenthesized via `Group` to
/// appear there, which `render_condition` already does for us.
fn render_condition_atom(condition: &Condition) -> String {
    render_condition(condition)
}

fn render_expression(expr: &Expression) -> String {
    match expr {
        Expression::Attribute(attr) => render_attribute_ref(attr),
        Expression::StringLiteral(value) => render_string(value),
        Expression::NumberLiteral(value) => render_number(*value),
        Expression::BooleanLiteral(value) => value.to_string(),
    }
}

fn render_attribute_ref(attr: &AttributeRef) -> String {
    format!("{}.{}", attr.root.as_str(), attr.path.join("."))
}

fn render_containment_prefix(root: Root, path: &[String]) -> String {
    if path.is_empty() {
        root.as_str().to_string()
    } else {
        format!("{}.{}", root.as_str(), path.join("."))
    }
}

fn render_literal_list(list: &[Literal]) -> String {
    let rendered: Vec<String> = list.iter().map(render_literal).collect();
    format!("[{}]", rendered.join(", "))
}

fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::StringLiteral(value) => render_string(value),
        Literal::NumberLiteral(value) => render_number(*value),
        Literal::BooleanLiteral(value) => value.to_string(),
    }
}

fn render_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

/// Integers print without a fractional part; everything else uses the
/// shortest Rust `Display` form, which already omits trailing zeros.
fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_floats_render_without_fraction() {
        assert_eq!(render_number(42.0), "42");
        assert_eq!(render_number(-3.0), "-3");
    }

    #[test]
    fn fractional_floats_keep_their_fraction() {
        assert_eq!(render_number(1.5), "1.5");
    }

    #[test]
    fn string_literals_are_json_escaped() {
        assert_eq!(render_string("hello \"world\""), "\"hello \\\"world\\\"\"");
    }
}
