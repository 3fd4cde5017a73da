//! Post-parse AST validation: reserved-word rejection and nesting-depth
//! bounding. Both failure modes surface as [`PolicyDslError::ParseError`] -
//! parsing and post-parse validation are a single failure classification.

use crate::{
    ast::{is_reserved_word, Condition, ConditionBlock, Expression, Policy},
    PolicyDslError,
};

pub fn validate_policy(policy: &Policy) -> Result<(), PolicyDslError> {
    if let Some(block) = &policy.conditions {
        check_reserved_words_in_block(block)?;
        check_depth_in_block(block, 1)?;
    }
    Ok(())
}

fn reject_reserved(path: &[String]) -> Result<(), PolicyDslError> {
    for segment in path {
        if is_reserved_word(segment) {
            tracing::warn!(
                segment = %segment,
                "Rejected attribute path: segment is a reserved word."
            );
            return Err(PolicyDslError::ParseError {
                message: format!("attribute path segment '{segment}' is a reserved word"),
                location: None,
            });
        }
    }
    Ok(())
}

fn check_reserved_words_in_block(block: &ConditionBlock) -> Result<(), PolicyDslError> {
    for conjunction in &block.disjuncts {
        for condition in conjunction {
            check_reserved_words_in_condition(condition)?;
        }
    }
    Ok(())
}

fn check_reserved_words_in_condition(condition: &Condition) -> Result<(), PolicyDslError> {
    match condition {
        Condition::Not(inner) => check_reserved_words_in_condition(inner),
        Condition::Group(block) => check_reserved_words_in_block(block),
        Condition::IfThenElse {
            condition,
            then_branch,
            else_branch,
        } => {
            check_reserved_words_in_condition(condition)?;
            check_reserved_words_in_condition(then_branch)?;
            check_reserved_words_in_condition(else_branch)
        }
        Condition::Has { path, .. } => reject_reserved(path),
        Condition::ContainsAll { path, .. } | Condition::ContainsAny { path, .. } => {
            reject_reserved(path)
        }
        Condition::Like { expr, .. } => check_reserved_words_in_expression(expr),
        Condition::InList { expr, .. } => check_reserved_words_in_expression(expr),
        Condition::InAttribute { expr, attribute } => {
            check_reserved_words_in_expression(expr)?;
            reject_reserved(&attribute.path)
        }
        Condition::Compare { left, right, .. } => {
            check_reserved_words_in_expression(left)?;
            check_reserved_words_in_expression(right)
        }
        Condition::BoolLiteral(_) => Ok(()),
    }
}

fn check_reserved_words_in_expression(expr: &Expression) -> Result<(), PolicyDslError> {
    match expr {
        Expression::Attribute(attr) => reject_reserved(&attr.path),
        Expression::StringLiteral(_) | Expression::NumberLiteral(_) | Expression::BooleanLiteral(_) => {
            Ok(())
        }
    }
}

fn depth_error() -> PolicyDslError {
    tracing::warn!(
        max_depth = crate::parser::MAX_CONDITION_DEPTH,
        "Rejected policy: condition nesting exceeds maximum depth."
    );
    PolicyDslError::ParseError {
        message: format!(
            "condition nesting exceeds maximum depth of {}",
            crate::parser::MAX_CONDITION_DEPTH
        ),
        location: None,
    }
}

fn check_depth_in_block(block: &ConditionBlock, depth: usize) -> Result<(), PolicyDslError> {
    if depth > crate::parser::MAX_CONDITION_DEPTH {
        return Err(depth_error());
    }
    for conjunction in &block.disjuncts {
        for condition in conjunction {
            check_depth_in_condition(condition, depth)?;
        }
    }
    Ok(())
}

fn check_depth_in_condition(condition: &Condition, depth: usize) -> Result<(), PolicyDslError> {
    if depth > crate::parser::MAX_CONDITION_DEPTH {
        return Err(depth_error());
    }
    match condition {
        Condition::Not(inner) => check_depth_in_condition(inner, depth + 1),
        Condition::Group(block) => check_depth_in_block(block, depth + 1),
        Condition::IfThenElse {
            condition,
            then_branch,
            else_branch,
        } => {
            check_depth_in_condition(condition, depth + 1)?;
            check_depth_in_condition(then_branch, depth + 1)?;
            check_depth_in_condition(else_branch, depth + 1)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_policy;

    #[test]
    fn accepts_well_formed_policy() {
        let result = parse_policy(
            r#"permit(principal, action, resource) when { principal.tenant_id == "a" };"#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_reserved_word_path_segment() {
        let result =
            parse_policy(r#"permit(principal, action, resource) when { principal.like == "a" };"#);
        assert!(matches!(result, Err(PolicyDslError::ParseError { .. })));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut source = String::from("permit(principal, action, resource) when { ");
        for _ in 0..40 {
            source.push('!');
        }
        source.push_str("true };");
        let result = parse_policy(&source);
        assert!(matches!(result, Err(PolicyDslError::ParseError { .. })));
    }
}
