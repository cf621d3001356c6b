//! Operators: `.`, comparison, logical, unary and arithmetic.

use super::SqlEmitter;
use crate::ast::{ExpressionNode, LiteralType, OperatorNode, SqlDataType};
use crate::context::TranslationContext;
use crate::dialect::{LogicalOp, MathFunction};
use crate::error::{Arity, Result, TranslationError};
use crate::fragment::SqlFragment;

impl SqlEmitter<'_> {
    pub(super) fn translate_operator(
        &self,
        node: &OperatorNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        match node.symbol.as_str() {
            "." => self.translate_path(node, ctx),
            "=" | "!=" | "<>" | "<" | ">" | "<=" | ">=" | "~" | "!~" => {
                self.translate_comparison(node, ctx)
            }
            "and" | "or" | "xor" | "implies" => self.translate_logical(node, ctx),
            "not" => self.translate_unary(node, ctx),
            "-" | "+" if node.children.len() == 1 => self.translate_unary(node, ctx),
            "+" | "-" | "*" | "/" | "div" | "mod" | "&" => self.translate_arithmetic(node, ctx),
            other => Err(TranslationError::unsupported_operator(other)),
        }
    }

    /// `left.right`: focus on the left side, evaluate the right side there.
    fn translate_path(&self, node: &OperatorNode, ctx: &mut TranslationContext) -> Result<SqlFragment> {
        let (left, right) = binary(node)?;
        let mut scope = ctx.scope();
        let dependencies = self.focus(left, &mut scope)?;
        let fragment = right.accept(self, &mut *scope)?;
        Ok(fragment.with_dependencies(dependencies))
    }

    fn translate_comparison(
        &self,
        node: &OperatorNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let (left, right) = binary(node)?;
        let lhs = self.coerced_operand(left, right, ctx)?;
        let rhs = self.coerced_operand(right, left, ctx)?;
        let (l, r) = (&lhs.expression, &rhs.expression);

        let expression = match node.symbol.as_str() {
            "~" => format!("({} = {})", self.dialect.lower(l), self.dialect.lower(r)),
            "!~" => format!("({} <> {})", self.dialect.lower(l), self.dialect.lower(r)),
            "!=" | "<>" => format!("({l} <> {r})"),
            symbol => format!("({l} {symbol} {r})"),
        };
        Ok(self.scalar(ctx, expression).absorbing([&lhs, &rhs]))
    }

    fn translate_logical(
        &self,
        node: &OperatorNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let (left, right) = binary(node)?;
        let lhs = self.typed_operand(left, SqlDataType::Boolean, ctx)?;
        let rhs = self.typed_operand(right, SqlDataType::Boolean, ctx)?;
        let (l, r) = (lhs.expression.clone(), rhs.expression.clone());

        let expression = match node.symbol.as_str() {
            "and" => self.dialect.logical_combine(LogicalOp::And, &[l, r]),
            "or" => self.dialect.logical_combine(LogicalOp::Or, &[l, r]),
            "xor" => format!("({l} <> {r})"),
            _ => self
                .dialect
                .logical_combine(LogicalOp::Or, &[format!("(NOT {l})"), r]),
        };
        Ok(self.scalar(ctx, expression).absorbing([&lhs, &rhs]))
    }

    fn translate_unary(&self, node: &OperatorNode, ctx: &mut TranslationContext) -> Result<SqlFragment> {
        let [operand] = node.children.as_slice() else {
            return Err(TranslationError::arity(
                &node.symbol,
                Arity::Exactly(1),
                node.children.len(),
            ));
        };

        let (sql_type, template): (SqlDataType, fn(&str) -> String) = match node.symbol.as_str() {
            "not" => (SqlDataType::Boolean, |x: &str| format!("(NOT {x})")),
            "-" => (SqlDataType::Decimal, |x: &str| format!("(-{x})")),
            _ => (SqlDataType::Decimal, |x: &str| x.to_string()),
        };
        let inner = self.typed_operand(operand, sql_type, ctx)?;
        Ok(self.scalar(ctx, template(&inner.expression)).absorbing([&inner]))
    }

    fn translate_arithmetic(
        &self,
        node: &OperatorNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let (left, right) = binary(node)?;
        let symbol = node.symbol.as_str();

        let concatenates = symbol == "&"
            || (symbol == "+" && (is_string_literal(left) || is_string_literal(right)));
        if concatenates {
            let lhs = self.typed_operand(left, SqlDataType::Text, ctx)?;
            let rhs = self.typed_operand(right, SqlDataType::Text, ctx)?;
            // `&` treats an empty operand as the empty string, `+` propagates it.
            let expression = if symbol == "&" {
                let l = format!("COALESCE({}, '')", lhs.expression);
                let r = format!("COALESCE({}, '')", rhs.expression);
                self.dialect.string_concat(&[l.as_str(), r.as_str()])
            } else {
                self.dialect
                    .string_concat(&[lhs.expression.as_str(), rhs.expression.as_str()])
            };
            return Ok(self.scalar(ctx, expression).absorbing([&lhs, &rhs]));
        }

        let lhs = self.typed_operand(left, SqlDataType::Decimal, ctx)?;
        let rhs = self.typed_operand(right, SqlDataType::Decimal, ctx)?;
        let (l, r) = (&lhs.expression, &rhs.expression);
        let expression = match symbol {
            "/" => format!("({} / {r})", self.dialect.cast(l, SqlDataType::Decimal)),
            "div" => self.dialect.math_function(
                MathFunction::Truncate,
                &format!("({} / {r})", self.dialect.cast(l, SqlDataType::Decimal)),
                None,
            ),
            "mod" => format!("({l} % {r})"),
            symbol => format!("({l} {symbol} {r})"),
        };
        Ok(self.scalar(ctx, expression).absorbing([&lhs, &rhs]))
    }

    /// Translate `node`, extracting navigation with the type of a literal
    /// on the other side of the comparison.
    fn coerced_operand(
        &self,
        node: &ExpressionNode,
        other: &ExpressionNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        match literal_type(other) {
            Some(t) if t.is_numeric() => self.typed_operand(node, SqlDataType::Decimal, ctx),
            Some(LiteralType::Boolean) => self.typed_operand(node, SqlDataType::Boolean, ctx),
            _ => self.operand(node, ctx),
        }
    }
}

fn binary(node: &OperatorNode) -> Result<(&ExpressionNode, &ExpressionNode)> {
    match node.children.as_slice() {
        [left, right] => Ok((left, right)),
        children => Err(TranslationError::arity(
            &node.symbol,
            Arity::Exactly(2),
            children.len(),
        )),
    }
}

fn literal_type(node: &ExpressionNode) -> Option<LiteralType> {
    match node {
        ExpressionNode::Literal(lit) => Some(lit.literal_type),
        _ => None,
    }
}

fn is_string_literal(node: &ExpressionNode) -> bool {
    node.is_literal(|t| t == LiteralType::String)
}

#[cfg(test)]
mod tests {
    use crate::ast::{ExpressionNode, OperatorType};
    use crate::dialect::{DialectKind, dialect_for};
    use crate::error::TranslationError;
    use crate::translator::AstToSqlTranslator;

    fn translate(node: &ExpressionNode) -> String {
        AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), "Observation")
            .translate(node)
            .unwrap()
            .pop()
            .unwrap()
            .expression
    }

    #[test]
    fn test_numeric_comparison_extracts_decimal() {
        let ast = ExpressionNode::comparison(
            ">",
            ExpressionNode::identifier("valueQuantity.value"),
            ExpressionNode::literal("5.5", crate::ast::LiteralType::Decimal),
        );
        assert_eq!(
            translate(&ast),
            "((jsonb_path_query_first(resource.resource, '$.valueQuantity.value') #>> '{}')::numeric > 5.5)"
        );
    }

    #[test]
    fn test_equivalence_is_case_insensitive() {
        let ast = ExpressionNode::comparison(
            "~",
            ExpressionNode::identifier("status"),
            ExpressionNode::string("FINAL"),
        );
        let sql = translate(&ast);
        assert!(sql.contains("LOWER('FINAL')"), "{sql}");
        assert!(sql.starts_with("(LOWER("), "{sql}");
    }

    #[test]
    fn test_not_equal() {
        let ast = ExpressionNode::comparison(
            "!=",
            ExpressionNode::identifier("status"),
            ExpressionNode::string("cancelled"),
        );
        assert!(translate(&ast).contains("<> 'cancelled'"));
    }

    #[test]
    fn test_logical_operators_use_boolean_extraction() {
        let ast = ExpressionNode::operator(
            "and",
            OperatorType::Logical,
            vec![
                ExpressionNode::identifier("active"),
                ExpressionNode::comparison(
                    "=",
                    ExpressionNode::identifier("gender"),
                    ExpressionNode::string("female"),
                ),
            ],
        );
        let sql = translate(&ast);
        assert!(sql.contains("'$.active') #>> '{}')::boolean AND"), "{sql}");
    }

    #[test]
    fn test_implies() {
        let ast = ExpressionNode::operator(
            "implies",
            OperatorType::Logical,
            vec![ExpressionNode::boolean(true), ExpressionNode::boolean(false)],
        );
        assert_eq!(translate(&ast), "((NOT TRUE) OR FALSE)");
    }

    #[test]
    fn test_concatenation_coalesces() {
        let ast = ExpressionNode::operator(
            "&",
            OperatorType::Binary,
            vec![ExpressionNode::identifier("name.given"), ExpressionNode::string(" ")],
        );
        let sql = translate(&ast);
        assert!(sql.starts_with("(COALESCE("), "{sql}");
        assert!(sql.ends_with("|| COALESCE(' ', ''))"), "{sql}");
    }

    #[test]
    fn test_arithmetic() {
        let ast = ExpressionNode::operator(
            "*",
            OperatorType::Binary,
            vec![ExpressionNode::integer(2), ExpressionNode::integer(3)],
        );
        assert_eq!(translate(&ast), "(2 * 3)");

        let ast = ExpressionNode::operator(
            "-",
            OperatorType::Unary,
            vec![ExpressionNode::integer(4)],
        );
        assert_eq!(translate(&ast), "(-4)");
    }

    #[test]
    fn test_union_is_unsupported() {
        let ast = ExpressionNode::operator(
            "|",
            OperatorType::Binary,
            vec![ExpressionNode::identifier("a"), ExpressionNode::identifier("b")],
        );
        let err = AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), "Patient")
            .translate(&ast)
            .unwrap_err();
        assert_eq!(err, TranslationError::unsupported_operator("|"));
    }

    #[test]
    fn test_wrong_operand_count() {
        let ast = ExpressionNode::operator(
            "=",
            OperatorType::Comparison,
            vec![ExpressionNode::identifier("a")],
        );
        let err = AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), "Patient")
            .translate(&ast)
            .unwrap_err();
        assert!(matches!(err, TranslationError::ArgumentArity { actual: 1, .. }));
    }

    #[test]
    fn test_path_operator_focuses_left() {
        let ast = ExpressionNode::identifier("code").child(ExpressionNode::identifier("text"));
        assert_eq!(
            translate(&ast),
            "(jsonb_path_query_first(resource.resource, '$.code.text') #>> '{}')"
        );
    }
}
