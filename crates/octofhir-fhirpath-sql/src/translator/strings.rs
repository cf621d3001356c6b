//! String, math and conversion functions, plus the small boolean and
//! reference helpers (`not`, `hasValue`, `iif`, `getResourceKey`,
//! `getReferenceKey`).
//!
//! String and math functions only validate arity and wire the subject into a
//! dialect primitive. The subject is the call target; without a target it is
//! the current focus, or the first argument when one more argument than the
//! function's own parameters is given (`upper(name.family)`).

use super::{SqlEmitter, check_arity, type_name};
use crate::ast::{ExpressionNode, FunctionCallNode, LiteralType, SqlDataType};
use crate::context::TranslationContext;
use crate::dialect::{MathFunction, validate_identifier};
use crate::error::{Arity, Result, TranslationError};
use crate::fragment::{META_PRODUCED_BY, SqlFragment};

const STRING_FUNCTIONS: &[&str] = &[
    "contains",
    "startsWith",
    "endsWith",
    "matches",
    "replaceMatches",
    "upper",
    "lower",
    "trim",
    "length",
    "substring",
    "toString",
    "toInteger",
    "toDecimal",
    "abs",
    "ceiling",
    "floor",
    "truncate",
    "round",
];

pub(super) fn is_string_function(name: &str) -> bool {
    STRING_FUNCTIONS.contains(&name)
}

/// Declared parameters of a string or math function.
fn parameters(name: &str) -> Arity {
    match name {
        "contains" | "startsWith" | "endsWith" | "matches" => Arity::Exactly(1),
        "replaceMatches" => Arity::Exactly(2),
        "substring" => Arity::Between(1, 2),
        "round" => Arity::Between(0, 1),
        _ => Arity::Exactly(0),
    }
}

fn math_function(name: &str) -> Option<MathFunction> {
    match name {
        "abs" => Some(MathFunction::Abs),
        "ceiling" => Some(MathFunction::Ceiling),
        "floor" => Some(MathFunction::Floor),
        "truncate" => Some(MathFunction::Truncate),
        "round" => Some(MathFunction::Round),
        _ => None,
    }
}

/// Escape `LIKE` wildcards for use with `ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn string_literal_value(node: &ExpressionNode) -> Option<&str> {
    match node {
        ExpressionNode::Literal(lit) if lit.literal_type == LiteralType::String => {
            Some(lit.value.as_str())
        }
        _ => None,
    }
}

impl SqlEmitter<'_> {
    pub(super) fn translate_string_function(
        &self,
        call: &FunctionCallNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let name = call.name.as_str();
        let math = math_function(name);
        let subject_type = if math.is_some() {
            SqlDataType::Decimal
        } else {
            SqlDataType::Text
        };
        let (subject, args) = self.subject(call, parameters(name), subject_type, ctx)?;
        let s = subject.expression.as_str();

        let mut parts = vec![&subject];
        let operands = args
            .iter()
            .map(|arg| {
                let ty = if matches!(name, "substring" | "round") {
                    SqlDataType::Integer
                } else {
                    SqlDataType::Text
                };
                self.typed_operand(arg, ty, ctx)
            })
            .collect::<Result<Vec<_>>>()?;
        parts.extend(operands.iter());
        let arg = |i: usize| operands.get(i).map(|f| f.expression.as_str());

        let expression = match (name, math) {
            ("contains" | "startsWith" | "endsWith", _) => {
                let (prefix, suffix) = match name {
                    "contains" => ("%", "%"),
                    "startsWith" => ("", "%"),
                    _ => ("%", ""),
                };
                match string_literal_value(&args[0]) {
                    Some(value) => {
                        let pattern = format!("{prefix}{}{suffix}", escape_like(value));
                        format!(
                            "({s} LIKE {} ESCAPE '\\')",
                            self.dialect.string_literal(&pattern)
                        )
                    }
                    None => {
                        let (head, tail) = (
                            self.dialect.string_literal(prefix),
                            self.dialect.string_literal(suffix),
                        );
                        let mut pieces = Vec::new();
                        if !prefix.is_empty() {
                            pieces.push(head.as_str());
                        }
                        pieces.push(arg(0).unwrap_or("NULL"));
                        if !suffix.is_empty() {
                            pieces.push(tail.as_str());
                        }
                        format!("({s} LIKE {})", self.dialect.string_concat(&pieces))
                    }
                }
            }
            ("matches", _) => self.dialect.regex_match(s, arg(0).unwrap_or("NULL")),
            ("replaceMatches", _) => self.dialect.regex_replace(
                s,
                arg(0).unwrap_or("NULL"),
                arg(1).unwrap_or("NULL"),
            ),
            ("upper", _) => self.dialect.upper(s),
            ("lower", _) => self.dialect.lower(s),
            ("trim", _) => self.dialect.trim(s),
            ("length", _) => self.dialect.string_length(s),
            ("substring", _) => {
                // FHIRPath positions are 0-based.
                let start = format!("({} + 1)", arg(0).unwrap_or("0"));
                self.dialect.substring(s, &start, arg(1))
            }
            ("toString", _) => s.to_string(),
            ("toInteger", _) => self.dialect.cast(s, SqlDataType::Integer),
            ("toDecimal", _) => self.dialect.cast(s, SqlDataType::Decimal),
            (_, Some(function)) => self.dialect.math_function(function, s, arg(0)),
            _ => return Err(TranslationError::unsupported_function(name)),
        };

        Ok(self
            .scalar(ctx, expression)
            .absorbing(parts)
            .with_metadata(META_PRODUCED_BY, name))
    }

    /// Resolve the subject of a string function and the remaining arguments.
    fn subject<'a>(
        &self,
        call: &'a FunctionCallNode,
        parameters: Arity,
        sql_type: SqlDataType,
        ctx: &mut TranslationContext,
    ) -> Result<(SqlFragment, &'a [ExpressionNode])> {
        let name = call.name.as_str();
        let args = call.arguments.as_slice();

        if let Some(target) = call.target.as_deref() {
            check_arity(name, parameters, args.len())?;
            return Ok((self.typed_operand(target, sql_type, ctx)?, args));
        }
        if parameters.accepts(args.len()) {
            let expression = self.extract(ctx, sql_type);
            return Ok((self.scalar(ctx, expression), args));
        }
        match args.split_first() {
            Some((first, rest)) if parameters.accepts(rest.len()) => {
                Ok((self.typed_operand(first, sql_type, ctx)?, rest))
            }
            _ => Err(TranslationError::arity(name, parameters, args.len())),
        }
    }

    /// `not()`: boolean negation of the focus.
    pub(super) fn translate_not(
        &self,
        target: Option<&ExpressionNode>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let operand = match target {
            Some(target) => self.typed_operand(target, SqlDataType::Boolean, ctx)?,
            None => self.scalar(ctx, self.extract(ctx, SqlDataType::Boolean)),
        };
        Ok(self
            .scalar(ctx, format!("(NOT {})", operand.expression))
            .absorbing([&operand]))
    }

    /// `hasValue()`: the focus is present.
    pub(super) fn translate_has_value(
        &self,
        target: Option<&ExpressionNode>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        let value = self.extract(&scope, SqlDataType::Json);
        Ok(self
            .scalar(&scope, format!("({value} IS NOT NULL)"))
            .with_dependencies(dependencies))
    }

    /// `getResourceKey()`: the record identifier column.
    pub(super) fn translate_resource_key(&self, ctx: &TranslationContext) -> SqlFragment {
        let table = ctx.current_table();
        self.subquery(ctx, format!("{table}.{}", ctx.id_column()))
            .with_metadata(META_PRODUCED_BY, "getResourceKey")
    }

    /// `getReferenceKey([type])`: the id part of a `Reference.reference`.
    pub(super) fn translate_reference_key(
        &self,
        target: Option<&ExpressionNode>,
        resource_type: Option<&ExpressionNode>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let resource_type = resource_type.map(type_name);
        if let Some(resource_type) = &resource_type {
            validate_identifier(resource_type)?;
        }

        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        if scope.parent_path().last().map(String::as_str) != Some("reference") {
            scope.push_path("reference");
        }
        let reference = self.extract(&scope, SqlDataType::Text);

        let literal = |value: &str| self.dialect.string_literal(value);
        let without_history =
            self.dialect
                .regex_replace(&reference, &literal("/_history/.*$"), &literal(""));
        let key = self
            .dialect
            .regex_replace(&without_history, &literal("^.*/"), &literal(""));

        let expression = match resource_type {
            Some(resource_type) => {
                let pattern = format!("(^|/){resource_type}/[^/]+(/_history/[^/]+)?$");
                self.dialect.case_expression(
                    &[(self.dialect.regex_match(&reference, &literal(&pattern)), key)],
                    None,
                )
            }
            None => key,
        };
        Ok(self
            .scalar(&scope, expression)
            .with_dependencies(dependencies)
            .with_metadata(META_PRODUCED_BY, "getReferenceKey"))
    }

    /// `iif(criterion, then[, otherwise])`.
    pub(super) fn translate_iif(
        &self,
        args: &[ExpressionNode],
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let [criterion, then, rest @ ..] = args else {
            return Err(TranslationError::arity("iif", Arity::Between(2, 3), args.len()));
        };
        let condition = self.typed_operand(criterion, SqlDataType::Boolean, ctx)?;
        let then = self.operand(then, ctx)?;
        let otherwise = rest
            .first()
            .map(|node| self.operand(node, ctx))
            .transpose()?;

        let expression = self.dialect.case_expression(
            &[(condition.expression.clone(), then.expression.clone())],
            otherwise.as_ref().map(|f| f.expression.as_str()),
        );
        let mut parts = vec![&condition, &then];
        parts.extend(otherwise.as_ref());
        Ok(self.scalar(ctx, expression).absorbing(parts))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::ExpressionNode;
    use crate::dialect::{DialectKind, dialect_for};
    use crate::error::TranslationError;
    use crate::translator::AstToSqlTranslator;

    fn translate(kind: DialectKind, node: &ExpressionNode) -> crate::error::Result<String> {
        AstToSqlTranslator::new(dialect_for(kind), "Patient")
            .translate(node)
            .map(|mut fragments| fragments.remove(fragments.len() - 1).expression)
    }

    fn pg(node: &ExpressionNode) -> String {
        translate(DialectKind::Postgres, node).unwrap()
    }

    #[test]
    fn test_starts_with_literal_escapes_wildcards() {
        let ast = ExpressionNode::identifier("name.family")
            .invoke("startsWith", vec![ExpressionNode::string("O'_%")]);
        assert_eq!(
            pg(&ast),
            "((jsonb_path_query_first(resource.resource, '$.name.family') #>> '{}') LIKE 'O''\\_\\%%' ESCAPE '\\')"
        );
    }

    #[test]
    fn test_contains_with_expression_argument() {
        let ast = ExpressionNode::identifier("name.family")
            .invoke("contains", vec![ExpressionNode::identifier("name.given")]);
        let sql = pg(&ast);
        assert!(sql.contains("LIKE ('%' || "), "{sql}");
        assert!(sql.ends_with("|| '%'))"), "{sql}");
    }

    #[test]
    fn test_function_without_target_operates_on_focus() {
        let ast = ExpressionNode::identifier("name.family")
            .child(ExpressionNode::function("upper", vec![]));
        assert_eq!(
            pg(&ast),
            "UPPER((jsonb_path_query_first(resource.resource, '$.name.family') #>> '{}'))"
        );
    }

    #[test]
    fn test_first_argument_as_subject() {
        let ast = ExpressionNode::function("lower", vec![ExpressionNode::identifier("gender")]);
        assert_eq!(
            pg(&ast),
            "LOWER((jsonb_path_query_first(resource.resource, '$.gender') #>> '{}'))"
        );
    }

    #[test]
    fn test_arity_with_target() {
        let too_many = ExpressionNode::identifier("gender").invoke(
            "contains",
            vec![ExpressionNode::string("a"), ExpressionNode::string("b")],
        );
        assert!(matches!(
            translate(DialectKind::Postgres, &too_many),
            Err(TranslationError::ArgumentArity { actual: 2, .. })
        ));

        let too_few = ExpressionNode::identifier("gender").invoke("matches", vec![]);
        assert!(matches!(
            translate(DialectKind::Postgres, &too_few),
            Err(TranslationError::ArgumentArity { actual: 0, .. })
        ));
    }

    #[test]
    fn test_regex_functions_per_dialect() {
        let ast = ExpressionNode::identifier("telecom.value")
            .invoke("matches", vec![ExpressionNode::string("^[0-9]+$")]);
        assert!(pg(&ast).ends_with(" ~ '^[0-9]+$')"));
        let duck = translate(DialectKind::DuckDb, &ast).unwrap();
        assert!(duck.starts_with("regexp_matches("), "{duck}");

        let ast = ExpressionNode::identifier("telecom.value").invoke(
            "replaceMatches",
            vec![ExpressionNode::string("-"), ExpressionNode::string("")],
        );
        assert!(pg(&ast).starts_with("regexp_replace("));
    }

    #[test]
    fn test_substring_is_zero_based() {
        let ast = ExpressionNode::identifier("name.family").invoke(
            "substring",
            vec![ExpressionNode::integer(0), ExpressionNode::integer(3)],
        );
        assert!(pg(&ast).ends_with(", (0 + 1), 3)"));
    }

    #[test]
    fn test_math_functions() {
        let ast = ExpressionNode::identifier("valueQuantity.value")
            .invoke("round", vec![ExpressionNode::integer(2)]);
        let sql = pg(&ast);
        assert!(sql.starts_with("round(CAST("), "{sql}");
        assert!(sql.ends_with("AS NUMERIC), 2)"), "{sql}");

        let ast = ExpressionNode::identifier("valueQuantity.value").invoke("abs", vec![]);
        assert!(pg(&ast).starts_with("abs("));
    }

    #[test]
    fn test_conversions() {
        let ast = ExpressionNode::identifier("multipleBirthInteger").invoke("toInteger", vec![]);
        assert!(pg(&ast).ends_with("AS BIGINT)"));
    }

    #[test]
    fn test_not_and_has_value() {
        let ast = ExpressionNode::identifier("active").invoke("not", vec![]);
        assert_eq!(
            pg(&ast),
            "(NOT (jsonb_path_query_first(resource.resource, '$.active') #>> '{}')::boolean)"
        );

        let ast = ExpressionNode::identifier("birthDate").invoke("hasValue", vec![]);
        assert_eq!(
            pg(&ast),
            "(jsonb_path_query_first(resource.resource, '$.birthDate') IS NOT NULL)"
        );
    }

    #[test]
    fn test_resource_key() {
        let ast = ExpressionNode::function("getResourceKey", vec![]);
        assert_eq!(pg(&ast), "resource.id");
    }

    #[test]
    fn test_reference_key() {
        let ast = ExpressionNode::identifier("managingOrganization")
            .invoke("getReferenceKey", vec![]);
        let sql = pg(&ast);
        assert!(sql.contains("'$.managingOrganization.reference'"), "{sql}");
        assert!(sql.contains("'^.*/'"), "{sql}");

        let typed = ExpressionNode::identifier("managingOrganization").invoke(
            "getReferenceKey",
            vec![ExpressionNode::identifier("Organization")],
        );
        let sql = pg(&typed);
        assert!(sql.starts_with("CASE WHEN ("), "{sql}");
        assert!(sql.contains("Organization/[^/]+"), "{sql}");
        assert!(sql.ends_with(" END"), "{sql}");
    }

    #[test]
    fn test_reference_key_rejects_odd_type_names() {
        let ast = ExpressionNode::identifier("subject").invoke(
            "getReferenceKey",
            vec![ExpressionNode::string("Patient'; --")],
        );
        assert!(translate(DialectKind::Postgres, &ast).is_err());
    }

    #[test]
    fn test_iif() {
        let ast = ExpressionNode::function(
            "iif",
            vec![
                ExpressionNode::identifier("active"),
                ExpressionNode::string("yes"),
                ExpressionNode::string("no"),
            ],
        );
        let sql = pg(&ast);
        assert!(sql.starts_with("CASE WHEN (jsonb_path_query_first"), "{sql}");
        assert!(sql.ends_with("THEN 'yes' ELSE 'no' END"), "{sql}");
    }
}
