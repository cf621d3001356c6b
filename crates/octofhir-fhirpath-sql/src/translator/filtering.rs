//! Filtering: `where`, `exists`, `all`, `empty`, `extension`.
//!
//! Every criteria-taking function becomes a self-contained subquery over the
//! elements of the focus. Criteria run in an isolated element scope where
//! `$this` is the element. None of these shapes limit rows.

use super::SqlEmitter;
use crate::ast::{ExpressionNode, SqlDataType};
use crate::context::TranslationContext;
use crate::dialect::AggregateKind;
use crate::error::Result;
use crate::fragment::SqlFragment;

impl SqlEmitter<'_> {
    /// `where(criteria)`: the matching elements as a JSON array.
    pub(super) fn translate_where(
        &self,
        target: Option<&ExpressionNode>,
        criteria: &ExpressionNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        let alias = scope.next_alias("w");
        let source = self.iterate_focus(&scope, &alias);
        let condition = self.element_predicate(criteria, &alias, &mut scope)?;

        let expression = format!(
            "(SELECT {} FROM {} WHERE {})",
            self.dialect.json_array_agg(&format!("{alias}.value"), None),
            source,
            condition.expression
        );
        Ok(self
            .subquery(&scope, expression)
            .with_dependencies(dependencies)
            .inheriting([&condition]))
    }

    /// `exists([criteria])`.
    ///
    /// Without criteria a path exists when its length is not NULL. A field
    /// stored as an explicit empty array `[]` has length 0 and therefore
    /// counts as existing. Stored FHIR omits empty arrays, so this is kept
    /// rather than paying for a length comparison on every path.
    pub(super) fn translate_exists(
        &self,
        target: Option<&ExpressionNode>,
        criteria: Option<&ExpressionNode>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;

        let Some(criteria) = criteria else {
            let expression = if scope.parent_path().is_empty() {
                // `$this` or a derived collection: count its members.
                format!("({} > 0)", self.count_focus(&scope))
            } else {
                format!("({} IS NOT NULL)", self.focus_length(&scope))
            };
            return Ok(self.scalar(&scope, expression).with_dependencies(dependencies));
        };

        let alias = scope.next_alias("x");
        let source = self.iterate_focus(&scope, &alias);
        let condition = self.element_predicate(criteria, &alias, &mut scope)?;
        let expression = format!(
            "EXISTS (SELECT 1 FROM {} WHERE {})",
            source, condition.expression
        );
        Ok(self
            .subquery(&scope, expression)
            .with_dependencies(dependencies)
            .inheriting([&condition]))
    }

    /// `empty()`: the negation of `exists()`, including its treatment of an
    /// explicit empty array as present.
    pub(super) fn translate_empty(
        &self,
        target: Option<&ExpressionNode>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        let expression = if scope.parent_path().is_empty() {
            format!("({} = 0)", self.count_focus(&scope))
        } else {
            format!("({} IS NULL)", self.focus_length(&scope))
        };
        Ok(self.scalar(&scope, expression).with_dependencies(dependencies))
    }

    /// `all(criteria)`: true for an empty collection.
    pub(super) fn translate_all(
        &self,
        target: Option<&ExpressionNode>,
        criteria: &ExpressionNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        let alias = scope.next_alias("a");
        let source = self.iterate_focus(&scope, &alias);
        let condition = self.element_predicate(criteria, &alias, &mut scope)?;

        let expression = format!(
            "COALESCE((SELECT {} FROM {}), TRUE)",
            self.dialect
                .aggregate_function(AggregateKind::BoolAnd, &condition.expression),
            source
        );
        Ok(self
            .subquery(&scope, expression)
            .with_dependencies(dependencies)
            .inheriting([&condition]))
    }

    /// `extension(url)`: the extensions of the focus with a matching `url`.
    pub(super) fn translate_extension(
        &self,
        target: Option<&ExpressionNode>,
        url: &ExpressionNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let url = self.typed_operand(url, SqlDataType::Text, ctx)?;

        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        scope.push_path("extension");
        let alias = scope.next_alias("ext");
        let source = self.iterate_focus(&scope, &alias);
        let element_url = self
            .dialect
            .extract_json_field(&format!("{alias}.value"), "$.url");

        let expression = format!(
            "(SELECT {} FROM {} WHERE {} = {})",
            self.dialect.json_array_agg(&format!("{alias}.value"), None),
            source,
            element_url,
            url.expression
        );
        Ok(self
            .subquery(&scope, expression)
            .with_dependencies(dependencies)
            .inheriting([&url]))
    }

    /// Translate criteria against the elements of iteration `alias`.
    pub(super) fn element_predicate(
        &self,
        criteria: &ExpressionNode,
        alias: &str,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        self.in_element(ctx, alias, |element| {
            self.typed_operand(criteria, SqlDataType::Boolean, element)
        })
    }

    /// Array length of the focus; NULL when the path is absent.
    pub(super) fn focus_length(&self, ctx: &TranslationContext) -> String {
        let this = ctx.this_binding();
        self.dialect
            .json_array_length(&this.expression, Some(&ctx.get_json_path()))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::ExpressionNode;
    use crate::dialect::{DialectKind, dialect_for};
    use crate::error::TranslationError;
    use crate::translator::AstToSqlTranslator;

    fn translator() -> AstToSqlTranslator {
        AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), "Patient")
    }

    fn official() -> ExpressionNode {
        ExpressionNode::comparison(
            "=",
            ExpressionNode::identifier("use"),
            ExpressionNode::string("official"),
        )
    }

    #[test]
    fn test_where_is_self_contained_subquery() {
        let ast = ExpressionNode::identifier("name").invoke("where", vec![official()]);
        let fragments = translator().translate(&ast).unwrap();
        assert_eq!(fragments.len(), 1);

        let fragment = &fragments[0];
        assert!(!fragment.requires_unnest);
        assert_eq!(fragment.dependencies, vec!["resource"]);
        assert!(fragment.expression.contains("'official'"));
        assert!(fragment.expression.contains("jsonb_array_elements("));
        assert!(
            fragment
                .expression
                .contains("(jsonb_path_query_first(w_1.value, '$.use') #>> '{}') = 'official'"),
            "criteria should read the element: {}",
            fragment.expression
        );
    }

    #[test]
    fn test_where_then_first_field() {
        let ast = ExpressionNode::identifier("name")
            .invoke("where", vec![official()])
            .invoke("first", vec![])
            .child(ExpressionNode::identifier("family"));
        let fragments = translator().translate(&ast).unwrap();
        let sql = &fragments[0].expression;
        assert!(sql.contains("'$[0].family'"), "{sql}");
        assert_eq!(fragments[0].dependencies, vec!["resource"]);
    }

    #[test]
    fn test_exists_without_criteria() {
        let ast = ExpressionNode::identifier("telecom").invoke("exists", vec![]);
        let fragments = translator().translate(&ast).unwrap();
        let sql = &fragments[0].expression;
        assert!(sql.ends_with("IS NOT NULL)"), "{sql}");
        assert!(sql.contains("jsonb_array_length"), "{sql}");
        assert!(fragments[0].dependencies.is_empty());
    }

    #[test]
    fn test_exists_without_criteria_checks_length_not_value() {
        // An explicit `[]` has length 0, which is not NULL.
        let ast = ExpressionNode::identifier("telecom").invoke("exists", vec![]);
        let sql = translator().translate(&ast).unwrap().remove(0).expression;
        assert!(!sql.contains("> 0"), "{sql}");
        assert!(sql.ends_with("IS NOT NULL)"), "{sql}");

        let ast = ExpressionNode::identifier("telecom").invoke("empty", vec![]);
        let sql = translator().translate(&ast).unwrap().remove(0).expression;
        assert!(!sql.contains("= 0"), "{sql}");
    }

    #[test]
    fn test_exists_with_criteria() {
        let ast = ExpressionNode::identifier("name").invoke("exists", vec![official()]);
        let fragments = translator().translate(&ast).unwrap();
        assert!(fragments[0].expression.starts_with("EXISTS (SELECT 1 FROM "));
        assert_eq!(fragments[0].dependencies, vec!["resource"]);
    }

    #[test]
    fn test_exists_with_two_arguments() {
        let ast = ExpressionNode::identifier("name")
            .invoke("exists", vec![official(), official()]);
        assert!(matches!(
            translator().translate(&ast),
            Err(TranslationError::ArgumentArity { actual: 2, .. })
        ));
    }

    #[test]
    fn test_all_is_vacuously_true() {
        let ast = ExpressionNode::identifier("name").invoke("all", vec![official()]);
        let fragments = translator().translate(&ast).unwrap();
        let sql = &fragments[0].expression;
        assert!(sql.starts_with("COALESCE((SELECT bool_and("), "{sql}");
        assert!(sql.ends_with("), TRUE)"), "{sql}");
    }

    #[test]
    fn test_empty() {
        let ast = ExpressionNode::identifier("deceasedBoolean").invoke("empty", vec![]);
        let sql = translator().translate(&ast).unwrap().remove(0).expression;
        assert!(sql.ends_with("IS NULL)"), "{sql}");
    }

    #[test]
    fn test_extension_filters_by_url() {
        let ast = ExpressionNode::function(
            "extension",
            vec![ExpressionNode::string("http://example.org/race")],
        )
        .child(ExpressionNode::identifier("valueString"));
        let fragments = translator().translate(&ast).unwrap();
        let sql = &fragments[0].expression;
        assert!(sql.contains("'$.extension'"), "{sql}");
        assert!(sql.contains("= 'http://example.org/race'"), "{sql}");
        assert!(sql.contains("'$.valueString'"), "{sql}");
        assert!(!sql.to_uppercase().contains("LIMIT"), "{sql}");
        assert_eq!(fragments[0].dependencies, vec!["resource"]);
    }

    #[test]
    fn test_criteria_cannot_see_outer_path() {
        let ast = ExpressionNode::identifier("name").invoke(
            "where",
            vec![ExpressionNode::identifier("given").invoke("exists", vec![])],
        );
        let sql = translator().translate(&ast).unwrap().remove(0).expression;
        assert!(sql.contains("jsonb_path_query_first(w_1.value, '$.given')"), "{sql}");
        assert!(!sql.contains("'$.name.given'"), "{sql}");
    }
}
