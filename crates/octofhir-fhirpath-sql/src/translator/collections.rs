//! Collection functions: `subsetOf`, `supersetOf`, `join`.
//!
//! Set containment compares the elements of two iterated collections with a
//! double `NOT EXISTS`. Over the root table that is a plain subquery. Once
//! the chain runs on a CTE the check becomes a stage of its own, which
//! carries every column of the prior stage through so that later steps can
//! still read the per-element values bound upstream.

use super::SqlEmitter;
use crate::ast::{ExpressionNode, SqlDataType};
use crate::context::TranslationContext;
use crate::error::{Result, TranslationError};
use crate::fragment::{
    META_CTE_NAME, META_PRESERVED_COLUMNS, META_PRODUCED_BY, META_RESULT_COLUMN, SqlFragment,
};

const RESULT_COLUMN: &str = "result";

impl SqlEmitter<'_> {
    /// `subsetOf(other)` or, with `superset`, `supersetOf(other)`.
    pub(super) fn translate_subset(
        &self,
        target: Option<&ExpressionNode>,
        other: &ExpressionNode,
        superset: bool,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let function = if superset { "supersetOf" } else { "subsetOf" };

        let (focus_source, focus_alias, mut dependencies) = {
            let mut scope = ctx.scope();
            let dependencies = self.focus_target(target, &mut scope)?;
            let alias = scope.next_alias("l");
            (self.iterate_focus(&scope, &alias), alias, dependencies)
        };
        let table = ctx.current_table().to_string();

        let (other_source, other_alias) = {
            let mut scope = ctx.scope();
            dependencies.extend(self.focus(other, &mut scope)?);
            let alias = scope.next_alias("r");
            (self.iterate_focus(&scope, &alias), alias)
        };
        if ctx.current_table() != table {
            return Err(TranslationError::unsupported_function(format!(
                "{function} with an argument that needs its own stage"
            )));
        }

        let (inner, inner_alias, outer, outer_alias) = if superset {
            (&focus_source, &focus_alias, &other_source, &other_alias)
        } else {
            (&other_source, &other_alias, &focus_source, &focus_alias)
        };
        let predicate = format!(
            "(NOT EXISTS (SELECT 1 FROM {outer} WHERE NOT EXISTS (SELECT 1 FROM {inner} WHERE {outer_alias}.value = {inner_alias}.value)))"
        );

        if !ctx.is_derived_table(&table) || ctx.in_element_scope() {
            return Ok(self
                .subquery(ctx, predicate)
                .with_dependencies(dependencies)
                .with_metadata(META_PRODUCED_BY, function));
        }

        let columns = ctx.table_columns(&table);
        let result_column = if columns.iter().any(|c| c == RESULT_COLUMN) {
            ctx.next_alias(RESULT_COLUMN)
        } else {
            RESULT_COLUMN.to_string()
        };
        let preserved = columns
            .iter()
            .map(|column| format!("{table}.{column} AS {column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let cte = ctx.next_cte_name();
        let query = format!(
            "SELECT {preserved}, {predicate} AS {result_column} FROM {}",
            ctx.table_source(&table)
        );

        let mut stage_columns = columns.clone();
        stage_columns.push(result_column.clone());
        ctx.register_table_columns(cte.clone(), stage_columns);
        ctx.set_current_table(cte.clone());

        Ok(SqlFragment::new(query, cte.clone())
            .with_dependency(table)
            .with_dependencies(dependencies)
            .with_metadata(META_CTE_NAME, cte)
            .with_metadata(META_PRESERVED_COLUMNS, columns.join(","))
            .with_metadata(META_RESULT_COLUMN, result_column)
            .with_metadata(META_PRODUCED_BY, function))
    }

    /// `join([separator])`: the focus's elements as one string.
    pub(super) fn translate_join(
        &self,
        target: Option<&ExpressionNode>,
        separator: Option<&ExpressionNode>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let separator = match separator {
            Some(node) => self.typed_operand(node, SqlDataType::Text, ctx)?,
            None => self.scalar(ctx, self.dialect.string_literal("")),
        };

        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        let alias = scope.next_alias("j");
        let source = self.iterate_focus(&scope, &alias);
        let element = self
            .dialect
            .extract_json_field(&format!("{alias}.value"), "$");
        let expression = format!(
            "(SELECT {} FROM {})",
            self.dialect.string_aggregate(&element, &separator.expression),
            source
        );
        Ok(self
            .subquery(&scope, expression)
            .with_dependencies(dependencies)
            .inheriting([&separator])
            .with_metadata(META_PRODUCED_BY, "join"))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{ConditionalKind, ExpressionNode};
    use crate::dialect::{DialectKind, dialect_for};
    use crate::error::TranslationError;
    use crate::fragment::META_PRESERVED_COLUMNS;
    use crate::translator::AstToSqlTranslator;

    fn translator() -> AstToSqlTranslator {
        AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), "Patient")
    }

    #[test]
    fn test_subset_over_root_is_subquery() {
        let ast = ExpressionNode::identifier("name.given").invoke(
            "subsetOf",
            vec![ExpressionNode::identifier("name.family")],
        );
        let fragments = translator().translate(&ast).unwrap();
        assert_eq!(fragments.len(), 1);
        let sql = &fragments[0].expression;
        assert!(sql.starts_with("(NOT EXISTS (SELECT 1 FROM jsonb_array_elements("), "{sql}");
        assert!(sql.contains("WHERE l_1.value = r_2.value"), "{sql}");
        assert_eq!(fragments[0].dependencies, vec!["resource"]);
    }

    #[test]
    fn test_superset_swaps_sides() {
        let ast = ExpressionNode::identifier("name.given").invoke(
            "supersetOf",
            vec![ExpressionNode::identifier("name.family")],
        );
        let sql = translator().translate(&ast).unwrap().remove(0).expression;
        assert!(sql.contains("WHERE r_2.value = l_1.value"), "{sql}");
    }

    #[test]
    fn test_subset_after_stage_preserves_columns() {
        let selected = ExpressionNode::conditional(
            ConditionalKind::Select,
            vec![
                ExpressionNode::identifier("name"),
                ExpressionNode::identifier("given"),
            ],
        );
        let ast = selected.invoke("subsetOf", vec![ExpressionNode::identifier("$this")]);
        let mut translator = translator();
        let fragments = translator.translate(&ast).unwrap();
        assert_eq!(fragments.len(), 2);

        let stage = &fragments[1];
        assert_eq!(stage.cte_name(), Some("cte_2"));
        assert_eq!(stage.result_column(), Some("result"));
        assert_eq!(
            stage.metadata.get(META_PRESERVED_COLUMNS).map(String::as_str),
            Some("id,resource")
        );
        assert!(
            stage
                .expression
                .starts_with("SELECT cte_1.id AS id, cte_1.resource AS resource, (NOT EXISTS"),
            "{}",
            stage.expression
        );
        assert!(stage.expression.ends_with("AS result FROM cte_1"));
        assert!(stage.dependencies.contains(&"cte_1".to_string()));
        assert_eq!(
            translator.context().table_columns("cte_2"),
            vec!["id", "resource", "result"]
        );
    }

    #[test]
    fn test_subset_arity() {
        let ast = ExpressionNode::identifier("name").invoke("subsetOf", vec![]);
        assert!(matches!(
            translator().translate(&ast),
            Err(TranslationError::ArgumentArity { actual: 0, .. })
        ));
    }

    #[test]
    fn test_join_with_separator() {
        let ast = ExpressionNode::identifier("name.given")
            .invoke("join", vec![ExpressionNode::string(", ")]);
        let fragments = translator().translate(&ast).unwrap();
        let sql = &fragments[0].expression;
        assert!(sql.starts_with("(SELECT STRING_AGG((j_1.value #>> '{}'), ', ') FROM "), "{sql}");
        assert_eq!(fragments[0].dependencies, vec!["resource"]);
    }

    #[test]
    fn test_join_defaults_to_empty_separator() {
        let ast = ExpressionNode::identifier("name.given").invoke("join", vec![]);
        let sql = translator().translate(&ast).unwrap().remove(0).expression;
        assert!(sql.contains(", '')"), "{sql}");
    }
}
