//! Transformation: `select`.
//!
//! A top-level `select` unnests the focus, evaluates the projection per
//! element and re-aggregates grouped by record identifier into a new CTE,
//! which becomes the current table. Inside an element scope the same
//! projection is an inline subquery instead, since the enclosing query
//! already owns the row.

use super::SqlEmitter;
use crate::ast::{ExpressionNode, SqlDataType};
use crate::context::TranslationContext;
use crate::error::Result;
use crate::fragment::{META_CTE_NAME, META_PRODUCED_BY, META_RESULT_COLUMN, SqlFragment};

impl SqlEmitter<'_> {
    pub(super) fn translate_select(
        &self,
        target: Option<&ExpressionNode>,
        projection: &ExpressionNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;

        if scope.in_element_scope() {
            let alias = scope.next_alias("s");
            let source = self.iterate_focus(&scope, &alias);
            let projected = self.project(projection, &alias, &mut scope)?;
            let expression = format!(
                "(SELECT {} FROM {})",
                self.aggregate_projection(&projected.expression),
                source
            );
            return Ok(self
                .subquery(&scope, expression)
                .with_dependencies(dependencies)
                .inheriting([&projected])
                .with_metadata(META_PRODUCED_BY, "select"));
        }

        let prior = scope.current_table().to_string();
        let id = scope.id_column().to_string();
        let json = scope.json_column().to_string();

        let alias = scope.next_alias("e");
        let source = self.iterate_focus(&scope, &alias);
        let projected = self.project(projection, &alias, &mut scope)?;
        let cte = scope.next_cte_name();

        let query = format!(
            "SELECT {prior}.{id} AS {id}, {} AS {json} FROM {} LEFT JOIN LATERAL {source} ON TRUE GROUP BY {prior}.{id}",
            self.aggregate_projection(&projected.expression),
            scope.table_source(&prior),
        );

        scope.register_table_columns(cte.clone(), vec![id, json.clone()]);
        scope.set_current_table(cte.clone());

        Ok(SqlFragment::new(query, cte.clone())
            .with_unnest(true)
            .with_aggregate(true)
            .with_dependency(prior)
            .with_dependencies(dependencies)
            .inheriting([&projected])
            .with_metadata(META_CTE_NAME, cte)
            .with_metadata(META_RESULT_COLUMN, json)
            .with_metadata(META_PRODUCED_BY, "select"))
    }

    /// Evaluate the projection against one element, as JSON.
    fn project(
        &self,
        projection: &ExpressionNode,
        alias: &str,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        self.in_element(ctx, alias, |element| {
            self.typed_operand(projection, SqlDataType::Json, element)
        })
    }

    fn aggregate_projection(&self, projected: &str) -> String {
        self.dialect
            .json_array_agg(projected, Some(&format!("{projected} IS NOT NULL")))
    }
}
