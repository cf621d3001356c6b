//! Aggregation: `count`, `sum`, `avg`, `min`, `max`.
//!
//! At the top level over the root table `sum`/`avg`/`min`/`max` and a
//! pathless `count` collapse the population. Inside an element scope they
//! aggregate the focus collection of the current element instead, and after
//! a CTE stage they aggregate each record's staged collection. `count` over a
//! path counts the members of that path per record.

use super::{SqlEmitter, quoted_list};
use crate::ast::{AggregateFunction, ExpressionNode, SqlDataType};
use crate::context::TranslationContext;
use crate::dialect::{AggregateKind, JsonKind};
use crate::error::Result;
use crate::fragment::{META_AGGREGATE_SCOPE, META_PRODUCED_BY, POPULATION, SqlFragment};

impl SqlEmitter<'_> {
    pub(super) fn translate_aggregate(
        &self,
        function: AggregateFunction,
        target: Option<&ExpressionNode>,
        sql_type: Option<SqlDataType>,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(target, &mut scope)?;
        let population =
            !scope.in_element_scope() && !scope.is_derived_table(scope.current_table());

        let fragment = match function {
            AggregateFunction::Count if population && scope.parent_path().is_empty() => self
                .subquery(&scope, self.dialect.aggregate_function(AggregateKind::Count, "*"))
                .with_metadata(META_AGGREGATE_SCOPE, POPULATION),
            AggregateFunction::Count => self.scalar(&scope, self.count_focus(&scope)),
            _ => {
                let kind = aggregate_kind(function);
                if population {
                    let value = self.numeric_value(self.extract(&scope, SqlDataType::Text), sql_type);
                    self.subquery(&scope, self.dialect.aggregate_function(kind, &value))
                        .with_metadata(META_AGGREGATE_SCOPE, POPULATION)
                } else {
                    let alias = scope.next_alias("g");
                    let source = self.iterate_focus(&scope, &alias);
                    let element = self
                        .dialect
                        .extract_json_field(&format!("{alias}.value"), "$");
                    let value = self.numeric_value(element, sql_type);
                    let expression = format!(
                        "(SELECT {} FROM {})",
                        self.dialect.aggregate_function(kind, &value),
                        source
                    );
                    self.subquery(&scope, expression)
                }
            }
        };

        Ok(fragment
            .with_aggregate(true)
            .with_dependencies(dependencies)
            .with_metadata(META_PRODUCED_BY, function.as_str()))
    }

    /// Number of members of the focus: array length, 1 for a present scalar,
    /// 0 when absent.
    pub(super) fn count_focus(&self, ctx: &TranslationContext) -> String {
        let this = ctx.this_binding();
        let path = ctx.get_json_path();
        let value = self.dialect.extract_json_object(&this.expression, &path);
        let length = self.dialect.json_array_length(&this.expression, Some(&path));
        let is_array = format!(
            "{} IN ({})",
            self.dialect.json_type(&value),
            quoted_list(self.dialect.json_type_names(JsonKind::Array))
        );
        let case = self.dialect.case_expression(
            &[(is_array, length), (format!("{value} IS NOT NULL"), "1".to_string())],
            Some("0"),
        );
        format!("COALESCE({case}, 0)")
    }

    /// Cast extracted text for a numeric aggregate unless text was requested.
    fn numeric_value(&self, text: String, sql_type: Option<SqlDataType>) -> String {
        match sql_type {
            Some(SqlDataType::Text) => text,
            Some(SqlDataType::Integer) => self.dialect.cast(&text, SqlDataType::Integer),
            _ => self.dialect.cast(&text, SqlDataType::Decimal),
        }
    }
}

fn aggregate_kind(function: AggregateFunction) -> AggregateKind {
    match function {
        AggregateFunction::Count => AggregateKind::Count,
        AggregateFunction::Sum => AggregateKind::Sum,
        AggregateFunction::Avg => AggregateKind::Avg,
        AggregateFunction::Min => AggregateKind::Min,
        AggregateFunction::Max => AggregateKind::Max,
    }
}
