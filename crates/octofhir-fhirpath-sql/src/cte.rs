//! CTE assembly.
//!
//! [`QueryAssembler`] turns the ordered fragment list of one translation
//! into a single statement: every stage fragment becomes a named CTE, the
//! last fragment becomes the projected expression.

use serde::Serialize;
use tracing::debug;

use crate::context::{ROOT_TABLE, TranslationContext};
use crate::dialect::validate_identifier;
use crate::error::{Result, TranslationError};
use crate::fragment::SqlFragment;

/// One named CTE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cte {
    pub name: String,
    pub query: String,
}

/// Ordered collection of CTEs with unique, validated names.
#[derive(Debug, Clone, Default)]
pub struct CteBuilder {
    ctes: Vec<Cte>,
}

impl CteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a CTE. Names must be valid identifiers and unique.
    pub fn add(&mut self, name: impl Into<String>, query: impl Into<String>) -> Result<()> {
        let name = name.into();
        validate_identifier(&name)?;
        if self.contains(&name) {
            return Err(TranslationError::scope_discipline(format!(
                "CTE '{name}' defined twice"
            )));
        }
        self.ctes.push(Cte {
            name,
            query: query.into(),
        });
        Ok(())
    }

    /// Append every CTE of another builder, keeping the order.
    pub fn extend(&mut self, other: impl IntoIterator<Item = Cte>) -> Result<()> {
        for cte in other {
            self.add(cte.name, cte.query)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctes.iter().any(|cte| cte.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.ctes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ctes.len()
    }

    pub fn ctes(&self) -> &[Cte] {
        &self.ctes
    }

    pub fn into_ctes(self) -> Vec<Cte> {
        self.ctes
    }

    /// Render `WITH a AS (...), b AS (...)`, or nothing without CTEs.
    pub fn render(&self) -> String {
        render_with(&self.ctes)
    }
}

fn render_with(ctes: &[Cte]) -> String {
    if ctes.is_empty() {
        return String::new();
    }
    let body = ctes
        .iter()
        .map(|cte| format!("{} AS ({})", cte.name, cte.query))
        .collect::<Vec<_>>()
        .join(", ");
    format!("WITH {body}")
}

/// A translation ready to be embedded in or rendered as a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledQuery {
    pub ctes: Vec<Cte>,
    /// Table the final expression reads (`resource` or the last CTE).
    pub source: String,
    /// Tables the expression reads besides `source`, joined on the record
    /// identifier. Every CTE carries one row per record.
    pub joins: Vec<String>,
    /// Value expression over `source` and `joins`.
    pub expression: String,
    /// The final fragment was itself a stage.
    pub final_is_stage: bool,
    /// The expression collapses the population into one row.
    pub population: bool,
}

impl AssembledQuery {
    /// Check if the expression reads any CTE.
    pub fn reads_cte(&self) -> bool {
        !self.cte_sources().is_empty()
    }

    /// CTEs the expression reads, the source first.
    pub fn cte_sources(&self) -> Vec<&str> {
        std::iter::once(self.source.as_str())
            .chain(self.joins.iter().map(String::as_str))
            .filter(|table| *table != ROOT_TABLE)
            .collect()
    }

    /// FROM-clause text: the source plus its joined tables.
    fn from_clause(&self, ctx: &TranslationContext) -> String {
        let id = ctx.id_column();
        let mut from = ctx.table_source(&self.source);
        for join in &self.joins {
            from.push_str(&format!(
                " LEFT JOIN {} ON {join}.{id} = {}.{id}",
                ctx.table_source(join),
                self.source
            ));
        }
        from
    }

    /// Render a complete statement.
    ///
    /// Per-record expressions project `id` and `result`; population
    /// aggregates project only `result`; a trailing stage is selected whole.
    pub fn to_sql(&self, ctx: &TranslationContext) -> String {
        let with = render_with(&self.ctes);
        let from = self.from_clause(ctx);
        let body = if self.final_is_stage {
            format!("SELECT * FROM {}", self.source)
        } else if self.population {
            format!("SELECT {} AS result FROM {from}", self.expression)
        } else {
            let id = ctx.id_column();
            format!(
                "SELECT {}.{id} AS {id}, {} AS result FROM {from}",
                self.source, self.expression
            )
        };
        if with.is_empty() {
            body
        } else {
            format!("{with} {body}")
        }
    }

    /// Boolean condition over the root table for use in a `WHERE` clause.
    ///
    /// Expressions reading a CTE become an identifier membership test; the
    /// CTEs themselves must be placed in the enclosing statement's `WITH`.
    pub fn filter_condition(&self, ctx: &TranslationContext) -> String {
        if !self.reads_cte() {
            return self.expression.clone();
        }
        let id = ctx.id_column();
        format!(
            "{ROOT_TABLE}.{id} IN (SELECT {source}.{id} FROM {from} WHERE {expression})",
            source = self.source,
            from = self.from_clause(ctx),
            expression = self.expression
        )
    }
}

/// Builds [`AssembledQuery`] values from fragment lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAssembler;

impl QueryAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Assemble the fragments of one translation.
    ///
    /// Stages reuse the CTE name the translator assigned; an unnamed stage
    /// draws a fresh name from the context. Every dependency must be the
    /// root table or a CTE defined earlier in the list.
    pub fn assemble(
        &self,
        fragments: &[SqlFragment],
        ctx: &mut TranslationContext,
    ) -> Result<AssembledQuery> {
        let Some((last, stages)) = fragments.split_last() else {
            return Err(TranslationError::scope_discipline("no fragments to assemble"));
        };

        let mut builder = CteBuilder::new();
        for (index, stage) in stages.iter().enumerate() {
            if !stage.is_stage() {
                return Err(TranslationError::scope_discipline(format!(
                    "fragment {index} precedes the final fragment but is not a stage"
                )));
            }
            add_stage(&mut builder, stage, ctx)?;
        }

        let query = if last.is_stage() {
            let name = add_stage(&mut builder, last, ctx)?;
            let column = last
                .result_column()
                .map(str::to_string)
                .unwrap_or_else(|| ctx.json_column().to_string());
            AssembledQuery {
                expression: format!("{name}.{column}"),
                source: name,
                joins: Vec::new(),
                ctes: Vec::new(),
                final_is_stage: true,
                population: false,
            }
        } else {
            check_dependencies(&builder, last)?;
            let joins = last
                .dependencies
                .iter()
                .filter(|dep| **dep != last.source_table)
                .cloned()
                .collect();
            AssembledQuery {
                ctes: Vec::new(),
                source: last.source_table.clone(),
                joins,
                expression: last.expression.clone(),
                final_is_stage: false,
                population: last.is_population_aggregate(),
            }
        };

        debug!(
            ctes = builder.len(),
            source = %query.source,
            joins = query.joins.len(),
            population = query.population,
            "assembled statement"
        );
        Ok(AssembledQuery {
            ctes: builder.into_ctes(),
            ..query
        })
    }
}

fn add_stage(
    builder: &mut CteBuilder,
    stage: &SqlFragment,
    ctx: &mut TranslationContext,
) -> Result<String> {
    check_dependencies(builder, stage)?;
    let name = match stage.cte_name() {
        Some(name) => name.to_string(),
        None => ctx.next_cte_name(),
    };
    builder.add(name.clone(), stage.expression.clone())?;
    Ok(name)
}

fn check_dependencies(builder: &CteBuilder, fragment: &SqlFragment) -> Result<()> {
    match fragment
        .dependencies
        .iter()
        .find(|dep| dep.as_str() != ROOT_TABLE && !builder.contains(dep))
    {
        Some(missing) => Err(TranslationError::undefined_reference(missing)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{META_CTE_NAME, META_RESULT_COLUMN};
    use pretty_assertions::assert_eq;

    fn stage(name: &str, query: &str, dep: &str) -> SqlFragment {
        SqlFragment::new(query, name)
            .with_unnest(true)
            .with_dependency(dep)
            .with_metadata(META_CTE_NAME, name)
    }

    #[test]
    fn test_builder_rejects_duplicates_and_bad_names() {
        let mut builder = CteBuilder::new();
        builder.add("cte_1", "SELECT 1").unwrap();
        assert!(builder.add("cte_1", "SELECT 2").is_err());
        assert!(matches!(
            builder.add("bad name", "SELECT 3"),
            Err(TranslationError::InvalidIdentifier(_))
        ));
        assert_eq!(builder.render(), "WITH cte_1 AS (SELECT 1)");
    }

    #[test]
    fn test_plain_expression() {
        let mut ctx = TranslationContext::new("Patient");
        let fragments = vec![SqlFragment::new("resource.resource", "resource")];
        let query = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap();
        assert!(!query.reads_cte());
        assert_eq!(
            query.to_sql(&ctx),
            "SELECT resource.id AS id, resource.resource AS result FROM resource"
        );
        assert_eq!(query.filter_condition(&ctx), "resource.resource");
    }

    #[test]
    fn test_stages_become_ctes_in_order() {
        let mut ctx = TranslationContext::new("Patient").with_cte_counter(2);
        let fragments = vec![
            stage("cte_1", "SELECT a", "resource"),
            stage("cte_2", "SELECT b FROM cte_1", "cte_1"),
            SqlFragment::new("cte_2.resource", "cte_2").with_dependency("cte_2"),
        ];
        let query = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap();
        assert_eq!(
            query.to_sql(&ctx),
            "WITH cte_1 AS (SELECT a), cte_2 AS (SELECT b FROM cte_1) \
             SELECT cte_2.id AS id, cte_2.resource AS result FROM cte_2"
        );
        assert_eq!(
            query.filter_condition(&ctx),
            "resource.id IN (SELECT cte_2.id FROM cte_2 WHERE cte_2.resource)"
        );
    }

    #[test]
    fn test_expression_spanning_root_and_cte_joins_by_id() {
        let mut ctx = TranslationContext::new("Patient").with_root_source("patient AS resource");
        let fragments = vec![
            stage("cte_1", "SELECT a", "resource"),
            SqlFragment::new("(resource.resource AND cte_1.resource)", "resource")
                .with_dependency("cte_1")
                .with_dependency("resource"),
        ];
        let query = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap();
        assert_eq!(query.source, "resource");
        assert_eq!(query.joins, vec!["cte_1"]);
        assert!(query.reads_cte());
        assert_eq!(query.cte_sources(), vec!["cte_1"]);
        assert_eq!(
            query.to_sql(&ctx),
            "WITH cte_1 AS (SELECT a) SELECT resource.id AS id, (resource.resource AND cte_1.resource) AS result \
             FROM patient AS resource LEFT JOIN cte_1 ON cte_1.id = resource.id"
        );
        assert_eq!(
            query.filter_condition(&ctx),
            "resource.id IN (SELECT resource.id FROM patient AS resource \
             LEFT JOIN cte_1 ON cte_1.id = resource.id WHERE (resource.resource AND cte_1.resource))"
        );
    }

    #[test]
    fn test_cte_source_reading_root_joins_root() {
        let mut ctx = TranslationContext::new("Patient");
        let fragments = vec![
            stage("cte_1", "SELECT a", "resource"),
            SqlFragment::new("(cte_1.resource = resource.resource)", "cte_1")
                .with_dependency("cte_1")
                .with_dependency("resource"),
        ];
        let query = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap();
        assert_eq!(query.joins, vec!["resource"]);
        assert_eq!(query.cte_sources(), vec!["cte_1"]);
        assert!(
            query
                .to_sql(&ctx)
                .ends_with("FROM cte_1 LEFT JOIN resource ON resource.id = cte_1.id"),
            "{}",
            query.to_sql(&ctx)
        );
    }

    #[test]
    fn test_unnamed_stage_draws_fresh_name() {
        let mut ctx = TranslationContext::new("Patient").with_cte_counter(4);
        let fragments = vec![SqlFragment::new("SELECT x", "resource").with_unnest(true)];
        let query = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap();
        assert_eq!(query.ctes[0].name, "cte_5");
        assert!(query.final_is_stage);
        assert_eq!(query.to_sql(&ctx), "WITH cte_5 AS (SELECT x) SELECT * FROM cte_5");
    }

    #[test]
    fn test_final_stage_reads_result_column() {
        let mut ctx = TranslationContext::new("Patient");
        let fragments = vec![
            stage("cte_1", "SELECT a", "resource").with_metadata(META_RESULT_COLUMN, "result"),
        ];
        let query = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap();
        assert_eq!(query.expression, "cte_1.result");
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let mut ctx = TranslationContext::new("Patient");
        let fragments = vec![
            stage("cte_1", "SELECT a FROM cte_2", "cte_2"),
            SqlFragment::new("x", "cte_1"),
        ];
        let err = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap_err();
        assert_eq!(err, TranslationError::undefined_reference("cte_2"));
    }

    #[test]
    fn test_population_aggregate_has_no_id() {
        let mut ctx = TranslationContext::new("Patient").with_root_source("patient AS resource");
        let fragments = vec![
            SqlFragment::new("COUNT(*)", "resource")
                .with_aggregate(true)
                .with_metadata(crate::fragment::META_AGGREGATE_SCOPE, crate::fragment::POPULATION),
        ];
        let query = QueryAssembler::new().assemble(&fragments, &mut ctx).unwrap();
        assert_eq!(query.to_sql(&ctx), "SELECT COUNT(*) AS result FROM patient AS resource");
    }

    #[test]
    fn test_empty_fragment_list() {
        let mut ctx = TranslationContext::new("Patient");
        assert!(QueryAssembler::new().assemble(&[], &mut ctx).is_err());
    }
}
