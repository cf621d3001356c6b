//! Translated SQL fragments.

use std::collections::BTreeMap;

use serde::Serialize;

/// Metadata key holding the CTE name a fragment materializes as.
pub const META_CTE_NAME: &str = "cte_name";
/// Metadata key naming the function or node kind that produced a fragment.
pub const META_PRODUCED_BY: &str = "produced_by";
/// Metadata key set to `population` for aggregates that collapse all rows.
pub const META_AGGREGATE_SCOPE: &str = "aggregate_scope";
/// Value of [`META_AGGREGATE_SCOPE`] for aggregates over all rows.
pub const POPULATION: &str = "population";
/// Metadata key listing the upstream columns a stage carries forward.
pub const META_PRESERVED_COLUMNS: &str = "preserved_columns";
/// Metadata key naming the column of a stage that holds the result value.
pub const META_RESULT_COLUMN: &str = "result_column";

/// One translated SQL expression plus composition metadata.
///
/// `dependencies` lists only tables the expression text references, without
/// duplicates, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlFragment {
    pub expression: String,
    pub source_table: String,
    pub requires_unnest: bool,
    pub is_aggregate: bool,
    pub dependencies: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl SqlFragment {
    /// Create a plain fragment with no dependencies.
    pub fn new(expression: impl Into<String>, source_table: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            source_table: source_table.into(),
            requires_unnest: false,
            is_aggregate: false,
            dependencies: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_unnest(mut self, requires_unnest: bool) -> Self {
        self.requires_unnest = requires_unnest;
        self
    }

    pub fn with_aggregate(mut self, is_aggregate: bool) -> Self {
        self.is_aggregate = is_aggregate;
        self
    }

    /// Record a table dependency, ignoring duplicates.
    pub fn with_dependency(mut self, table: impl Into<String>) -> Self {
        self.add_dependency(table);
        self
    }

    /// Merge dependencies and flags of the fragments this one was built from.
    ///
    /// Once a part reads another table the expression spans two row sources,
    /// so the fragment's own table is recorded too when the text reads it.
    pub fn absorbing<'a>(mut self, parts: impl IntoIterator<Item = &'a SqlFragment>) -> Self {
        for part in parts {
            for dep in &part.dependencies {
                self.add_dependency(dep.clone());
            }
            self.requires_unnest |= part.requires_unnest;
            self.is_aggregate |= part.is_aggregate;
            if part.is_population_aggregate() {
                self.metadata
                    .insert(META_AGGREGATE_SCOPE.to_string(), POPULATION.to_string());
            }
        }
        let spans_tables = self.dependencies.iter().any(|dep| *dep != self.source_table);
        if spans_tables && self.references_table(&self.source_table) {
            self.add_dependency(self.source_table.clone());
        }
        self
    }

    /// Merge only the dependencies of `parts`, leaving the flags untouched.
    ///
    /// Used by self-contained subqueries whose inner aggregation does not
    /// leak into the surrounding statement.
    pub fn inheriting<'a>(mut self, parts: impl IntoIterator<Item = &'a SqlFragment>) -> Self {
        for part in parts {
            for dep in &part.dependencies {
                self.add_dependency(dep.clone());
            }
        }
        self
    }

    pub fn with_dependencies<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for table in tables {
            self.add_dependency(table);
        }
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn add_dependency(&mut self, table: impl Into<String>) {
        let table = table.into();
        if !table.is_empty() && !self.dependencies.contains(&table) {
            self.dependencies.push(table);
        }
    }

    /// Check if the expression text reads a column of `table` (`table.col`).
    pub fn references_table(&self, table: &str) -> bool {
        references_table(&self.expression, table)
    }

    /// CTE name this fragment materializes as, if it is a CTE stage.
    pub fn cte_name(&self) -> Option<&str> {
        self.metadata.get(META_CTE_NAME).map(String::as_str)
    }

    /// Column of a stage that holds the value downstream steps read.
    pub fn result_column(&self) -> Option<&str> {
        self.metadata.get(META_RESULT_COLUMN).map(String::as_str)
    }

    /// Check if the expression is a full query body rather than a scalar.
    pub fn is_stage(&self) -> bool {
        self.requires_unnest || self.cte_name().is_some()
    }

    /// Check if the aggregate collapses the whole population into one row.
    pub fn is_population_aggregate(&self) -> bool {
        self.is_aggregate
            && self.metadata.get(META_AGGREGATE_SCOPE).map(String::as_str) == Some(POPULATION)
    }
}

/// Find `table.` in SQL text where `table` is not the tail of a longer name.
pub(crate) fn references_table(sql: &str, table: &str) -> bool {
    if table.is_empty() {
        return false;
    }
    let needle = format!("{table}.");
    sql.match_indices(&needle).any(|(start, _)| {
        sql[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
    })
}
