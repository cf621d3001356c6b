//! SQL generation from ViewDefinitions.
//!
//! This module converts ViewDefinition resources into a single SQL query
//! over a table of JSON FHIR resources. Each FHIRPath expression in the view
//! is compiled by [`AstToSqlTranslator`]; the generator only decides where
//! the resulting SQL goes:
//!
//! - columns become entries of the `SELECT` list
//! - `forEach` / `forEachOrNull` become lateral joins over the expanded
//!   array, and the columns below them are evaluated per element
//! - `where` clauses are AND-combined into the `WHERE` clause
//! - CTE stages produced by any expression are collected into one `WITH`
//!   clause and joined back to the resource by id
//!
//! Constants are bound in the translation context rather than substituted
//! into the expression text.

use std::sync::Arc;

use octofhir_fhirpath_sql::{
    AssembledQuery, AstToSqlTranslator, Cte, CteBuilder, Dialect, ExpressionNode, ROOT_TABLE,
    SqlDataType, TranslationContext, VariableBinding, dialect_for, parse,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::column::{ColumnInfo, ColumnType};
use crate::config::GeneratorConfig;
use crate::view_definition::{Column, SelectColumn, ViewDefinition};
use crate::{Error, Result};

/// Generates SQL queries from ViewDefinitions.
#[derive(Debug, Clone)]
pub struct SqlGenerator {
    config: GeneratorConfig,
    dialect: Arc<dyn Dialect>,
}

impl Default for SqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlGenerator {
    /// Create a new SQL generator with default settings (PostgreSQL).
    pub fn new() -> Self {
        let config = GeneratorConfig::default();
        Self {
            dialect: dialect_for(config.dialect),
            config,
        }
    }

    /// Create a generator from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn with_config(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dialect: dialect_for(config.dialect),
            config,
        })
    }

    /// Use a custom dialect adapter instead of the configured one.
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Translation context rooted at the resource table of `resource_type`.
    pub fn context(&self, resource_type: &str) -> TranslationContext {
        TranslationContext::new(resource_type)
            .with_columns(&self.config.id_column, &self.config.json_column)
            .with_root_source(self.root_source(resource_type))
    }

    /// Translator for standalone expressions over `resource_type`.
    pub fn translator(&self, resource_type: &str) -> AstToSqlTranslator {
        AstToSqlTranslator::with_context(self.dialect.clone(), self.context(resource_type))
    }

    /// Parse an expression, enforcing the configured depth limit.
    pub fn parse_expression(&self, path: &str) -> Result<ExpressionNode> {
        let ast = parse(path).map_err(|e| Error::translation(path, e))?;
        let depth = ast.depth();
        if depth > self.config.max_expression_depth {
            return Err(Error::InvalidPath(format!(
                "'{path}' nests {depth} levels deep, limit is {}",
                self.config.max_expression_depth
            )));
        }
        Ok(ast)
    }

    /// Compile one expression into a complete statement over `resource_type`.
    pub fn expression_sql(&self, resource_type: &str, path: &str) -> Result<String> {
        let ast = self.parse_expression(path)?;
        self.translator(resource_type)
            .translate_to_sql(&ast)
            .map_err(|e| Error::translation(path, e))
    }

    /// Generate SQL from a ViewDefinition.
    ///
    /// # Errors
    ///
    /// Returns an error if the ViewDefinition contains invalid paths or
    /// cannot be converted to SQL.
    pub fn generate(&self, view: &ViewDefinition) -> Result<GeneratedSql> {
        let mut builder = ViewBuilder::new(self, view)?;

        for select in &view.select {
            builder.process_select(select, None)?;
        }
        for where_clause in &view.where_ {
            builder.process_where(&where_clause.path)?;
        }

        let generated = builder.finish();
        debug!(
            view = %view.name,
            resource = %view.resource,
            dialect = self.dialect.name(),
            columns = generated.columns.len(),
            ctes = generated.ctes.len(),
            "generated view SQL"
        );
        Ok(generated)
    }

    fn root_source(&self, resource_type: &str) -> String {
        format!(
            "{} AS {ROOT_TABLE}",
            self.config.qualified_table(resource_type)
        )
    }
}

/// Accumulates the parts of one view's statement.
struct ViewBuilder<'g> {
    generator: &'g SqlGenerator,
    resource: String,
    /// Constant name and SQL literal.
    constants: Vec<(String, String)>,
    columns: Vec<GeneratedColumn>,
    joins: Vec<String>,
    joined_ctes: Vec<String>,
    conditions: Vec<String>,
    ctes: CteBuilder,
    cte_counter: usize,
    join_counter: usize,
}

impl<'g> ViewBuilder<'g> {
    fn new(generator: &'g SqlGenerator, view: &ViewDefinition) -> Result<Self> {
        let dialect = generator.dialect();
        let constants = view
            .constant
            .iter()
            .map(|c| {
                c.sql_literal(|s| dialect.string_literal(s))
                    .map(|literal| (c.name.clone(), literal))
                    .ok_or_else(|| {
                        Error::InvalidViewDefinition(format!("constant '{}' has no value", c.name))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            generator,
            resource: view.resource.clone(),
            constants,
            columns: Vec::new(),
            joins: Vec::new(),
            joined_ctes: Vec::new(),
            conditions: Vec::new(),
            ctes: CteBuilder::new(),
            cte_counter: 0,
            join_counter: 0,
        })
    }

    /// Process a select clause; `element` is the binding of the enclosing
    /// `forEach`, if any.
    fn process_select(
        &mut self,
        select: &SelectColumn,
        element: Option<&VariableBinding>,
    ) -> Result<()> {
        if select.union_all.is_some() {
            return Err(Error::InvalidViewDefinition(
                "unionAll is not supported".to_string(),
            ));
        }

        let expanded = match (&select.for_each, &select.for_each_or_null) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidViewDefinition(
                    "a select cannot have both forEach and forEachOrNull".to_string(),
                ));
            }
            (Some(path), None) => Some(self.expand(path, element, false)?),
            (None, Some(path)) => Some(self.expand(path, element, true)?),
            (None, None) => None,
        };
        let element = expanded.as_ref().or(element);

        for column in select.column.iter().flatten() {
            self.process_column(column, element)?;
        }
        for nested in &select.select {
            self.process_select(nested, element)?;
        }
        Ok(())
    }

    fn process_column(&mut self, column: &Column, element: Option<&VariableBinding>) -> Result<()> {
        let col_type = column_type(column);
        let (query, _) = self.translate(&column.path, element, col_type.sql_data_type())?;
        self.join_ctes(&query);

        self.columns.push(GeneratedColumn {
            name: column.name.clone(),
            expression: query.expression,
            col_type,
            description: column.description.clone(),
        });
        Ok(())
    }

    /// Lateral join over the array an expression yields; returns the
    /// binding of the current element.
    fn expand(
        &mut self,
        path: &str,
        element: Option<&VariableBinding>,
        or_null: bool,
    ) -> Result<VariableBinding> {
        let (query, _) = self.translate(path, element, SqlDataType::Json)?;
        self.join_ctes(&query);

        let (prefix, join) = if or_null {
            ("feon", "LEFT JOIN LATERAL")
        } else {
            ("fe", "JOIN LATERAL")
        };
        let alias = format!("{}_{}", prefix, self.join_counter);
        self.join_counter += 1;

        let source = self
            .generator
            .dialect()
            .iterate_json_array(&query.expression, "$", &alias);
        self.joins.push(format!("{join} {source} ON TRUE"));
        Ok(VariableBinding::new(format!("{alias}.value"), alias))
    }

    fn process_where(&mut self, path: &str) -> Result<()> {
        let (query, ctx) = self.translate(path, None, SqlDataType::Boolean)?;
        self.conditions.push(query.filter_condition(&ctx));
        Ok(())
    }

    /// Translate and assemble one expression, collecting its CTEs.
    fn translate(
        &mut self,
        path: &str,
        element: Option<&VariableBinding>,
        sql_type: SqlDataType,
    ) -> Result<(AssembledQuery, TranslationContext)> {
        let ast = self.generator.parse_expression(path)?.with_result_type(sql_type);

        let mut ctx = self
            .generator
            .context(&self.resource)
            .with_cte_counter(self.cte_counter);
        if let Some(binding) = element {
            ctx = ctx.with_element_root(binding.clone());
        }
        for (name, literal) in &self.constants {
            ctx.bind_constant(name, literal.clone());
        }

        let mut translator = AstToSqlTranslator::with_context(self.generator.dialect.clone(), ctx);
        let query = translator
            .translate_to_query(&ast)
            .map_err(|e| Error::translation(path, e))?;
        let ctx = translator.into_context();
        self.cte_counter = ctx.cte_counter();

        if query.population {
            return Err(Error::InvalidPath(format!(
                "'{path}' aggregates over all resources and cannot be used per row"
            )));
        }
        if element.is_some() && !query.ctes.is_empty() {
            return Err(Error::InvalidPath(format!(
                "'{path}' needs a CTE stage, which is not available inside forEach"
            )));
        }

        self.ctes
            .extend(query.ctes.iter().cloned())
            .map_err(|e| Error::translation(path, e))?;
        Ok((query, ctx))
    }

    /// Join every CTE the expression reads, once per view.
    fn join_ctes(&mut self, query: &AssembledQuery) {
        let id = &self.generator.config.id_column;
        for cte in query.cte_sources() {
            if self.joined_ctes.iter().any(|joined| joined == cte) {
                continue;
            }
            self.joins.push(format!(
                "LEFT JOIN {cte} ON {cte}.{id} = {ROOT_TABLE}.{id}"
            ));
            self.joined_ctes.push(cte.to_string());
        }
    }

    fn finish(self) -> GeneratedSql {
        let column_sql = self
            .columns
            .iter()
            .map(|c| format!("{} AS {}", c.expression, quote_identifier(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "SELECT {} FROM {}",
            column_sql,
            self.generator.root_source(&self.resource)
        );
        for join in &self.joins {
            sql.push_str(&format!(" {}", join));
        }
        if !self.conditions.is_empty() {
            let conditions = self
                .conditions
                .iter()
                .map(|c| format!("({c})"))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {}", conditions));
        }

        let with = self.ctes.render();
        if !with.is_empty() {
            sql = format!("{with} {sql}");
        }

        GeneratedSql {
            sql,
            columns: self.columns,
            ctes: self.ctes.into_ctes(),
        }
    }
}

/// Declared column type; collections are returned as JSON.
fn column_type(column: &Column) -> ColumnType {
    if column.collection == Some(true) {
        return ColumnType::Json;
    }
    match &column.col_type {
        None => ColumnType::String,
        Some(declared) => ColumnType::from_fhir_type(declared).unwrap_or_else(|| {
            warn!(
                column = %column.name,
                declared = %declared,
                "unknown column type, using string"
            );
            ColumnType::String
        }),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Generated SQL with column metadata.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSql {
    /// The generated SQL query, CTEs included.
    pub sql: String,

    /// Column information for the result set.
    pub columns: Vec<GeneratedColumn>,

    /// Common Table Expressions (CTEs) in the `WITH` clause of `sql`.
    pub ctes: Vec<Cte>,
}

impl GeneratedSql {
    /// Describe the result set columns.
    pub fn column_info(&self) -> Vec<ColumnInfo> {
        self.columns
            .iter()
            .map(|c| {
                let info = ColumnInfo::new(&c.name, c.col_type);
                match &c.description {
                    Some(description) => info.with_description(description),
                    None => info,
                }
            })
            .collect()
    }
}

/// A generated column with its SQL expression and metadata.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedColumn {
    /// Column name from the ViewDefinition, used as the SQL alias.
    pub name: String,

    /// SQL expression that produces this column's value.
    pub expression: String,

    /// Data type of the column.
    pub col_type: ColumnType,

    /// Human-readable description of the column.
    pub description: Option<String>,
}
