//! AST to SQL translation.
//!
//! [`AstToSqlTranslator`] walks an [`ExpressionNode`] tree and produces an
//! ordered list of [`SqlFragment`]s: the CTE stages the expression needed,
//! followed by the fragment holding the expression's value.
//!
//! The traversal is driven by a private emitter implementing [`AstVisitor`]
//! over [`TranslationContext`]. Function families live in submodules:
//!
//! - `navigation`: literals, identifiers, variables, `first`/`last`, and the
//!   focus mechanism that moves the context onto a sub-expression
//! - `operators`: comparison, logical, arithmetic and the `.` path operator
//! - `filtering`: `where`, `exists`, `all`, `empty`, `extension`
//! - `transformation`: `select`
//! - `aggregation`: `count`, `sum`, `avg`, `min`, `max`
//! - `type_ops`: `is`, `as`, `ofType`
//! - `collections`: `subsetOf`, `supersetOf`, `join`
//! - `strings`: string, math and conversion functions

mod aggregation;
mod collections;
mod filtering;
mod navigation;
mod operators;
mod strings;
mod transformation;
mod type_ops;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::ast::{
    AggregationNode, AstVisitor, ConditionalKind, ConditionalNode, ExpressionNode,
    FunctionCallNode, IdentifierNode, LiteralNode, OperatorNode, SqlDataType, TypeOperationKind,
    TypeOperationNode,
};
use crate::context::{ScopeMode, THIS, TranslationContext, VariableBinding};
use crate::cte::{AssembledQuery, QueryAssembler};
use crate::dialect::Dialect;
use crate::error::{Arity, Result, TranslationError};
use crate::fragment::{META_RESULT_COLUMN, SqlFragment};
use crate::parser;

pub use type_ops::{fhir_type_kind, is_choice_element};

/// Translates FHIRPath expression trees into SQL fragments.
///
/// One translator serves one resource type and one dialect. It owns its
/// [`TranslationContext`]; translating several expressions that end up in
/// one statement should carry the CTE counter over with
/// [`TranslationContext::with_cte_counter`].
#[derive(Debug)]
pub struct AstToSqlTranslator {
    dialect: Arc<dyn Dialect>,
    context: TranslationContext,
}

impl AstToSqlTranslator {
    /// Create a translator for a resource type.
    pub fn new(dialect: Arc<dyn Dialect>, resource_type: impl Into<String>) -> Self {
        Self {
            dialect,
            context: TranslationContext::new(resource_type),
        }
    }

    /// Create a translator over a preconfigured context.
    pub fn with_context(dialect: Arc<dyn Dialect>, context: TranslationContext) -> Self {
        Self { dialect, context }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn context(&self) -> &TranslationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TranslationContext {
        &mut self.context
    }

    pub fn into_context(self) -> TranslationContext {
        self.context
    }

    /// Translate an expression tree.
    ///
    /// Returns the staged CTE fragments in dependency order followed by the
    /// fragment holding the expression's value. On error nothing is returned
    /// and staged work is discarded.
    pub fn translate(&mut self, root: &ExpressionNode) -> Result<Vec<SqlFragment>> {
        let path_depth = self.context.parent_path().len();
        let scope_depth = self.context.scope_depth();
        let table = self.context.current_table().to_string();

        let emitter = SqlEmitter {
            dialect: self.dialect.as_ref(),
        };
        let result = root.accept(&emitter, &mut self.context);
        let mut fragments = self.context.take_staged();
        let fragment = match result {
            Ok(fragment) => fragment,
            Err(err) => {
                self.context.set_current_table(table);
                return Err(err);
            }
        };

        if self.context.parent_path().len() != path_depth
            || self.context.scope_depth() != scope_depth
        {
            return Err(TranslationError::scope_discipline(format!(
                "translation of '{root}' left the context unbalanced"
            )));
        }

        fragments.push(fragment);
        debug!(
            dialect = self.dialect.name(),
            resource_type = self.context.current_resource_type(),
            fragments = fragments.len(),
            ctes = self.context.cte_counter(),
            "translated expression"
        );
        Ok(fragments)
    }

    /// Parse and translate FHIRPath source text.
    pub fn translate_expression(&mut self, source: &str) -> Result<Vec<SqlFragment>> {
        let ast = parser::parse(source)?;
        self.translate(&ast)
    }

    /// Translate an expression and assemble the fragments into one statement.
    pub fn translate_to_query(&mut self, root: &ExpressionNode) -> Result<AssembledQuery> {
        let fragments = self.translate(root)?;
        QueryAssembler::new().assemble(&fragments, &mut self.context)
    }

    /// Translate an expression into a complete SQL statement.
    pub fn translate_to_sql(&mut self, root: &ExpressionNode) -> Result<String> {
        let query = self.translate_to_query(root)?;
        Ok(query.to_sql(&self.context))
    }
}

/// Stateless visitor; all mutable state lives in the threaded context.
pub(crate) struct SqlEmitter<'d> {
    dialect: &'d dyn Dialect,
}

impl AstVisitor<TranslationContext> for SqlEmitter<'_> {
    type Output = Result<SqlFragment>;

    fn visit_literal(&self, node: &LiteralNode, ctx: &mut TranslationContext) -> Self::Output {
        trace!(value = %node.value, "visit literal");
        self.translate_literal(node, ctx)
    }

    fn visit_identifier(&self, node: &IdentifierNode, ctx: &mut TranslationContext) -> Self::Output {
        trace!(name = %node.name, path = %ctx.get_json_path(), "visit identifier");
        self.translate_identifier(node, ctx)
    }

    fn visit_function_call(
        &self,
        node: &FunctionCallNode,
        ctx: &mut TranslationContext,
    ) -> Self::Output {
        trace!(function = %node.name, "visit function call");
        self.translate_function(node, ctx)
    }

    fn visit_operator(&self, node: &OperatorNode, ctx: &mut TranslationContext) -> Self::Output {
        trace!(symbol = %node.symbol, "visit operator");
        self.translate_operator(node, ctx)
    }

    fn visit_conditional(
        &self,
        node: &ConditionalNode,
        ctx: &mut TranslationContext,
    ) -> Self::Output {
        trace!(kind = node.kind.as_str(), "visit conditional");
        let name = node.kind.as_str();
        let (target, argument) = match node.children.as_slice() {
            [argument] => (None, argument),
            [target, argument] => (Some(target), argument),
            [] => return Err(TranslationError::arity(name, Arity::Exactly(1), 0)),
            children => {
                return Err(TranslationError::arity(
                    name,
                    Arity::Exactly(1),
                    children.len() - 1,
                ));
            }
        };
        match node.kind {
            ConditionalKind::Where => self.translate_where(target, argument, ctx),
            ConditionalKind::Select => self.translate_select(target, argument, ctx),
        }
    }

    fn visit_aggregation(&self, node: &AggregationNode, ctx: &mut TranslationContext) -> Self::Output {
        trace!(function = node.function.as_str(), "visit aggregation");
        let sql_type = node.metadata.as_ref().and_then(|m| m.sql_type);
        self.translate_aggregate(node.function, None, sql_type, ctx)
    }

    fn visit_type_operation(
        &self,
        node: &TypeOperationNode,
        ctx: &mut TranslationContext,
    ) -> Self::Output {
        trace!(operation = node.operation.as_str(), target_type = %node.target_type, "visit type operation");
        self.translate_type_operation(node, ctx)
    }
}

impl SqlEmitter<'_> {
    /// Dispatch a function call by name.
    fn translate_function(
        &self,
        call: &FunctionCallNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let target = call.target.as_deref();
        let args = call.arguments.as_slice();
        let name = call.name.as_str();

        match name {
            "first" | "last" => {
                check_arity(name, Arity::Exactly(0), args.len())?;
                let index = if name == "first" { 0 } else { -1 };
                self.translate_index(call, index, ctx)
            }
            "where" | "select" | "all" | "extension" | "subsetOf" | "supersetOf" => {
                check_arity(name, Arity::Exactly(1), args.len())?;
                let argument = &args[0];
                match name {
                    "where" => self.translate_where(target, argument, ctx),
                    "select" => self.translate_select(target, argument, ctx),
                    "all" => self.translate_all(target, argument, ctx),
                    "extension" => self.translate_extension(target, argument, ctx),
                    "subsetOf" => self.translate_subset(target, argument, false, ctx),
                    _ => self.translate_subset(target, argument, true, ctx),
                }
            }
            "exists" => {
                check_arity(name, Arity::Between(0, 1), args.len())?;
                self.translate_exists(target, args.first(), ctx)
            }
            "empty" => {
                check_arity(name, Arity::Exactly(0), args.len())?;
                self.translate_empty(target, ctx)
            }
            "count" | "sum" | "avg" | "min" | "max" => {
                check_arity(name, Arity::Exactly(0), args.len())?;
                let function = name.parse()?;
                let sql_type = call.metadata.as_ref().and_then(|m| m.sql_type);
                self.translate_aggregate(function, target, sql_type, ctx)
            }
            "is" | "as" | "ofType" => {
                check_arity(name, Arity::Exactly(1), args.len())?;
                let operation: TypeOperationKind = name.parse()?;
                let node = TypeOperationNode {
                    operation,
                    target_type: type_name(&args[0]),
                    children: target.into_iter().cloned().collect(),
                    metadata: call.metadata.clone(),
                };
                self.translate_type_operation(&node, ctx)
            }
            "join" => {
                check_arity(name, Arity::Between(0, 1), args.len())?;
                self.translate_join(target, args.first(), ctx)
            }
            "not" | "hasValue" | "getResourceKey" => {
                check_arity(name, Arity::Exactly(0), args.len())?;
                match name {
                    "not" => self.translate_not(target, ctx),
                    "hasValue" => self.translate_has_value(target, ctx),
                    _ => Ok(self.translate_resource_key(ctx)),
                }
            }
            "getReferenceKey" => {
                check_arity(name, Arity::Between(0, 1), args.len())?;
                self.translate_reference_key(target, args.first(), ctx)
            }
            "iif" => {
                check_arity(name, Arity::Between(2, 3), args.len())?;
                self.translate_iif(args, ctx)
            }
            _ if strings::is_string_function(name) => self.translate_string_function(call, ctx),
            _ => Err(TranslationError::unsupported_function(name)),
        }
    }

    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    /// Extract the current focus with the primitive matching `sql_type`.
    fn extract(&self, ctx: &TranslationContext, sql_type: SqlDataType) -> String {
        let this = ctx.this_binding();
        self.extract_typed(&this.expression, &ctx.get_json_path(), sql_type)
    }

    fn extract_typed(&self, column: &str, path: &str, sql_type: SqlDataType) -> String {
        match sql_type {
            SqlDataType::Text => self.dialect.extract_json_field(column, path),
            SqlDataType::Integer => self.dialect.extract_json_integer(column, path),
            SqlDataType::Decimal => self.dialect.extract_json_decimal(column, path),
            SqlDataType::Boolean => self.dialect.extract_json_boolean(column, path),
            SqlDataType::Json => self.dialect.extract_json_object(column, path),
        }
    }

    /// Fragment over the current table with no table dependency.
    fn scalar(&self, ctx: &TranslationContext, expression: impl Into<String>) -> SqlFragment {
        SqlFragment::new(expression, ctx.current_table())
    }

    /// Fragment whose expression is a subquery reading the current table.
    fn subquery(&self, ctx: &TranslationContext, expression: impl Into<String>) -> SqlFragment {
        SqlFragment::new(expression, ctx.current_table()).with_dependency(ctx.current_table())
    }

    /// Row source over the elements of the current focus.
    fn iterate_focus(&self, ctx: &TranslationContext, alias: &str) -> String {
        let this = ctx.this_binding();
        self.dialect
            .iterate_json_array(&this.expression, &ctx.get_json_path(), alias)
    }

    /// Move the context onto an optional call target.
    fn focus_target(
        &self,
        target: Option<&ExpressionNode>,
        ctx: &mut TranslationContext,
    ) -> Result<Vec<String>> {
        match target {
            Some(target) => self.focus(target, ctx),
            None => Ok(Vec::new()),
        }
    }

    /// Run `f` with `$this` bound to the elements of iteration `alias`.
    ///
    /// The element scope is isolated: only the element binding and global
    /// constants are visible, and the path starts empty.
    fn in_element<T>(
        &self,
        ctx: &mut TranslationContext,
        alias: &str,
        f: impl FnOnce(&mut TranslationContext) -> Result<T>,
    ) -> Result<T> {
        let mut scope = ctx.scope();
        scope.clear_path();
        scope.push_variable_scope(ScopeMode::Isolated);
        let table = scope.current_table().to_string();
        scope.bind_variable(THIS, VariableBinding::new(format!("{alias}.value"), table));
        f(&mut *scope)
    }

    /// Translate a node used as an operand of another expression.
    ///
    /// Operands are evaluated against the row the enclosing expression is on:
    /// a stage inside the operand moves the context onto its CTE only for the
    /// operand itself. The stage is queued on the context and replaced by its
    /// result column. A JSON result column is read as a singleton with the
    /// requested type, text by default, unless JSON itself was requested.
    fn operand(&self, node: &ExpressionNode, ctx: &mut TranslationContext) -> Result<SqlFragment> {
        let table = ctx.current_table().to_string();
        let result = node.accept(self, ctx);
        ctx.set_current_table(table);

        let fragment = result?;
        if !fragment.is_stage() {
            return Ok(fragment);
        }
        let cte = fragment
            .cte_name()
            .map(str::to_string)
            .unwrap_or_else(|| fragment.source_table.clone());
        let column = fragment
            .metadata
            .get(META_RESULT_COLUMN)
            .cloned()
            .unwrap_or_else(|| ctx.json_column().to_string());
        ctx.stage(fragment);

        let reference = format!("{cte}.{column}");
        let expression = match node.result_type().unwrap_or_default() {
            _ if column != ctx.json_column() => reference,
            SqlDataType::Json => reference,
            sql_type => self.extract_typed(&reference, "$[0]", sql_type),
        };
        Ok(SqlFragment::new(expression, cte.clone()).with_dependency(cte))
    }

    /// Translate an operand, extracting navigation with the given SQL type.
    fn typed_operand(
        &self,
        node: &ExpressionNode,
        sql_type: SqlDataType,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let node = node.clone().with_result_type(sql_type);
        self.operand(&node, ctx)
    }
}

fn check_arity(function: &str, expected: Arity, actual: usize) -> Result<()> {
    if expected.accepts(actual) {
        Ok(())
    } else {
        Err(TranslationError::arity(function, expected, actual))
    }
}

/// Render SQL string literals for an `IN (...)` list.
fn quoted_list(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Type name passed as a function argument (`ofType(Quantity)`).
fn type_name(node: &ExpressionNode) -> String {
    match node {
        ExpressionNode::Identifier(id) => id.name.clone(),
        ExpressionNode::Literal(lit) => lit.value.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OperatorType;
    use crate::dialect::{DialectKind, dialect_for};

    fn translator() -> AstToSqlTranslator {
        AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), "Patient")
    }

    #[test]
    fn test_unknown_function_is_unsupported() {
        let ast = ExpressionNode::identifier("name").invoke("frobnicate", vec![]);
        let err = translator().translate(&ast).unwrap_err();
        assert_eq!(err, TranslationError::unsupported_function("frobnicate"));
    }

    #[test]
    fn test_conditional_without_argument_is_arity_error() {
        let ast = ExpressionNode::conditional(ConditionalKind::Where, vec![]);
        let err = translator().translate(&ast).unwrap_err();
        assert!(matches!(
            err,
            TranslationError::ArgumentArity { ref function, actual: 0, .. } if function == "where"
        ));
    }

    #[test]
    fn test_failed_translation_discards_staged_work() {
        let mut translator = translator();
        // The select is staged before the undefined constant fails.
        let ast = ExpressionNode::identifier("name")
            .invoke("select", vec![ExpressionNode::identifier("family")])
            .child(ExpressionNode::identifier("%missing"));
        assert!(translator.translate(&ast).is_err());

        let fragments = translator
            .translate(&ExpressionNode::identifier("gender"))
            .unwrap();
        assert_eq!(fragments.len(), 1);
    }

    #[test]
    fn test_translate_expression_parses_source() {
        let fragments = translator()
            .translate_expression("Patient.name.family")
            .unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].expression.contains("'$.name.family'"));
    }

    #[test]
    fn test_translate_to_sql_without_stages() {
        let sql = translator()
            .translate_to_sql(&ExpressionNode::identifier("gender"))
            .unwrap();
        assert!(sql.starts_with("SELECT resource.id AS id, "), "{sql}");
        assert!(sql.ends_with("AS result FROM resource"), "{sql}");
    }

    fn name_select_family() -> ExpressionNode {
        ExpressionNode::conditional(
            ConditionalKind::Select,
            vec![
                ExpressionNode::identifier("name"),
                ExpressionNode::identifier("family"),
            ],
        )
    }

    fn logical(symbol: &str, left: ExpressionNode, right: ExpressionNode) -> ExpressionNode {
        ExpressionNode::operator(symbol, OperatorType::Logical, vec![left, right])
    }

    fn gender_is_male() -> ExpressionNode {
        ExpressionNode::comparison(
            "=",
            ExpressionNode::identifier("gender"),
            ExpressionNode::string("male"),
        )
    }

    #[test]
    fn test_staged_operand_leaves_table_for_later_operands() {
        let ast = logical(
            "and",
            name_select_family().invoke("exists", vec![]),
            gender_is_male(),
        );
        let mut translator = translator();
        let fragments = translator.translate(&ast).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(translator.context().current_table(), "resource");

        let last = &fragments[1];
        assert_eq!(last.source_table, "resource");
        assert_eq!(last.dependencies, vec!["cte_1", "resource"]);
        assert!(
            last.expression
                .contains("(jsonb_path_query_first(resource.resource, '$.gender') #>> '{}')"),
            "{}",
            last.expression
        );
        assert!(last.expression.contains("cte_1.resource"), "{}", last.expression);
    }

    #[test]
    fn test_plain_operand_before_stage_reads_root() {
        let ast = logical(
            "and",
            gender_is_male(),
            name_select_family().invoke("exists", vec![]),
        );
        let mut translator = translator();
        let sql = translator.translate_to_sql(&ast).unwrap();
        assert!(sql.contains("jsonb_path_query_first(resource.resource, '$.gender')"), "{sql}");
        assert!(
            sql.ends_with("FROM resource LEFT JOIN cte_1 ON cte_1.id = resource.id"),
            "{sql}"
        );
        assert_eq!(translator.context().current_table(), "resource");
    }

    #[test]
    fn test_staged_operand_is_read_as_singleton() {
        let ast = ExpressionNode::comparison(
            "=",
            name_select_family(),
            ExpressionNode::string("Smith"),
        );
        let fragments = translator().translate(&ast).unwrap();
        assert_eq!(
            fragments[1].expression,
            "((jsonb_path_query_first(cte_1.resource, '$[0]') #>> '{}') = 'Smith')"
        );
        assert_eq!(fragments[1].dependencies, vec!["cte_1"]);
    }

    #[test]
    fn test_staged_operand_honours_requested_type() {
        let ast = logical(
            "or",
            ExpressionNode::conditional(
                ConditionalKind::Select,
                vec![
                    ExpressionNode::identifier("contact"),
                    ExpressionNode::identifier("active"),
                ],
            ),
            ExpressionNode::identifier("active"),
        );
        let fragments = translator().translate(&ast).unwrap();
        assert!(
            fragments[1]
                .expression
                .contains("(jsonb_path_query_first(cte_1.resource, '$[0]') #>> '{}')::boolean"),
            "{}",
            fragments[1].expression
        );
    }

    #[test]
    fn test_failed_operand_restores_table() {
        let ast = logical(
            "and",
            gender_is_male(),
            name_select_family().child(ExpressionNode::identifier("%missing")),
        );
        let mut translator = translator();
        assert!(translator.translate(&ast).is_err());
        assert_eq!(translator.context().current_table(), "resource");
    }
}
