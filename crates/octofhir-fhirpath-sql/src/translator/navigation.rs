//! Literals, identifiers, variables and indexing.
//!
//! Navigation never forms a subquery. Identifiers push path segments and the
//! value is read with one dialect extraction call against `$this`.
//!
//! The focus mechanism lives here as well: [`SqlEmitter::focus`] moves the
//! context onto an expression so that a following step (a function without
//! its own target, the right side of `.`) operates on it. Plain navigation
//! just extends the path. Anything else is translated and `$this` is rebound
//! to the result in a preserving scope with an empty path.

use tracing::trace;

use super::SqlEmitter;
use crate::ast::{
    ExpressionNode, FunctionCallNode, IdentifierNode, LiteralNode, LiteralType, TypeOperationKind,
};
use crate::context::{ScopeMode, THIS, TranslationContext, VariableBinding};
use crate::error::{Result, TranslationError};
use crate::fragment::SqlFragment;

/// Variables that always denote the resource being translated.
const ROOT_VARIABLES: &[&str] = &["%resource", "%rootResource", "%context"];

impl SqlEmitter<'_> {
    pub(super) fn translate_literal(
        &self,
        node: &LiteralNode,
        ctx: &TranslationContext,
    ) -> Result<SqlFragment> {
        let expression = match node.literal_type {
            LiteralType::String | LiteralType::Date | LiteralType::DateTime | LiteralType::Time => {
                self.dialect.string_literal(&node.value)
            }
            LiteralType::Integer | LiteralType::Decimal => {
                if node.value.parse::<f64>().is_err() {
                    return Err(TranslationError::parse(
                        0,
                        format!("invalid numeric literal '{}'", node.value),
                    ));
                }
                node.value.clone()
            }
            LiteralType::Boolean => {
                if node.value.eq_ignore_ascii_case("true") {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            LiteralType::Null => "NULL".to_string(),
        };
        Ok(self.scalar(ctx, expression))
    }

    pub(super) fn translate_identifier(
        &self,
        node: &IdentifierNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        if is_constant_reference(&node.name) {
            let binding = ctx
                .lookup_constant(&node.name)
                .ok_or_else(|| TranslationError::undefined_reference(&node.name))?;
            let expression = binding.expression.clone();
            return Ok(self.scalar(ctx, expression));
        }

        let sql_type = node
            .metadata
            .as_ref()
            .and_then(|m| m.sql_type)
            .unwrap_or_default();
        let mut scope = ctx.scope();
        self.focus_identifier(node, &mut scope)?;
        let expression = self.extract(&scope, sql_type);
        Ok(self.scalar(&scope, expression))
    }

    /// `first()` / `last()`: index into the focus, never a row limit.
    pub(super) fn translate_index(
        &self,
        call: &FunctionCallNode,
        index: i64,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let sql_type = call
            .metadata
            .as_ref()
            .and_then(|m| m.sql_type)
            .unwrap_or_default();
        let mut scope = ctx.scope();
        let dependencies = self.focus_target(call.target.as_deref(), &mut scope)?;
        scope.index_top(index);
        let expression = self.extract(&scope, sql_type);
        Ok(self.scalar(&scope, expression).with_dependencies(dependencies))
    }

    /// Move the context onto `node`, returning the tables the new focus reads.
    ///
    /// Callers own the surrounding scope guard; nothing is restored here.
    pub(super) fn focus(
        &self,
        node: &ExpressionNode,
        ctx: &mut TranslationContext,
    ) -> Result<Vec<String>> {
        match node {
            ExpressionNode::Identifier(id) => {
                self.focus_identifier(id, ctx)?;
                Ok(Vec::new())
            }
            ExpressionNode::Operator(op) if op.symbol == "." && op.children.len() == 2 => {
                let mut dependencies = self.focus(&op.children[0], ctx)?;
                dependencies.extend(self.focus(&op.children[1], ctx)?);
                Ok(dependencies)
            }
            ExpressionNode::FunctionCall(call)
                if matches!(call.name.as_str(), "first" | "last") && call.arguments.is_empty() =>
            {
                let dependencies = self.focus_target(call.target.as_deref(), ctx)?;
                ctx.index_top(if call.name == "first" { 0 } else { -1 });
                Ok(dependencies)
            }
            ExpressionNode::TypeOperation(op)
                if op.operation == TypeOperationKind::OfType
                    && op.children.len() <= 1
                    && self.remaps_choice(op.children.first(), &op.target_type, ctx) =>
            {
                self.focus_choice(op.children.first(), &op.target_type, ctx)
            }
            ExpressionNode::FunctionCall(call)
                if call.name == "ofType"
                    && call.arguments.len() == 1
                    && self.remaps_choice(
                        call.target.as_deref(),
                        &super::type_name(&call.arguments[0]),
                        ctx,
                    ) =>
            {
                let type_name = super::type_name(&call.arguments[0]);
                self.focus_choice(call.target.as_deref(), &type_name, ctx)
            }
            _ => self.focus_derived(node, ctx),
        }
    }

    fn focus_identifier(&self, node: &IdentifierNode, ctx: &mut TranslationContext) -> Result<()> {
        let mut segments = node.name.split('.').filter(|s| !s.is_empty()).peekable();

        if let Some(&first) = segments.peek() {
            if first == THIS {
                segments.next();
            } else if first.starts_with('%') || first.starts_with('$') {
                segments.next();
                self.focus_variable(first, ctx)?;
            } else if first == ctx.current_resource_type() && ctx.parent_path().is_empty() {
                segments.next();
            }
        }

        for segment in segments {
            ctx.push_path(segment);
        }
        Ok(())
    }

    fn focus_variable(&self, name: &str, ctx: &mut TranslationContext) -> Result<()> {
        let binding = if ROOT_VARIABLES.contains(&name) {
            ctx.table_binding(ctx.current_table())
        } else {
            ctx.lookup_constant(name)
                .cloned()
                .ok_or_else(|| TranslationError::undefined_reference(name))?
        };
        trace!(variable = name, expression = %binding.expression, "focus on variable");
        ctx.push_variable_scope(ScopeMode::Preserving);
        ctx.bind_variable(THIS, binding);
        ctx.clear_path();
        Ok(())
    }

    /// Translate `node` and continue navigation from its value.
    fn focus_derived(
        &self,
        node: &ExpressionNode,
        ctx: &mut TranslationContext,
    ) -> Result<Vec<String>> {
        let fragment = node.accept(self, ctx)?;

        if fragment.is_stage() {
            // The stage already moved the context onto its CTE.
            let cte = fragment
                .cte_name()
                .map(str::to_string)
                .unwrap_or_else(|| fragment.source_table.clone());
            trace!(cte = %cte, "focus moved onto stage");
            ctx.stage(fragment);
            ctx.clear_path();
            return Ok(vec![cte]);
        }

        let table = ctx.current_table().to_string();
        ctx.push_variable_scope(ScopeMode::Preserving);
        ctx.bind_variable(THIS, VariableBinding::new(fragment.expression, table));
        ctx.clear_path();
        Ok(fragment.dependencies)
    }
}

/// `%name` references that resolve to a bound constant.
fn is_constant_reference(name: &str) -> bool {
    name.starts_with('%') && !name.contains('.') && !ROOT_VARIABLES.contains(&name)
}
