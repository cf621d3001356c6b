//! Mutable per-translation state.
//!
//! A [`TranslationContext`] tracks where the translator currently is inside
//! the JSON document (the path stack), which names are bound in which scope,
//! and hands out CTE and alias names. One context serves exactly one
//! top-level translation; it holds no locks and must not be shared between
//! concurrent translations.

use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;

use crate::error::{Result, TranslationError};
use crate::fragment::SqlFragment;

/// Default name of the root resource table.
pub const ROOT_TABLE: &str = "resource";
/// Name of the implicit focus variable.
pub const THIS: &str = "$this";

const DEFAULT_JSON_COLUMN: &str = "resource";
const DEFAULT_ID_COLUMN: &str = "id";

/// A named SQL handle plus the table it is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBinding {
    pub expression: String,
    pub source_table: String,
}

impl VariableBinding {
    pub fn new(expression: impl Into<String>, source_table: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            source_table: source_table.into(),
        }
    }
}

/// How a pushed variable scope relates to the scopes around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// Outer bindings stay visible; new bindings shadow them.
    Preserving,
    /// Only bindings made in this scope are visible.
    Isolated,
}

#[derive(Debug, Clone)]
struct VariableScope {
    mode: ScopeMode,
    bindings: IndexMap<String, VariableBinding>,
}

impl VariableScope {
    fn new(mode: ScopeMode) -> Self {
        Self {
            mode,
            bindings: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationContext {
    current_table: String,
    current_resource_type: String,
    parent_path: Vec<String>,
    /// `scopes[0]` is the global scope holding the root `$this`.
    scopes: Vec<VariableScope>,
    cte_counter: usize,
    alias_counter: usize,
    json_column: String,
    id_column: String,
    /// FROM-clause text for the root table (`patient AS resource`).
    root_source: String,
    element_root: bool,
    table_columns: IndexMap<String, Vec<String>>,
    staged: Vec<SqlFragment>,
}

impl TranslationContext {
    /// Create a context rooted at the `resource` table with `$this` bound to it.
    pub fn new(resource_type: impl Into<String>) -> Self {
        let mut ctx = Self {
            current_table: ROOT_TABLE.to_string(),
            current_resource_type: resource_type.into(),
            parent_path: Vec::new(),
            scopes: Vec::new(),
            cte_counter: 0,
            alias_counter: 0,
            json_column: DEFAULT_JSON_COLUMN.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            root_source: ROOT_TABLE.to_string(),
            element_root: false,
            table_columns: IndexMap::new(),
            staged: Vec::new(),
        };
        ctx.seed_root();
        ctx
    }

    /// Use custom identifier and JSON document column names.
    pub fn with_columns(mut self, id_column: impl Into<String>, json_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self.json_column = json_column.into();
        self.seed_root();
        self
    }

    /// Read the root table from `source`, which must expose the alias `resource`.
    pub fn with_root_source(mut self, source: impl Into<String>) -> Self {
        self.root_source = source.into();
        self
    }

    /// Continue CTE numbering from a previous translation of the same statement.
    pub fn with_cte_counter(mut self, counter: usize) -> Self {
        self.cte_counter = counter;
        self
    }

    /// Root the context at an array element instead of the resource itself.
    ///
    /// Used for expressions evaluated per element of an expanded array.
    pub fn with_element_root(mut self, binding: VariableBinding) -> Self {
        self.scopes[0].bindings.insert(THIS.to_string(), binding);
        self.element_root = true;
        self
    }

    fn seed_root(&mut self) {
        let mut global = VariableScope::new(ScopeMode::Isolated);
        global.bindings.insert(THIS.to_string(), self.table_binding(&self.current_table));
        self.scopes = vec![global];
        self.element_root = false;
        self.table_columns.insert(
            self.current_table.clone(),
            vec![self.id_column.clone(), self.json_column.clone()],
        );
    }

    /// Binding of the whole document of `table`.
    pub fn table_binding(&self, table: &str) -> VariableBinding {
        VariableBinding::new(format!("{}.{}", table, self.json_column), table)
    }

    /// Clear path, variables and counters; the resource type is kept.
    pub fn reset(&mut self) {
        self.current_table = ROOT_TABLE.to_string();
        self.parent_path.clear();
        self.cte_counter = 0;
        self.alias_counter = 0;
        self.table_columns.clear();
        self.staged.clear();
        self.seed_root();
    }

    // ------------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------------

    pub fn current_table(&self) -> &str {
        &self.current_table
    }

    pub fn current_resource_type(&self) -> &str {
        &self.current_resource_type
    }

    pub fn json_column(&self) -> &str {
        &self.json_column
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Move the translation onto another table and rebind the root `$this` to it.
    pub fn set_current_table(&mut self, table: impl Into<String>) {
        self.current_table = table.into();
        if !self.element_root {
            let binding = self.table_binding(&self.current_table);
            self.scopes[0].bindings.insert(THIS.to_string(), binding);
        }
    }

    /// FROM-clause text for a table name.
    pub fn table_source(&self, table: &str) -> String {
        if table == ROOT_TABLE {
            self.root_source.clone()
        } else {
            table.to_string()
        }
    }

    /// Check if `table` is a stage produced during this translation.
    pub fn is_derived_table(&self, table: &str) -> bool {
        table != ROOT_TABLE
    }

    /// Record the columns a table or CTE projects.
    pub fn register_table_columns(&mut self, table: impl Into<String>, columns: Vec<String>) {
        self.table_columns.insert(table.into(), columns);
    }

    /// Columns projected by `table`; unknown tables report the default pair.
    pub fn table_columns(&self, table: &str) -> Vec<String> {
        self.table_columns
            .get(table)
            .cloned()
            .unwrap_or_else(|| vec![self.id_column.clone(), self.json_column.clone()])
    }

    // ------------------------------------------------------------------------
    // Path stack
    // ------------------------------------------------------------------------

    pub fn push_path(&mut self, segment: impl Into<String>) {
        self.parent_path.push(segment.into());
    }

    pub fn pop_path(&mut self) -> Result<String> {
        self.parent_path
            .pop()
            .ok_or_else(|| TranslationError::scope_discipline("pop_path on an empty path stack"))
    }

    /// Index into the collection at the top of the path (`name` -> `name[0]`).
    pub fn index_top(&mut self, index: i64) {
        match self.parent_path.last_mut() {
            Some(top) => top.push_str(&format!("[{index}]")),
            None => self.parent_path.push(format!("[{index}]")),
        }
    }

    /// Replace the field name at the top of the path.
    pub fn replace_top(&mut self, segment: impl Into<String>) -> Result<String> {
        let top = self
            .parent_path
            .last_mut()
            .ok_or_else(|| TranslationError::scope_discipline("replace_top on an empty path stack"))?;
        Ok(std::mem::replace(top, segment.into()))
    }

    /// Remove all segments, returning them so the caller can restore them.
    pub fn clear_path(&mut self) -> Vec<String> {
        std::mem::take(&mut self.parent_path)
    }

    pub fn restore_path(&mut self, segments: Vec<String>) {
        self.parent_path = segments;
    }

    pub fn parent_path(&self) -> &[String] {
        &self.parent_path
    }

    /// Render the path stack as a JSON path (`$` when empty).
    pub fn get_json_path(&self) -> String {
        render_json_path(&self.parent_path)
    }

    /// Render the path stack extended by extra segments, without mutating it.
    pub fn json_path_with(&self, extra: &[&str]) -> String {
        let mut segments = self.parent_path.clone();
        segments.extend(extra.iter().map(|s| s.to_string()));
        render_json_path(&segments)
    }

    // ------------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------------

    pub fn push_variable_scope(&mut self, mode: ScopeMode) {
        self.scopes.push(VariableScope::new(mode));
    }

    pub fn pop_variable_scope(&mut self) -> Result<()> {
        if self.scopes.len() <= 1 {
            return Err(TranslationError::scope_discipline(
                "pop_variable_scope without a matching push",
            ));
        }
        self.scopes.pop();
        Ok(())
    }

    /// Bind a name in the innermost scope.
    pub fn bind_variable(&mut self, name: impl Into<String>, binding: VariableBinding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.into(), binding);
        }
    }

    /// Bind a named constant (`%name`) in the global scope.
    ///
    /// Constants stay visible inside isolated scopes.
    pub fn bind_constant(&mut self, name: &str, sql_literal: impl Into<String>) {
        let key = if name.starts_with('%') {
            name.to_string()
        } else {
            format!("%{name}")
        };
        let binding = VariableBinding::new(sql_literal, self.current_table.clone());
        self.scopes[0].bindings.insert(key, binding);
    }

    /// Resolve a `%name` reference: visible bindings first, then constants.
    pub fn lookup_constant(&self, name: &str) -> Option<&VariableBinding> {
        self.lookup_variable(name)
            .or_else(|| self.scopes[0].bindings.get(name))
    }

    /// Resolve a name, honouring scope isolation.
    pub fn lookup_variable(&self, name: &str) -> Option<&VariableBinding> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.bindings.get(name) {
                return Some(binding);
            }
            if scope.mode == ScopeMode::Isolated {
                return None;
            }
        }
        None
    }

    /// The binding of `$this` visible at this point of the traversal.
    pub fn this_binding(&self) -> VariableBinding {
        self.lookup_variable(THIS)
            .or_else(|| self.scopes[0].bindings.get(THIS))
            .cloned()
            .unwrap_or_else(|| self.table_binding(&self.current_table))
    }

    /// All bindings visible from the innermost scope.
    pub fn variable_bindings(&self) -> IndexMap<String, VariableBinding> {
        let mut visible = IndexMap::new();
        for scope in self.scopes.iter().rev() {
            for (name, binding) in &scope.bindings {
                visible.entry(name.clone()).or_insert_with(|| binding.clone());
            }
            if scope.mode == ScopeMode::Isolated {
                break;
            }
        }
        visible
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Check if the focus is an array element rather than a whole record.
    pub fn in_element_scope(&self) -> bool {
        self.element_root || self.scopes.len() > 1
    }

    // ------------------------------------------------------------------------
    // Name generation and staged fragments
    // ------------------------------------------------------------------------

    /// Next CTE name (`cte_1`, `cte_2`, ...).
    pub fn next_cte_name(&mut self) -> String {
        self.cte_counter += 1;
        format!("cte_{}", self.cte_counter)
    }

    pub fn cte_counter(&self) -> usize {
        self.cte_counter
    }

    /// Next subquery alias (`{prefix}_1`, ...), unique within the translation.
    pub fn next_alias(&mut self, prefix: &str) -> String {
        self.alias_counter += 1;
        format!("{}_{}", prefix, self.alias_counter)
    }

    /// Queue a CTE stage produced while translating a sub-expression.
    pub fn stage(&mut self, fragment: SqlFragment) {
        self.staged.push(fragment);
    }

    pub fn take_staged(&mut self) -> Vec<SqlFragment> {
        std::mem::take(&mut self.staged)
    }

    // ------------------------------------------------------------------------
    // Scope guard
    // ------------------------------------------------------------------------

    /// Snapshot the path stack and variable scopes.
    ///
    /// Dropping the returned guard restores both, also when the code in
    /// between returned early with an error or panicked.
    pub fn scope(&mut self) -> ScopeGuard<'_> {
        let path = self.parent_path.clone();
        let depth = self.scopes.len();
        ScopeGuard {
            ctx: self,
            path: Some(path),
            depth,
        }
    }
}

fn render_json_path(segments: &[String]) -> String {
    let mut path = String::from("$");
    for segment in segments {
        if !segment.starts_with('[') {
            path.push('.');
        }
        path.push_str(segment);
    }
    path
}

/// Restores path and variable scopes of a [`TranslationContext`] on drop.
pub struct ScopeGuard<'a> {
    ctx: &'a mut TranslationContext,
    path: Option<Vec<String>>,
    depth: usize,
}

impl Deref for ScopeGuard<'_> {
    type Target = TranslationContext;

    fn deref(&self) -> &Self::Target {
        &*self.ctx
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.ctx
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            self.ctx.parent_path = path;
        }
        self.ctx.scopes.truncate(self.depth.max(1));
    }
}
