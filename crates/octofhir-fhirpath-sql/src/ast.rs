//! FHIRPath abstract syntax tree.
//!
//! The tree is a closed sum type: every node kind is one variant of
//! [`ExpressionNode`], and consumers dispatch with an exhaustive `match`
//! (directly or through [`AstVisitor`]), so adding a kind is a
//! compile-time-checked change.
//!
//! Nodes may carry optional [`NodeMetadata`] attached by the parser or by
//! callers. The translator reads it when present and never requires it.

use std::fmt;
use std::str::FromStr;

use crate::error::TranslationError;

// ============================================================================
// Metadata
// ============================================================================

/// Broad category of a node, as classified by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Literal,
    Navigation,
    Filtering,
    Transformation,
    Aggregation,
    TypeOperation,
    Operator,
    Function,
}

/// Hints that allow the translator to pick a cheaper SQL shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationHint {
    /// The path is known to hold a single value, never an array.
    ScalarPath,
    /// The path is known to hold an array.
    ArrayPath,
    /// The subtree has no dependency on the resource.
    Constant,
}

/// SQL value type used to pick an extraction primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDataType {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Json,
}

/// Optional structured metadata carried by a node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeMetadata {
    pub category: Option<NodeCategory>,
    pub hints: Vec<OptimizationHint>,
    pub sql_type: Option<SqlDataType>,
}

impl NodeMetadata {
    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_hint(mut self, hint: OptimizationHint) -> Self {
        if !self.hints.contains(&hint) {
            self.hints.push(hint);
        }
        self
    }

    pub fn with_sql_type(mut self, sql_type: SqlDataType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    pub fn has_hint(&self, hint: OptimizationHint) -> bool {
        self.hints.contains(&hint)
    }
}

// ============================================================================
// Node payloads
// ============================================================================

/// Type of a literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Null,
}

impl LiteralType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralNode {
    /// Raw literal text without quotes or the `@` date prefix.
    pub value: String,
    pub literal_type: LiteralType,
    pub metadata: Option<NodeMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierNode {
    /// Field name, a dotted field path (`name.family`), or a variable
    /// (`$this`, `%constant`).
    pub name: String,
    pub metadata: Option<NodeMetadata>,
}

impl IdentifierNode {
    /// Check if this identifier references a variable rather than a field.
    pub fn is_variable(&self) -> bool {
        self.name.starts_with('$') || self.name.starts_with('%')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallNode {
    pub name: String,
    pub arguments: Vec<ExpressionNode>,
    /// The expression the function is invoked on (`target.name(...)`).
    pub target: Option<Box<ExpressionNode>>,
    pub metadata: Option<NodeMetadata>,
}

/// Operator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorType {
    Comparison,
    Logical,
    Unary,
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorNode {
    pub symbol: String,
    pub operator_type: OperatorType,
    pub children: Vec<ExpressionNode>,
    pub metadata: Option<NodeMetadata>,
}

/// Collection functions that take a per-element expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalKind {
    Where,
    Select,
}

impl ConditionalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Where => "where",
            Self::Select => "select",
        }
    }
}

/// A `where` or `select` call.
///
/// `children` is either `[argument]` (applied to the current focus) or
/// `[target, argument]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalNode {
    pub kind: ConditionalKind,
    pub children: Vec<ExpressionNode>,
    pub metadata: Option<NodeMetadata>,
}

/// The fixed set of aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(TranslationError::unsupported_function(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationNode {
    pub function: AggregateFunction,
    pub metadata: Option<NodeMetadata>,
}

/// The fixed set of type operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOperationKind {
    Is,
    As,
    OfType,
}

impl TypeOperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Is => "is",
            Self::As => "as",
            Self::OfType => "ofType",
        }
    }
}

impl FromStr for TypeOperationKind {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "is" => Ok(Self::Is),
            "as" => Ok(Self::As),
            "ofType" => Ok(Self::OfType),
            other => Err(TranslationError::unsupported_function(other)),
        }
    }
}

/// An `is`, `as` or `ofType` operation.
///
/// `children` is either empty (applies to the current focus) or `[operand]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeOperationNode {
    pub operation: TypeOperationKind,
    pub target_type: String,
    pub children: Vec<ExpressionNode>,
    pub metadata: Option<NodeMetadata>,
}

// ============================================================================
// Expression node
// ============================================================================

/// A node of a parsed FHIRPath expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    Literal(LiteralNode),
    Identifier(IdentifierNode),
    FunctionCall(FunctionCallNode),
    Operator(OperatorNode),
    Conditional(ConditionalNode),
    Aggregation(AggregationNode),
    TypeOperation(TypeOperationNode),
}

impl ExpressionNode {
    pub fn literal(value: impl Into<String>, literal_type: LiteralType) -> Self {
        Self::Literal(LiteralNode {
            value: value.into(),
            literal_type,
            metadata: None,
        })
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::literal(value, LiteralType::String)
    }

    pub fn integer(value: i64) -> Self {
        Self::literal(value.to_string(), LiteralType::Integer)
    }

    pub fn boolean(value: bool) -> Self {
        Self::literal(value.to_string(), LiteralType::Boolean)
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::Identifier(IdentifierNode {
            name: name.into(),
            metadata: None,
        })
    }

    /// A function call without a target (`name(args)`).
    pub fn function(name: impl Into<String>, arguments: Vec<ExpressionNode>) -> Self {
        Self::FunctionCall(FunctionCallNode {
            name: name.into(),
            arguments,
            target: None,
            metadata: None,
        })
    }

    /// A function invoked on this node (`self.name(args)`).
    pub fn invoke(self, name: impl Into<String>, arguments: Vec<ExpressionNode>) -> Self {
        Self::FunctionCall(FunctionCallNode {
            name: name.into(),
            arguments,
            target: Some(Box::new(self)),
            metadata: None,
        })
    }

    pub fn operator(
        symbol: impl Into<String>,
        operator_type: OperatorType,
        children: Vec<ExpressionNode>,
    ) -> Self {
        Self::Operator(OperatorNode {
            symbol: symbol.into(),
            operator_type,
            children,
            metadata: None,
        })
    }

    pub fn comparison(symbol: impl Into<String>, left: Self, right: Self) -> Self {
        Self::operator(symbol, OperatorType::Comparison, vec![left, right])
    }

    /// Path step: focus on `self`, then evaluate `next` within it.
    pub fn child(self, next: Self) -> Self {
        Self::operator(".", OperatorType::Binary, vec![self, next])
    }

    pub fn conditional(kind: ConditionalKind, children: Vec<ExpressionNode>) -> Self {
        Self::Conditional(ConditionalNode {
            kind,
            children,
            metadata: None,
        })
    }

    pub fn aggregation(function: AggregateFunction) -> Self {
        Self::Aggregation(AggregationNode {
            function,
            metadata: None,
        })
    }

    pub fn type_operation(
        operation: TypeOperationKind,
        target_type: impl Into<String>,
        children: Vec<ExpressionNode>,
    ) -> Self {
        Self::TypeOperation(TypeOperationNode {
            operation,
            target_type: target_type.into(),
            children,
            metadata: None,
        })
    }

    /// Attach metadata, replacing any existing metadata.
    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        *self.metadata_slot() = Some(metadata);
        self
    }

    /// Request a SQL type for the value this expression finally produces.
    ///
    /// The type lands on the last step of a `.` chain, which is the node
    /// that performs the extraction.
    pub fn with_result_type(mut self, sql_type: SqlDataType) -> Self {
        self.annotate_result_type(sql_type);
        self
    }

    pub fn annotate_result_type(&mut self, sql_type: SqlDataType) {
        match self {
            Self::Operator(op) if op.symbol == "." && op.children.len() == 2 => {
                op.children[1].annotate_result_type(sql_type);
            }
            _ => {
                self.metadata_slot()
                    .get_or_insert_with(NodeMetadata::default)
                    .sql_type = Some(sql_type);
            }
        }
    }

    fn metadata_slot(&mut self) -> &mut Option<NodeMetadata> {
        match self {
            Self::Literal(n) => &mut n.metadata,
            Self::Identifier(n) => &mut n.metadata,
            Self::FunctionCall(n) => &mut n.metadata,
            Self::Operator(n) => &mut n.metadata,
            Self::Conditional(n) => &mut n.metadata,
            Self::Aggregation(n) => &mut n.metadata,
            Self::TypeOperation(n) => &mut n.metadata,
        }
    }

    /// Declared SQL type of this node's value, if any.
    pub fn sql_type(&self) -> Option<SqlDataType> {
        self.metadata().and_then(|m| m.sql_type)
    }

    /// SQL type requested for the value the whole expression produces.
    pub fn result_type(&self) -> Option<SqlDataType> {
        match self {
            Self::Operator(op) if op.symbol == "." && op.children.len() == 2 => {
                op.children[1].result_type()
            }
            _ => self.sql_type(),
        }
    }

    /// Check if this node is a literal of the given kind.
    pub fn is_literal(&self, predicate: impl Fn(LiteralType) -> bool) -> bool {
        matches!(self, Self::Literal(n) if predicate(n.literal_type))
    }

    pub fn metadata(&self) -> Option<&NodeMetadata> {
        match self {
            Self::Literal(n) => n.metadata.as_ref(),
            Self::Identifier(n) => n.metadata.as_ref(),
            Self::FunctionCall(n) => n.metadata.as_ref(),
            Self::Operator(n) => n.metadata.as_ref(),
            Self::Conditional(n) => n.metadata.as_ref(),
            Self::Aggregation(n) => n.metadata.as_ref(),
            Self::TypeOperation(n) => n.metadata.as_ref(),
        }
    }

    /// Short name of the node kind, used in logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Literal(_) => "literal",
            Self::Identifier(_) => "identifier",
            Self::FunctionCall(_) => "function_call",
            Self::Operator(_) => "operator",
            Self::Conditional(_) => "conditional",
            Self::Aggregation(_) => "aggregation",
            Self::TypeOperation(_) => "type_operation",
        }
    }

    /// Direct children of this node, target first.
    pub fn children(&self) -> Vec<&ExpressionNode> {
        match self {
            Self::Literal(_) | Self::Identifier(_) | Self::Aggregation(_) => Vec::new(),
            Self::FunctionCall(n) => n
                .target
                .iter()
                .map(|t| t.as_ref())
                .chain(n.arguments.iter())
                .collect(),
            Self::Operator(n) => n.children.iter().collect(),
            Self::Conditional(n) => n.children.iter().collect(),
            Self::TypeOperation(n) => n.children.iter().collect(),
        }
    }

    /// Depth of the tree rooted at this node (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(ExpressionNode::depth)
            .max()
            .unwrap_or(0)
    }

    /// Dispatch to the visitor method for this node's kind.
    pub fn accept<V, C>(&self, visitor: &V, ctx: &mut C) -> V::Output
    where
        V: AstVisitor<C> + ?Sized,
        C: ?Sized,
    {
        match self {
            Self::Literal(n) => visitor.visit_literal(n, ctx),
            Self::Identifier(n) => visitor.visit_identifier(n, ctx),
            Self::FunctionCall(n) => visitor.visit_function_call(n, ctx),
            Self::Operator(n) => visitor.visit_operator(n, ctx),
            Self::Conditional(n) => visitor.visit_conditional(n, ctx),
            Self::Aggregation(n) => visitor.visit_aggregation(n, ctx),
            Self::TypeOperation(n) => visitor.visit_type_operation(n, ctx),
        }
    }
}

/// Visitor over [`ExpressionNode`] with explicitly threaded state `C`.
pub trait AstVisitor<C: ?Sized> {
    type Output;

    fn visit_literal(&self, node: &LiteralNode, ctx: &mut C) -> Self::Output;
    fn visit_identifier(&self, node: &IdentifierNode, ctx: &mut C) -> Self::Output;
    fn visit_function_call(&self, node: &FunctionCallNode, ctx: &mut C) -> Self::Output;
    fn visit_operator(&self, node: &OperatorNode, ctx: &mut C) -> Self::Output;
    fn visit_conditional(&self, node: &ConditionalNode, ctx: &mut C) -> Self::Output;
    fn visit_aggregation(&self, node: &AggregationNode, ctx: &mut C) -> Self::Output;
    fn visit_type_operation(&self, node: &TypeOperationNode, ctx: &mut C) -> Self::Output;
}

// ============================================================================
// Display (FHIRPath-like rendering, used in logs and error wrapping)
// ============================================================================

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(n) => match n.literal_type {
                LiteralType::String => write!(f, "'{}'", n.value.replace('\'', "\\'")),
                LiteralType::Date | LiteralType::DateTime => write!(f, "@{}", n.value),
                LiteralType::Time => write!(f, "@T{}", n.value),
                LiteralType::Null => write!(f, "{{}}"),
                _ => write!(f, "{}", n.value),
            },
            Self::Identifier(n) => write!(f, "{}", n.name),
            Self::FunctionCall(n) => {
                if let Some(target) = &n.target {
                    write!(f, "{target}.")?;
                }
                write!(f, "{}(", n.name)?;
                write_joined(f, &n.arguments)?;
                write!(f, ")")
            }
            Self::Operator(n) => match (n.operator_type, n.children.as_slice()) {
                (_, [left, right]) if n.symbol == "." => write!(f, "{left}.{right}"),
                (OperatorType::Unary, [operand]) if n.symbol == "not" => {
                    write!(f, "{operand}.not()")
                }
                (OperatorType::Unary, [operand]) => write!(f, "{}{operand}", n.symbol),
                (_, [left, right]) => write!(f, "({left} {} {right})", n.symbol),
                _ => {
                    write!(f, "{}(", n.symbol)?;
                    write_joined(f, &n.children)?;
                    write!(f, ")")
                }
            },
            Self::Conditional(n) => match n.children.as_slice() {
                [target, argument] => write!(f, "{target}.{}({argument})", n.kind.as_str()),
                children => {
                    write!(f, "{}(", n.kind.as_str())?;
                    write_joined(f, children)?;
                    write!(f, ")")
                }
            },
            Self::Aggregation(n) => write!(f, "{}()", n.function.as_str()),
            Self::TypeOperation(n) => match n.children.as_slice() {
                [operand] => write!(f, "{operand}.{}({})", n.operation.as_str(), n.target_type),
                _ => write!(f, "{}({})", n.operation.as_str(), n.target_type),
            },
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, nodes: &[ExpressionNode]) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{node}")?;
    }
    Ok(())
}
