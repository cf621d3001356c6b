//! FHIRPath to SQL translation for OctoFHIR.
//!
//! This crate compiles FHIRPath expressions into SQL over tables holding one
//! JSON FHIR resource per row, so that an expression is evaluated for a whole
//! population in a single statement instead of once per resource.
//!
//! # Components
//!
//! - [`parse`] - FHIRPath source text to [`ExpressionNode`] trees
//! - [`AstToSqlTranslator`] - walks a tree and produces [`SqlFragment`]s
//! - [`TranslationContext`] - path stack, variable scopes and name counters
//!   threaded through one translation
//! - [`Dialect`] - the SQL primitives a database must supply, implemented by
//!   [`PostgresDialect`] and [`DuckDbDialect`]
//! - [`QueryAssembler`] - turns fragments into `WITH ... SELECT ...`
//!
//! # Example
//!
//! ```
//! use octofhir_fhirpath_sql::{AstToSqlTranslator, DialectKind, dialect_for};
//!
//! let mut translator = AstToSqlTranslator::new(dialect_for(DialectKind::Postgres), "Patient");
//! let fragments = translator
//!     .translate_expression("name.where(use = 'official').family")
//!     .unwrap();
//! assert_eq!(fragments.len(), 1);
//! assert!(!fragments[0].expression.contains("LIMIT"));
//! ```

pub mod ast;
pub mod context;
pub mod cte;
pub mod dialect;
pub mod error;
pub mod fragment;
pub mod parser;
pub mod translator;

pub use ast::{
    AggregateFunction, AstVisitor, ConditionalKind, ExpressionNode, LiteralType, NodeMetadata,
    OperatorType, SqlDataType, TypeOperationKind,
};
pub use context::{ROOT_TABLE, ScopeGuard, ScopeMode, THIS, TranslationContext, VariableBinding};
pub use cte::{AssembledQuery, Cte, CteBuilder, QueryAssembler};
pub use dialect::{
    AggregateKind, Dialect, DialectKind, DuckDbDialect, JsonKind, LogicalOp, MathFunction,
    PostgresDialect, dialect_for, validate_identifier,
};
pub use error::{Arity, Result, TranslationError};
pub use fragment::SqlFragment;
pub use parser::parse;
pub use translator::{AstToSqlTranslator, fhir_type_kind, is_choice_element};
