//! SQL on FHIR implementation for OctoFHIR.
//!
//! This crate turns SQL on FHIR ViewDefinition resources into a single SQL
//! statement over a table of JSON FHIR resources. Every FHIRPath expression
//! in the view is compiled by [`octofhir_fhirpath_sql`], so the generated
//! query evaluates the view for the whole population at once.
//!
//! # Components
//!
//! - [`ViewDefinition`] - Parsed representation of a FHIR ViewDefinition resource
//! - [`SqlGenerator`] - Generates SQL from ViewDefinitions
//! - [`GeneratorConfig`] - Dialect, table naming and limits for the generator
//!
//! # Example
//!
//! ```
//! use octofhir_sof::{SqlGenerator, ViewDefinition};
//! use serde_json::json;
//!
//! let view = ViewDefinition::from_json(&json!({
//!     "resourceType": "ViewDefinition",
//!     "name": "patient_demographics",
//!     "status": "active",
//!     "resource": "Patient",
//!     "select": [{"column": [{"name": "id", "path": "id"}, {"name": "gender", "path": "gender"}]}]
//! }))
//! .unwrap();
//!
//! let generated = SqlGenerator::new().generate(&view).unwrap();
//! assert!(generated.sql.contains("FROM patient AS resource"));
//! ```
//!
//! # SQL on FHIR Specification
//!
//! See: <https://build.fhir.org/ig/FHIR/sql-on-fhir-v2/>

mod column;
mod config;
mod sql_generator;
mod view_definition;

pub use column::{ColumnInfo, ColumnType};
pub use config::GeneratorConfig;
pub use sql_generator::{GeneratedColumn, GeneratedSql, SqlGenerator};
pub use view_definition::{Column, Constant, SelectColumn, ViewDefinition, WhereClause};

use octofhir_fhirpath_sql::TranslationError;
use thiserror::Error;

/// Errors that can occur during SQL on FHIR operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The ViewDefinition JSON is invalid or missing required fields.
    #[error("Invalid ViewDefinition: {0}")]
    InvalidViewDefinition(String),

    /// A FHIRPath expression cannot be used where it appears in the view.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A FHIRPath expression failed to parse or translate.
    #[error("Failed to translate '{path}': {source}")]
    Translation {
        path: String,
        #[source]
        source: TranslationError,
    },

    /// The generator configuration is invalid or could not be read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a translation error with the expression it came from.
    pub fn translation(path: impl Into<String>, source: TranslationError) -> Self {
        Self::Translation {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
