use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use octofhir_fhirpath_sql::DialectKind;

#[derive(Parser)]
#[command(name = "sof-sql")]
#[command(about = "Generate SQL from SQL on FHIR ViewDefinitions and FHIRPath expressions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Target SQL dialect (overrides the config file)
    #[arg(short, long, global = true, env = "SOF_SQL_DIALECT")]
    pub dialect: Option<DialectArg>,

    /// Generator config file (TOML)
    #[arg(short, long, global = true, env = "SOF_SQL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Print the translation as JSON instead of the SQL text
    #[arg(long, global = true)]
    pub fragments: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DialectArg {
    Postgres,
    Duckdb,
}

impl From<DialectArg> for DialectKind {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => DialectKind::Postgres,
            DialectArg::Duckdb => DialectKind::DuckDb,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the SQL for a ViewDefinition JSON file
    View(ViewArgs),
    /// Translate a single FHIRPath expression
    Expr(ExprArgs),
}

#[derive(clap::Args)]
pub struct ViewArgs {
    /// Path to the ViewDefinition JSON file (reads from stdin if "-")
    pub file: PathBuf,
}

#[derive(clap::Args)]
pub struct ExprArgs {
    /// Resource type the expression is evaluated on (e.g. Patient)
    pub resource_type: String,
    /// FHIRPath expression
    pub expression: String,
}
