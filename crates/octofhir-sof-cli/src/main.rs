mod cli;
mod output;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use octofhir_sof::{GeneratorConfig, SqlGenerator, ViewDefinition};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, ExprArgs, ViewArgs};

fn main() {
    if let Err(e) = run() {
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let generator = build_generator(&cli)?;
    match &cli.command {
        Commands::View(args) => view(&generator, args, cli.fragments),
        Commands::Expr(args) => expr(&generator, args, cli.fragments),
    }
}

/// Logs go to stderr so generated SQL can be piped.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn build_generator(cli: &Cli) -> Result<SqlGenerator> {
    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GeneratorConfig::default(),
    };
    if let Some(dialect) = cli.dialect {
        config.dialect = dialect.into();
    }
    tracing::debug!(dialect = %config.dialect, schema = ?config.schema, "generator configured");
    Ok(SqlGenerator::with_config(config)?)
}

fn view(generator: &SqlGenerator, args: &ViewArgs, fragments: bool) -> Result<()> {
    let json = read_input(&args.file)?;
    let view = ViewDefinition::parse(&json)
        .with_context(|| format!("Failed to parse ViewDefinition {}", args.file.display()))?;
    let generated = generator.generate(&view)?;
    tracing::info!(
        view = %view.name,
        columns = generated.columns.len(),
        ctes = generated.ctes.len(),
        "generated view SQL"
    );

    if fragments {
        output::print_json(&generated)
    } else {
        output::print_sql(&generated.sql);
        Ok(())
    }
}

fn expr(generator: &SqlGenerator, args: &ExprArgs, fragments: bool) -> Result<()> {
    if fragments {
        let ast = generator.parse_expression(&args.expression)?;
        let mut translator = generator.translator(&args.resource_type);
        let fragments = translator
            .translate(&ast)
            .map_err(|e| octofhir_sof::Error::translation(&args.expression, e))?;
        output::print_json(&fragments)
    } else {
        let sql = generator.expression_sql(&args.resource_type, &args.expression)?;
        output::print_sql(&sql);
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
