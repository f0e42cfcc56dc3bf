//! cqn: compile and run CQN from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Show the flattened query, SQL and bindings
//! cqn compile "SELECT from sap.capire.Books { ID, author { name } }" --model srv/csn.json
//!
//! # Create the tables, then run a query
//! cqn deploy --model srv/csn.json --database-url sqlite://bookshop.db
//! cqn run query.json --model srv/csn.json --database-url sqlite://bookshop.db --args '[42]'
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use cqn::config::ConfigBuilder;
use cqn::prelude::*;
use cqn::transpiler::Binding;
use serde_json::Value as Json;

#[derive(Parser)]
#[command(name = "cqn")]
#[command(version)]
#[command(about = "Compile CQN to SQL and run it", long_about = None)]
#[command(after_help = "EXAMPLES:
    cqn compile 'SELECT from sap.capire.Books { ID, title } where stock > 10' --model csn.json
    cqn compile query.json --model csn.json --dialect hana --flat
    cqn run 'SELECT from sap.capire.Books where ID = ?' --args '[201]' --database-url sqlite://db.sqlite")]
struct Cli {
    /// Configuration file (default: ./cqn.toml, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// CSN model file
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, global = true, env = "CQN_DATABASE_URL")]
    database_url: Option<String>,

    /// SQL dialect (sqlite, postgres, hana)
    #[arg(short, long, global = true)]
    dialect: Option<Dialect>,

    /// Emulate a clause even if the database supports it (repeatable)
    #[arg(long = "emulate", global = true)]
    emulate: Vec<Stage>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Flatten and render a query without running it
    Compile {
        /// Query text, CQN JSON, or a file containing either
        query: String,

        /// Also print the flattened CQN
        #[arg(long)]
        flat: bool,
    },
    /// Run a query against the database
    Run {
        /// Query text, CQN JSON, or a file containing either
        query: String,

        /// Arguments: a JSON array for `?`, an object for `:name`
        #[arg(short, long)]
        args: Option<String>,

        /// Value of `$user`
        #[arg(short, long)]
        user: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Drop and create the tables of every entity
    Deploy,
    /// Check every association of the model
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "cqn=debug" } else { "cqn=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(&cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let model = Arc::new(load_model(&config)?);

    match &cli.command {
        Commands::Compile { query, flat } => compile(&config, &model, query, *flat),
        Commands::Run {
            query,
            args,
            user,
            format,
        } => run(&config, model, query, args.as_deref(), user.as_deref(), format).await,
        Commands::Deploy => deploy(&config, model).await,
        Commands::Validate => validate(&model),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("reading {}", path.display()))?,
        None => match Config::discover()? {
            Some((path, config)) => {
                tracing::debug!("using configuration {}", path.display());
                config
            }
            None => Config::default(),
        },
    };

    let mut builder = ConfigBuilder::from_config(base);
    if let Some(url) = &cli.database_url {
        builder = builder.database(url);
    }
    if let Some(dialect) = cli.dialect {
        builder = builder.dialect(dialect);
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    for stage in &cli.emulate {
        builder = builder.force(*stage);
    }
    Ok(builder.build())
}

fn load_model(config: &Config) -> Result<Model> {
    let Some(path) = &config.database.model else {
        bail!("no model given; use --model or set database.model in {}", cqn::config::CONFIG_FILE);
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let csn: Json = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Model::from_csn(&csn).with_context(|| format!("linking {}", path.display()))
}

/// Query from a file or inline; JSON objects are CQN, anything else is text.
fn read_query(input: &str) -> Result<Query> {
    let text = if Path::new(input).is_file() {
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input))?
    } else {
        input.to_string()
    };
    let text = text.trim();
    if text.starts_with('{') {
        let json: Json = serde_json::from_str(text).context("parsing CQN JSON")?;
        Ok(Query::from_json(&json)?)
    } else {
        Ok(parse_query(text)?)
    }
}

fn compile(config: &Config, model: &Model, input: &str, show_flat: bool) -> Result<()> {
    let query = read_query(input)?;
    let dialect = config.dialect()?;
    let flat = cqn4sql(&query, model)?;
    let stmt = flat.to_sql_with_dialect(dialect)?;

    if show_flat {
        println!("{}", "Flattened CQN:".green().bold());
        println!("{}", serde_json::to_string_pretty(&flat.to_json())?);
        println!();
    }
    println!("{} {}", "SQL".green().bold(), format!("({})", dialect).dimmed());
    println!("{}", stmt.sql.white());

    if !stmt.values.is_empty() {
        println!();
        println!("{}", "Bindings:".cyan());
        for (i, binding) in stmt.values.iter().enumerate() {
            println!("  {:>3} = {}", i + 1, describe(binding).yellow());
        }
    }
    if !stmt.entries.is_empty() {
        println!();
        println!("{}", "Entries:".cyan());
        for entry in &stmt.entries {
            let values: Vec<String> = entry.iter().map(describe).collect();
            println!("  ({})", values.join(", ").yellow());
        }
    }
    Ok(())
}

fn describe(binding: &Binding) -> String {
    match binding {
        Binding::Value(value) => value.to_json().to_string(),
        Binding::Variable(name) => name.clone(),
        Binding::Arg(index) => format!("?{}", index + 1),
        Binding::Named(name) => format!(":{}", name),
    }
}

async fn run(
    config: &Config,
    model: Arc<Model>,
    input: &str,
    args: Option<&str>,
    user: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let query = read_query(input)?;
    let args = match args {
        Some(text) => Args::from_json(&serde_json::from_str(text).context("parsing --args")?)?,
        None => Args::new(),
    };
    let mut context = RequestContext::new();
    if let Some(user) = user {
        context = context.user(user);
    }

    let service = DatabaseService::connect(config, model)
        .await
        .with_context(|| format!("connecting to {}", config.database.url))?;
    let result = service.run_with(&query, args, context).await;
    service.close().await;
    let result = result?;

    match (result, format) {
        (QueryResult::Affected(n), _) => println!("{} {} rows affected", "✓".green(), n),
        (result, OutputFormat::Json) => println!("{}", serde_json::to_string_pretty(&result.to_json())?),
        (result, OutputFormat::Table) => {
            format_table(result.rows());
            if let Some(count) = result.count() {
                println!("{} {}", "$count:".dimmed(), count.to_string().cyan());
            }
        }
    }
    Ok(())
}

async fn deploy(config: &Config, model: Arc<Model>) -> Result<()> {
    let service = DatabaseService::connect(config, model)
        .await
        .with_context(|| format!("connecting to {}", config.database.url))?;
    let tables = service.deploy().await;
    service.close().await;
    println!("{} created {} tables", "✓".green(), tables?);
    Ok(())
}

fn validate(model: &Model) -> Result<()> {
    model.validate()?;
    let count = model.entities().count();
    println!("{} {} entities, every association resolves", "✓".green(), count);
    Ok(())
}

fn format_table(rows: &[Row]) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    let columns: Vec<&String> = rows[0].keys().collect();
    let mut widths: HashMap<&String, usize> = columns.iter().map(|c| (*c, c.len())).collect();
    for row in rows {
        for (col, val) in row {
            let len = val_to_string(val).chars().count();
            if let Some(w) = widths.get_mut(col) {
                *w = (*w).max(len);
            }
        }
    }

    let header: Vec<String> = columns
        .iter()
        .map(|c| format!("{:width$}", c, width = widths[*c]))
        .collect();
    println!("{}", header.join(" │ ").white().bold());

    let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| {
                let val = row.get(*c).map(val_to_string).unwrap_or_default();
                format!("{:width$}", val, width = widths[*c])
            })
            .collect();
        println!("{}", cells.join(" │ "));
    }

    println!();
    println!("{} row(s) returned", rows.len().to_string().cyan());
}

fn val_to_string(val: &Json) -> String {
    match val {
        Json::Null => "NULL".to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.clone(),
        _ => val.to_string(),
    }
}
