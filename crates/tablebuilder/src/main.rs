//! tablebuilder CLI
//!
//! Command-line front end for defining tables and reading/writing their rows.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use tablebuilder::config::DEFAULT_DATABASE_URL;
use tablebuilder::prelude::*;
use tablebuilder::schema::DEFAULT_STRING_LENGTH;

/// Runtime-defined relational tables.
#[derive(Parser)]
#[command(name = "tablebuilder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database: String,

    /// Maximum number of pooled connections.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Maximum length of `string` fields, in characters.
    #[arg(long, default_value_t = DEFAULT_STRING_LENGTH)]
    string_length: usize,

    /// How long to wait on a locked database, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    busy_timeout_ms: u64,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring every recorded table up to its declared shape.
    Bootstrap,

    /// Create a table from a JSON payload: {"name": ..., "fields": [...]}.
    CreateTable {
        /// Request body.
        payload: String,
    },

    /// Replace the field list of a table: {"fields": [...]}.
    UpdateTable {
        /// Table id.
        id: Uuid,

        /// Request body.
        payload: String,

        /// Show the operations without applying them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Insert a row given as a JSON object.
    InsertRow {
        /// Table id.
        table_id: Uuid,

        /// Row object.
        row: String,
    },

    /// List every row of a table.
    ListRows {
        /// Table id.
        table_id: Uuid,
    },

    /// Show registered tables.
    ShowTables,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig {
        database_url: cli.database,
        max_connections: cli.max_connections,
        string_length: cli.string_length,
        busy_timeout: Duration::from_millis(cli.busy_timeout_ms),
    };
    let manager = config.open().await?;

    let report = manager.bootstrap_from_metadata().await?;
    for (table, err) in &report.failures {
        warn!(table = %table, error = %err, "Table unavailable");
    }

    let service = TableBuilderService::new(Arc::new(manager));
    let result = run(&service, cli.command, &report).await;

    if let Err(err) = result {
        match err.downcast_ref::<TableBuilderError>() {
            Some(engine_err) => {
                print_json(&ErrorResponse::from(engine_err))?;
                std::process::exit(if engine_err.is_client_error() { 2 } else { 1 });
            }
            None => return Err(err),
        }
    }

    Ok(())
}

async fn run(
    service: &TableBuilderService<SqliteMetadataStore>,
    command: Commands,
    report: &BootstrapReport,
) -> anyhow::Result<()> {
    match command {
        Commands::Bootstrap => {
            info!(
                registered = report.outcomes.len(),
                changed = report.changed(),
                failed = report.failures.len(),
                "Bootstrap finished"
            );
            for (table, outcome) in &report.outcomes {
                match outcome {
                    EnsureOutcome::Created => println!(" [+] {table} (created)"),
                    EnsureOutcome::Unchanged => println!(" [=] {table}"),
                    EnsureOutcome::Reconciled(ops) => {
                        println!(" [~] {table}");
                        for op in ops {
                            println!("       {op}");
                        }
                    }
                }
            }
            for (table, err) in &report.failures {
                println!(" [!] {table}: {err}");
            }
        }

        Commands::CreateTable { payload } => {
            let request: CreateTableRequest = serde_json::from_str(&payload)?;
            print_json(&service.create_table(request).await?)?;
        }

        Commands::UpdateTable {
            id,
            payload,
            dry_run,
        } => {
            let request: UpdateTableRequest = serde_json::from_str(&payload)?;
            if dry_run {
                info!("Dry run mode - operations will be printed but not applied.");
                print_json(&service.plan_update(id, request).await?)?;
            } else {
                print_json(&service.update_table(id, request).await?)?;
            }
        }

        Commands::InsertRow { table_id, row } => {
            let row: Row = serde_json::from_str(&row)?;
            print_json(&service.insert_row(table_id, &row).await?)?;
        }

        Commands::ListRows { table_id } => {
            print_json(&service.list_rows(table_id).await?)?;
        }

        Commands::ShowTables => {
            print_json(&service.manager().tables())?;
        }
    }

    Ok(())
}
