//! bqclient CLI - BigQuery dataset/table/query scenario runner.

use anyhow::{Context, Result};
use bqclient::{Client, Config, Scenario};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "bqclient")]
#[command(version)]
#[command(about = "Exercise the BigQuery REST API: datasets, tables, inserts, queries and jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "bqclient.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the end-to-end scenario (create, insert, read, query, update)
    Smoke {
        /// Dataset to use (created if missing)
        #[arg(short, long, default_value = "bqclient_smoke")]
        dataset: String,

        /// Table to (re)create inside the dataset
        #[arg(short, long, default_value = "t1")]
        table: String,
    },

    /// List the tables of a dataset
    Tables {
        /// Dataset ID
        dataset: String,
    },

    /// Run a query and print its rows
    Query {
        /// Query text
        sql: String,

        /// Default dataset for unqualified table names
        #[arg(short, long)]
        dataset: Option<String>,

        /// Submit as a job and poll instead of waiting in one request
        #[arg(long)]
        job: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# bqclient configuration file

[client]
# Project that owns the datasets and runs the jobs
project_id = "${BQ_PROJECT_ID}"
# Bearer token, minted elsewhere (e.g. `gcloud auth print-access-token`)
# access_token = "ya29...."
access_token_env = "BIGQUERY_ACCESS_TOKEN"
base_url = "https://bigquery.googleapis.com/bigquery/v2"
timeout_secs = 60
max_retries = 3
initial_backoff_ms = 1000
# page_size = 1000

[query]
use_legacy_sql = false
poll_interval_ms = 1000
max_poll_attempts = 300
"#;
    println!("{example}");
}

fn load_client(path: &Path) -> Result<Client> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {path:?}"))?;
    Client::from_config(&config).context("Failed to create BigQuery client")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let project_id = config
                .resolve_project_id()
                .context("Failed to resolve project ID")?;
            config
                .resolve_access_token()
                .context("Failed to resolve access token")?;

            info!("Configuration is valid");
            info!("  Project: {project_id}");
            info!("  Endpoint: {}", config.client.base_url);
            info!(
                "  Retries: {} (initial backoff {}ms)",
                config.client.max_retries, config.client.initial_backoff_ms
            );
            info!(
                "  Query: legacy_sql={} poll every {}ms, at most {} polls",
                config.query.use_legacy_sql,
                config.query.poll_interval_ms,
                config.query.max_poll_attempts
            );
            return Ok(());
        }

        Commands::Smoke { dataset, table } => {
            let client = load_client(&cli.config)?;
            let report = Scenario::new(client.clone(), dataset, table)
                .with_progress(!cli.verbose)
                .run()
                .await
                .context("Scenario failed")?;
            let stats = client.stats();

            println!("\n=== Scenario Complete ===");
            println!("Table:       {}", report.table_id);
            println!(
                "Dataset:     {}",
                if report.dataset_existed { "existing" } else { "created" }
            );
            println!("Inserted:    {}", report.rows_inserted);
            println!("Read:        {}", report.rows_read);
            println!("Query sync:  {}", report.rows_queried_sync);
            println!(
                "Query job:   {} (job {}, {})",
                report.rows_queried_job, report.job_id, report.job_status.state
            );
            println!("Description: {:?}", report.final_metadata.description);
            println!("Name:        {:?}", report.final_metadata.name);
            println!(
                "Requests:    {} ({} retries)",
                stats.total_requests, stats.total_retries
            );
            println!("Runtime:     {:.1}s", report.runtime_secs);
        }

        Commands::Tables { dataset } => {
            let client = load_client(&cli.config)?;
            let mut tables = client.dataset(&dataset).tables();
            let mut count = 0usize;
            while let Some(table) = tables
                .next()
                .await
                .with_context(|| format!("Failed to list tables of {dataset}"))?
            {
                println!("{}", table.full_id());
                count += 1;
            }
            info!(dataset = %dataset, count = count, "Listed tables");
        }

        Commands::Query { sql, dataset, job } => {
            let client = load_client(&cli.config)?;
            let mut query = client.query(sql);
            query.default_dataset_id = dataset;

            let mut rows = if job {
                let job = query.run().await.context("Failed to submit query job")?;
                let status = job.wait().await.context("Query job did not succeed")?;
                info!(job_id = %job.id(), state = %status.state, "Query job finished");
                job.read()
            } else {
                query.read().await.context("Query failed")?
            };

            let mut header_printed = false;
            while let Some(row) = rows.next().await.context("Failed to read query results")? {
                if !header_printed {
                    if let Some(schema) = rows.schema() {
                        let names: Vec<&str> =
                            schema.fields().iter().map(|f| f.name.as_str()).collect();
                        println!("{}", names.join("\t"));
                    }
                    header_printed = true;
                }
                let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
                println!("{}", cells.join("\t"));
            }
            if let Some(total) = rows.total_rows() {
                info!(total_rows = total, "Query complete");
            }
        }
    }

    Ok(())
}
