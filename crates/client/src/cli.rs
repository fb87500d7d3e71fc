//! Command line tool for exercising the clinical-data gateway.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use msc_fhir_client::{init_logging, ClientConfig, FhirClient};
use msc_fhir_gateway::search::{SearchQueryBuilder, SortDirection};
use msc_fhir_gateway::store::InMemoryStore;

#[derive(Debug, Parser)]
#[command(name = "msc-fhir-cli")]
#[command(about = "Query the clinical-data service through the gateway")]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read one resource by type and id.
    Read {
        resource_type: String,
        id: String,
    },
    /// Search a resource type.
    Search {
        resource_type: String,
        /// Search parameters as key=value pairs.
        #[arg(short, long)]
        param: Vec<String>,
        /// Page size.
        #[arg(long, default_value = "20")]
        count: u32,
        /// Sort by most recently updated first.
        #[arg(long)]
        latest: bool,
    },
    /// Show the circuit breaker's current state.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.config.log_level);

    if let Err(errors) = cli.config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let store = Arc::new(InMemoryStore::new());
    let client = FhirClient::new(&cli.config, store)
        .map_err(|e| anyhow::anyhow!("client init failed: {}", e))?;

    match cli.command {
        Command::Read { resource_type, id } => match client.read(&resource_type, &id).await {
            Ok(Some(resource)) => println!("{}", serde_json::to_string_pretty(&resource)?),
            Ok(None) => {
                eprintln!("{}/{} not found", resource_type, id);
                std::process::exit(1);
            }
            Err(err) => render_failure(&client, err),
        },
        Command::Search {
            resource_type,
            param,
            count,
            latest,
        } => {
            let mut query = SearchQueryBuilder::for_type(resource_type).limit(count);
            for pair in &param {
                let Some((key, value)) = pair.split_once('=') else {
                    anyhow::bail!("invalid parameter '{}', expected key=value", pair);
                };
                query = query.param(key, value);
            }
            if latest {
                query = query.order_by("_lastUpdated", SortDirection::Descending);
            }
            match client.search(&query).await {
                Ok(bundle) => println!("{}", serde_json::to_string_pretty(&bundle)?),
                Err(err) => render_failure(&client, err),
            }
        }
        Command::Status => {
            let status = client.breaker_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn render_failure(client: &FhirClient, err: msc_fhir_gateway::GatewayError) -> ! {
    let outcome = client.error_handler().operation_outcome(&err, None);
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&outcome).unwrap_or_else(|_| err.to_string())
    );
    std::process::exit(1);
}
