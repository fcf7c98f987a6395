//! CLI entry point for graphmap database administration.
//!
//! Every command prints a single JSON document to stdout; logs go to stderr.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use graphmap_core::{CypherExecutor, LoadOptions, OgmConfig, Properties, Statement};
use graphmap_graph::{GraphClient, GraphConfig};
use graphmap_ogm::{DeleteOptions, Registry, Session};

#[derive(Parser)]
#[command(name = "graphmap-admin")]
#[command(about = "Administer a graph database managed by the graphmap OGM")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: graphmap).
    #[arg(short, long, default_value = "graphmap", global = true)]
    config: String,

    /// Logical database; overrides the configured one.
    #[arg(long, global = true)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Delete every node and relationship.
    Purge {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
    /// Count the nodes carrying a label.
    Count {
        label: String,
    },
    /// Run a Cypher statement and print its rows.
    Query {
        cypher: String,
        /// Parameters as a JSON object.
        #[arg(long)]
        params: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = OgmConfig::load(&cli.config)?;
    let database = cli.database.clone().unwrap_or_else(|| config.database.clone());

    let client = GraphClient::connect(&GraphConfig::from(&config)).await?;

    match cli.command {
        Command::Purge { yes } => {
            if !yes {
                anyhow::bail!("purge deletes everything in `{database}`; pass --yes to confirm");
            }
            let mut session =
                Session::from_config(Arc::new(client), Arc::new(Registry::new()), &config);
            session
                .purge_database(&DeleteOptions::default().with_database(&database))
                .await?;
            println!("{}", serde_json::json!({ "purged": true, "database": database }));
        }
        Command::Count { ref label } => {
            if label.is_empty() || label.contains('`') {
                anyhow::bail!("invalid label `{label}`");
            }
            let mut session =
                Session::from_config(Arc::new(client), Arc::new(Registry::new()), &config);
            let cypher = format!("MATCH (n:`{label}`) RETURN count(n) AS count");
            let count = session
                .count(&cypher, Properties::new(), &LoadOptions::default().with_database(&database))
                .await?;
            println!("{}", serde_json::json!({ "label": label, "count": count }));
        }
        Command::Query { ref cypher, ref params } => {
            let params = parse_params(params.as_deref())?;
            let records = client
                .execute(&database, Statement::new(cypher.as_str()).with_params(params))
                .await?;
            println!("{}", serde_json::to_string(&records)?);
        }
    }

    Ok(())
}

fn parse_params(raw: Option<&str>) -> anyhow::Result<Properties> {
    let Some(raw) = raw else {
        return Ok(Properties::new());
    };
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => anyhow::bail!("--params must be a JSON object, got {other}"),
    }
}
