//! Rollup CLI - Command-line client for the Rollup Engine control plane

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "rollup")]
#[command(about = "Rollup Engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "ROLLUP_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a rollup job from a JSON definition file
    Put {
        /// Path to the definition (`-` reads stdin)
        file: PathBuf,

        /// Override the id in the definition
        #[arg(long)]
        id: Option<String>,
    },

    /// Show a rollup job
    Get {
        /// Rollup ID
        rollup_id: String,
    },

    /// Start (or resume) a rollup job
    Start {
        /// Rollup ID
        rollup_id: String,
    },

    /// Stop a rollup job
    Stop {
        /// Rollup ID
        rollup_id: String,
    },

    /// Show the run metadata of a rollup job
    Status {
        /// Rollup ID
        rollup_id: String,
    },

    /// Show a run metadata record by its id
    Metadata {
        /// Metadata ID
        metadata_id: String,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    /// Null when the server could not read the request id
    #[allow(dead_code)]
    #[serde(default)]
    id: Option<Value>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct RollupRow {
    id: String,
    enabled: bool,
    source: String,
    target: String,
    continuous: bool,
    metadata_id: String,
}

impl RollupRow {
    fn from_value(v: &Value) -> Self {
        Self {
            id: text(&v["id"]),
            enabled: v["enabled"].as_bool().unwrap_or(false),
            source: text(&v["source_index"]),
            target: text(&v["target_index"]),
            continuous: v["continuous"].as_bool().unwrap_or(false),
            metadata_id: text(&v["metadata_id"]),
        }
    }
}

#[derive(Tabled)]
struct MetadataRow {
    id: String,
    rollup_id: String,
    status: String,
    after_key: String,
    documents: i64,
    rollups: i64,
    failure_reason: String,
}

impl MetadataRow {
    fn from_value(v: &Value) -> Self {
        let after_key = match &v["after_key"] {
            Value::Null => "-".to_string(),
            key => format!("{}/{}", key["timestamp"], text(&key["doc_id"])),
        };
        Self {
            id: text(&v["id"]),
            rollup_id: text(&v["rollup_id"]),
            status: text(&v["status"]),
            after_key,
            documents: v["documents_processed"].as_i64().unwrap_or(0),
            rollups: v["rollups_indexed"].as_i64().unwrap_or(0),
            failure_reason: text(&v["failure_reason"]),
        }
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn colored_status(status: &str) -> colored::ColoredString {
    match status {
        "STARTED" | "INIT_RESUMED" => status.green(),
        "STOPPED" => status.yellow(),
        "FINISHED" => status.cyan(),
        "FAILED" => status.red(),
        other => other.normal(),
    }
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    response.into_result()
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            anyhow::bail!("RPC error ({}): {}", error.code, error.message);
        }
        self.result
            .ok_or_else(|| anyhow::anyhow!("No result in response"))
    }
}

fn read_definition(file: &Path, id: Option<String>) -> Result<Value> {
    let raw = if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    let mut definition: Value = serde_json::from_str(&raw).context("Invalid JSON definition")?;
    if !definition.is_object() {
        anyhow::bail!("Rollup definition must be a JSON object");
    }
    if let Some(id) = id {
        definition["id"] = Value::String(id);
    }
    Ok(definition)
}

fn print_metadata(metadata: &Value) {
    let status = text(&metadata["status"]);
    println!("  {} {}", "Status:".bold(), colored_status(&status));
    println!();
    println!("{}", Table::new(vec![MetadataRow::from_value(metadata)]));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Put { file, id } => {
            let definition = read_definition(&file, id)?;
            let rollup = call_rpc(&cli.rpc_url, "rollup.put.v1", definition).await?;

            println!("{}", "✓ Rollup created".green().bold());
            println!();
            println!("{}", Table::new(vec![RollupRow::from_value(&rollup)]));
        }

        Commands::Get { rollup_id } => {
            let rollup =
                call_rpc(&cli.rpc_url, "rollup.get.v1", json!({ "rollup_id": rollup_id })).await?;
            println!("{}", Table::new(vec![RollupRow::from_value(&rollup)]));
        }

        Commands::Start { rollup_id } => {
            call_rpc(&cli.rpc_url, "rollup.start.v1", json!({ "rollup_id": rollup_id })).await?;
            println!("{}", format!("✓ Rollup {} started", rollup_id).green().bold());
        }

        Commands::Stop { rollup_id } => {
            call_rpc(&cli.rpc_url, "rollup.stop.v1", json!({ "rollup_id": rollup_id })).await?;
            println!("{}", format!("✓ Rollup {} stopped", rollup_id).green().bold());
        }

        Commands::Status { rollup_id } => {
            let rollup =
                call_rpc(&cli.rpc_url, "rollup.get.v1", json!({ "rollup_id": rollup_id })).await?;
            println!("{}", format!("Rollup {}", rollup_id).cyan().bold());
            println!(
                "  {} {}",
                "Enabled:".bold(),
                rollup["enabled"].as_bool().unwrap_or(false)
            );

            match rollup["metadata_id"].as_str() {
                Some(metadata_id) => {
                    let metadata = call_rpc(
                        &cli.rpc_url,
                        "metadata.get.v1",
                        json!({ "metadata_id": metadata_id }),
                    )
                    .await?;
                    print_metadata(&metadata);
                }
                None => println!("  {}", "Never executed".yellow()),
            }
        }

        Commands::Metadata { metadata_id } => {
            let metadata = call_rpc(
                &cli.rpc_url,
                "metadata.get.v1",
                json!({ "metadata_id": metadata_id }),
            )
            .await?;
            print_metadata(&metadata);
        }
    }

    Ok(())
}
