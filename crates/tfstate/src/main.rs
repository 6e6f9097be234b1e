use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tfstate", about = "Terraform HTTP state backend", version)]
struct Cli {
    /// tfstate server URL (default: http://localhost:8080 or $TFSTATE_SERVER)
    #[arg(long, env = "TFSTATE_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the state backend HTTP server
    Serve {
        /// Port to listen on (default: $TFSTATE_PORT or 8080)
        #[arg(long, env = "TFSTATE_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $TFSTATE_HOST or 0.0.0.0)
        #[arg(long, env = "TFSTATE_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Storage root for state files (default: $TFSTATE_STORAGE_DIR or platform data dir)
        #[arg(long, env = "TFSTATE_STORAGE_DIR")]
        storage_dir: Option<PathBuf>,
    },
    /// Upload a local state file to a key
    Push {
        /// Logical state key, e.g. team-a/prod
        key: String,
        /// Path to the state file to upload
        file: PathBuf,
    },
    /// Download the state stored for a key
    Pull {
        /// Logical state key
        key: String,
        /// Path to write the state to (default: stdout)
        output: Option<PathBuf>,
    },
    /// Check that the server is up
    Health,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TFSTATE_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            storage_dir,
        } => cmd_serve(host, port, storage_dir).await,

        Commands::Push { key, file } => cmd_push(&cli.server, &key, &file).await,

        Commands::Pull { key, output } => cmd_pull(&cli.server, &key, output.as_deref()).await,

        Commands::Health => cmd_health(&cli.server).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, storage_dir: Option<PathBuf>) -> Result<()> {
    let cfg = tfstate_server::ServerConfig {
        host,
        port,
        storage_dir,
        secret: tfstate_server::resolve_secret()?,
        ..Default::default()
    };

    tfstate_server::run(cfg).await
}

async fn cmd_push(server: &str, key: &str, file: &std::path::Path) -> Result<()> {
    let payload =
        std::fs::read(file).with_context(|| format!("read state file: {}", file.display()))?;

    let client = Client::new();
    let resp = client
        .post(state_url(server, key))
        .body(payload)
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("server returned {status}: {text}");
    }
    println!("✓ pushed {key}");
    Ok(())
}

async fn cmd_pull(server: &str, key: &str, output: Option<&std::path::Path>) -> Result<()> {
    let client = Client::new();
    let resp = client
        .get(state_url(server, key))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        anyhow::bail!("no state stored for {key}");
    }
    if !status.is_success() {
        anyhow::bail!("server returned {status}");
    }

    let payload = resp.bytes().await.context("read response body")?;
    match output {
        Some(path) => {
            std::fs::write(path, &payload)
                .with_context(|| format!("write state file: {}", path.display()))?;
            println!("wrote {} bytes to {}", payload.len(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&payload)?;
        }
    }
    Ok(())
}

async fn cmd_health(server: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .get(format!("{}/health", server.trim_end_matches('/')))
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        anyhow::bail!("server returned {}", resp.status());
    }
    let json: Value = resp.json().await.context("parse response")?;
    println!("{}", json["status"].as_str().unwrap_or("unknown"));
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn state_url(server: &str, key: &str) -> String {
    format!(
        "{}/states/{}",
        server.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}
