use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    handlers::{fetch_state, health, update_state},
    store::{crypto, StateWriter},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Storage root for state files ($TFSTATE_STORAGE_DIR).
    pub storage_dir: Option<PathBuf>,
    /// Shared secret for encryption at rest; `None` stores plaintext.
    pub secret: Option<String>,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TFSTATE_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("TFSTATE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            storage_dir: std::env::var("TFSTATE_STORAGE_DIR").ok().map(PathBuf::from),
            secret: std::env::var("TFSTATE_SECRET").ok(),
            cors_origins: std::env::var("TFSTATE_CORS_ORIGINS").ok(),
        }
    }
}

/// Read a shared secret from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_secret_file(path: &std::path::Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read secret file: {}", path.display()))?;
    let secret = content.trim().to_string();
    if secret.is_empty() {
        anyhow::bail!("secret file is empty: {}", path.display());
    }
    Ok(secret)
}

/// Resolve the optional shared secret from `TFSTATE_SECRET_FILE`
/// (preferred) or `TFSTATE_SECRET`. File-based delivery is recommended
/// for production — env vars are visible via `docker inspect` and
/// `/proc`. Returns `None` when neither is set: states are then stored
/// in plaintext.
pub fn resolve_secret() -> Result<Option<String>> {
    if let Ok(path) = std::env::var("TFSTATE_SECRET_FILE") {
        let secret = read_secret_file(std::path::Path::new(&path))?;
        if std::env::var("TFSTATE_SECRET").is_ok() {
            tracing::warn!("both TFSTATE_SECRET and TFSTATE_SECRET_FILE are set; using file");
        }
        return Ok(Some(secret));
    }
    Ok(std::env::var("TFSTATE_SECRET").ok().filter(|s| !s.is_empty()))
}

/// Resolve the storage root, creating it if needed.
/// Public so the CLI can report the effective location.
pub fn resolve_storage_dir(storage_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match storage_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create storage dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::storage_dir(),
    }
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let storage_dir = resolve_storage_dir(cfg.storage_dir.as_ref())?;

    info!(storage_dir = %storage_dir.display(), "using storage directory");

    // The encryption policy is fixed for the whole deployment at
    // startup: either every state is sealed with the derived key, or
    // none is.
    let key = match cfg.secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => {
            let salt = load_or_create_salt(&storage_dir)?;
            let key = crypto::derive_key(secret, &salt).context("derive encryption key")?;
            info!("encryption at rest enabled");
            Some(key)
        }
        None => {
            warn!("no shared secret configured — state files are stored in plaintext");
            None
        }
    };

    let writer = StateWriter::new(storage_dir, key);
    let state = AppState { writer };

    let cors = build_cors(cfg.cors_origins.as_deref());

    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/states/{*key}",
            get(fetch_state).post(update_state).put(update_state),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "tfstate server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

/// Load the persisted key-derivation salt, generating one on first
/// startup with a secret configured. Losing the salt makes existing
/// ciphertext unrecoverable, so it lives next to the states it guards.
fn load_or_create_salt(storage_dir: &std::path::Path) -> Result<[u8; 32]> {
    let salt_path = storage_dir.join(".tfstate.salt");
    if salt_path.exists() {
        let bytes = std::fs::read(&salt_path).context("read .tfstate.salt")?;
        let salt: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                ".tfstate.salt is corrupt (expected 32 bytes, got {})",
                bytes.len()
            )
        })?;
        Ok(salt)
    } else {
        let salt = crypto::generate_salt();
        std::fs::write(&salt_path, salt).context("write .tfstate.salt")?;
        info!("generated new key-derivation salt");
        Ok(salt)
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
