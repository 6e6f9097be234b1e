pub mod dirs;
pub mod handlers;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub writer: store::StateWriter,
}

pub use server::{read_secret_file, resolve_secret, resolve_storage_dir, run, ServerConfig};
pub use store::{StateWriter, WriteError, WriteOutcome};
