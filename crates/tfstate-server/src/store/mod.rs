pub mod crypto;
pub mod writer;

pub use crypto::EncryptionKey;
pub use writer::{StateWriter, WriteError, WriteOutcome, STATE_FILE};
