//! Tessera WAL — crash safety for tablet servers
//!
//! An append-only, optionally-encrypted log layered over replicating block
//! storage. A tablet server opens one log file per writer session, streams
//! typed records into it from many threads, and relies on group commit to
//! amortize one durable sync across every concurrent producer.
//!
//! # Architecture
//!
//! - **Block sink**: appendable byte stream with flush-to-peers and
//!   sync-to-disk persistence levels (`sink`)
//! - **Crypto module**: self-describing authenticated encryption resolved
//!   by name from the file header (`crypto`)
//! - **Record codec**: deterministic binary layout for log records (`codec`)
//! - **Writer**: group-commit pipeline over the three layers (`writer`);
//!   readback in `reader`

pub mod codec;
pub mod config;
pub mod crypto;
pub mod durability;
pub mod error;
pub mod reader;
pub mod sink;
pub mod writer;

// Re-export key types for convenience
pub use codec::{ColumnUpdate, LogEvent, LogKey, LogValue, Mutation, TabletExtent};
pub use config::WalConfig;
pub use crypto::{
    AesGcmCryptoModule, CryptoModule, CryptoParams, CryptoRegistry, NullCryptoModule,
    AES_GCM_CRYPTO_NAME, NULL_CRYPTO_NAME,
};
pub use error::{WalError, WalResult};
pub use reader::{open_for_read, LogFileReader};
pub use sink::{
    BlockReader, BlockSink, BlockStore, LocalBlockStore, RandomVolumeChooser, VolumeChooser,
};
pub use writer::{MutationBatch, OpHandle, WalWriter};
