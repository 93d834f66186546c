//! A PostgreSQL client library speaking the v3 wire protocol.
//!
//! # Features
//!
//! - **Wire-level protocol**: startup, cleartext/MD5/SCRAM-SHA-256
//!   authentication, simple and extended query flows, error
//!   resynchronization
//! - **TLS**: opportunistic or enforced, over the SSLRequest handshake
//! - **Typed results**: OID-driven text decoding into a [`Value`] sum type,
//!   with a caller-extensible decoder registry
//! - **Transactions**: isolation levels, read-only, snapshots, savepoints
//! - **Pooling**: lazy LIFO pool with FIFO waiters and release-on-drop
//!
//! # Example
//!
//! ```no_run
//! use quill_postgres::Client;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> quill_postgres::Result<()> {
//!     let client = Client::new("postgres://user@localhost:5432/db")?;
//!     client.connect().await?;
//!
//!     let results = client.query_array("SELECT 1").await?;
//!     println!("{:?}", results[0].rows);
//!
//!     client.end().await?;
//!     Ok(())
//! }
//! ```

// private
mod auth;
mod client;
mod config;
mod connection;
mod error;
mod pool;
mod query;
mod transaction;

// pub
pub mod protocol;
pub mod types;

pub use client::{Client, SessionInfo};
pub use config::{
    ClientControls, ConnectionOptions, DebugControls, HostType, ReconnectInterval,
    ReconnectOptions, TlsOptions, DEFAULT_APPLICATION_NAME,
};
pub use error::{
    AuthError, ConfigError, ConnectionError, Error, LifecycleError, ProtocolError, QueryError,
    Result, ServerNotice, TransactionError,
};
pub use pool::{Pool, PoolClient};
pub use query::{
    CommandType, Query, QueryArgs, QueryArrayResult, QueryConfig, QueryObjectResult,
};
pub use transaction::{
    IsolationLevel, RollbackOptions, Savepoint, Transaction, TransactionOptions,
};
pub use types::{DecodeStrategy, DecoderFn, Decoders, Value};
