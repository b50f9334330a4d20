//! contactdb - a disk-backed contact record table behind a TCP command
//! server.
//!
//! One request per connection: a JSON `post` upserts a record keyed by
//! email, a JSON `get` fetches records by phone number, and a bare
//! `shutdown` token stops the server gracefully. Records persist in a
//! flat comma-delimited file rewritten atomically on every upsert.

pub mod error;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod store;

pub use error::{Result, ServiceError};
pub use server::{DataServer, ServerConfig, ServerState};
pub use store::{Record, RecordStore};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5784;
