//! `SQLite` plumbing: connection setup, version metadata, schema introspection.

pub mod connection;
pub mod meta;
pub mod schema;

pub use connection::{PragmaState, StoreConfig, StoreLocation, open, verify_pragmas};
pub use meta::SchemaVersion;
