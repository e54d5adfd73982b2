//! Concrete transports and sinks for awsync: SSH via `russh`, Postgres via `sqlx`.

pub mod postgres;
pub mod ssh;

pub use postgres::PostgresSink;
pub use ssh::{RusshConnector, RusshShell};
