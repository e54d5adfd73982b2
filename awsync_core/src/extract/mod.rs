//! Remote extraction: pulling bucket and event rows out of a SQLite database that is only
//! reachable through a remote shell.
//!
//! - `traits` defines the shell transport seam (`RemoteShell`, `ShellConnector`)
//! - `query` builds the only SQL the executor will ever send
//! - `selection` maps a `SelectionMode` onto a concrete event window
//! - `executor` owns the session and turns command output into typed rows
//! - `engine` sequences bucket and event fetches for one run

pub mod engine;
pub mod executor;
pub mod query;
pub mod selection;
pub mod traits;
