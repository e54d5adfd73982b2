//! awsync core library: data model, selection policy and the extract-filter-load pipeline.

pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod o11y;
pub mod pipeline;
pub mod sink;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{PostgresConfig, PrivateKeySource, RemoteConfig, RunConfig, TriggerConfig};
pub use error::{Error, Result};
pub use extract::engine::{ExtractHandlers, ExtractReport, Extractor};
pub use extract::executor::RemoteQueryExecutor;
pub use extract::query::{RemoteDatabase, RemoteQuery};
pub use extract::selection::{Cutoff, EventSelection, RowLimit, SelectionMode};
pub use extract::traits::{OutputStream, RemoteShell, ShellConnector};
pub use models::{Bucket, Event, EventActivity};
pub use pipeline::{Pipeline, RunSummary};
pub use sink::ActivitySink;
pub use sink::memory::MemorySink;
