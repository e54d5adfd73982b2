//! Where extracted rows end up.
//!
//! The pipeline only needs bulk insert with skip-on-duplicate semantics. Implementations live
//! here (`memory`) and in `awsync_integrations` (Postgres).

pub mod memory;

use crate::Result;
use crate::models::{Bucket, Event};
use async_trait::async_trait;

/// Bulk loader for extracted rows.
///
/// Contract: rows whose identity (`id`) already exists are skipped, a single row is never
/// partially applied, and any other failure is returned so the run aborts.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Stable identifier for logs.
    fn id(&self) -> &'static str;

    /// Insert `buckets`, returning how many were new.
    async fn load_buckets(&self, buckets: &[Bucket]) -> Result<u64>;

    /// Insert `events`, returning how many were new.
    async fn load_events(&self, events: &[Event]) -> Result<u64>;
}
