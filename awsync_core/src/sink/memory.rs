use crate::Result;
use crate::models::{Bucket, Event};
use crate::sink::ActivitySink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory sink for local development and tests.
///
/// Keyed by row id; a second insert of the same id is ignored, like `ON CONFLICT DO NOTHING`.
#[derive(Clone, Default)]
pub struct MemorySink {
    buckets: Arc<Mutex<BTreeMap<i64, Bucket>>>,
    events: Arc<Mutex<BTreeMap<i64, Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored buckets, ordered by id.
    pub async fn buckets(&self) -> Vec<Bucket> {
        self.buckets.lock().await.values().cloned().collect()
    }

    /// Snapshot of stored events, ordered by id.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ActivitySink for MemorySink {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn load_buckets(&self, buckets: &[Bucket]) -> Result<u64> {
        let mut stored = self.buckets.lock().await;
        let mut inserted = 0u64;
        for b in buckets {
            if !stored.contains_key(&b.id) {
                stored.insert(b.id, b.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn load_events(&self, events: &[Event]) -> Result<u64> {
        // Validate the whole batch first so a bad row never leaves a partial insert behind.
        for e in events {
            e.activity()?;
        }
        let mut stored = self.events.lock().await;
        let mut inserted = 0u64;
        for e in events {
            if !stored.contains_key(&e.id) {
                stored.insert(e.id, e.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
