use crate::Result;
use crate::extract::engine::{ExtractHandlers, Extractor};
use crate::extract::query::RemoteDatabase;
use crate::extract::selection::{RowLimit, SelectionMode};
use crate::extract::traits::ShellConnector;
use crate::sink::ActivitySink;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of one successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub mode: String,
    /// Rows fetched from the remote database.
    pub buckets: usize,
    pub events: usize,
    /// Rows the sink reported as new.
    pub buckets_inserted: u64,
    pub events_inserted: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Extract from the remote host and load into the sink.
///
/// Each `run` opens its own session from the connector, so concurrent runs never share one.
#[derive(Clone)]
pub struct Pipeline {
    connector: Arc<dyn ShellConnector>,
    sink: Arc<dyn ActivitySink>,
    database: RemoteDatabase,
    bucket_limit: RowLimit,
    test_limit: RowLimit,
    clock: fn() -> DateTime<Utc>,
}

impl Pipeline {
    pub fn new(
        connector: Arc<dyn ShellConnector>,
        sink: Arc<dyn ActivitySink>,
        database: RemoteDatabase,
    ) -> Self {
        Self {
            connector,
            sink,
            database,
            bucket_limit: RowLimit::DEFAULT,
            test_limit: RowLimit::DEFAULT,
            clock: Utc::now,
        }
    }

    pub fn with_bucket_limit(mut self, limit: RowLimit) -> Self {
        self.bucket_limit = limit;
        self
    }

    pub fn with_test_limit(mut self, limit: RowLimit) -> Self {
        self.test_limit = limit;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn database(&self) -> &RemoteDatabase {
        &self.database
    }

    pub fn sink(&self) -> &Arc<dyn ActivitySink> {
        &self.sink
    }

    /// Run one extraction and load both row sets.
    ///
    /// The remote session is closed on every exit path, including failures.
    #[tracing::instrument(
        level = "info",
        name = "awsync.pipeline.run",
        skip(self, mode),
        fields(mode = %mode, target = %self.connector.target(), sink = self.sink.id())
    )]
    pub async fn run(&self, mode: SelectionMode) -> Result<RunSummary> {
        let started_at = (self.clock)();
        let buckets_inserted = AtomicU64::new(0);
        let events_inserted = AtomicU64::new(0);

        let mut extractor = Extractor::new(self.connector.session(), self.database.clone())
            .with_bucket_limit(self.bucket_limit)
            .with_test_limit(self.test_limit)
            .with_clock(self.clock);

        let sink = self.sink.as_ref();
        let (bi, ei) = (&buckets_inserted, &events_inserted);
        let handlers = ExtractHandlers::new()
            .on_buckets(move |rows| async move {
                let inserted = sink.load_buckets(&rows).await?;
                bi.store(inserted, Ordering::Relaxed);
                tracing::info!(count = rows.len(), inserted, "buckets loaded");
                Ok(())
            })
            .on_events(move |rows| async move {
                let inserted = sink.load_events(&rows).await?;
                ei.store(inserted, Ordering::Relaxed);
                tracing::info!(count = rows.len(), inserted, "events loaded");
                Ok(())
            });

        let res = extractor.extract(mode, handlers).await;
        extractor.close().await;
        let report = res?;

        Ok(RunSummary {
            mode: mode.to_string(),
            buckets: report.buckets,
            events: report.events,
            buckets_inserted: buckets_inserted.load(Ordering::Relaxed),
            events_inserted: events_inserted.load(Ordering::Relaxed),
            started_at,
            finished_at: (self.clock)(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::sink::memory::MemorySink;
    use crate::testing::{FakeActivityDb, ScriptedConnector, ScriptedShell, bucket, event};
    use chrono::TimeZone;

    const NOW_SECS: i64 = 1_700_000_000;
    const T: i64 = NOW_SECS * 1_000_000_000;

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(NOW_SECS, 0).unwrap()
    }

    fn remote() -> FakeActivityDb {
        FakeActivityDb {
            buckets: vec![bucket(1), bucket(2), bucket(3)],
            events: vec![
                event(1, T - 100, T - 50),
                event(2, T - 10, T),
                event(3, T + 30, T + 40),
                event(4, T - 5, T + 5),
                event(5, T + 10, T + 20),
            ],
        }
    }

    fn pipeline(connector: Arc<ScriptedConnector>, sink: MemorySink) -> Pipeline {
        Pipeline::new(
            connector,
            Arc::new(sink),
            RemoteDatabase::with_default_bin("/home/ubuntu/aw.db").unwrap(),
        )
        .with_clock(fixed_now)
    }

    #[tokio::test]
    async fn run_loads_window_into_sink_and_closes_session() {
        let connector = Arc::new(ScriptedConnector::new(|| remote().into_shell()));
        let sink = MemorySink::new();
        let p = pipeline(connector.clone(), sink.clone());

        let summary = p.run(SelectionMode::CurrentTimestamp).await.unwrap();
        assert_eq!(summary.mode, "CURRENT_TIMESTAMP");
        assert_eq!((summary.buckets, summary.events), (3, 3));
        assert_eq!((summary.buckets_inserted, summary.events_inserted), (3, 3));

        let ids: Vec<i64> = sink.events().await.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        let sessions = connector.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].opens(), 1);
        assert_eq!(sessions[0].closes(), 1);
    }

    #[tokio::test]
    async fn repeated_runs_insert_nothing_new() {
        let connector = Arc::new(ScriptedConnector::new(|| remote().into_shell()));
        let sink = MemorySink::new();
        let p = pipeline(connector.clone(), sink.clone());

        p.run(SelectionMode::All).await.unwrap();
        let second = p.run(SelectionMode::All).await.unwrap();

        assert_eq!(second.events, 5);
        assert_eq!((second.buckets_inserted, second.events_inserted), (0, 0));
        assert_eq!(sink.events().await.len(), 5);
        assert_eq!(connector.sessions().len(), 2);
    }

    #[tokio::test]
    async fn session_closed_when_run_fails() {
        let connector = Arc::new(ScriptedConnector::new(|| {
            ScriptedShell::new().respond("[]").fail_exec("exit status 1")
        }));
        let p = pipeline(connector.clone(), MemorySink::new());

        let err = p.run(SelectionMode::All).await.unwrap_err();
        assert!(matches!(err, Error::RemoteExec { .. }));
        assert_eq!(connector.sessions()[0].closes(), 1);
    }

    #[tokio::test]
    async fn preset_timestamp_loads_nothing() {
        let connector = Arc::new(ScriptedConnector::new(|| remote().into_shell()));
        let sink = MemorySink::new();
        let p = pipeline(connector.clone(), sink.clone());

        let err = p
            .run(SelectionMode::PresetTimestamp { timestamp_ms: None })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
        assert!(sink.buckets().await.is_empty());
        assert_eq!(connector.sessions()[0].closes(), 1);
    }

    #[tokio::test]
    async fn failed_connect_is_not_closed() {
        let connector = Arc::new(ScriptedConnector::new(|| {
            ScriptedShell::new().fail_open("handshake timed out")
        }));
        let p = pipeline(connector.clone(), MemorySink::new());

        let err = p.run(SelectionMode::Test).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(connector.sessions()[0].closes(), 0);
    }
}
