use crate::extract::executor::RemoteQueryExecutor;
use crate::extract::query::{RemoteDatabase, RemoteQuery};
use crate::extract::selection::{RowLimit, SelectionMode};
use crate::extract::traits::RemoteShell;
use crate::models::{Bucket, Event};
use crate::Result;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::future::Future;

type Handler<'a, T> = Box<dyn FnOnce(Vec<T>) -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// Optional async callbacks invoked with each fetched row set.
///
/// Each handler runs at most once per run and is awaited before the next step; an `Err`
/// from a handler aborts the run.
#[derive(Default)]
pub struct ExtractHandlers<'a> {
    on_buckets: Option<Handler<'a, Bucket>>,
    on_events: Option<Handler<'a, Event>>,
}

impl<'a> ExtractHandlers<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_buckets<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(Vec<Bucket>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<()>> + Send + 'a,
    {
        self.on_buckets = Some(Box::new(move |rows| -> BoxFuture<'a, Result<()>> {
            Box::pin(f(rows))
        }));
        self
    }

    pub fn on_events<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(Vec<Event>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<()>> + Send + 'a,
    {
        self.on_events = Some(Box::new(move |rows| -> BoxFuture<'a, Result<()>> {
            Box::pin(f(rows))
        }));
        self
    }
}

/// Row counts of one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    pub buckets: usize,
    pub events: usize,
}

/// Sequences one extraction run: buckets first, then events under a selection mode.
///
/// The extractor never closes its own session; callers must call `close()` on every exit
/// path (see `Pipeline::run`).
pub struct Extractor<S> {
    executor: RemoteQueryExecutor<S>,
    bucket_limit: RowLimit,
    test_limit: RowLimit,
    clock: fn() -> DateTime<Utc>,
}

impl<S: RemoteShell> Extractor<S> {
    pub fn new(shell: S, database: RemoteDatabase) -> Self {
        Self {
            executor: RemoteQueryExecutor::new(shell, database),
            bucket_limit: RowLimit::DEFAULT,
            test_limit: RowLimit::DEFAULT,
            clock: Utc::now,
        }
    }

    pub fn with_bucket_limit(mut self, limit: RowLimit) -> Self {
        self.bucket_limit = limit;
        self
    }

    /// Row cap for `SelectionMode::Test`.
    pub fn with_test_limit(mut self, limit: RowLimit) -> Self {
        self.test_limit = limit;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn executor(&self) -> &RemoteQueryExecutor<S> {
        &self.executor
    }

    /// Run one extraction.
    ///
    /// Order: connect, fetch buckets, resolve the event selection, bucket handler, fetch
    /// events, event handler. A mode that cannot be resolved (`PRESET_TIMESTAMP`) fails after
    /// the bucket fetch and before any handler runs.
    #[tracing::instrument(level = "info", skip(self, mode, handlers), fields(mode = %mode))]
    pub async fn extract(
        &mut self,
        mode: SelectionMode,
        handlers: ExtractHandlers<'_>,
    ) -> Result<ExtractReport> {
        let res = self.extract_inner(mode, handlers).await;
        if let Err(e) = &res {
            tracing::warn!(error = %e, "extraction aborted");
        }
        res
    }

    async fn extract_inner(
        &mut self,
        mode: SelectionMode,
        handlers: ExtractHandlers<'_>,
    ) -> Result<ExtractReport> {
        let ExtractHandlers {
            on_buckets,
            on_events,
        } = handlers;

        self.executor.connect().await?;
        let buckets: Vec<Bucket> = self
            .executor
            .execute_query(&RemoteQuery::top_buckets(self.bucket_limit))
            .await?;
        let bucket_count = buckets.len();
        tracing::info!(count = bucket_count, "buckets fetched");

        let selection = mode.resolve((self.clock)(), self.test_limit)?;

        if let Some(handler) = on_buckets {
            handler(buckets).await?;
        }

        // Re-issued before each fetch; a no-op while the session is open.
        self.executor.connect().await?;
        let events: Vec<Event> = self
            .executor
            .execute_query(&RemoteQuery::events(&selection))
            .await?;
        let event_count = events.len();
        tracing::info!(count = event_count, "events fetched");

        if let Some(handler) = on_events {
            handler(events).await?;
        }

        Ok(ExtractReport {
            buckets: bucket_count,
            events: event_count,
        })
    }

    /// Release the remote session. Never fails.
    pub async fn close(&mut self) {
        self.executor.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::testing::{FakeActivityDb, ScriptedShell, bucket, event};
    use chrono::TimeZone;
    use std::sync::Mutex;

    const NOW_SECS: i64 = 1_700_000_000;
    const T: i64 = NOW_SECS * 1_000_000_000;

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(NOW_SECS, 0).unwrap()
    }

    fn db() -> RemoteDatabase {
        RemoteDatabase::with_default_bin("/home/ubuntu/aw.db").unwrap()
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

    #[tokio::test]
    async fn current_timestamp_run_delivers_window_in_start_order() {
        let seen_buckets = Mutex::new(Vec::new());
        let seen_events = Mutex::new(Vec::new());
        let (sb, se) = (&seen_buckets, &seen_events);

        let mut ex = Extractor::new(remote().into_shell(), db()).with_clock(fixed_now);
        let report = ex
            .extract(
                SelectionMode::CurrentTimestamp,
                ExtractHandlers::new()
                    .on_buckets(move |rows| async move {
                        sb.lock().unwrap().extend(rows.iter().map(|b| b.id));
                        Ok(())
                    })
                    .on_events(move |rows| async move {
                        se.lock().unwrap().extend(rows.iter().map(|e| e.id));
                        Ok(())
                    }),
            )
            .await
            .unwrap();
        ex.close().await;

        assert_eq!(*seen_buckets.lock().unwrap(), vec![3, 2, 1]);
        // Straddling event 4 first, then the two future events; 1 and 2 ended by the cutoff.
        assert_eq!(*seen_events.lock().unwrap(), vec![4, 5, 3]);
        assert_eq!(report, ExtractReport { buckets: 3, events: 3 });
    }

    #[tokio::test]
    async fn test_mode_requests_at_most_the_top_n() {
        let mut fake = remote();
        fake.events = (1..=25).map(|i| event(i, T + i, T + i + 1)).collect();
        let shell = fake.into_shell();
        let log = shell.log();

        let mut ex = Extractor::new(shell, db());
        let report = ex
            .extract(SelectionMode::Test, ExtractHandlers::new())
            .await
            .unwrap();

        assert_eq!(report.events, 10);
        let commands = log.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[1].contains("ORDER BY id DESC LIMIT 10'"));
    }

    #[tokio::test]
    async fn test_limit_is_replaceable() {
        let shell = remote().into_shell();
        let log = shell.log();
        let mut ex = Extractor::new(shell, db())
            .with_bucket_limit(RowLimit::new(2).unwrap())
            .with_test_limit(RowLimit::new(4).unwrap());
        let report = ex
            .extract(SelectionMode::Test, ExtractHandlers::new())
            .await
            .unwrap();

        assert_eq!(report, ExtractReport { buckets: 2, events: 4 });
        assert!(log.commands()[0].contains("LIMIT 2'"));
    }

    #[tokio::test]
    async fn preset_timestamp_fails_after_bucket_fetch_without_handlers() {
        let shell = remote().into_shell();
        let log = shell.log();
        let calls = Mutex::new(0usize);
        let c = &calls;

        let mut ex = Extractor::new(shell, db());
        let err = ex
            .extract(
                SelectionMode::PresetTimestamp {
                    timestamp_ms: Some(1_700_000_000_000),
                },
                ExtractHandlers::new()
                    .on_buckets(move |_| async move {
                        *c.lock().unwrap() += 1;
                        Ok(())
                    })
                    .on_events(move |_| async move {
                        *c.lock().unwrap() += 1;
                        Ok(())
                    }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotImplemented(_)));
        assert_eq!(*calls.lock().unwrap(), 0);
        let commands = log.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("FROM buckets"));
    }

    #[tokio::test]
    async fn handler_failure_aborts_remaining_steps() {
        let shell = remote().into_shell();
        let log = shell.log();
        let events_called = Mutex::new(false);
        let ec = &events_called;

        let mut ex = Extractor::new(shell, db());
        let err = ex
            .extract(
                SelectionMode::All,
                ExtractHandlers::new()
                    .on_buckets(|_| async { Err::<(), _>(Error::BackendMessage("sink down".into())) })
                    .on_events(move |_| async move {
                        *ec.lock().unwrap() = true;
                        Ok(())
                    }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BackendMessage(ref m) if m == "sink down"));
        assert!(!*events_called.lock().unwrap());
        assert_eq!(log.commands().len(), 1);
    }

    #[tokio::test]
    async fn connection_failure_issues_no_commands() {
        let shell = ScriptedShell::new().fail_open("no route to host");
        let log = shell.log();
        let mut ex = Extractor::new(shell, db());

        let err = ex
            .extract(SelectionMode::All, ExtractHandlers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(log.commands().is_empty());
    }

    #[tokio::test]
    async fn session_is_opened_once_per_run() {
        let shell = remote().into_shell();
        let log = shell.log();
        let mut ex = Extractor::new(shell, db());
        ex.extract(SelectionMode::All, ExtractHandlers::new())
            .await
            .unwrap();
        assert_eq!(log.opens(), 1);
        assert_eq!(log.closes(), 0);

        ex.close().await;
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn empty_remote_yields_empty_handlers() {
        let seen = Mutex::new(None);
        let s = &seen;
        let mut ex = Extractor::new(FakeActivityDb::default().into_shell(), db());
        ex.extract(
            SelectionMode::All,
            ExtractHandlers::new().on_events(move |rows| async move {
                *s.lock().unwrap() = Some(rows.len());
                Ok(())
            }),
        )
        .await
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(0));
    }
}
