use crate::extract::query::{RemoteDatabase, RemoteQuery};
use crate::extract::traits::RemoteShell;
use crate::{Error, Result};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;

/// Runs read-only queries against a SQLite file on the far side of a remote shell.
///
/// Owns exactly one session. Each query is one `sqlite3 -json` invocation whose entire output
/// is buffered before parsing; there is no row cursor, so the row set must fit in memory.
/// Callers bound it with `LIMIT` or a time window.
pub struct RemoteQueryExecutor<S> {
    shell: S,
    database: RemoteDatabase,
    connected: bool,
}

impl<S: RemoteShell> RemoteQueryExecutor<S> {
    pub fn new(shell: S, database: RemoteDatabase) -> Self {
        Self {
            shell,
            database,
            connected: false,
        }
    }

    pub fn database(&self) -> &RemoteDatabase {
        &self.database
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Open the session. Calling it again while connected is a no-op.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.shell.open().await?;
        self.connected = true;
        tracing::debug!("remote session opened");
        Ok(())
    }

    /// Run `query` and decode every output row as `T`.
    #[tracing::instrument(level = "debug", skip(self), fields(query = query.label()))]
    pub async fn execute_query<T: DeserializeOwned>(&mut self, query: &RemoteQuery) -> Result<Vec<T>> {
        if !self.connected {
            return Err(Error::connection_message(
                "execute_query called before connect",
            ));
        }

        let command = self.database.command_for(query);
        let mut output = self.shell.exec(&command).await?;

        let mut payload: Vec<u8> = Vec::new();
        let mut chunks = 0usize;
        while let Some(chunk) = output.next().await {
            payload.extend_from_slice(&chunk?);
            chunks += 1;
        }

        let rows = parse_rows::<T>(&payload)?;
        tracing::debug!(
            chunks,
            payload_len = payload.len(),
            rows = rows.len(),
            "remote query finished"
        );
        Ok(rows)
    }

    /// End the session. Safe to call when never connected; never fails.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.shell.close().await;
        self.connected = false;
        tracing::debug!("remote session closed");
    }
}

/// Decode `sqlite3 -json` output. Whitespace-only output means zero rows.
pub fn parse_rows<T: DeserializeOwned>(payload: &[u8]) -> Result<Vec<T>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(payload).map_err(|source| Error::ResponseParse {
        payload_len: payload.len(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::selection::RowLimit;
    use crate::models::Bucket;
    use crate::testing::{ScriptedShell, bucket_json};

    fn db() -> RemoteDatabase {
        RemoteDatabase::with_default_bin("/home/ubuntu/aw.db").unwrap()
    }

    fn query() -> RemoteQuery {
        RemoteQuery::top_buckets(RowLimit::DEFAULT)
    }

    #[tokio::test]
    async fn returns_one_row_per_array_element() {
        let body = format!("[{},{}]", bucket_json(2), bucket_json(1));
        let shell = ScriptedShell::new().respond_chunked(&body, 7);
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.connect().await.unwrap();

        let rows: Vec<Bucket> = ex.execute_query(&query()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 2);
        assert_eq!(rows[1].name, "bucket-1");
    }

    #[tokio::test]
    async fn whitespace_output_is_empty_result() {
        let shell = ScriptedShell::new().respond(" \n\t\n");
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.connect().await.unwrap();

        let rows: Vec<Bucket> = ex.execute_query(&query()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn malformed_output_is_parse_error() {
        let shell = ScriptedShell::new().respond("Error: no such table: buckets");
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.connect().await.unwrap();

        let err = ex.execute_query::<Bucket>(&query()).await.unwrap_err();
        match err {
            Error::ResponseParse { payload_len, .. } => assert_eq!(payload_len, 29),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_failure_is_remote_exec_error() {
        let shell = ScriptedShell::new().fail_exec("channel open refused");
        let log = shell.log();
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.connect().await.unwrap();

        let err = ex.execute_query::<Bucket>(&query()).await.unwrap_err();
        assert!(matches!(err, Error::RemoteExec { .. }));
        assert_eq!(log.streams_read(), 0);
    }

    #[tokio::test]
    async fn stream_failure_is_remote_exec_error() {
        let shell = ScriptedShell::new().respond_then_fail("[", "exit status 1");
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.connect().await.unwrap();

        let err = ex.execute_query::<Bucket>(&query()).await.unwrap_err();
        assert!(matches!(err, Error::RemoteExec { .. }));
    }

    #[tokio::test]
    async fn query_before_connect_is_rejected() {
        let shell = ScriptedShell::new().respond("[]");
        let log = shell.log();
        let mut ex = RemoteQueryExecutor::new(shell, db());

        let err = ex.execute_query::<Bucket>(&query()).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(log.commands().is_empty());
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let shell = ScriptedShell::new();
        let log = shell.log();
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.connect().await.unwrap();
        ex.connect().await.unwrap();
        assert_eq!(log.opens(), 1);
    }

    #[tokio::test]
    async fn connect_failure_propagates() {
        let shell = ScriptedShell::new().fail_open("authentication rejected");
        let mut ex = RemoteQueryExecutor::new(shell, db());
        let err = ex.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(!ex.is_connected());
    }

    #[tokio::test]
    async fn close_without_connect_is_noop() {
        let shell = ScriptedShell::new();
        let log = shell.log();
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.close().await;
        assert_eq!(log.closes(), 0);

        ex.connect().await.unwrap();
        ex.close().await;
        ex.close().await;
        assert_eq!(log.closes(), 1);
    }

    #[tokio::test]
    async fn sends_quoted_sqlite_command() {
        let shell = ScriptedShell::new().respond("[]");
        let log = shell.log();
        let mut ex = RemoteQueryExecutor::new(shell, db());
        ex.connect().await.unwrap();
        let _: Vec<Bucket> = ex.execute_query(&query()).await.unwrap();

        assert_eq!(
            log.commands(),
            vec![
                "sqlite3 -json '/home/ubuntu/aw.db' 'SELECT * FROM buckets ORDER BY id DESC LIMIT 10'"
                    .to_string()
            ]
        );
    }

    #[test]
    fn parse_rows_rejects_object_payload() {
        let err = parse_rows::<Bucket>(br#"{"id":1}"#).unwrap_err();
        assert!(matches!(err, Error::ResponseParse { payload_len: 8, .. }));
    }
}
