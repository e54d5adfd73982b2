//! In-process fakes for the remote shell, shared by unit tests and downstream crates
//! (enable the `test-support` feature).

use crate::extract::selection::Cutoff;
use crate::extract::traits::{OutputStream, RemoteShell, ShellConnector};
use crate::models::{Bucket, Event};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// What a scripted command produces.
#[derive(Debug, Clone)]
pub enum ScriptedOutput {
    /// Stdout chunks, optionally followed by a stream error.
    Stream {
        chunks: Vec<Bytes>,
        fail_with: Option<String>,
    },
    /// The command cannot be dispatched at all.
    ExecFailure(String),
}

impl ScriptedOutput {
    pub fn text(body: &str) -> Self {
        Self::Stream {
            chunks: vec![Bytes::copy_from_slice(body.as_bytes())],
            fail_with: None,
        }
    }
}

type Responder = Box<dyn FnMut(&str) -> ScriptedOutput + Send>;

#[derive(Debug, Default)]
struct LogInner {
    opens: usize,
    closes: usize,
    streams_read: usize,
    commands: Vec<String>,
}

/// Shared record of everything a `ScriptedShell` was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ShellLog(Arc<Mutex<LogInner>>);

impl ShellLog {
    fn with<R>(&self, f: impl FnOnce(&mut LogInner) -> R) -> R {
        let mut inner = self.0.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut inner)
    }

    pub fn opens(&self) -> usize {
        self.with(|l| l.opens)
    }

    pub fn closes(&self) -> usize {
        self.with(|l| l.closes)
    }

    pub fn streams_read(&self) -> usize {
        self.with(|l| l.streams_read)
    }

    pub fn commands(&self) -> Vec<String> {
        self.with(|l| l.commands.clone())
    }
}

/// A `RemoteShell` that replays canned output.
///
/// Outputs queued with `respond*` are consumed in order; once the queue is empty the optional
/// responder is consulted, and failing that the command prints nothing.
pub struct ScriptedShell {
    queue: VecDeque<ScriptedOutput>,
    responder: Option<Responder>,
    open_failure: Option<String>,
    log: ShellLog,
}

impl Default for ScriptedShell {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            responder: None,
            open_failure: None,
            log: ShellLog::default(),
        }
    }

    pub fn log(&self) -> ShellLog {
        self.log.clone()
    }

    pub fn respond(mut self, body: &str) -> Self {
        self.queue.push_back(ScriptedOutput::text(body));
        self
    }

    /// Split `body` into chunks of `size` bytes to exercise buffering across chunk edges.
    pub fn respond_chunked(mut self, body: &str, size: usize) -> Self {
        let chunks = body
            .as_bytes()
            .chunks(size.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        self.queue.push_back(ScriptedOutput::Stream {
            chunks,
            fail_with: None,
        });
        self
    }

    pub fn respond_then_fail(mut self, body: &str, reason: &str) -> Self {
        self.queue.push_back(ScriptedOutput::Stream {
            chunks: vec![Bytes::copy_from_slice(body.as_bytes())],
            fail_with: Some(reason.to_string()),
        });
        self
    }

    pub fn fail_exec(mut self, reason: &str) -> Self {
        self.queue
            .push_back(ScriptedOutput::ExecFailure(reason.to_string()));
        self
    }

    pub fn fail_open(mut self, reason: &str) -> Self {
        self.open_failure = Some(reason.to_string());
        self
    }

    pub fn with_responder(
        mut self,
        responder: impl FnMut(&str) -> ScriptedOutput + Send + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn open(&mut self) -> Result<()> {
        self.log.with(|l| l.opens += 1);
        match &self.open_failure {
            Some(reason) => Err(Error::connection_message(reason.clone())),
            None => Ok(()),
        }
    }

    async fn exec(&mut self, command: &str) -> Result<OutputStream> {
        self.log.with(|l| l.commands.push(command.to_string()));
        let output = match self.queue.pop_front() {
            Some(output) => output,
            None => match self.responder.as_deref_mut() {
                Some(responder) => responder(command),
                None => ScriptedOutput::text(""),
            },
        };

        match output {
            ScriptedOutput::ExecFailure(reason) => Err(Error::remote_exec_message(reason)),
            ScriptedOutput::Stream { chunks, fail_with } => {
                self.log.with(|l| l.streams_read += 1);
                let mut items: Vec<Result<Bytes>> = chunks.into_iter().map(Ok).collect();
                if let Some(reason) = fail_with {
                    items.push(Err(Error::remote_exec_message(reason)));
                }
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
        }
    }

    async fn close(&mut self) {
        self.log.with(|l| l.closes += 1);
    }
}

/// A `ShellConnector` that hands out scripted shells and remembers their logs.
pub struct ScriptedConnector {
    make: Box<dyn Fn() -> ScriptedShell + Send + Sync>,
    sessions: Arc<Mutex<Vec<ShellLog>>>,
}

impl ScriptedConnector {
    pub fn new(make: impl Fn() -> ScriptedShell + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Logs of every session handed out so far, in order.
    pub fn sessions(&self) -> Vec<ShellLog> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl ShellConnector for ScriptedConnector {
    fn target(&self) -> String {
        "scripted@localhost:22".to_string()
    }

    fn session(&self) -> Box<dyn RemoteShell> {
        let shell = (self.make)();
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(shell.log());
        Box::new(shell)
    }
}

/// A tiny stand-in for the remote activity database.
///
/// It answers the exact statements `RemoteQuery` produces, so extraction tests exercise the
/// real query text end to end.
#[derive(Debug, Clone, Default)]
pub struct FakeActivityDb {
    pub buckets: Vec<Bucket>,
    pub events: Vec<Event>,
}

impl FakeActivityDb {
    pub fn answer(&self, command: &str) -> ScriptedOutput {
        let limit = number_after(command, "LIMIT ").map(|n| n as usize);
        let body = if command.contains("FROM buckets") {
            let mut rows = self.buckets.clone();
            rows.sort_by(|a, b| b.id.cmp(&a.id));
            rows.truncate(limit.unwrap_or(usize::MAX));
            serde_json::to_string(&rows)
        } else if command.contains("FROM events") {
            let mut rows = self.events.clone();
            if command.contains("ORDER BY id DESC") {
                rows.sort_by(|a, b| b.id.cmp(&a.id));
            } else {
                rows.sort_by_key(|e| e.starttime);
            }
            if let Some(nanos) = number_after(command, "starttime > ") {
                let cutoff = Cutoff::from_nanos(nanos);
                rows.retain(|e| cutoff.admits(e.starttime, e.endtime));
            }
            rows.truncate(limit.unwrap_or(usize::MAX));
            serde_json::to_string(&rows)
        } else {
            return ScriptedOutput::ExecFailure(format!("unexpected command: {command}"));
        };
        // sqlite3 -json prints nothing at all for an empty result set.
        match body {
            Ok(body) if body == "[]" => ScriptedOutput::text(""),
            Ok(body) => ScriptedOutput::text(&body),
            Err(e) => ScriptedOutput::ExecFailure(e.to_string()),
        }
    }

    pub fn into_shell(self) -> ScriptedShell {
        ScriptedShell::new().with_responder(move |cmd| self.answer(cmd))
    }
}

fn number_after(haystack: &str, marker: &str) -> Option<i64> {
    let start = haystack.find(marker)? + marker.len();
    let digits: String = haystack[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

pub fn bucket(id: i64) -> Bucket {
    Bucket {
        id,
        name: format!("bucket-{id}"),
        kind: "currentwindow".to_string(),
        client: "aw-watcher-window".to_string(),
        hostname: "host".to_string(),
        created: "2024-05-01T10:00:00+00:00".to_string(),
        data_deprecated: String::new(),
        data: "{}".to_string(),
    }
}

pub fn bucket_json(id: i64) -> String {
    serde_json::to_string(&bucket(id)).unwrap_or_default()
}

pub fn event(id: i64, starttime: i64, endtime: i64) -> Event {
    Event {
        id,
        bucketrow: 1,
        starttime,
        endtime,
        data: format!(r#"{{"app":"app-{id}","title":"t","status":"not-afk"}}"#),
    }
}
