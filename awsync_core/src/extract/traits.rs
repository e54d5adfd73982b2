use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

/// Output of one remote command, delivered chunk by chunk until the command finishes.
///
/// Implementations yield an `Err` item (and then end) if the stream breaks or the command
/// exits with a non-zero status.
pub type OutputStream = BoxStream<'static, Result<Bytes>>;

/// One authenticated remote shell session.
///
/// A session runs at most one command at a time; `exec` takes `&mut self` so the borrow
/// checker enforces that.
#[async_trait]
pub trait RemoteShell: Send {
    /// Authenticate and open the session. Failures map to `Error::Connection`.
    async fn open(&mut self) -> Result<()>;

    /// Dispatch `command` and return its stdout. Failures to start the command map to
    /// `Error::RemoteExec`.
    async fn exec(&mut self, command: &str) -> Result<OutputStream>;

    /// Tear the session down. Never fails; implementations log transport errors.
    async fn close(&mut self);
}

#[async_trait]
impl<S: RemoteShell + ?Sized> RemoteShell for Box<S> {
    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn exec(&mut self, command: &str) -> Result<OutputStream> {
        (**self).exec(command).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

/// Produces a fresh, unopened session for each pipeline run.
pub trait ShellConnector: Send + Sync {
    /// Human-readable target (e.g. `ubuntu@host:22`) for logs.
    fn target(&self) -> String;

    fn session(&self) -> Box<dyn RemoteShell>;
}
