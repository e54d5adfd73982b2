use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Common error type for `awsync_core`.
///
/// Every variant is fatal for the run that produced it. Transport and sink
/// implementations should keep the underlying error chain via the constructor
/// helpers (`Error::connection`, `Error::remote_exec`, `Error::backend`).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("connection error: {context}")]
    Connection {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("remote exec error: {context}")]
    RemoteExec {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("failed to parse remote response ({payload_len} bytes): {source}")]
    ResponseParse {
        payload_len: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid selection mode: {0}")]
    InvalidMode(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    pub fn connection(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn connection_message(context: impl Into<String>) -> Self {
        Self::Connection {
            context: context.into(),
            source: None,
        }
    }

    pub fn remote_exec(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::RemoteExec {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn remote_exec_message(context: impl Into<String>) -> Self {
        Self::RemoteExec {
            context: context.into(),
            source: None,
        }
    }

    #[tracing::instrument(level = "debug", name = "awsync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
