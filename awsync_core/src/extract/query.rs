//! The narrow query builder used by the executor.
//!
//! Queries are interpolated into a remote shell command line, so this module is
//! command-injection sensitive. A `RemoteQuery` can only be built from the constructors
//! below, which take integers (limits and nanosecond cutoffs) and nothing else. Never add a
//! constructor that accepts caller text.

use crate::extract::selection::{EventSelection, RowLimit};
use crate::{Error, Result};
use std::fmt;

const EVENT_COLUMNS: &str = "id, bucketrow, starttime, endtime, data";

/// A read-only SQL statement against the remote activity database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteQuery {
    label: &'static str,
    sql: String,
}

impl RemoteQuery {
    /// The most recent buckets, newest id first.
    pub fn top_buckets(limit: RowLimit) -> Self {
        Self {
            label: "top_buckets",
            sql: format!("SELECT * FROM buckets ORDER BY id DESC LIMIT {}", limit.get()),
        }
    }

    pub fn events(selection: &EventSelection) -> Self {
        match selection {
            EventSelection::All => Self {
                label: "events_all",
                sql: format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY starttime ASC"),
            },
            EventSelection::Window(cutoff) => {
                let c = cutoff.nanos();
                Self {
                    label: "events_window",
                    sql: format!(
                        "SELECT {EVENT_COLUMNS} FROM events \
                         WHERE starttime > {c} OR (starttime <= {c} AND endtime > {c}) \
                         ORDER BY starttime ASC"
                    ),
                }
            }
            EventSelection::Latest(limit) => Self {
                label: "events_latest",
                sql: format!(
                    "SELECT {EVENT_COLUMNS} FROM events ORDER BY id DESC LIMIT {}",
                    limit.get()
                ),
            },
        }
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for RemoteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// The remote SQLite file plus the client binary used to read it.
///
/// Both values come from operator configuration and are validated here; the path is
/// single-quoted on the command line and the binary name is restricted to a safe charset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDatabase {
    path: String,
    sqlite_bin: String,
}

impl RemoteDatabase {
    pub const DEFAULT_SQLITE_BIN: &'static str = "sqlite3";

    pub fn new(path: impl Into<String>, sqlite_bin: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(Error::InvalidInput("remote db path is empty".to_string()));
        }
        if path.chars().any(|c| c == '\0' || c == '\n' || c == '\r') {
            return Err(Error::InvalidInput(
                "remote db path contains control characters".to_string(),
            ));
        }

        let sqlite_bin = sqlite_bin.into();
        let bin_ok = !sqlite_bin.is_empty()
            && sqlite_bin
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'));
        if !bin_ok {
            return Err(Error::InvalidInput(format!(
                "invalid sqlite binary name: {sqlite_bin:?}"
            )));
        }

        Ok(Self { path, sqlite_bin })
    }

    pub fn with_default_bin(path: impl Into<String>) -> Result<Self> {
        Self::new(path, Self::DEFAULT_SQLITE_BIN)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sqlite_bin(&self) -> &str {
        &self.sqlite_bin
    }

    /// One shell invocation that prints the query result as a JSON array.
    pub fn command_for(&self, query: &RemoteQuery) -> String {
        format!(
            "{} -json {} {}",
            self.sqlite_bin,
            shell_quote(&self.path),
            shell_quote(query.sql())
        )
    }
}

fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
