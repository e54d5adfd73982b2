use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Which events a run requests from the remote database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "mode")]
pub enum SelectionMode {
    /// Every event, oldest first, with no lower bound.
    ///
    /// Do not use for recurring runs: the result set grows without bound.
    All,
    /// Events that start after "now" or are still running at "now".
    CurrentTimestamp,
    /// Same window as `CurrentTimestamp`, anchored at a caller-supplied millisecond timestamp.
    /// Reserved; resolving it always fails with `Error::NotImplemented`.
    PresetTimestamp { timestamp_ms: Option<i64> },
    /// The most recent events by id, bounded by the test limit.
    Test,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::All => "ALL",
            SelectionMode::CurrentTimestamp => "CURRENT_TIMESTAMP",
            SelectionMode::PresetTimestamp { .. } => "PRESET_TIMESTAMP",
            SelectionMode::Test => "TEST",
        }
    }

    /// Turn the mode into a concrete selection. `now` anchors `CurrentTimestamp`.
    pub fn resolve(&self, now: DateTime<Utc>, test_limit: RowLimit) -> Result<EventSelection> {
        match self {
            SelectionMode::All => Ok(EventSelection::All),
            SelectionMode::CurrentTimestamp => Ok(EventSelection::Window(Cutoff::at(now)?)),
            SelectionMode::PresetTimestamp { .. } => Err(Error::NotImplemented(
                "PRESET_TIMESTAMP selection is reserved".to_string(),
            )),
            SelectionMode::Test => Ok(EventSelection::Latest(test_limit)),
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mode = if s.eq_ignore_ascii_case("ALL") {
            SelectionMode::All
        } else if s.eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
            SelectionMode::CurrentTimestamp
        } else if s.eq_ignore_ascii_case("PRESET_TIMESTAMP") {
            SelectionMode::PresetTimestamp { timestamp_ms: None }
        } else if s.eq_ignore_ascii_case("TEST") {
            SelectionMode::Test
        } else {
            return Err(Error::InvalidMode(s.to_string()));
        };
        Ok(mode)
    }
}

/// A resolved event selection, ready to be turned into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSelection {
    All,
    Window(Cutoff),
    Latest(RowLimit),
}

/// Lower edge of a `[cutoff, +inf)` window, in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cutoff(i64);

impl Cutoff {
    /// Millisecond precision, matching how the remote clock is sampled.
    pub fn at(now: DateTime<Utc>) -> Result<Self> {
        Self::from_millis(now.timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Result<Self> {
        ms.checked_mul(NANOS_PER_MILLI)
            .map(Self)
            .ok_or_else(|| Error::InvalidInput(format!("timestamp {ms}ms overflows nanoseconds")))
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn nanos(&self) -> i64 {
        self.0
    }

    /// Whether an event belongs to the window: it starts after the cutoff, or it started at
    /// or before the cutoff and is still running past it. `endtime == cutoff` is excluded.
    pub fn admits(&self, starttime: i64, endtime: i64) -> bool {
        starttime > self.0 || (starttime <= self.0 && endtime > self.0)
    }
}

/// A strictly positive row limit for `LIMIT` clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RowLimit(u32);

impl RowLimit {
    pub const DEFAULT: RowLimit = RowLimit(10);

    pub fn new(n: u32) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidInput("row limit must be > 0".to_string()));
        }
        Ok(Self(n))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for RowLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for RowLimit {
    type Error = Error;

    fn try_from(n: u32) -> Result<Self> {
        Self::new(n)
    }
}

impl From<RowLimit> for u32 {
    fn from(limit: RowLimit) -> Self {
        limit.0
    }
}
