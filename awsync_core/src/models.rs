use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// A bucket row as stored in the remote `buckets` table.
///
/// Relayed unchanged from the remote database; `id` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub client: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub hostname: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub created: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data_deprecated: String,
    /// JSON document, kept as text.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: String,
}

/// An event row as stored in the remote `events` table.
///
/// `starttime`/`endtime` are nanoseconds since the Unix epoch. `endtime >= starttime`
/// is expected but not checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub bucketrow: i64,
    pub starttime: i64,
    pub endtime: i64,
    /// JSON document with optional `app`, `title` and `status` keys.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: String,
}

impl Event {
    /// Project `data` into the columns the relational store keeps.
    pub fn activity(&self) -> Result<EventActivity> {
        EventActivity::from_json(&self.data).map_err(|e| match e {
            Error::InvalidInput(msg) => Error::InvalidInput(format!("event {}: {msg}", self.id)),
            other => other,
        })
    }
}

/// The `app`/`title`/`status` projection of an event's `data` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActivity {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub app: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: String,
}

impl EventActivity {
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("event data is not JSON: {e}")))?;
        if !value.is_object() {
            return Err(Error::InvalidInput(
                "event data must be a JSON object".to_string(),
            ));
        }
        let text = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Ok(Self {
            app: text("app"),
            title: text("title"),
            status: text("status"),
        })
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
