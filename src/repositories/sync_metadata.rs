//! Per-connection scheduling state stored under `metadata.sync`.
//!
//! Each connection row carries a free-form `metadata` JSON column. The
//! scheduler and executor keep their bookkeeping (cadence override, next
//! due time, applied jitter, activation marker, and the adapter paging
//! cursor) in a `sync` object inside it, leaving every other key alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::adapters::SyncCursor;
use crate::config::SchedulerConfig;

/// Floor for per-connection interval overrides.
pub const MIN_SYNC_INTERVAL_SECONDS: u64 = 60;

/// Scheduling state round-tripped through `connections.metadata.sync`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSyncMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_jitter_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_activated_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_cursor"
    )]
    pub cursor: Option<SyncCursor>,
}

// Older rows wrapped the cursor as {"value": ...}; accept both shapes.
fn deserialize_cursor<'de, D>(deserializer: D) -> Result<Option<SyncCursor>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(raw) = Option::<JsonValue>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let JsonValue::Object(map) = &raw
        && map.len() == 1
        && let Some(inner) = map.get("value")
    {
        return Ok(Some(SyncCursor::from_json(inner.clone())));
    }
    Ok(Some(SyncCursor::from_json(raw)))
}

impl ConnectionSyncMetadata {
    /// Read the `sync` payload out of a connection's metadata column.
    ///
    /// Missing or malformed payloads degrade to defaults rather than
    /// blocking the scheduler tick; a bad row logs a warning and syncs
    /// on the default cadence.
    pub fn from_connection_metadata(metadata: Option<&JsonValue>) -> Self {
        let Some(JsonValue::Object(root)) = metadata else {
            if let Some(other) = metadata {
                warn!(value = ?other, "Connection metadata is not an object; using sync defaults");
            }
            return Self::default();
        };
        let Some(sync_value) = root.get("sync") else {
            return Self::default();
        };
        serde_json::from_value(sync_value.clone()).unwrap_or_else(|err| {
            warn!(error = %err, "Unparseable sync metadata; using defaults");
            Self::default()
        })
    }

    /// Write this state back into the metadata column, preserving every
    /// key other than `sync`. A fully-default state removes the `sync`
    /// key instead of writing an empty object.
    pub fn into_connection_metadata(&self, existing: Option<&JsonValue>) -> JsonValue {
        let mut root = match existing {
            Some(JsonValue::Object(map)) => map.clone(),
            Some(other) => {
                warn!(value = ?other, "Replacing non-object connection metadata");
                Map::new()
            }
            None => Map::new(),
        };

        if *self == Self::default() {
            root.remove("sync");
        } else {
            let sync_value = serde_json::to_value(self).unwrap_or(JsonValue::Object(Map::new()));
            root.insert("sync".to_string(), sync_value);
        }

        JsonValue::Object(root)
    }

    /// Clear an interval override that falls outside scheduler bounds.
    /// Returns `true` when the state changed and needs persisting.
    pub fn sanitize_interval(&mut self, scheduler: &SchedulerConfig) -> bool {
        let Some(value) = self.interval_seconds else {
            return false;
        };
        if value >= MIN_SYNC_INTERVAL_SECONDS && value <= scheduler.max_overridden_interval_seconds
        {
            return false;
        }
        warn!(
            interval_seconds = value,
            max_allowed = scheduler.max_overridden_interval_seconds,
            "Out-of-range sync interval override dropped"
        );
        self.interval_seconds = None;
        true
    }

    /// Base sync interval for this connection: the override when it is
    /// in bounds, the scheduler default otherwise.
    pub fn effective_interval_seconds(&self, scheduler: &SchedulerConfig) -> u64 {
        self.interval_seconds
            .filter(|value| {
                *value >= MIN_SYNC_INTERVAL_SECONDS
                    && *value <= scheduler.max_overridden_interval_seconds
            })
            .unwrap_or(scheduler.default_interval_seconds)
    }
}
