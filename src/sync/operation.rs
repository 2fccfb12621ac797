//! Operation types for the sync queue.
//!
//! An operation is a pending mutation against the remote portal API, tagged
//! with the entity kind and the kind of change (`patient`/`create`,
//! `patient`/`update`, `test`/`create`, ...).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// The (entity kind, operation kind) pair used to route an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationTag {
    /// Entity kind, e.g. `patient`.
    pub entity: String,
    /// Operation kind, e.g. `create`.
    #[serde(rename = "type")]
    pub operation_type: String,
}

impl OperationTag {
    /// Create a tag.
    #[must_use]
    pub fn new(entity: impl Into<String>, operation_type: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            operation_type: operation_type.into(),
        }
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.operation_type)
    }
}

/// The enqueue contract: `{ entity, type, payload, id? }`.
///
/// The queue does not validate the shape; an operation whose tag matches no
/// route only surfaces when the driver tries to replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Entity kind.
    pub entity: String,
    /// Operation kind.
    #[serde(rename = "type")]
    pub operation_type: String,
    /// JSON body sent to the remote endpoint.
    #[serde(default = "empty_object")]
    pub payload: Value,
    /// Target identifier, required by update routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl OperationRequest {
    /// Create a request without a target id.
    #[must_use]
    pub fn new(entity: impl Into<String>, operation_type: impl Into<String>, payload: Value) -> Self {
        Self {
            entity: entity.into(),
            operation_type: operation_type.into(),
            payload,
            id: None,
        }
    }

    /// Set the target identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Register a new patient.
    #[must_use]
    pub fn patient_create(payload: Value) -> Self {
        Self::new("patient", "create", payload)
    }

    /// Update an existing patient.
    #[must_use]
    pub fn patient_update(id: impl Into<String>, payload: Value) -> Self {
        Self::new("patient", "update", payload).with_id(id)
    }

    /// Record a new test.
    #[must_use]
    pub fn test_create(payload: Value) -> Self {
        Self::new("test", "create", payload)
    }

    /// The routing tag of this request.
    #[must_use]
    pub fn tag(&self) -> OperationTag {
        OperationTag::new(self.entity.clone(), self.operation_type.clone())
    }
}

/// Status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be replayed
    Pending,
    /// Retries exhausted or unroutable; excluded from drain passes
    DeadLetter,
}

impl OperationStatus {
    /// The value stored in the `status` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "dead_letter" | "deadletter" | "dead" => Ok(Self::DeadLetter),
            other => Err(SyncError::Config(format!("Unknown operation status: {other}"))),
        }
    }
}

/// A queued operation with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOperation {
    /// Queue key, assigned at enqueue time
    pub id: i64,
    /// Entity kind
    pub entity: String,
    /// Operation kind
    #[serde(rename = "type")]
    pub operation_type: String,
    /// Target identifier for updates
    pub target_id: Option<String>,
    /// JSON body
    pub payload: Value,
    /// When the operation was queued
    pub created_at: DateTime<Utc>,
    /// Number of failed replay attempts
    pub retry_count: u32,
    /// When the last failed attempt happened
    pub last_attempt: Option<DateTime<Utc>>,
    /// Last failure message
    pub last_error: Option<String>,
    /// Earliest time the next attempt may run
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: OperationStatus,
}

impl QueueOperation {
    /// The routing tag of this operation.
    #[must_use]
    pub fn tag(&self) -> OperationTag {
        OperationTag::new(self.entity.clone(), self.operation_type.clone())
    }

    /// Whether the backoff window has elapsed at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Key grouping operations that must replay in order relative to each
    /// other. Operations without a target id only order against themselves.
    #[must_use]
    pub fn partition_key(&self) -> String {
        match &self.target_id {
            Some(target) => format!("{}:{target}", self.entity),
            None => format!("#{}", self.id),
        }
    }
}
