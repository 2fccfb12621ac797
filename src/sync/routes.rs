//! Routing of operation tags to remote endpoints.
//!
//! Only tags present in the route table are replayed. The built-in table
//! covers `patient/create`, `patient/update` and `test/create`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::operation::{OperationTag, QueueOperation};

/// Placeholder substituted with the operation's target id.
const ID_PLACEHOLDER: &str = "{id}";

/// HTTP method used to replay an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// One entry of the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Entity kind matched.
    pub entity: String,
    /// Operation kind matched.
    #[serde(rename = "type")]
    pub operation_type: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the API base URL; may contain `{id}`.
    pub path: String,
}

impl Route {
    /// Create a route.
    #[must_use]
    pub fn new(entity: &str, operation_type: &str, method: HttpMethod, path: &str) -> Self {
        Self {
            entity: entity.to_string(),
            operation_type: operation_type.to_string(),
            method,
            path: path.to_string(),
        }
    }

    fn matches(&self, entity: &str, operation_type: &str) -> bool {
        self.entity == entity && self.operation_type == operation_type
    }

    fn needs_target_id(&self) -> bool {
        self.path.contains(ID_PLACEHOLDER)
    }
}

/// The built-in route table.
#[must_use]
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new("patient", "create", HttpMethod::Post, "/patients"),
        Route::new("patient", "update", HttpMethod::Put, "/patients/{id}"),
        Route::new("test", "create", HttpMethod::Post, "/tests"),
    ]
}

/// What the driver does with an operation no route accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnroutablePolicy {
    /// Leave it in the queue untouched; it is skipped on every pass.
    #[default]
    Skip,
    /// Move it to the dead-letter state with the reason as its last error.
    DeadLetter,
}

/// Why an operation cannot be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unroutable {
    #[error("unrecognized operation tag {0}")]
    UnknownTag(OperationTag),
    #[error("operation {0} requires a target id")]
    MissingTargetId(OperationTag),
}

/// A resolved HTTP request for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRequest {
    /// Queue key of the operation being replayed.
    pub operation_id: i64,
    pub method: HttpMethod,
    /// Path relative to the API base URL, placeholders substituted.
    pub path: String,
    pub body: Value,
}

/// Maps operation tags to endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(default_routes())
    }
}

impl RouteTable {
    #[must_use]
    pub const fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Whether any route accepts the tag.
    #[must_use]
    pub fn recognizes(&self, tag: &OperationTag) -> bool {
        self.routes
            .iter()
            .any(|r| r.matches(&tag.entity, &tag.operation_type))
    }

    /// Build the request that replays `operation`.
    ///
    /// # Errors
    ///
    /// Returns `Unroutable` if no route matches the tag, or the route needs
    /// a target id the operation does not carry.
    pub fn resolve(&self, operation: &QueueOperation) -> Result<ReplayRequest, Unroutable> {
        let route = self
            .routes
            .iter()
            .find(|r| r.matches(&operation.entity, &operation.operation_type))
            .ok_or_else(|| Unroutable::UnknownTag(operation.tag()))?;

        let path = if route.needs_target_id() {
            let target = operation
                .target_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Unroutable::MissingTargetId(operation.tag()))?;
            route
                .path
                .replace(ID_PLACEHOLDER, &urlencoding::encode(target))
        } else {
            route.path.clone()
        };

        Ok(ReplayRequest {
            operation_id: operation.id,
            method: route.method,
            path,
            body: operation.payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::operation::OperationStatus;
    use chrono::Utc;
    use serde_json::json;

    fn operation(entity: &str, op: &str, target_id: Option<&str>) -> QueueOperation {
        QueueOperation {
            id: 7,
            entity: entity.to_string(),
            operation_type: op.to_string(),
            target_id: target_id.map(String::from),
            payload: json!({"firstName": "A"}),
            created_at: Utc::now(),
            retry_count: 0,
            last_attempt: None,
            last_error: None,
            next_attempt_at: None,
            status: OperationStatus::Pending,
        }
    }

    #[test]
    fn test_builtin_routes() {
        let table = RouteTable::default();

        let create = table.resolve(&operation("patient", "create", None)).unwrap();
        assert_eq!(create.method, HttpMethod::Post);
        assert_eq!(create.path, "/patients");
        assert_eq!(create.body, json!({"firstName": "A"}));
        assert_eq!(create.operation_id, 7);

        let update = table
            .resolve(&operation("patient", "update", Some("p-42")))
            .unwrap();
        assert_eq!(update.method, HttpMethod::Put);
        assert_eq!(update.path, "/patients/p-42");

        let test = table.resolve(&operation("test", "create", None)).unwrap();
        assert_eq!(test.path, "/tests");
    }

    #[test]
    fn test_unknown_tag() {
        let table = RouteTable::default();
        let err = table
            .resolve(&operation("unknown", "create", None))
            .unwrap_err();
        assert_eq!(err, Unroutable::UnknownTag(OperationTag::new("unknown", "create")));
        assert_eq!(err.to_string(), "unrecognized operation tag unknown/create");
        assert!(!table.recognizes(&OperationTag::new("test", "update")));
    }

    #[test]
    fn test_update_without_id() {
        let table = RouteTable::default();
        let err = table
            .resolve(&operation("patient", "update", None))
            .unwrap_err();
        assert!(matches!(err, Unroutable::MissingTargetId(_)));
    }

    #[test]
    fn test_target_id_is_encoded() {
        let table = RouteTable::default();
        let update = table
            .resolve(&operation("patient", "update", Some("a/b c")))
            .unwrap();
        assert_eq!(update.path, "/patients/a%2Fb%20c");
    }

    #[test]
    fn test_policy_serde() {
        let policy: UnroutablePolicy = serde_yaml::from_str("dead_letter").unwrap();
        assert_eq!(policy, UnroutablePolicy::DeadLetter);
        assert_eq!(UnroutablePolicy::default(), UnroutablePolicy::Skip);
    }
}
