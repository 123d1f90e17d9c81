//! Request context for correlation across log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use uuid::Uuid;

use crate::mdc::{self, ContextMap};

/// Correlation identifiers for one inbound request.
///
/// [`RequestContext::scope`] runs a future inside a diagnostic context seeded
/// with these identifiers, so every record logged while handling the request
/// carries them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// Correlation ID for tracing related requests.
    pub correlation_id: Uuid,
    /// Parent request ID if this is a sub-request.
    pub parent_id: Option<Uuid>,
    /// When the request started.
    pub started_at: DateTime<Utc>,
    /// Source component that created this context.
    pub source: String,
    /// Operation being performed.
    pub operation: Option<String>,
    /// Extra diagnostic keys.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// Create a new request context.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            request_id: id,
            correlation_id: id,
            parent_id: None,
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a child context that inherits correlation info.
    #[must_use]
    pub fn child(&self, source: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            parent_id: Some(self.request_id),
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            metadata: self.metadata.clone(),
        }
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Add metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// Check if this context has a parent.
    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Diagnostic keys for this request.
    ///
    /// Identifier keys win over metadata entries of the same name.
    #[must_use]
    pub fn to_context_map(&self) -> ContextMap {
        let mut map = self.metadata.clone();
        map.insert("request_id".into(), self.request_id.to_string());
        map.insert("correlation_id".into(), self.correlation_id.to_string());
        map.insert("source".into(), self.source.clone());
        if let Some(parent) = self.parent_id {
            map.insert("parent_id".into(), parent.to_string());
        }
        if let Some(operation) = &self.operation {
            map.insert("operation".into(), operation.clone());
        }
        map
    }

    /// Run `future` in a fresh diagnostic context seeded with this request.
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        mdc::run_with_context(self.to_context_map(), future).await
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_creation() {
        let ctx = RequestContext::new("test");
        assert_eq!(ctx.source, "test");
        assert_eq!(ctx.request_id, ctx.correlation_id);
        assert!(!ctx.has_parent());
    }

    #[test]
    fn test_child_context() {
        let parent = RequestContext::new("parent").with_metadata("tenant", "acme");
        let child = parent.child("child");

        assert_ne!(child.request_id, parent.request_id);
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.parent_id, Some(parent.request_id));
        assert_eq!(child.metadata.get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn test_context_map() {
        let correlation = Uuid::new_v4();
        let ctx = RequestContext::new("gateway")
            .with_correlation_id(correlation)
            .with_operation("checkout")
            .with_metadata("request_id", "shadowed");

        let map = ctx.to_context_map();
        assert_eq!(map["request_id"], ctx.request_id.to_string());
        assert_eq!(map["correlation_id"], correlation.to_string());
        assert_eq!(map["operation"], "checkout");
        assert!(!map.contains_key("parent_id"));
    }

    #[test]
    fn test_elapsed() {
        let ctx = RequestContext::new("test");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(ctx.elapsed_ms() >= 10);
    }

    #[tokio::test]
    async fn test_scope_seeds_context() {
        let ctx = RequestContext::new("http").with_operation("list_orders");
        let expected = ctx.request_id.to_string();

        let seen = ctx
            .scope(async { (mdc::get("request_id"), mdc::get("operation")) })
            .await;

        assert_eq!(seen.0, Some(expected));
        assert_eq!(seen.1.as_deref(), Some("list_orders"));
        assert_eq!(mdc::get("request_id"), None);
    }

    #[test]
    fn test_serialization() {
        let ctx = RequestContext::new("test").with_operation("test_op");

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"source\":\"test\""));

        let parsed: RequestContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, ctx.request_id);
        assert_eq!(parsed.operation, Some("test_op".to_string()));
    }
}
