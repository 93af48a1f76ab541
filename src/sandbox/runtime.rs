//! Host API mediation: the registered surface a sandboxed worker reaches
//! through `HostCall(namespace, method, args)` (§4.5).
//!
//! Plugins never get a file handle, a socket, or a process handle. Every
//! capability a worker needs — emitting a message, querying or reinforcing a
//! learning, asking the scheduler to follow up later — is a namespaced method
//! on this registry. An unregistered namespace is `UnknownApi`, never a panic
//! or a passthrough (§8 P6).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::error::SandboxError;
use crate::domain::Learning;
use crate::events::{Actor, Event, EventStore};
use crate::learning::LearningStore;

/// One namespace of the host API surface, e.g. `"message"` or `"learning"`.
#[async_trait]
pub trait HostApi: Send + Sync {
    fn namespace(&self) -> &str;
    async fn call(&self, method: &str, args: Value) -> Result<Value, SandboxError>;
}

/// The full set of namespaces a worker may `HostCall` into. Built once at
/// worker spawn time and shared read-only across calls.
#[derive(Default)]
pub struct HostApiRegistry {
    apis: HashMap<String, Box<dyn HostApi>>,
}

impl HostApiRegistry {
    pub fn new() -> Self {
        Self { apis: HashMap::new() }
    }

    pub fn register(&mut self, api: Box<dyn HostApi>) {
        self.apis.insert(api.namespace().to_string(), api);
    }

    /// Route a `HostCall`; arguments have already been through `redact()` by
    /// the caller (`SandboxWorker::drive_until_reply`).
    pub async fn dispatch(&self, namespace: &str, method: &str, args: Value) -> Result<Value, SandboxError> {
        match self.apis.get(namespace) {
            Some(api) => api.call(method, args).await,
            None => Err(SandboxError::UnknownApi(namespace.to_string())),
        }
    }
}

/// `message.send(text)`: lets a plugin emit a message into the event log,
/// attributed to [`Actor::Sandbox`] rather than the host process.
pub struct MessageApi {
    events: Arc<EventStore>,
}

impl MessageApi {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl HostApi for MessageApi {
    fn namespace(&self) -> &str {
        "message"
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value, SandboxError> {
        match method {
            "send" => {
                self.events
                    .append(Event::new(Actor::Sandbox, "plugin.message", args))
                    .map_err(|e| SandboxError::WorkerCrashed(e.to_string()))?;
                Ok(Value::Null)
            }
            other => Err(SandboxError::UnknownApi(format!("message.{other}"))),
        }
    }
}

/// `learning.query({tags, min_confidence})` / `learning.record({context,
/// observation, tags})`: a plugin's only path to the learning store.
pub struct LearningApi {
    store: Arc<LearningStore>,
}

impl LearningApi {
    pub fn new(store: Arc<LearningStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HostApi for LearningApi {
    fn namespace(&self) -> &str {
        "learning"
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value, SandboxError> {
        match method {
            "query" => {
                let tags: Vec<String> = args.get("tags").and_then(|v| v.as_array()).map_or_else(Vec::new, |a| {
                    a.iter().filter_map(|t| t.as_str().map(String::from)).collect()
                });
                let min_confidence = args.get("min_confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let results = self
                    .store
                    .query(&tags, min_confidence)
                    .map_err(|e| SandboxError::WorkerCrashed(e.to_string()))?;
                serde_json::to_value(results).map_err(SandboxError::from)
            }
            "record" => {
                let context = args.get("context").and_then(|v| v.as_str()).unwrap_or_default();
                let observation = args.get("observation").and_then(|v| v.as_str()).unwrap_or_default();
                let tags: Vec<String> = args.get("tags").and_then(|v| v.as_array()).map_or_else(Vec::new, |a| {
                    a.iter().filter_map(|t| t.as_str().map(String::from)).collect()
                });
                let id = self
                    .store
                    .record(Learning::new("sandbox", context, observation, tags))
                    .map_err(|e| SandboxError::WorkerCrashed(e.to_string()))?;
                Ok(serde_json::json!({ "id": id }))
            }
            other => Err(SandboxError::UnknownApi(format!("learning.{other}"))),
        }
    }
}

/// `schedule.follow_up({description, delay_ms?})`: a plugin cannot create a
/// Task directly (only the scheduler, C8, mutates C2); it can only ask, by
/// appending an event the scheduler's trigger-evaluation step later acts on.
pub struct ScheduleApi {
    events: Arc<EventStore>,
}

impl ScheduleApi {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl HostApi for ScheduleApi {
    fn namespace(&self) -> &str {
        "schedule"
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value, SandboxError> {
        match method {
            "follow_up" => {
                self.events
                    .append(Event::new(Actor::Sandbox, "plugin.follow_up_requested", args))
                    .map_err(|e| SandboxError::WorkerCrashed(e.to_string()))?;
                Ok(Value::Null)
            }
            other => Err(SandboxError::UnknownApi(format!("schedule.{other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_namespace_is_unknown_api() {
        let registry = HostApiRegistry::new();
        let err = registry.dispatch("network", "connect", serde_json::json!({})).await;
        assert!(matches!(err, Err(SandboxError::UnknownApi(_))));
    }

    #[tokio::test]
    async fn message_send_appends_an_event() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventStore::open(dir.path(), crate::events::DEFAULT_SEGMENT_BYTES).unwrap());
        let mut registry = HostApiRegistry::new();
        registry.register(Box::new(MessageApi::new(events.clone())));

        registry
            .dispatch("message", "send", serde_json::json!({"text": "hello from plugin"}))
            .await
            .unwrap();

        let tail = events.tail(10, &crate::events::EventFilter::default());
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].act, "plugin.message");
    }

    #[tokio::test]
    async fn learning_record_then_query_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let inner = crate::domain::Store::open(dir.path()).unwrap();
        let store = Arc::new(LearningStore::new(inner));
        let mut registry = HostApiRegistry::new();
        registry.register(Box::new(LearningApi::new(store)));

        registry
            .dispatch(
                "learning",
                "record",
                serde_json::json!({"context": "ctx", "observation": "prefer rg", "tags": ["search"]}),
            )
            .await
            .unwrap();

        let result = registry
            .dispatch("learning", "query", serde_json::json!({"tags": ["search"], "min_confidence": 0.0}))
            .await
            .unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);
    }
}
