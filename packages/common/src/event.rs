use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A live-update notification, broadcast best-effort to UI listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericEvent {
    /// Event topic (e.g. "grading-begin", "test-case").
    pub topic: String,
    pub payload: Value,
    pub posted_at: DateTime<Utc>,
}

impl GenericEvent {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            posted_at: Utc::now(),
        }
    }

    /// An event about a single submission.
    pub fn submission(topic: impl Into<String>, submission_id: i64) -> Self {
        Self::new(topic, json!({ "submission-id": submission_id }))
    }

    /// Attach an extra payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}
