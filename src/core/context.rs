//! Pipeline execution context - heterogeneous key/value map carrying
//! step outputs and runtime metadata for a single pipeline run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single value a plugin can read from or write into a [`PluginContext`].
///
/// This is the tagged variant from the design notes: plugins that produce
/// something other than these shapes must serialize into one of them at
/// their boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ContextValue {
    /// A single scalar: string, number, bool, or null, carried as JSON.
    Scalar(serde_json::Value),
    /// A single ordered record (e.g. one CSV row).
    Record(BTreeMap<String, serde_json::Value>),
    /// An ordered sequence of records (e.g. a CSV file's rows).
    Records(Vec<BTreeMap<String, serde_json::Value>>),
    /// An opaque byte blob.
    Bytes(Vec<u8>),
    /// A structured error a plugin chose to surface as data rather than
    /// fail the step outright.
    Error(String),
}

impl ContextValue {
    pub fn as_records(&self) -> Option<&[BTreeMap<String, serde_json::Value>]> {
        match self {
            ContextValue::Records(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_scalar_str(&self) -> Option<&str> {
        match self {
            ContextValue::Scalar(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::Scalar(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::Scalar(serde_json::Value::String(s))
    }
}

/// Per-execution context. One instance per pipeline run; never shared
/// between concurrent executions. The Execution Engine guarantees serial
/// step execution within a run, so no internal locking is needed here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginContext {
    values: BTreeMap<String, ContextValue>,
    /// Runtime metadata not addressable by plugins (execution id, pipeline
    /// id, current step name) but useful for logging/observability.
    pub metadata: BTreeMap<String, String>,
}

impl PluginContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    /// Set a key. Re-writes by the same step replace the prior value; the
    /// caller (the engine) is responsible for rejecting cross-step
    /// re-writes of the same key at validation time.
    pub fn set(&mut self, key: impl Into<String>, value: ContextValue) {
        self.values.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Remove a key, e.g. clearing the engine's scratch `_input` slot
    /// between steps so a later step never observes an earlier step's
    /// input by accident.
    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    /// Shallow clone, isolating a sub-execution from the parent's future
    /// mutations while sharing no heap state beyond what `Clone` copies.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Merge another context's values into this one. Used by the engine to
    /// fold a step's returned context back into the running context.
    pub fn merge(&mut self, other: PluginContext) {
        for (k, v) in other.values {
            self.values.insert(k, v);
        }
        for (k, v) in other.metadata {
            self.metadata.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut ctx = PluginContext::new();
        ctx.set("rows", ContextValue::from("hello"));
        assert_eq!(ctx.get("rows").unwrap().as_scalar_str(), Some("hello"));
    }

    #[test]
    fn merge_overwrites_and_adds() {
        let mut a = PluginContext::new();
        a.set("x", ContextValue::from("1"));
        let mut b = PluginContext::new();
        b.set("x", ContextValue::from("2"));
        b.set("y", ContextValue::from("3"));
        a.merge(b);
        assert_eq!(a.get("x").unwrap().as_scalar_str(), Some("2"));
        assert_eq!(a.get("y").unwrap().as_scalar_str(), Some("3"));
    }
}
