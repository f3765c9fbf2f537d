//! # Event Module
//!
//! The monitoring data point that flows through every stream graph.
//!
//! Events are plain values: cloning one produces an independent copy and no
//! event refers back to the stream that produced it. Nodes never mutate an
//! event they received; derived events are built with the `with_*` setters,
//! which consume a copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A monitoring event.
///
/// Every field is optional on the wire; missing strings decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    /// Host the event describes
    pub host: String,
    /// Service the event describes
    pub service: String,
    /// Free-form state label, e.g. `ok` or `critical`
    pub state: String,
    /// Human readable description
    pub description: String,
    /// Numeric metric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    /// Logical event time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    /// Seconds this event stays valid after `time`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f32>,
    /// Tags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Custom attributes
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    /// Creates an event for `host` and `service`.
    #[must_use]
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            ..Self::default()
        }
    }

    /// Returns a copy with the given state.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    /// Returns a copy with the given description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns a copy with the given metric.
    #[must_use]
    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Returns a copy with the given time.
    #[must_use]
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Returns a copy with the given ttl.
    #[must_use]
    pub fn with_ttl(mut self, ttl: f32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Returns a copy with `tag` added.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Returns a copy with the attribute `key` set to `value`.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns true if the event carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// String value of a named field.
    ///
    /// Resolves the built-in fields (`host`, `service`, `state`, `description`,
    /// `metric`, `time`, `ttl`) first and falls back to attributes. Missing
    /// values resolve to the empty string, so keys built from them stay stable.
    #[must_use]
    pub fn field(&self, name: &str) -> String {
        match name {
            "host" => self.host.clone(),
            "service" => self.service.clone(),
            "state" => self.state.clone(),
            "description" => self.description.clone(),
            "metric" => self.metric.map(|m| m.to_string()).unwrap_or_default(),
            "time" => self.time.map(|t| t.to_string()).unwrap_or_default(),
            "ttl" => self.ttl.map(|t| t.to_string()).unwrap_or_default(),
            other => self.attributes.get(other).cloned().unwrap_or_default(),
        }
    }

    /// `host service` key used by coalesce.
    #[must_use]
    pub fn host_service(&self) -> String {
        format!("{} {}", self.host, self.service)
    }
}
