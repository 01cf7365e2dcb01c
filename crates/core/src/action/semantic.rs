//! Semantic (schema.org flavoured) action types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ActionStatus, ControlMetadata, Schedule};

fn default_action_type() -> String {
    "Action".to_string()
}

/// A single unit of declarative work
///
/// Unknown document fields are preserved in `properties`, so a document can
/// be parsed and re-serialized without losing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticAction {
    /// JSON-LD context (kept verbatim)
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Action type, e.g. `CreateAction`
    #[serde(rename = "@type", default = "default_action_type")]
    pub action_type: String,

    /// JSON-LD node identifier
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Primary identifier
    #[serde(default)]
    pub identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_status: Option<ActionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    /// Free-form property bag
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Default for SemanticAction {
    fn default() -> Self {
        Self {
            context: None,
            action_type: default_action_type(),
            id: None,
            identifier: String::new(),
            name: None,
            description: None,
            action_status: None,
            agent: None,
            object: None,
            instrument: None,
            target: None,
            query: None,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            properties: Map::new(),
        }
    }
}

impl SemanticAction {
    /// Create an action with a type and identifier
    pub fn new(action_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Identifier, falling back to `@id` when the primary field is empty
    pub fn effective_identifier(&self) -> Option<&str> {
        if !self.identifier.trim().is_empty() {
            return Some(&self.identifier);
        }
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Current status (Potential when unset)
    pub fn status(&self) -> ActionStatus {
        self.action_status.unwrap_or_default()
    }

    /// Look up a string entry in the property bag
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// An action with dependencies, schedule and control metadata
///
/// This is the unit the expander produces and executors consume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticScheduledAction {
    #[serde(flatten)]
    pub action: SemanticAction,

    /// Identifiers of actions that must complete first
    #[serde(
        default,
        alias = "dependsOn",
        deserialize_with = "super::references::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,

    #[serde(
        default,
        alias = "controlMetadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub control: Option<ControlMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<DateTime<Utc>>,
}

impl SemanticScheduledAction {
    /// Create a scheduled action with a type and identifier
    pub fn new(action_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            action: SemanticAction::new(action_type, identifier),
            ..Default::default()
        }
    }

    /// Primary identifier
    pub fn identifier(&self) -> &str {
        &self.action.identifier
    }

    /// Action type
    pub fn action_type(&self) -> &str {
        &self.action.action_type
    }

    /// Add a dependency
    pub fn with_requires(mut self, dependency: impl Into<String>) -> Self {
        self.requires.push(dependency.into());
        self
    }

    /// Set control metadata
    pub fn with_control(mut self, control: ControlMetadata) -> Self {
        self.control = Some(control);
        self
    }

    /// Set the target payload
    pub fn with_target(mut self, target: Value) -> Self {
        self.action.target = Some(target);
        self
    }

    /// Set the object payload
    pub fn with_object(mut self, object: Value) -> Self {
        self.action.object = Some(object);
        self
    }

    /// Set the instrument payload
    pub fn with_instrument(mut self, instrument: Value) -> Self {
        self.action.instrument = Some(instrument);
        self
    }

    /// Insert a free-form property
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.action.properties.insert(key.into(), value);
        self
    }

    /// Whether the action should run (enabled unless explicitly disabled)
    pub fn is_enabled(&self) -> bool {
        self.control.as_ref().map_or(true, ControlMetadata::is_enabled)
    }

    /// Routing URL: explicit control URL first, then one inferred from `target`
    pub fn routing_url(&self) -> Option<String> {
        if let Some(url) = self.control.as_ref().and_then(|c| c.url.clone()) {
            return Some(url);
        }
        self.target_route().map(|route| route.url)
    }

    /// Routing method, following the same precedence as [`routing_url`](Self::routing_url)
    pub fn routing_method(&self) -> Option<String> {
        if let Some(control) = &self.control {
            if control.url.is_some() {
                return control.method.clone();
            }
        }
        self.target_route().and_then(|route| route.method)
    }

    /// Route described by the generic `target` payload
    pub fn target_route(&self) -> Option<TargetRoute> {
        self.action.target.as_ref().and_then(route_from_value)
    }
}

/// URL and method extracted from a `target` entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRoute {
    pub url: String,
    pub method: Option<String>,
}

fn route_from_value(value: &Value) -> Option<TargetRoute> {
    match value {
        Value::String(url) if !url.is_empty() => Some(TargetRoute {
            url: url.clone(),
            method: None,
        }),
        Value::Array(items) => items.iter().find_map(route_from_value),
        Value::Object(map) => {
            let url = ["urlTemplate", "url"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|url| !url.is_empty())?;
            let method = ["httpMethod", "method"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_uppercase);
            Some(TargetRoute {
                url: url.to_string(),
                method,
            })
        }
        _ => None,
    }
}
