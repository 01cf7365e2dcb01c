//! Workflow document wire shapes
//!
//! These structs mirror the JSON-LD documents accepted by the parser. They
//! are decoded only after the `@type` discriminant has been probed, so every
//! struct here assumes its own shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefixes stripped from `@type` values before dispatch
const TYPE_PREFIXES: &[&str] = &["https://schema.org/", "http://schema.org/", "schema:"];

/// Strip a schema.org namespace prefix from a type name
pub fn normalize_type(raw: &str) -> &str {
    let raw = raw.trim();
    TYPE_PREFIXES
        .iter()
        .find_map(|prefix| raw.strip_prefix(prefix))
        .unwrap_or(raw)
}

/// Recognized document discriminants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentType {
    ItemList,
    HowTo,
    MapAction,
    ListItem,
    HowToStep,
    /// `ScheduledAction` or any other `*Action` type
    Action(String),
}

impl DocumentType {
    /// Classify a (possibly prefixed) type name
    pub fn from_type_name(raw: &str) -> Option<Self> {
        let name = normalize_type(raw);
        match name {
            "ItemList" => Some(Self::ItemList),
            "HowTo" => Some(Self::HowTo),
            "MapAction" => Some(Self::MapAction),
            "ListItem" => Some(Self::ListItem),
            "HowToStep" => Some(Self::HowToStep),
            other if other.ends_with("Action") => Some(Self::Action(other.to_string())),
            _ => None,
        }
    }

    /// Probe a JSON value's `@type` without decoding the rest
    ///
    /// JSON-LD allows `@type` to be an array; the first recognized entry wins.
    pub fn probe(value: &Value) -> TypeProbe {
        let Some(raw) = value.get("@type") else {
            return TypeProbe::Missing;
        };

        let names: Vec<&str> = match raw {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };

        names
            .iter()
            .find_map(|name| Self::from_type_name(name))
            .map(TypeProbe::Known)
            .unwrap_or_else(|| {
                let found = names.first().map(|s| s.to_string()).unwrap_or_else(|| raw.to_string());
                TypeProbe::Unknown(found)
            })
    }

    /// Display name of the type
    pub fn as_str(&self) -> &str {
        match self {
            Self::ItemList => "ItemList",
            Self::HowTo => "HowTo",
            Self::MapAction => "MapAction",
            Self::ListItem => "ListItem",
            Self::HowToStep => "HowToStep",
            Self::Action(name) => name,
        }
    }
}

/// Outcome of probing a document's `@type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeProbe {
    Known(DocumentType),
    Unknown(String),
    Missing,
}

impl TypeProbe {
    /// Human-readable description for error messages
    pub fn describe(&self) -> String {
        match self {
            Self::Known(kind) => kind.as_str().to_string(),
            Self::Unknown(name) => name.clone(),
            Self::Missing => "no @type".to_string(),
        }
    }
}

/// `ItemList` document: an ordered list of actions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListDocument {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,

    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(
        default,
        alias = "dependsOn",
        deserialize_with = "crate::action::references::deserialize"
    )]
    pub requires: Vec<String>,

    #[serde(default)]
    pub item_list_element: Vec<Value>,

    /// Only meaningful when the list is nested as a loop
    #[serde(default)]
    pub max_iterations: Option<usize>,

    #[serde(default)]
    pub parallelism: Option<usize>,
}

/// `ListItem` wrapper around an action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListItem {
    #[serde(default)]
    pub position: Option<u32>,

    #[serde(default)]
    pub item: Option<Value>,
}

/// `HowTo` document: a multi-step procedure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HowToDocument {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,

    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(
        default,
        alias = "dependsOn",
        deserialize_with = "crate::action::references::deserialize"
    )]
    pub requires: Vec<String>,

    #[serde(default)]
    pub step: Vec<Value>,
}

/// `HowToStep` wrapping either an action or a nested list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HowToStep {
    #[serde(default)]
    pub position: Option<u32>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(
        default,
        alias = "dependsOn",
        deserialize_with = "crate::action::references::deserialize"
    )]
    pub requires: Vec<String>,

    #[serde(default)]
    pub item: Option<Value>,

    #[serde(default)]
    pub item_list_element: Option<Value>,
}

impl HowToStep {
    /// The wrapped element: `item`, or a single object in `itemListElement`
    pub fn into_element(self) -> Option<Value> {
        if let Some(item) = self.item.filter(|v| !v.is_null()) {
            return Some(item);
        }
        match self.item_list_element? {
            obj @ Value::Object(_) => Some(obj),
            Value::Array(mut items) if items.len() == 1 => Some(items.remove(0)),
            _ => None,
        }
    }
}

/// `MapAction` document: one action applied over many inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapActionDocument {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,

    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(
        default,
        alias = "dependsOn",
        deserialize_with = "crate::action::references::deserialize"
    )]
    pub requires: Vec<String>,

    /// Explicit iterations
    #[serde(default)]
    pub item_list_element: Vec<Value>,

    /// Template form: applied once per entry of `object`
    #[serde(default)]
    pub action_template: Option<Value>,

    #[serde(default)]
    pub object: Option<Value>,

    #[serde(default)]
    pub max_iterations: Option<usize>,

    #[serde(default)]
    pub parallelism: Option<usize>,
}

/// Identifier with the `@id` fallback applied
pub(crate) fn pick_identifier(identifier: Option<&str>, id: Option<&str>) -> Option<String> {
    identifier
        .filter(|s| !s.trim().is_empty())
        .or_else(|| id.filter(|s| !s.trim().is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("schema:ItemList"), "ItemList");
        assert_eq!(normalize_type("https://schema.org/HowTo"), "HowTo");
        assert_eq!(normalize_type("http://schema.org/MapAction"), "MapAction");
        assert_eq!(normalize_type("CreateAction"), "CreateAction");
    }

    #[test]
    fn test_probe() {
        assert_eq!(
            DocumentType::probe(&json!({"@type": "ScheduledAction"})),
            TypeProbe::Known(DocumentType::Action("ScheduledAction".into()))
        );
        assert_eq!(
            DocumentType::probe(&json!({"@type": ["Thing", "schema:HowTo"]})),
            TypeProbe::Known(DocumentType::HowTo)
        );
        assert_eq!(
            DocumentType::probe(&json!({"@type": "Recipe"})),
            TypeProbe::Unknown("Recipe".into())
        );
        assert_eq!(DocumentType::probe(&json!({})), TypeProbe::Missing);
    }

    #[test]
    fn test_step_element_forms() {
        let step: HowToStep =
            serde_json::from_value(json!({"item": {"@type": "Action", "identifier": "a"}})).unwrap();
        assert_eq!(step.into_element().unwrap()["identifier"], "a");

        let step: HowToStep = serde_json::from_value(
            json!({"itemListElement": [{"@type": "Action", "identifier": "b"}]}),
        )
        .unwrap();
        assert_eq!(step.into_element().unwrap()["identifier"], "b");

        let step: HowToStep = serde_json::from_value(json!({"name": "empty"})).unwrap();
        assert!(step.into_element().is_none());
    }

    #[test]
    fn test_pick_identifier() {
        assert_eq!(pick_identifier(Some("a"), Some("b")).as_deref(), Some("a"));
        assert_eq!(pick_identifier(Some(" "), Some("b")).as_deref(), Some("b"));
        assert_eq!(pick_identifier(None, None), None);
    }
}
