//! Workflow document parser
//!
//! Parsing is a pure function: the `@type` discriminant is probed first and
//! the document is then decoded by the matching type-specific decoder.
//! Nested elements (list items, step elements) go through the same
//! [`decode_element`] logic, so nesting works the same way at every level.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::definition::{
    merge_dependencies, LoopDefinition, LoopItem, WorkflowAction, WorkflowDefinition, WorkflowKind,
};
use super::document::{
    pick_identifier, DocumentType, HowToDocument, HowToStep, ItemListDocument, ListItem,
    MapActionDocument, TypeProbe,
};
use crate::action::SemanticScheduledAction;

/// Errors produced while parsing a workflow document
///
/// Every variant that concerns part of the document names the offending
/// field path (e.g. `itemListElement[1].item`).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed workflow document: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("workflow document must be a JSON object")]
    NotAnObject,

    #[error("workflow document has no @type")]
    MissingType,

    #[error("unsupported workflow document type: {0}")]
    UnsupportedType(String),

    #[error("invalid {kind} document at {field}: {source}")]
    InvalidShape {
        kind: String,
        field: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("{field}: missing identifier (neither identifier nor @id is set)")]
    MissingIdentifier { field: String },

    #[error("{field}: must contain at least one entry")]
    EmptyList { field: String },

    #[error("{field}: step contains neither an action nor an item list")]
    UnrecognizedStep { field: String },

    #[error("{field}: missing required field")]
    MissingField { field: String },
}

/// Parse a workflow document from raw bytes
pub fn parse_workflow(bytes: &[u8]) -> Result<WorkflowDefinition, ParseError> {
    let value: Value = serde_json::from_slice(bytes).map_err(ParseError::Malformed)?;
    parse_workflow_value(value)
}

/// Parse a workflow document from a string
pub fn parse_workflow_str(document: &str) -> Result<WorkflowDefinition, ParseError> {
    parse_workflow(document.as_bytes())
}

/// Parse an already decoded JSON document
pub fn parse_workflow_value(value: Value) -> Result<WorkflowDefinition, ParseError> {
    if !value.is_object() {
        return Err(ParseError::NotAnObject);
    }

    let kind = match DocumentType::probe(&value) {
        TypeProbe::Known(kind) => kind,
        TypeProbe::Unknown(name) => return Err(ParseError::UnsupportedType(name)),
        TypeProbe::Missing => return Err(ParseError::MissingType),
    };

    let definition = match kind {
        DocumentType::ItemList => parse_item_list(value)?,
        DocumentType::HowTo => parse_how_to(value)?,
        DocumentType::MapAction => parse_map_action(value)?,
        DocumentType::Action(_) => parse_single_action(value)?,
        other @ (DocumentType::ListItem | DocumentType::HowToStep) => {
            return Err(ParseError::UnsupportedType(other.as_str().to_string()))
        }
    };

    tracing::debug!(
        workflow_id = %definition.identifier,
        kind = %definition.kind,
        actions = definition.actions.len(),
        "parsed workflow document"
    );

    Ok(definition)
}

fn parse_item_list(value: Value) -> Result<WorkflowDefinition, ParseError> {
    let list: ItemListDocument = decode(value, "ItemList", "$")?;
    let identifier = pick_identifier(list.identifier.as_deref(), list.id.as_deref())
        .ok_or_else(|| ParseError::MissingIdentifier {
            field: "identifier".to_string(),
        })?;

    if list.item_list_element.is_empty() {
        return Err(ParseError::EmptyList {
            field: "itemListElement".to_string(),
        });
    }

    let mut definition = WorkflowDefinition::new(identifier, WorkflowKind::List)
        .with_name(list.name)
        .with_description(list.description);

    for (field, element) in list_elements(list.item_list_element, "itemListElement")? {
        let action = decode_element(element.clone(), &field, &list.requires)?.ok_or_else(|| {
            ParseError::TypeMismatch {
                field,
                expected: "Action, ItemList or MapAction".to_string(),
                found: DocumentType::probe(&element).describe(),
            }
        })?;
        definition.actions.push(action);
    }

    Ok(definition)
}

fn parse_how_to(value: Value) -> Result<WorkflowDefinition, ParseError> {
    let how_to: HowToDocument = decode(value, "HowTo", "$")?;
    let identifier = pick_identifier(how_to.identifier.as_deref(), how_to.id.as_deref())
        .ok_or_else(|| ParseError::MissingIdentifier {
            field: "identifier".to_string(),
        })?;

    if how_to.step.is_empty() {
        return Err(ParseError::EmptyList {
            field: "step".to_string(),
        });
    }

    let mut steps = Vec::with_capacity(how_to.step.len());
    for (i, raw) in how_to.step.into_iter().enumerate() {
        let field = format!("step[{i}]");
        expect_wrapper(&raw, &field, DocumentType::HowToStep)?;
        let step: HowToStep = decode(raw, "HowToStep", &field)?;
        steps.push((field, step));
    }
    steps.sort_by_key(|(_, step)| step.position.unwrap_or(u32::MAX));

    let mut definition = WorkflowDefinition::new(identifier, WorkflowKind::MultiStep)
        .with_name(how_to.name)
        .with_description(how_to.description);

    for (field, step) in steps {
        let inherited = merge_dependencies(&how_to.requires, &step.requires);
        let element = step
            .into_element()
            .ok_or_else(|| ParseError::UnrecognizedStep {
                field: field.clone(),
            })?;
        let action = decode_element(element, &format!("{field}.item"), &inherited)?
            .ok_or(ParseError::UnrecognizedStep { field })?;
        definition.actions.push(action);
    }

    Ok(definition)
}

fn parse_map_action(value: Value) -> Result<WorkflowDefinition, ParseError> {
    let map: MapActionDocument = decode(value, "MapAction", "$")?;
    let name = map.name.clone();
    let description = map.description.clone();
    let definition = map_loop(map, "$")?;

    Ok(WorkflowDefinition::new(definition.identifier.clone(), WorkflowKind::SingleAction)
        .with_name(name)
        .with_description(description)
        .with_action(WorkflowAction::looped(definition, Vec::new())))
}

fn parse_single_action(value: Value) -> Result<WorkflowDefinition, ParseError> {
    let action = decode_action(value, "$")?;
    let identifier = action
        .action
        .effective_identifier()
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingIdentifier {
            field: "identifier".to_string(),
        })?;
    let dependencies = action.requires.clone();

    Ok(WorkflowDefinition::new(identifier, WorkflowKind::SingleAction)
        .with_name(action.action.name.clone())
        .with_description(action.action.description.clone())
        .with_action(WorkflowAction::single(action, dependencies)))
}

/// Decode one nested element into a workflow action
///
/// Returns `Ok(None)` when the element is neither an action nor a list, so
/// each caller can report that with its own error.
pub(crate) fn decode_element(
    element: Value,
    field: &str,
    inherited: &[String],
) -> Result<Option<WorkflowAction>, ParseError> {
    let kind = match DocumentType::probe(&element) {
        TypeProbe::Known(kind) => kind,
        TypeProbe::Unknown(_) | TypeProbe::Missing => return Ok(None),
    };

    let action = match kind {
        DocumentType::Action(_) => {
            let action = decode_action(element, field)?;
            let dependencies = merge_dependencies(inherited, &action.requires);
            WorkflowAction::single(action, dependencies)
        }
        DocumentType::ItemList => {
            let list: ItemListDocument = decode(element, "ItemList", field)?;
            WorkflowAction::looped(list_loop(list, field)?, inherited.to_vec())
        }
        DocumentType::MapAction => {
            let map: MapActionDocument = decode(element, "MapAction", field)?;
            WorkflowAction::looped(map_loop(map, field)?, inherited.to_vec())
        }
        DocumentType::HowTo | DocumentType::ListItem | DocumentType::HowToStep => return Ok(None),
    };

    Ok(Some(action))
}

/// A nested `ItemList` becomes a loop over its items
fn list_loop(list: ItemListDocument, field: &str) -> Result<LoopDefinition, ParseError> {
    let identifier = pick_identifier(list.identifier.as_deref(), list.id.as_deref())
        .ok_or_else(|| ParseError::MissingIdentifier {
            field: format!("{field}.identifier"),
        })?;

    let elements_field = format!("{field}.itemListElement");
    if list.item_list_element.is_empty() {
        return Err(ParseError::EmptyList {
            field: elements_field,
        });
    }

    let items = loop_items(list.item_list_element, &elements_field)?;
    let mut definition = LoopDefinition::new(identifier, items).with_dependencies(list.requires);
    definition.name = list.name;
    definition.max_iterations = list.max_iterations;
    definition.parallelism = list.parallelism;
    Ok(definition)
}

/// A `MapAction` becomes a loop, from explicit items or from a template
fn map_loop(map: MapActionDocument, field: &str) -> Result<LoopDefinition, ParseError> {
    let identifier = pick_identifier(map.identifier.as_deref(), map.id.as_deref())
        .ok_or_else(|| ParseError::MissingIdentifier {
            field: prefixed(field, "identifier"),
        })?;

    let items = if let Some(template) = map.action_template {
        template_items(template, map.object, field)?
    } else if !map.item_list_element.is_empty() {
        loop_items(map.item_list_element, &prefixed(field, "itemListElement"))?
    } else {
        return Err(ParseError::EmptyList {
            field: prefixed(field, "itemListElement"),
        });
    };

    let mut definition = LoopDefinition::new(identifier, items).with_dependencies(map.requires);
    definition.name = map.name;
    definition.max_iterations = map.max_iterations;
    definition.parallelism = map.parallelism;
    Ok(definition)
}

fn loop_items(elements: Vec<Value>, field: &str) -> Result<Vec<LoopItem>, ParseError> {
    let mut items = Vec::with_capacity(elements.len());
    for (item_field, position, element) in list_items(elements, field)? {
        let Some(element) = element else {
            items.push(LoopItem::empty(position));
            continue;
        };

        match DocumentType::probe(&element) {
            TypeProbe::Known(DocumentType::Action(_)) => {
                let action = decode_action(element, &item_field)?;
                items.push(LoopItem {
                    position,
                    action: Some(Box::new(action)),
                });
            }
            other => {
                return Err(ParseError::TypeMismatch {
                    field: item_field,
                    expected: "Action".to_string(),
                    found: other.describe(),
                })
            }
        }
    }
    Ok(items)
}

/// Expand `actionTemplate` over the `object` array
fn template_items(
    template: Value,
    object: Option<Value>,
    field: &str,
) -> Result<Vec<LoopItem>, ParseError> {
    let template_field = prefixed(field, "actionTemplate");
    let object_field = prefixed(field, "object");

    let inputs = match object {
        Some(Value::Array(inputs)) => inputs,
        Some(other) => {
            return Err(ParseError::TypeMismatch {
                field: object_field,
                expected: "array".to_string(),
                found: json_kind(&other).to_string(),
            })
        }
        None => return Err(ParseError::MissingField { field: object_field }),
    };
    if inputs.is_empty() {
        return Err(ParseError::EmptyList { field: object_field });
    }

    let template = decode_action(template, &template_field)?;
    let template_id = template
        .action
        .effective_identifier()
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingIdentifier {
            field: format!("{template_field}.identifier"),
        })?;

    Ok(inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            let position = i as u32 + 1;
            let mut action = template.clone();
            action.action.identifier = format!("{template_id}-{position}");
            action.action.id = None;
            action.action.object = Some(input);
            LoopItem::new(position, action)
        })
        .collect())
}

/// Top-level list entries, ordered by position, each decoded from its wrapper
fn list_elements(
    elements: Vec<Value>,
    field: &str,
) -> Result<Vec<(String, Value)>, ParseError> {
    list_items(elements, field)?
        .into_iter()
        .map(|(item_field, _, element)| {
            element
                .map(|element| (item_field.clone(), element))
                .ok_or(ParseError::MissingField { field: item_field })
        })
        .collect()
}

/// Unwrap `ListItem`s, returning `(field, position, element)` sorted by position
fn list_items(
    elements: Vec<Value>,
    field: &str,
) -> Result<Vec<(String, Option<u32>, Option<Value>)>, ParseError> {
    let mut items = Vec::with_capacity(elements.len());
    for (i, raw) in elements.into_iter().enumerate() {
        let wrapper_field = format!("{field}[{i}]");
        expect_wrapper(&raw, &wrapper_field, DocumentType::ListItem)?;
        let item: ListItem = decode(raw, "ListItem", &wrapper_field)?;
        let element = item.item.filter(|v| !v.is_null());
        items.push((format!("{wrapper_field}.item"), item.position, element));
    }
    items.sort_by_key(|(_, position, _)| position.unwrap_or(u32::MAX));
    Ok(items)
}

/// A wrapper entry must be a JSON object whose `@type`, when present, is `expected`
fn expect_wrapper(raw: &Value, field: &str, expected: DocumentType) -> Result<(), ParseError> {
    if !raw.is_object() {
        return Err(ParseError::TypeMismatch {
            field: field.to_string(),
            expected: expected.as_str().to_string(),
            found: json_kind(raw).to_string(),
        });
    }
    match DocumentType::probe(raw) {
        TypeProbe::Missing => Ok(()),
        TypeProbe::Known(kind) if kind == expected => Ok(()),
        other => Err(ParseError::TypeMismatch {
            field: field.to_string(),
            expected: expected.as_str().to_string(),
            found: other.describe(),
        }),
    }
}

fn decode_action(value: Value, field: &str) -> Result<SemanticScheduledAction, ParseError> {
    let mut action: SemanticScheduledAction = decode(value, "Action", field)?;
    let normalized = super::document::normalize_type(&action.action.action_type).to_string();
    action.action.action_type = normalized;
    Ok(action)
}

fn decode<T: DeserializeOwned>(value: Value, kind: &str, field: &str) -> Result<T, ParseError> {
    serde_json::from_value(value).map_err(|source| ParseError::InvalidShape {
        kind: kind.to_string(),
        field: field.to_string(),
        source,
    })
}

fn prefixed(field: &str, name: &str) -> String {
    if field == "$" {
        name.to_string()
    } else {
        format!("{field}.{name}")
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<WorkflowDefinition, ParseError> {
        parse_workflow_value(value)
    }

    #[test]
    fn test_parse_single_scheduled_action() {
        let definition = parse(json!({
            "@context": "https://schema.org",
            "@type": "ScheduledAction",
            "identifier": "nightly-backup",
            "name": "Nightly backup",
            "requires": ["snapshot"]
        }))
        .unwrap();

        assert_eq!(definition.identifier, "nightly-backup");
        assert_eq!(definition.kind, WorkflowKind::SingleAction);
        assert_eq!(definition.name.as_deref(), Some("Nightly backup"));
        assert_eq!(definition.actions.len(), 1);
        assert_eq!(definition.actions[0].dependencies(), ["snapshot".to_string()]);
    }

    #[test]
    fn test_parse_item_list_inherits_dependencies() {
        let definition = parse(json!({
            "@type": "ItemList",
            "@id": "urn:wf:media",
            "dependsOn": ["ingest"],
            "itemListElement": [
                {"@type": "ListItem", "position": 1,
                 "item": {"@type": "CreateAction", "identifier": "render"}},
                {"@type": "ListItem", "position": 2,
                 "item": {"@type": "schema:ShareAction", "identifier": "publish", "requires": ["render"]}}
            ]
        }))
        .unwrap();

        assert_eq!(definition.identifier, "urn:wf:media");
        assert_eq!(definition.kind, WorkflowKind::List);
        assert_eq!(definition.actions[0].dependencies(), ["ingest".to_string()]);
        assert_eq!(
            definition.actions[1].dependencies(),
            ["ingest".to_string(), "render".to_string()]
        );

        let WorkflowAction::Single { action, .. } = &definition.actions[1] else {
            panic!("expected a single action");
        };
        assert_eq!(action.action_type(), "ShareAction");
    }

    #[test]
    fn test_list_items_ordered_by_position() {
        let definition = parse(json!({
            "@type": "ItemList",
            "identifier": "wf",
            "itemListElement": [
                {"position": 2, "item": {"@type": "Action", "identifier": "second"}},
                {"position": 1, "item": {"@type": "Action", "identifier": "first"}}
            ]
        }))
        .unwrap();

        assert_eq!(definition.actions[0].identifier(), "first");
        assert_eq!(definition.actions[1].identifier(), "second");
    }

    #[test]
    fn test_parse_how_to_with_nested_list() {
        let definition = parse(json!({
            "@type": "HowTo",
            "identifier": "release",
            "step": [
                {"@type": "HowToStep", "position": 1,
                 "item": {"@type": "Action", "identifier": "build"}},
                {"@type": "HowToStep", "position": 2, "requires": ["build"],
                 "item": {
                    "@type": "ItemList",
                    "identifier": "deploy-regions",
                    "itemListElement": [
                        {"item": {"@type": "UpdateAction", "identifier": "eu"}},
                        {"item": {"@type": "UpdateAction", "identifier": "us"}}
                    ]
                 }}
            ]
        }))
        .unwrap();

        assert_eq!(definition.kind, WorkflowKind::MultiStep);
        assert_eq!(definition.instance_count(), 3);

        let WorkflowAction::Loop {
            definition: looped,
            dependencies,
        } = &definition.actions[1]
        else {
            panic!("expected a loop");
        };
        assert_eq!(looped.identifier, "deploy-regions");
        assert_eq!(looped.items.len(), 2);
        assert_eq!(dependencies, &vec!["build".to_string()]);
    }

    #[test]
    fn test_parse_map_action_template() {
        let definition = parse(json!({
            "@type": "MapAction",
            "identifier": "thumbnails",
            "maxIterations": 10,
            "actionTemplate": {"@type": "CreateAction", "identifier": "thumb"},
            "object": [{"src": "a.png"}, {"src": "b.png"}]
        }))
        .unwrap();

        let WorkflowAction::Loop { definition: looped, .. } = &definition.actions[0] else {
            panic!("expected a loop");
        };
        assert_eq!(looped.max_iterations, Some(10));
        assert_eq!(looped.items.len(), 2);

        let second = looped.items[1].action.as_ref().unwrap();
        assert_eq!(second.identifier(), "thumb-2");
        assert_eq!(second.action.object, Some(json!({"src": "b.png"})));
    }

    #[test]
    fn test_malformed_document() {
        let err = parse_workflow(b"{not json").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));

        let err = parse_workflow(b"[1, 2]").unwrap_err();
        assert!(matches!(err, ParseError::NotAnObject));
    }

    #[test]
    fn test_missing_and_unsupported_type() {
        assert!(matches!(
            parse(json!({"identifier": "x"})).unwrap_err(),
            ParseError::MissingType
        ));
        assert!(matches!(
            parse(json!({"@type": "Recipe", "identifier": "x"})).unwrap_err(),
            ParseError::UnsupportedType(name) if name == "Recipe"
        ));
    }

    #[test]
    fn test_missing_identifier() {
        let err = parse(json!({
            "@type": "ItemList",
            "itemListElement": [{"item": {"@type": "Action", "identifier": "a"}}]
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::MissingIdentifier { field } if field == "identifier"));
    }

    #[test]
    fn test_empty_lists() {
        let err = parse(json!({"@type": "ItemList", "identifier": "wf", "itemListElement": []}))
            .unwrap_err();
        assert!(matches!(err, ParseError::EmptyList { field } if field == "itemListElement"));

        let err = parse(json!({"@type": "HowTo", "identifier": "wf"})).unwrap_err();
        assert!(matches!(err, ParseError::EmptyList { field } if field == "step"));
    }

    #[test]
    fn test_list_item_type_mismatch() {
        let err = parse(json!({
            "@type": "ItemList",
            "identifier": "wf",
            "itemListElement": [{"@type": "Action", "identifier": "bare"}]
        }))
        .unwrap_err();

        match err {
            ParseError::TypeMismatch { field, expected, found } => {
                assert_eq!(field, "itemListElement[0]");
                assert_eq!(expected, "ListItem");
                assert_eq!(found, "Action");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unrecognized_step() {
        let err = parse(json!({
            "@type": "HowTo",
            "identifier": "wf",
            "step": [{"@type": "HowToStep", "item": {"@type": "Recipe"}}]
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedStep { field } if field == "step[0]"));

        let err = parse(json!({
            "@type": "HowTo",
            "identifier": "wf",
            "step": [{"@type": "HowToStep", "name": "nothing here"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedStep { .. }));
    }

    #[test]
    fn test_shape_error_names_field() {
        let err = parse(json!({
            "@type": "ItemList",
            "identifier": "wf",
            "itemListElement": [{"item": {"@type": "Action", "identifier": "a", "requires": 5}}]
        }))
        .unwrap_err();

        match err {
            ParseError::InvalidShape { field, .. } => assert_eq!(field, "itemListElement[0].item"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
