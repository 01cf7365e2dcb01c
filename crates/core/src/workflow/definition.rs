//! Internal workflow definition
//!
//! A [`WorkflowDefinition`] is what the parser produces and the expander
//! consumes. It is not a wire format; documents are described in
//! [`document`](super::document).

use serde::{Deserialize, Serialize};

use crate::action::SemanticScheduledAction;

/// Default safety bound on loop iterations
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Shape of the source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// A single `ScheduledAction` or `MapAction`
    SingleAction,
    /// An `ItemList` of actions
    List,
    /// A `HowTo` procedure of steps
    MultiStep,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleAction => write!(f, "single_action"),
            Self::List => write!(f, "list"),
            Self::MultiStep => write!(f, "multi_step"),
        }
    }
}

/// Parsed workflow: an ordered list of abstract actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier (never empty)
    pub identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub kind: WorkflowKind,

    /// Actions in document order
    pub actions: Vec<WorkflowAction>,
}

impl WorkflowDefinition {
    /// Create an empty definition
    pub fn new(identifier: impl Into<String>, kind: WorkflowKind) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            description: None,
            kind,
            actions: Vec::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Append an action
    pub fn with_action(mut self, action: WorkflowAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Number of top-level workflow actions (loops count once)
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the definition has no actions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of concrete instances expansion will produce
    pub fn instance_count(&self) -> usize {
        self.actions
            .iter()
            .map(|action| match action {
                WorkflowAction::Single { .. } => 1,
                WorkflowAction::Loop { definition, .. } => definition.items.len(),
            })
            .sum()
    }
}

/// One abstract entry of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAction {
    /// A single action
    Single {
        action: Box<SemanticScheduledAction>,

        /// Dependencies inherited from the enclosing workflow or step,
        /// merged with the action's own
        #[serde(default)]
        dependencies: Vec<String>,
    },

    /// An iteration over a list of actions
    Loop {
        definition: LoopDefinition,

        /// Dependencies inherited from the enclosing workflow or step
        #[serde(default)]
        dependencies: Vec<String>,
    },
}

impl WorkflowAction {
    /// Create a single-action entry
    pub fn single(action: SemanticScheduledAction, dependencies: Vec<String>) -> Self {
        Self::Single {
            action: Box::new(action),
            dependencies,
        }
    }

    /// Create a loop entry
    pub fn looped(definition: LoopDefinition, dependencies: Vec<String>) -> Self {
        Self::Loop {
            definition,
            dependencies,
        }
    }

    /// Inherited dependencies
    pub fn dependencies(&self) -> &[String] {
        match self {
            Self::Single { dependencies, .. } | Self::Loop { dependencies, .. } => dependencies,
        }
    }

    /// Identifier of the action or loop
    pub fn identifier(&self) -> &str {
        match self {
            Self::Single { action, .. } => action.identifier(),
            Self::Loop { definition, .. } => &definition.identifier,
        }
    }
}

/// Bounded iteration over actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopDefinition {
    pub identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// One entry per iteration
    pub items: Vec<LoopItem>,

    /// Loop-level dependencies applied to every iteration
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Parallelism hint for the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,

    /// Iteration limit; the expander's default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

impl LoopDefinition {
    /// Create a loop over the given items
    pub fn new(identifier: impl Into<String>, items: Vec<LoopItem>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            items,
            dependencies: Vec::new(),
            parallelism: None,
            max_iterations: None,
        }
    }

    /// Loop over concrete actions
    pub fn from_actions(
        identifier: impl Into<String>,
        actions: impl IntoIterator<Item = SemanticScheduledAction>,
    ) -> Self {
        let items = actions
            .into_iter()
            .enumerate()
            .map(|(i, action)| LoopItem::new(i as u32 + 1, action))
            .collect();
        Self::new(identifier, items)
    }

    /// Set loop-level dependencies
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Override the iteration limit
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Set the parallelism hint
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism.max(1));
        self
    }
}

/// One loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,

    /// The action to run; `None` when the source item carried no action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Box<SemanticScheduledAction>>,
}

impl LoopItem {
    pub fn new(position: u32, action: SemanticScheduledAction) -> Self {
        Self {
            position: Some(position),
            action: Some(Box::new(action)),
        }
    }

    /// An item with no action attached
    pub fn empty(position: Option<u32>) -> Self {
        Self {
            position,
            action: None,
        }
    }
}

/// Order-preserving union of two dependency lists
pub(crate) fn merge_dependencies(first: &[String], second: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(first.len() + second.len());
    for dep in first.iter().chain(second) {
        if !merged.contains(dep) {
            merged.push(dep.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_dependencies_keeps_first_occurrence() {
        let first = vec!["fetch".to_string(), "decode".to_string()];
        let second = vec!["decode".to_string(), "resize".to_string(), "fetch".to_string()];
        assert_eq!(
            merge_dependencies(&first, &second),
            vec!["fetch", "decode", "resize"]
        );
        assert!(merge_dependencies(&[], &[]).is_empty());
    }

    #[test]
    fn test_instance_count_counts_loop_items() {
        let looped = LoopDefinition::from_actions(
            "thumbs",
            (0..3).map(|i| SemanticScheduledAction::new("CreateAction", format!("t{i}"))),
        );

        let definition = WorkflowDefinition::new("wf", WorkflowKind::List)
            .with_action(WorkflowAction::single(
                SemanticScheduledAction::new("Action", "a"),
                vec![],
            ))
            .with_action(WorkflowAction::looped(looped, vec!["a".into()]));

        assert_eq!(definition.len(), 2);
        assert_eq!(definition.instance_count(), 4);
        assert_eq!(definition.actions[1].identifier(), "thumbs");
        assert_eq!(definition.actions[1].dependencies(), ["a".to_string()]);
    }

    #[test]
    fn test_loop_positions_are_one_based() {
        let looped = LoopDefinition::from_actions(
            "l",
            vec![
                SemanticScheduledAction::new("Action", "x"),
                SemanticScheduledAction::new("Action", "y"),
            ],
        );
        assert_eq!(looped.items[0].position, Some(1));
        assert_eq!(looped.items[1].position, Some(2));
    }

    #[test]
    fn test_workflow_action_serialization_is_tagged() {
        let action = WorkflowAction::single(SemanticScheduledAction::new("Action", "a"), vec![]);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "single");
    }
}
