use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::document::Vector3;
use crate::shapes::ShapeKind;

/// Dimension name to value in millimeters
pub type Dimensions = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    #[default]
    Create,
    #[serde(other)]
    Unsupported,
}

/// One structured geometry instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type", default)]
    pub kind: CommandType,
    pub shape: ShapeKind,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub rotation: Vector3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Command {
    pub fn create(shape: ShapeKind, dimensions: Dimensions) -> Self {
        Self {
            kind: CommandType::Create,
            shape,
            dimensions,
            position: Vector3::default(),
            rotation: Vector3::default(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn at(mut self, position: Vector3) -> Self {
        self.position = position;
        self
    }

    /// Requested name, or the capitalized shape name
    pub fn object_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.shape.display_name())
            .to_string()
    }
}

/// A parsed model reply or the fallback parser's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub fallback: bool,
    /// Entries of the `commands` array that could not be understood
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,
}

fn default_confidence() -> f64 {
    0.8
}

impl CommandBatch {
    pub fn empty(explanation: &str) -> Self {
        Self {
            commands: Vec::new(),
            explanation: explanation.to_string(),
            confidence: 0.0,
            fallback: true,
            rejected: Vec::new(),
        }
    }

    /// Build from a JSON envelope, keeping the commands that parse.
    ///
    /// Returns `None` when the value has no `commands` array at all.
    pub fn from_value(value: &Value) -> Option<Self> {
        let entries = value.get("commands")?.as_array()?;

        let mut commands = Vec::new();
        let mut rejected = Vec::new();
        for entry in entries {
            match serde_json::from_value::<Command>(entry.clone()) {
                Ok(command) => commands.push(command),
                Err(e) => rejected.push(e.to_string()),
            }
        }

        Some(Self {
            commands,
            explanation: value
                .get("explanation")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            confidence: value
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or_else(default_confidence),
            fallback: false,
            rejected,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_defaults() {
        let command: Command = serde_json::from_value(json!({"shape": "box"})).unwrap();

        assert_eq!(command.kind, CommandType::Create);
        assert!(command.dimensions.is_empty());
        assert!(command.position.is_zero());
        assert_eq!(command.object_name(), "Box");
    }

    #[test]
    fn test_unknown_command_type_is_unsupported() {
        let command: Command = serde_json::from_value(json!({"type": "fillet", "shape": "box"})).unwrap();
        assert_eq!(command.kind, CommandType::Unsupported);
    }

    #[test]
    fn test_batch_keeps_valid_commands() {
        let value = json!({
            "commands": [
                {"type": "create", "shape": "cylinder", "dimensions": {"radius": 5, "height": 20},
                 "position": {"x": 1, "y": 2}, "name": "Shaft"},
                {"type": "create", "shape": "gear"}
            ],
            "explanation": "A shaft",
            "confidence": 0.9
        });

        let batch = CommandBatch::from_value(&value).unwrap();
        assert_eq!(batch.commands.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.commands[0].dimensions.get("radius"), Some(&5.0));
        assert_eq!(batch.commands[0].position, Vector3::new(1.0, 2.0, 0.0));
        assert_eq!(batch.commands[0].object_name(), "Shaft");
        assert_eq!(batch.confidence, 0.9);
        assert!(!batch.fallback);
    }

    #[test]
    fn test_batch_requires_commands_array() {
        assert!(CommandBatch::from_value(&json!({"code": "x = 1"})).is_none());
        assert!(CommandBatch::from_value(&json!({"commands": "box"})).is_none());
    }
}
