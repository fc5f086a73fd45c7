//! Turns structured commands into document objects.

use crate::command::{Command, CommandBatch, CommandType};
use crate::document::{Document, DocumentError, PropertyValue, Rotation};
use crate::extractor::DimensionExtractor;
use crate::logging::{with_logger, LogCategory, LogContext};
use crate::parametric::ParametricManager;
use crate::{log_info, log_warning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationMode {
    /// Literal property values
    #[default]
    Direct,
    /// Values held in the parameter sheet and bound by expression
    Parametric,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedObject {
    pub name: String,
    pub type_id: String,
    pub summary: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub created: Vec<CreatedObject>,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn names(&self) -> Vec<&str> {
        self.created.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn summaries(&self) -> Vec<&str> {
        self.created.iter().map(|c| c.summary.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    mode: CreationMode,
}

impl Dispatcher {
    pub fn new(mode: CreationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CreationMode {
        self.mode
    }

    /// Create the object a command describes. `Ok(None)` for command
    /// types other than `create`.
    ///
    /// A command whose geometry fails validation leaves no object behind.
    pub fn execute(&self, command: &Command, doc: &mut Document) -> Result<Option<CreatedObject>, DocumentError> {
        if command.kind == CommandType::Unsupported {
            log_warning!(LogCategory::Geometry, "Skipping unsupported command type");
            return Ok(None);
        }

        let name = doc.unique_name(&command.object_name());
        let result = match self.mode {
            CreationMode::Direct => create_direct(command, &name, doc),
            CreationMode::Parametric => ParametricManager::new(doc)?
                .create_parametric(command.shape, &name, &command.dimensions, command.position, command.rotation)
                .map(|created| CreatedObject {
                    name: created.name,
                    type_id: created.type_id,
                    summary: created.summary,
                }),
        };

        match result {
            Ok(created) => {
                log_info!(
                    LogCategory::Geometry,
                    format!("Created {}", created.type_id),
                    LogContext::new()
                        .with_component("dispatcher")
                        .with_operation(if self.mode == CreationMode::Direct { "direct" } else { "parametric" })
                        .with_success(true)
                );
                Ok(Some(created))
            }
            Err(e) => {
                if doc.get_object(&name).is_some() {
                    let _ = doc.remove_object(&name);
                }
                Err(e)
            }
        }
    }

    /// Run every command, collecting failures instead of stopping at the first
    pub fn execute_batch(&self, batch: &CommandBatch, doc: &mut Document) -> BatchReport {
        let mut report = BatchReport::default();
        for rejected in &batch.rejected {
            report.errors.push(format!("Rejected command: {}", rejected));
        }

        for command in &batch.commands {
            match self.execute(command, doc) {
                Ok(Some(created)) => report.created.push(created),
                Ok(None) => report
                    .errors
                    .push(format!("Unsupported command for {}", command.shape)),
                Err(e) => {
                    log_warning!(LogCategory::Geometry, format!("Command error: {}", e));
                    report.errors.push(format!("Command error: {}", e));
                }
            }
        }
        report
    }
}

fn create_direct(command: &Command, name: &str, doc: &mut Document) -> Result<CreatedObject, DocumentError> {
    let spec = command.shape.spec();
    let params = spec.resolve(&command.dimensions);

    let object = doc.add_object(spec.type_id, name)?;
    for (property, value) in spec.fixed {
        object.set_property(property, PropertyValue::Number(*value))?;
    }
    for param in &params {
        object.set_property(param.spec.property, PropertyValue::Number(param.value))?;
    }
    object.placement.base = command.position;
    object.placement.rotation = Rotation::from_axis_degrees(command.rotation);
    let created = object.name.clone();

    doc.recompute()?;
    with_logger(|l| l.log_geometry("created", &created, spec.type_id));

    Ok(CreatedObject {
        summary: spec.summary(&created, &params),
        name: created,
        type_id: spec.type_id.to_string(),
    })
}

/// Regex-only path from free text to a command
pub struct PromptParser {
    extractor: DimensionExtractor,
}

impl Default for PromptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptParser {
    pub fn new() -> Self {
        Self {
            extractor: DimensionExtractor::new(),
        }
    }

    /// `None` when no shape keyword is present. Missing dimensions fall
    /// back to the shape defaults.
    pub fn parse(&self, prompt: &str) -> Option<Command> {
        let (shape, dimensions) = self.extractor.parse(prompt.trim());
        shape.map(|shape| Command::create(shape, dimensions))
    }

    /// Fallback batch built from arbitrary text, such as a model reply
    /// that carried no `commands` array.
    pub fn to_batch(&self, text: &str) -> CommandBatch {
        match self.parse(text) {
            Some(command) => CommandBatch {
                commands: vec![command],
                explanation: "Fallback parsing used".to_string(),
                confidence: 0.6,
                fallback: true,
                rejected: Vec::new(),
            },
            None => CommandBatch::empty("No shape recognized"),
        }
    }

    pub fn parse_and_execute(
        &self,
        prompt: &str,
        doc: &mut Document,
        dispatcher: &Dispatcher,
    ) -> Result<Option<CreatedObject>, DocumentError> {
        match self.parse(prompt) {
            Some(command) => dispatcher.execute(&command, doc),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Vector3;
    use crate::shapes::ShapeKind;
    use serde_json::json;

    #[test]
    fn test_direct_box_with_summary() {
        let mut doc = Document::new("Test");
        let command: Command = serde_json::from_value(json!({
            "shape": "box",
            "dimensions": {"length": 10, "width": 20, "height": 30},
            "position": {"x": 5},
            "rotation": {"z": 45}
        }))
        .unwrap();

        let created = Dispatcher::default().execute(&command, &mut doc).unwrap().unwrap();

        assert_eq!(created.summary, "Box Box (10.0 x 20.0 x 30.0 mm)");
        let object = doc.get_object("Box").unwrap();
        assert_eq!(object.number("Width"), Some(20.0));
        assert_eq!(object.placement.base, Vector3::new(5.0, 0.0, 0.0));
        assert_eq!(object.placement.rotation.yaw, 45.0);
    }

    #[test]
    fn test_names_are_unique() {
        let mut doc = Document::new("Test");
        let dispatcher = Dispatcher::default();
        let command = Command::create(ShapeKind::Cylinder, Default::default());

        let first = dispatcher.execute(&command, &mut doc).unwrap().unwrap();
        let second = dispatcher.execute(&command, &mut doc).unwrap().unwrap();
        let named = dispatcher.execute(&command.clone().with_name("Shaft"), &mut doc).unwrap().unwrap();

        assert_eq!(first.name, "Cylinder");
        assert_eq!(second.name, "Cylinder001");
        assert_eq!(second.summary, "Cylinder Cylinder001 (radius 5.0 mm, height 10.0 mm)");
        assert_eq!(named.name, "Shaft");
    }

    #[test]
    fn test_invalid_geometry_leaves_no_object() {
        let mut doc = Document::new("Test");
        let mut dims = crate::command::Dimensions::new();
        dims.insert("radius".into(), -3.0);

        let err = Dispatcher::default()
            .execute(&Command::create(ShapeKind::Sphere, dims), &mut doc)
            .unwrap_err();

        assert!(matches!(err, DocumentError::InvalidGeometry { .. }));
        assert!(doc.is_empty());
    }

    #[test]
    fn test_batch_collects_errors() {
        let mut doc = Document::new("Test");
        let batch = CommandBatch::from_value(&json!({
            "commands": [
                {"shape": "torus", "dimensions": {"major_radius": 30, "minor_radius": 4}},
                {"type": "chamfer", "shape": "box"},
                {"shape": "teapot"}
            ]
        }))
        .unwrap();

        let report = Dispatcher::default().execute_batch(&batch, &mut doc);

        assert_eq!(report.names(), vec!["Torus"]);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(doc.get_object("Torus").unwrap().number("Radius1"), Some(30.0));
    }

    #[test]
    fn test_parametric_mode() {
        let mut doc = Document::new("Test");
        let command = Command::create(ShapeKind::Box, Default::default()).at(Vector3::new(0.0, 0.0, 15.0));

        let created = Dispatcher::new(CreationMode::Parametric)
            .execute(&command, &mut doc)
            .unwrap()
            .unwrap();

        assert_eq!(created.name, "Box");
        let object = doc.get_object("Box").unwrap();
        assert_eq!(object.placement.base.z, 15.0);
        assert_eq!(
            object.expressions.get("Placement.Base.z").map(String::as_str),
            Some("VibeDesign_Params.Box_z")
        );
    }

    #[test]
    fn test_prompt_parser() {
        let parser = PromptParser::new();
        let mut doc = Document::new("Test");

        let created = parser
            .parse_and_execute("make a cylinder height 50 diameter 25", &mut doc, &Dispatcher::default())
            .unwrap()
            .unwrap();
        assert_eq!(created.summary, "Cylinder Cylinder (radius 12.5 mm, height 50.0 mm)");

        let created = parser
            .parse_and_execute("a cube please", &mut doc, &Dispatcher::default())
            .unwrap()
            .unwrap();
        assert_eq!(created.summary, "Box Box (10.0 x 10.0 x 10.0 mm)");

        assert!(parser.parse("hello there").is_none());
    }

    #[test]
    fn test_fallback_batch() {
        let parser = PromptParser::new();

        let batch = parser.to_batch("I would build a sphere radius 4 cm for you");
        assert!(batch.fallback);
        assert_eq!(batch.confidence, 0.6);
        assert_eq!(batch.explanation, "Fallback parsing used");
        assert_eq!(batch.commands[0].dimensions.get("radius"), Some(&40.0));

        assert!(parser.to_batch("no idea").is_empty());
    }
}
