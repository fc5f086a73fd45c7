//! Spreadsheet-backed design variables.
//!
//! Every dimension of a parametric object lives in one row of the
//! `VibeDesign_Params` sheet (A=name, B=value with alias, C=unit,
//! D=description). Object properties are bound to `Sheet.alias`
//! expressions, so editing a cell and recomputing reshapes the model.

use serde::Serialize;

use crate::command::Dimensions;
use crate::document::{CellRef, Document, DocumentError, PropertyValue, Rotation, Spreadsheet, Vector3, SHEET_TYPE};
use crate::log_warning;
use crate::logging::{with_logger, LogCategory};
use crate::shapes::ShapeKind;

pub const PARAMS_SHEET: &str = "VibeDesign_Params";
pub const PARAMS_LABEL: &str = "VibeDesign Parameters";
const HEADER: [(&str, &str); 4] = [("A1", "Variable"), ("B1", "Value"), ("C1", "Unit"), ("D1", "Description")];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParametricVariable {
    pub name: String,
    /// Raw cell content: a number, or `=expr` for constraints
    pub value: String,
    pub unit: String,
    pub description: String,
    /// `Sheet.alias` form usable in expressions
    pub reference: String,
}

/// Object created by [`ParametricManager::create_parametric`]
#[derive(Debug, Clone, PartialEq)]
pub struct ParametricObject {
    pub name: String,
    pub type_id: String,
    /// Variable key (`length`, `pos_x`, ...) to its sheet reference
    pub variables: Vec<(String, String)>,
    pub summary: String,
}

/// Map `name` onto the identifier alphabet of spreadsheet aliases
pub fn sanitize_identifier(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() || trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("var_{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub struct ParametricManager<'d> {
    doc: &'d mut Document,
    sheet: String,
    next_row: u32,
}

impl<'d> ParametricManager<'d> {
    /// Attach to the document's parameter sheet, creating it on first use
    pub fn new(doc: &'d mut Document) -> Result<Self, DocumentError> {
        let existing = doc
            .objects()
            .iter()
            .find(|o| {
                o.type_id == SHEET_TYPE && (o.name.starts_with(PARAMS_SHEET) || o.label.starts_with(PARAMS_LABEL))
            })
            .map(|o| o.name.clone());

        let sheet = match existing {
            Some(name) => name,
            None => {
                let object = doc.add_object(SHEET_TYPE, PARAMS_SHEET)?;
                object.label = PARAMS_LABEL.to_string();
                let name = object.name.clone();
                let sheet = doc.sheet_mut(&name)?;
                for (cell, title) in HEADER {
                    sheet.set(cell, title)?;
                }
                name
            }
        };

        let next_row = doc
            .sheet(&sheet)
            .map(Spreadsheet::last_row)
            .unwrap_or(1)
            .max(1)
            + 1;

        Ok(Self { doc, sheet, next_row })
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet
    }

    pub fn document(&self) -> &Document {
        &*self.doc
    }

    fn sheet(&self) -> Result<&Spreadsheet, DocumentError> {
        self.doc
            .sheet(&self.sheet)
            .ok_or_else(|| DocumentError::NotASpreadsheet(self.sheet.clone()))
    }

    fn variable_exists(&self, name: &str) -> Result<bool, DocumentError> {
        let sheet = self.sheet()?;
        let in_column = (2..=sheet.last_row()).any(|row| sheet.content(CellRef::new(1, row)) == Some(name));
        Ok(in_column || sheet.cell_for_alias(name).is_some())
    }

    fn write_row(&mut self, name: &str, value: &str, unit: &str, description: &str) -> Result<String, DocumentError> {
        let row = self.next_row;
        let sheet_name = self.sheet.clone();
        let sheet = self.doc.sheet_mut(&sheet_name)?;

        sheet.set(&format!("A{}", row), name)?;
        sheet.set(&format!("B{}", row), value)?;
        sheet.set(&format!("C{}", row), unit)?;
        sheet.set(&format!("D{}", row), description)?;

        if let Err(e) = sheet.set_alias(&format!("B{}", row), name) {
            for column in ["A", "B", "C", "D"] {
                sheet.set(&format!("{}{}", column, row), "")?;
            }
            log_warning!(LogCategory::Geometry, format!("Could not create alias {}: {}", name, e));
            return Err(e);
        }

        self.next_row += 1;
        Ok(format!("{}.{}", sheet_name, name))
    }

    /// Add a variable row and return its `Sheet.alias` reference.
    ///
    /// The name is sanitized and suffixed `_1`, `_2`, ... until unique.
    pub fn create_variable(&mut self, name: &str, value: f64, unit: &str, description: &str) -> Result<String, DocumentError> {
        let base = sanitize_identifier(name);
        let mut candidate = base.clone();
        let mut counter = 1;
        while self.variable_exists(&candidate)? {
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }

        self.write_row(&candidate, &format_value(value), unit, description)
    }

    /// Add a calculated row holding `=expression`
    pub fn add_constraint(&mut self, expression: &str, description: &str) -> Result<String, DocumentError> {
        let mut row = self.next_row;
        let mut name = format!("constraint_{}", row);
        while self.variable_exists(&name)? {
            row += 1;
            name = format!("constraint_{}", row);
        }
        self.write_row(&name, &format!("={}", expression.trim_start_matches('=')), "calculated", description)
    }

    pub fn list_variables(&self) -> Result<Vec<ParametricVariable>, DocumentError> {
        let sheet = self.sheet()?;
        let text = |column: u32, row: u32| sheet.content(CellRef::new(column, row)).unwrap_or_default().to_string();

        Ok((2..=sheet.last_row())
            .filter_map(|row| {
                let name = sheet.content(CellRef::new(1, row))?.to_string();
                Some(ParametricVariable {
                    reference: format!("{}.{}", self.sheet, name),
                    value: text(2, row),
                    unit: text(3, row),
                    description: text(4, row),
                    name,
                })
            })
            .collect())
    }

    /// Numeric value of a variable, evaluating constraint formulas
    pub fn value_of(&self, name: &str) -> Result<f64, DocumentError> {
        let cell = self.sheet()?.cell_for_alias(name).ok_or_else(|| DocumentError::InvalidAlias {
            alias: name.to_string(),
            reason: "no such variable".into(),
        })?;
        crate::document::expression::cell_value(&*self.doc, &self.sheet, cell)
    }

    /// Change a variable's value; bound objects follow on the next recompute
    pub fn update_variable(&mut self, name: &str, value: f64) -> Result<(), DocumentError> {
        let sheet_name = self.sheet.clone();
        let sheet = self.doc.sheet_mut(&sheet_name)?;
        let cell = sheet.cell_for_alias(name).ok_or_else(|| DocumentError::InvalidAlias {
            alias: name.to_string(),
            reason: "no such variable".into(),
        })?;
        sheet.set(&cell.to_string(), &format_value(value))
    }

    /// Create `kind` with every resolved dimension held in a sheet variable.
    ///
    /// Position variables are only added when `position` is off the origin.
    pub fn create_parametric(
        &mut self,
        kind: ShapeKind,
        name: &str,
        dims: &Dimensions,
        position: Vector3,
        rotation: Vector3,
    ) -> Result<ParametricObject, DocumentError> {
        let spec = kind.spec();
        let params = spec.resolve(dims);
        let object_name = self.doc.unique_name(name);

        let mut variables = Vec::new();
        let mut bindings = Vec::new();
        for param in &params {
            let reference = self.create_variable(
                &format!("{}_{}", object_name, param.spec.variable),
                param.value,
                "mm",
                &format!("{} of {}", param.spec.description, object_name),
            )?;
            variables.push((param.spec.variable.to_string(), reference.clone()));
            bindings.push((param.spec.property.to_string(), param.value, reference));
        }

        if !position.is_zero() {
            for (axis, value) in [("x", position.x), ("y", position.y), ("z", position.z)] {
                let reference = self.create_variable(
                    &format!("{}_{}", object_name, axis),
                    value,
                    "mm",
                    &format!("{} position of {}", axis.to_uppercase(), object_name),
                )?;
                variables.push((format!("pos_{}", axis), reference.clone()));
                bindings.push((format!("Placement.Base.{}", axis), value, reference));
            }
        }

        let object = self.doc.add_object(spec.type_id, &object_name)?;
        for (property, value) in spec.fixed {
            object.set_property(property, PropertyValue::Number(*value))?;
        }
        for (property, value, reference) in &bindings {
            object.set_property(property, PropertyValue::Number(*value))?;
            object.set_expression(property, reference)?;
        }
        if !rotation.is_zero() {
            object.placement.rotation = Rotation::from_axis_degrees(rotation);
        }
        let created = object.name.clone();

        self.doc.recompute()?;
        with_logger(|l| l.log_geometry("created parametric", &created, spec.type_id));

        Ok(ParametricObject {
            summary: spec.summary(&created, &params),
            name: created,
            type_id: spec.type_id.to_string(),
            variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(pairs: &[(&str, f64)]) -> Dimensions {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("Box length"), "Box_length");
        assert_eq!(sanitize_identifier("__wall-thickness__"), "wall_thickness");
        assert_eq!(sanitize_identifier("3d"), "var_3d");
        assert_eq!(sanitize_identifier("!!!"), "var_");
    }

    #[test]
    fn test_sheet_created_once_with_header() {
        let mut doc = Document::new("Test");
        {
            let manager = ParametricManager::new(&mut doc).unwrap();
            assert_eq!(manager.sheet_name(), PARAMS_SHEET);
        }
        {
            ParametricManager::new(&mut doc).unwrap();
        }

        assert_eq!(doc.objects().len(), 1);
        let sheet = doc.get_object(PARAMS_SHEET).unwrap();
        assert_eq!(sheet.label, PARAMS_LABEL);
        assert_eq!(doc.sheet(PARAMS_SHEET).unwrap().get("A1").unwrap(), Some("Variable"));
        assert_eq!(doc.sheet(PARAMS_SHEET).unwrap().get("D1").unwrap(), Some("Description"));
    }

    #[test]
    fn test_variables_are_unique() {
        let mut doc = Document::new("Test");
        let mut manager = ParametricManager::new(&mut doc).unwrap();

        let first = manager.create_variable("wall thickness", 2.0, "mm", "Wall").unwrap();
        let second = manager.create_variable("wall-thickness", 3.0, "mm", "Wall again").unwrap();
        let third = manager.create_variable("wall_thickness", 4.0, "mm", "").unwrap();

        assert_eq!(first, "VibeDesign_Params.wall_thickness");
        assert_eq!(second, "VibeDesign_Params.wall_thickness_1");
        assert_eq!(third, "VibeDesign_Params.wall_thickness_2");

        let vars = manager.list_variables().unwrap();
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[1].value, "3");
        assert_eq!(vars[1].description, "Wall again");
        assert_eq!(manager.value_of("wall_thickness_2").unwrap(), 4.0);
    }

    #[test]
    fn test_constraint_is_calculated() {
        let mut doc = Document::new("Test");
        let mut manager = ParametricManager::new(&mut doc).unwrap();

        manager.create_variable("base", 10.0, "mm", "").unwrap();
        let reference = manager.add_constraint("base * 3", "Triple base").unwrap();

        assert_eq!(reference, "VibeDesign_Params.constraint_3");
        let vars = manager.list_variables().unwrap();
        assert_eq!(vars[1].value, "=base * 3");
        assert_eq!(vars[1].unit, "calculated");
        assert_eq!(manager.value_of("constraint_3").unwrap(), 30.0);
    }

    #[test]
    fn test_parametric_box_follows_variables() {
        let mut doc = Document::new("Test");
        let mut manager = ParametricManager::new(&mut doc).unwrap();

        let created = manager
            .create_parametric(
                ShapeKind::Box,
                "Box",
                &dims(&[("length", 20.0)]),
                Vector3::default(),
                Vector3::default(),
            )
            .unwrap();

        assert_eq!(created.name, "Box");
        assert_eq!(created.variables.len(), 3);
        assert_eq!(created.summary, "Box Box (20.0 x 20.0 x 20.0 mm)");

        manager.update_variable("Box_height", 55.0).unwrap();
        drop(manager);
        doc.recompute().unwrap();

        let object = doc.get_object("Box").unwrap();
        assert_eq!(object.number("Width"), Some(20.0));
        assert_eq!(object.number("Height"), Some(55.0));
        assert_eq!(object.expressions.get("Length").map(String::as_str), Some("VibeDesign_Params.Box_length"));
    }

    #[test]
    fn test_position_variables_only_off_origin() {
        let mut doc = Document::new("Test");
        let mut manager = ParametricManager::new(&mut doc).unwrap();

        let at_origin = manager
            .create_parametric(ShapeKind::Sphere, "Ball", &dims(&[]), Vector3::default(), Vector3::default())
            .unwrap();
        assert!(at_origin.variables.iter().all(|(key, _)| !key.starts_with("pos_")));

        let moved = manager
            .create_parametric(
                ShapeKind::Cylinder,
                "Shaft",
                &dims(&[("diameter", 8.0)]),
                Vector3::new(5.0, 0.0, 12.0),
                Vector3::new(0.0, 90.0, 0.0),
            )
            .unwrap();
        assert!(moved.variables.iter().any(|(key, r)| key == "pos_z" && r == "VibeDesign_Params.Shaft_z"));

        drop(manager);
        let shaft = doc.get_object("Shaft").unwrap();
        assert_eq!(shaft.number("Radius"), Some(4.0));
        assert_eq!(shaft.placement.base, Vector3::new(5.0, 0.0, 12.0));
        assert_eq!(shaft.placement.rotation.pitch, 90.0);
    }

    #[test]
    fn test_hexagon_uses_prism() {
        let mut doc = Document::new("Test");
        let mut manager = ParametricManager::new(&mut doc).unwrap();

        let created = manager
            .create_parametric(
                ShapeKind::Hexagon,
                "Nut",
                &dims(&[("width", 20.0), ("height", 6.0)]),
                Vector3::default(),
                Vector3::default(),
            )
            .unwrap();
        drop(manager);

        assert_eq!(created.type_id, "Part::Prism");
        let nut = doc.get_object("Nut").unwrap();
        assert_eq!(nut.number("Polygon"), Some(6.0));
        assert_eq!(nut.number("Circumradius"), Some(10.0));
    }
}
