//! In-memory CAD host
//!
//! A [`Workspace`] holds documents; a [`Document`] holds named objects with
//! typed properties, a placement, optional expression bindings and, for
//! `Spreadsheet::Sheet` objects, a cell grid. `recompute` resolves
//! expressions and validates geometry. This is the surface the guarded
//! executor, the dispatcher and the parametric manager all talk to.

pub mod export;
pub mod expression;
pub mod spreadsheet;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

pub use spreadsheet::{CellRef, Spreadsheet};

pub const SHEET_TYPE: &str = "Spreadsheet::Sheet";
pub const FEATURE_TYPE: &str = "Part::Feature";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Yaw/pitch/roll in degrees (about Z, Y, X)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Rotation {
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Degrees about the X, Y and Z axes, as a command's `rotation` carries them.
    pub fn from_axis_degrees(angles: Vector3) -> Self {
        Self {
            yaw: angles.z,
            pitch: angles.y,
            roll: angles.x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Placement {
    pub base: Vector3,
    pub rotation: Rotation,
}

/// Solid geometry, either derived from a primitive's properties or
/// assigned to a `Part::Feature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PrimitiveShape {
    Box {
        length: f64,
        width: f64,
        height: f64,
    },
    Cylinder {
        radius: f64,
        height: f64,
    },
    Sphere {
        radius: f64,
    },
    Cone {
        radius1: f64,
        radius2: f64,
        height: f64,
    },
    Torus {
        radius1: f64,
        radius2: f64,
    },
    Wedge {
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
        zmin: f64,
        zmax: f64,
        x2min: f64,
        x2max: f64,
        z2min: f64,
        z2max: f64,
    },
    Prism {
        polygon: u32,
        circumradius: f64,
        height: f64,
    },
}

impl PrimitiveShape {
    pub fn volume(&self) -> f64 {
        match *self {
            Self::Box {
                length,
                width,
                height,
            } => length * width * height,
            Self::Cylinder { radius, height } => PI * radius * radius * height,
            Self::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Self::Cone {
                radius1,
                radius2,
                height,
            } => PI * height / 3.0 * (radius1 * radius1 + radius1 * radius2 + radius2 * radius2),
            Self::Torus { radius1, radius2 } => 2.0 * PI * PI * radius1 * radius2 * radius2,
            Self::Wedge {
                xmin,
                xmax,
                ymin,
                ymax,
                zmin,
                zmax,
                x2min,
                x2max,
                z2min,
                z2max,
            } => {
                // Prismatoid along Y between the two rectangular faces
                let bottom = (xmax - xmin) * (zmax - zmin);
                let top = (x2max - x2min) * (z2max - z2min);
                let mid = ((xmax - xmin) + (x2max - x2min)) / 2.0
                    * ((zmax - zmin) + (z2max - z2min))
                    / 2.0;
                (ymax - ymin) / 6.0 * (bottom + 4.0 * mid + top)
            }
            Self::Prism {
                polygon,
                circumradius,
                height,
            } => {
                let n = polygon as f64;
                n / 2.0 * circumradius * circumradius * (2.0 * PI / n).sin() * height
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Box { .. } => "Box",
            Self::Cylinder { .. } => "Cylinder",
            Self::Sphere { .. } => "Sphere",
            Self::Cone { .. } => "Cone",
            Self::Torus { .. } => "Torus",
            Self::Wedge { .. } => "Wedge",
            Self::Prism { .. } => "Prism",
        }
    }
}

/// Typed value read from or written to an object property path
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
    Vector(Vector3),
    Rotation(Rotation),
    Placement(Placement),
    Shape(PrimitiveShape),
}

impl PropertyValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Vector(_) => "Vector",
            Self::Rotation(_) => "Rotation",
            Self::Placement(_) => "Placement",
            Self::Shape(_) => "Shape",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentError {
    UnknownType(String),
    NoSuchObject(String),
    UnknownProperty { object: String, property: String },
    WrongValueType {
        object: String,
        property: String,
        expected: &'static str,
        found: &'static str,
    },
    NotASpreadsheet(String),
    InvalidCell(String),
    InvalidAlias { alias: String, reason: String },
    Expression { expression: String, reason: String },
    InvalidGeometry { object: String, reason: String },
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType(type_id) => write!(f, "'{}' is not a document object type", type_id),
            Self::NoSuchObject(name) => write!(f, "no object named '{}'", name),
            Self::UnknownProperty { object, property } => {
                write!(f, "'{}' has no property '{}'", object, property)
            }
            Self::WrongValueType {
                object,
                property,
                expected,
                found,
            } => write!(
                f,
                "{}.{} expects {} but got {}",
                object, property, expected, found
            ),
            Self::NotASpreadsheet(name) => write!(f, "'{}' is not a spreadsheet", name),
            Self::InvalidCell(cell) => write!(f, "invalid cell address '{}'", cell),
            Self::InvalidAlias { alias, reason } => write!(f, "invalid alias '{}': {}", alias, reason),
            Self::Expression { expression, reason } => {
                write!(f, "cannot evaluate '{}': {}", expression, reason)
            }
            Self::InvalidGeometry { object, reason } => write!(f, "{}: {}", object, reason),
        }
    }
}

impl std::error::Error for DocumentError {}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Positive,
    NonNegative,
    Any,
    MinPolygon,
}

struct TypeSpec {
    type_id: &'static str,
    properties: &'static [(&'static str, f64, Bound)],
}

const TYPE_CATALOG: &[TypeSpec] = &[
    TypeSpec {
        type_id: "Part::Box",
        properties: &[
            ("Length", 10.0, Bound::Positive),
            ("Width", 10.0, Bound::Positive),
            ("Height", 10.0, Bound::Positive),
        ],
    },
    TypeSpec {
        type_id: "Part::Cylinder",
        properties: &[
            ("Radius", 2.0, Bound::Positive),
            ("Height", 10.0, Bound::Positive),
            ("Angle", 360.0, Bound::Positive),
        ],
    },
    TypeSpec {
        type_id: "Part::Sphere",
        properties: &[("Radius", 5.0, Bound::Positive)],
    },
    TypeSpec {
        type_id: "Part::Cone",
        properties: &[
            ("Radius1", 2.0, Bound::NonNegative),
            ("Radius2", 4.0, Bound::NonNegative),
            ("Height", 10.0, Bound::Positive),
        ],
    },
    TypeSpec {
        type_id: "Part::Torus",
        properties: &[
            ("Radius1", 10.0, Bound::Positive),
            ("Radius2", 2.0, Bound::Positive),
        ],
    },
    TypeSpec {
        type_id: "Part::Wedge",
        properties: &[
            ("Xmin", 0.0, Bound::Any),
            ("Ymin", 0.0, Bound::Any),
            ("Zmin", 0.0, Bound::Any),
            ("X2min", 2.0, Bound::Any),
            ("Z2min", 2.0, Bound::Any),
            ("Xmax", 10.0, Bound::Any),
            ("Ymax", 10.0, Bound::Any),
            ("Zmax", 10.0, Bound::Any),
            ("X2max", 8.0, Bound::Any),
            ("Z2max", 8.0, Bound::Any),
        ],
    },
    TypeSpec {
        type_id: "Part::Prism",
        properties: &[
            ("Polygon", 6.0, Bound::MinPolygon),
            ("Circumradius", 2.0, Bound::Positive),
            ("Height", 10.0, Bound::Positive),
        ],
    },
    TypeSpec {
        type_id: FEATURE_TYPE,
        properties: &[],
    },
    TypeSpec {
        type_id: SHEET_TYPE,
        properties: &[],
    },
];

fn type_spec(type_id: &str) -> Option<&'static TypeSpec> {
    TYPE_CATALOG.iter().find(|spec| spec.type_id == type_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadObject {
    pub name: String,
    pub label: String,
    pub type_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, f64>,
    #[serde(default)]
    pub placement: Placement,
    /// Property path to expression text, resolved on recompute
    #[serde(default)]
    pub expressions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_shape: Option<PrimitiveShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<Spreadsheet>,
}

impl CadObject {
    fn new(type_id: &str, name: String) -> Result<Self, DocumentError> {
        let spec = type_spec(type_id).ok_or_else(|| DocumentError::UnknownType(type_id.into()))?;
        let properties = spec
            .properties
            .iter()
            .map(|(prop, default, _)| (prop.to_string(), *default))
            .collect();

        Ok(Self {
            label: name.clone(),
            name,
            type_id: type_id.to_string(),
            properties,
            placement: Placement::default(),
            expressions: BTreeMap::new(),
            feature_shape: None,
            sheet: (type_id == SHEET_TYPE).then(Spreadsheet::default),
        })
    }

    pub fn is_spreadsheet(&self) -> bool {
        self.sheet.is_some()
    }

    pub fn number(&self, property: &str) -> Option<f64> {
        self.properties.get(property).copied()
    }

    fn prop(&self, property: &str) -> f64 {
        self.number(property).unwrap_or_default()
    }

    /// Geometry of the object, if it has any
    pub fn shape(&self) -> Option<PrimitiveShape> {
        let shape = match self.type_id.as_str() {
            "Part::Box" => PrimitiveShape::Box {
                length: self.prop("Length"),
                width: self.prop("Width"),
                height: self.prop("Height"),
            },
            "Part::Cylinder" => PrimitiveShape::Cylinder {
                radius: self.prop("Radius"),
                height: self.prop("Height"),
            },
            "Part::Sphere" => PrimitiveShape::Sphere {
                radius: self.prop("Radius"),
            },
            "Part::Cone" => PrimitiveShape::Cone {
                radius1: self.prop("Radius1"),
                radius2: self.prop("Radius2"),
                height: self.prop("Height"),
            },
            "Part::Torus" => PrimitiveShape::Torus {
                radius1: self.prop("Radius1"),
                radius2: self.prop("Radius2"),
            },
            "Part::Wedge" => PrimitiveShape::Wedge {
                xmin: self.prop("Xmin"),
                xmax: self.prop("Xmax"),
                ymin: self.prop("Ymin"),
                ymax: self.prop("Ymax"),
                zmin: self.prop("Zmin"),
                zmax: self.prop("Zmax"),
                x2min: self.prop("X2min"),
                x2max: self.prop("X2max"),
                z2min: self.prop("Z2min"),
                z2max: self.prop("Z2max"),
            },
            "Part::Prism" => PrimitiveShape::Prism {
                polygon: self.prop("Polygon").max(0.0) as u32,
                circumradius: self.prop("Circumradius"),
                height: self.prop("Height"),
            },
            _ => return self.feature_shape.clone(),
        };
        Some(shape)
    }

    pub fn get_property(&self, path: &str) -> Result<PropertyValue, DocumentError> {
        let value = match path {
            "Label" => PropertyValue::Text(self.label.clone()),
            "Name" => PropertyValue::Text(self.name.clone()),
            "TypeId" => PropertyValue::Text(self.type_id.clone()),
            "Placement" => PropertyValue::Placement(self.placement),
            "Placement.Base" => PropertyValue::Vector(self.placement.base),
            "Placement.Base.x" => PropertyValue::Number(self.placement.base.x),
            "Placement.Base.y" => PropertyValue::Number(self.placement.base.y),
            "Placement.Base.z" => PropertyValue::Number(self.placement.base.z),
            "Placement.Rotation" => PropertyValue::Rotation(self.placement.rotation),
            "Shape" => match self.shape() {
                Some(shape) => PropertyValue::Shape(shape),
                None => return Err(self.unknown(path)),
            },
            other => match self.properties.get(other) {
                Some(value) => PropertyValue::Number(*value),
                None => return Err(self.unknown(path)),
            },
        };
        Ok(value)
    }

    pub fn set_property(&mut self, path: &str, value: PropertyValue) -> Result<(), DocumentError> {
        match (path, value) {
            ("Label", PropertyValue::Text(label)) => self.label = label,
            ("Placement", PropertyValue::Placement(placement)) => self.placement = placement,
            ("Placement.Base", PropertyValue::Vector(base)) => self.placement.base = base,
            ("Placement.Base.x", PropertyValue::Number(v)) => self.placement.base.x = v,
            ("Placement.Base.y", PropertyValue::Number(v)) => self.placement.base.y = v,
            ("Placement.Base.z", PropertyValue::Number(v)) => self.placement.base.z = v,
            ("Placement.Rotation", PropertyValue::Rotation(rotation)) => {
                self.placement.rotation = rotation
            }
            ("Shape", PropertyValue::Shape(shape)) if self.type_id == FEATURE_TYPE => {
                self.feature_shape = Some(shape)
            }
            ("Shape", _) => {
                return Err(DocumentError::InvalidGeometry {
                    object: self.name.clone(),
                    reason: format!("Shape is derived on {} and only assignable on {}", self.type_id, FEATURE_TYPE),
                })
            }
            (path, PropertyValue::Number(v)) if self.properties.contains_key(path) => {
                if !v.is_finite() {
                    return Err(DocumentError::InvalidGeometry {
                        object: self.name.clone(),
                        reason: format!("{} must be a finite number", path),
                    });
                }
                self.properties.insert(path.to_string(), v);
            }
            (path, value) => {
                let expected = match self.get_property(path)? {
                    PropertyValue::Number(_) => "number",
                    other => other.type_name(),
                };
                return Err(DocumentError::WrongValueType {
                    object: self.name.clone(),
                    property: path.to_string(),
                    expected,
                    found: value.type_name(),
                });
            }
        }
        Ok(())
    }

    /// Bind a numeric property path to an expression evaluated on recompute
    pub fn set_expression(&mut self, path: &str, expression: &str) -> Result<(), DocumentError> {
        match self.get_property(path)? {
            PropertyValue::Number(_) => {}
            other => {
                return Err(DocumentError::WrongValueType {
                    object: self.name.clone(),
                    property: path.to_string(),
                    expected: "number",
                    found: other.type_name(),
                })
            }
        }

        let expression = expression.trim();
        if expression.is_empty() {
            self.expressions.remove(path);
        } else {
            self.expressions.insert(path.to_string(), expression.to_string());
        }
        Ok(())
    }

    fn unknown(&self, property: &str) -> DocumentError {
        DocumentError::UnknownProperty {
            object: self.name.clone(),
            property: property.to_string(),
        }
    }

    fn validate(&self) -> Result<(), DocumentError> {
        let Some(spec) = type_spec(&self.type_id) else {
            return Ok(());
        };

        for (prop, _, bound) in spec.properties {
            let value = self.prop(prop);
            let reason = match bound {
                Bound::Positive if value <= 0.0 => Some("must be greater than zero"),
                Bound::NonNegative if value < 0.0 => Some("must not be negative"),
                Bound::MinPolygon if value < 3.0 => Some("needs at least 3 sides"),
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(DocumentError::InvalidGeometry {
                    object: self.name.clone(),
                    reason: format!("{} {} (got {})", prop, reason, value),
                });
            }
        }

        if self.type_id == "Part::Cone" && self.prop("Radius1") == 0.0 && self.prop("Radius2") == 0.0 {
            return Err(DocumentError::InvalidGeometry {
                object: self.name.clone(),
                reason: "Radius1 and Radius2 cannot both be zero".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    objects: Vec<CadObject>,
}

impl Document {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: Vec::new(),
        }
    }

    pub fn objects(&self) -> &[CadObject] {
        &self.objects
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get_object(&self, name: &str) -> Option<&CadObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn get_object_mut(&mut self, name: &str) -> Option<&mut CadObject> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    fn object_mut(&mut self, name: &str) -> Result<&mut CadObject, DocumentError> {
        self.get_object_mut(name)
            .ok_or_else(|| DocumentError::NoSuchObject(name.to_string()))
    }

    /// Free object name derived from `base`: `Box`, then `Box001`, `Box002`, ...
    pub fn unique_name(&self, base: &str) -> String {
        let mut base: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if base.is_empty() {
            base = "Unnamed".into();
        } else if base.starts_with(|c: char| c.is_ascii_digit()) {
            base.insert(0, '_');
        }

        if self.get_object(&base).is_none() {
            return base;
        }
        (1..)
            .map(|n| format!("{}{:03}", base, n))
            .find(|candidate| self.get_object(candidate).is_none())
            .unwrap_or(base)
    }

    /// Add an object; a taken name is made unique rather than rejected
    pub fn add_object(&mut self, type_id: &str, name: &str) -> Result<&mut CadObject, DocumentError> {
        let name = self.unique_name(name);
        let object = CadObject::new(type_id, name)?;
        self.objects.push(object);
        let index = self.objects.len() - 1;
        Ok(&mut self.objects[index])
    }

    pub fn remove_object(&mut self, name: &str) -> Result<CadObject, DocumentError> {
        let index = self
            .objects
            .iter()
            .position(|o| o.name == name)
            .ok_or_else(|| DocumentError::NoSuchObject(name.to_string()))?;
        Ok(self.objects.remove(index))
    }

    pub fn set_property(&mut self, object: &str, path: &str, value: PropertyValue) -> Result<(), DocumentError> {
        self.object_mut(object)?.set_property(path, value)
    }

    pub fn get_property(&self, object: &str, path: &str) -> Result<PropertyValue, DocumentError> {
        self.get_object(object)
            .ok_or_else(|| DocumentError::NoSuchObject(object.to_string()))?
            .get_property(path)
    }

    pub fn set_expression(&mut self, object: &str, path: &str, expression: &str) -> Result<(), DocumentError> {
        self.object_mut(object)?.set_expression(path, expression)
    }

    /// Spreadsheet by object name, falling back to label
    pub fn sheet(&self, name: &str) -> Option<&Spreadsheet> {
        self.get_object(name)
            .or_else(|| self.objects.iter().find(|o| o.label == name))
            .and_then(|o| o.sheet.as_ref())
    }

    pub fn sheet_mut(&mut self, name: &str) -> Result<&mut Spreadsheet, DocumentError> {
        self.object_mut(name)?
            .sheet
            .as_mut()
            .ok_or_else(|| DocumentError::NotASpreadsheet(name.to_string()))
    }

    /// Resolve every expression binding and validate geometry.
    ///
    /// Returns the number of objects recomputed. Evaluation happens against
    /// the pre-recompute state so bindings never observe each other's
    /// partial updates.
    pub fn recompute(&mut self) -> Result<usize, DocumentError> {
        let mut updates = Vec::new();
        for object in &self.objects {
            for (path, text) in &object.expressions {
                let value = expression::evaluate(self, text, None)?;
                updates.push((object.name.clone(), path.clone(), value));
            }
        }

        for (object, path, value) in updates {
            self.set_property(&object, &path, PropertyValue::Number(value))?;
        }

        for object in &self.objects {
            object.validate()?;
        }
        Ok(self.objects.len())
    }
}

/// Open documents plus the console output scripts produced
#[derive(Debug, Default)]
pub struct Workspace {
    documents: Vec<Document>,
    active: Option<usize>,
    console: Vec<String>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workspace with `document` open and active
    pub fn with_document(document: Document) -> Self {
        Self {
            documents: vec![document],
            active: Some(0),
            console: Vec::new(),
        }
    }

    pub fn new_document(&mut self, name: &str) -> usize {
        let mut name = name.to_string();
        let mut n = 1;
        while self.documents.iter().any(|d| d.name == name) {
            name = format!("{}{}", name.trim_end_matches(char::is_numeric), n);
            n += 1;
        }
        self.documents.push(Document::new(&name));
        let index = self.documents.len() - 1;
        self.active = Some(index);
        index
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_document(&self) -> Option<&Document> {
        self.active.and_then(|i| self.documents.get(i))
    }

    /// Active document, creating `Unnamed` when none is open
    pub fn active_or_new(&mut self) -> &mut Document {
        let index = match self.active {
            Some(index) => index,
            None => self.new_document("Unnamed"),
        };
        &mut self.documents[index]
    }

    pub fn document(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)
    }

    pub fn document_mut(&mut self, index: usize) -> Option<&mut Document> {
        self.documents.get_mut(index)
    }

    pub fn find_document(&self, name: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.name == name)
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        if index < self.documents.len() {
            self.active = Some(index);
            true
        } else {
            false
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn print(&mut self, line: impl Into<String>) {
        self.console.push(line.into());
    }

    pub fn take_console(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names_get_numeric_suffix() {
        let mut doc = Document::new("Test");
        doc.add_object("Part::Box", "Box").unwrap();
        doc.add_object("Part::Box", "Box").unwrap();
        doc.add_object("Part::Box", "Box").unwrap();

        assert_eq!(doc.object_names(), vec!["Box", "Box001", "Box002"]);
        assert_eq!(doc.unique_name("My Part"), "My_Part");
        assert_eq!(doc.unique_name("3d"), "_3d");
    }

    #[test]
    fn test_new_object_has_type_defaults() {
        let mut doc = Document::new("Test");
        let cylinder = doc.add_object("Part::Cylinder", "Cylinder").unwrap();

        assert_eq!(cylinder.number("Radius"), Some(2.0));
        assert_eq!(cylinder.number("Height"), Some(10.0));
        assert!(doc.add_object("Part::Spaceship", "X").is_err());
    }

    #[test]
    fn test_property_paths() {
        let mut doc = Document::new("Test");
        doc.add_object("Part::Box", "Box").unwrap();

        doc.set_property("Box", "Length", PropertyValue::Number(25.0)).unwrap();
        doc.set_property("Box", "Placement.Base", PropertyValue::Vector(Vector3::new(1.0, 2.0, 3.0)))
            .unwrap();
        doc.set_property("Box", "Placement.Base.z", PropertyValue::Number(9.0)).unwrap();

        let object = doc.get_object("Box").unwrap();
        assert_eq!(object.number("Length"), Some(25.0));
        assert_eq!(object.placement.base, Vector3::new(1.0, 2.0, 9.0));

        let err = doc
            .set_property("Box", "Length", PropertyValue::Text("long".into()))
            .unwrap_err();
        assert!(err.to_string().contains("expects number"));
        assert!(doc
            .set_property("Box", "Radius", PropertyValue::Number(1.0))
            .is_err());
    }

    #[test]
    fn test_recompute_rejects_degenerate_geometry() {
        let mut doc = Document::new("Test");
        doc.add_object("Part::Sphere", "Sphere").unwrap();
        doc.set_property("Sphere", "Radius", PropertyValue::Number(0.0)).unwrap();

        let err = doc.recompute().unwrap_err();
        assert!(matches!(err, DocumentError::InvalidGeometry { .. }));
        assert!(err.to_string().contains("Radius must be greater than zero"));
    }

    #[test]
    fn test_recompute_resolves_expressions_from_sheet() {
        let mut doc = Document::new("Test");
        doc.add_object(SHEET_TYPE, "Params").unwrap();
        {
            let sheet = doc.sheet_mut("Params").unwrap();
            sheet.set("B2", "42").unwrap();
            sheet.set_alias("B2", "size").unwrap();
        }
        doc.add_object("Part::Box", "Box").unwrap();
        doc.set_expression("Box", "Length", "Params.size").unwrap();
        doc.set_expression("Box", "Placement.Base.x", "Params.size / 2").unwrap();

        assert_eq!(doc.recompute().unwrap(), 2);
        let object = doc.get_object("Box").unwrap();
        assert_eq!(object.number("Length"), Some(42.0));
        assert_eq!(object.placement.base.x, 21.0);
    }

    #[test]
    fn test_shape_volume() {
        let mut doc = Document::new("Test");
        doc.add_object("Part::Box", "Box").unwrap();
        let shape = doc.get_object("Box").unwrap().shape().unwrap();
        assert_eq!(shape.volume(), 1000.0);

        let cylinder = PrimitiveShape::Cylinder {
            radius: 1.0,
            height: 1.0,
        };
        assert!((cylinder.volume() - PI).abs() < 1e-9);
    }

    #[test]
    fn test_workspace_active_or_new() {
        let mut workspace = Workspace::new();
        assert!(workspace.active_document().is_none());

        workspace.active_or_new().add_object("Part::Box", "Box").unwrap();
        assert_eq!(workspace.documents().len(), 1);
        assert_eq!(workspace.active_document().unwrap().name, "Unnamed");

        workspace.new_document("Unnamed");
        assert_eq!(workspace.documents().len(), 2);
        assert_ne!(workspace.documents()[1].name, "Unnamed");
    }

    #[test]
    fn test_rotation_from_axis_degrees() {
        let rotation = Rotation::from_axis_degrees(Vector3::new(10.0, 20.0, 30.0));
        assert_eq!(rotation, Rotation::new(30.0, 20.0, 10.0));
    }
}
