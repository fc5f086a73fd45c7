use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::{Document, Placement, PrimitiveShape, FEATURE_TYPE, SHEET_TYPE};

pub fn to_json(doc: &Document) -> Result<String> {
    serde_json::to_string_pretty(doc).context("Failed to serialize document")
}

pub fn from_json(text: &str) -> Result<Document> {
    serde_json::from_str(text).context("Failed to parse document JSON")
}

/// Write `doc` as JSON, or as a FreeCAD macro when the path ends in
/// `.FCMacro` or `.py`.
pub fn write_to_path(doc: &Document, path: &Path) -> Result<()> {
    let is_macro = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("fcmacro") || e.eq_ignore_ascii_case("py"))
        .unwrap_or(false);

    let content = if is_macro { to_macro(doc) } else { to_json(doc)? };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_from_path(path: &Path) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    from_json(&text)
}

fn py_str(s: &str) -> String {
    format!("{:?}", s)
}

fn py_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn placement_expr(p: &Placement) -> String {
    format!(
        "App.Placement(App.Vector({}, {}, {}), App.Rotation({}, {}, {}))",
        py_num(p.base.x),
        py_num(p.base.y),
        py_num(p.base.z),
        py_num(p.rotation.yaw),
        py_num(p.rotation.pitch),
        py_num(p.rotation.roll),
    )
}

fn make_shape_expr(shape: &PrimitiveShape) -> String {
    match shape {
        PrimitiveShape::Box {
            length,
            width,
            height,
        } => format!("Part.makeBox({}, {}, {})", py_num(*length), py_num(*width), py_num(*height)),
        PrimitiveShape::Cylinder { radius, height } => {
            format!("Part.makeCylinder({}, {})", py_num(*radius), py_num(*height))
        }
        PrimitiveShape::Sphere { radius } => format!("Part.makeSphere({})", py_num(*radius)),
        PrimitiveShape::Cone {
            radius1,
            radius2,
            height,
        } => format!(
            "Part.makeCone({}, {}, {})",
            py_num(*radius1),
            py_num(*radius2),
            py_num(*height)
        ),
        PrimitiveShape::Torus { radius1, radius2 } => {
            format!("Part.makeTorus({}, {})", py_num(*radius1), py_num(*radius2))
        }
        PrimitiveShape::Wedge {
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
        } => format!(
            "Part.makeWedge({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            py_num(*xmin),
            py_num(*ymin),
            py_num(*zmin),
            py_num(*z2min),
            py_num(*x2min),
            py_num(*xmax),
            py_num(*ymax),
            py_num(*zmax),
            py_num(*z2max),
            py_num(*x2max)
        ),
        PrimitiveShape::Prism {
            polygon,
            circumradius,
            height,
        } => format!(
            "Part.Face(Part.Wire(Part.makePolygon([App.Vector({r} * math.cos(2 * math.pi * i / {n}), {r} * math.sin(2 * math.pi * i / {n}), 0) for i in range({n} + 1)]))).extrude(App.Vector(0, 0, {h}))",
            r = py_num(*circumradius),
            n = polygon,
            h = py_num(*height)
        ),
    }
}

/// FreeCAD macro that rebuilds `doc` in a live session.
///
/// Spreadsheets go first so expression bindings resolve on the final
/// `recompute()`.
pub fn to_macro(doc: &Document) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Generated by vibecad from document {}", py_str(&doc.name));
    let _ = writeln!(out, "import math");
    let _ = writeln!(out, "import FreeCAD as App");
    let _ = writeln!(out, "import Part");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "doc = App.ActiveDocument or App.newDocument({})",
        py_str(&doc.name)
    );

    let (sheets, others): (Vec<_>, Vec<_>) = doc.objects().iter().partition(|o| o.type_id == SHEET_TYPE);

    for object in sheets.iter().chain(others.iter()) {
        let var = format!("obj_{}", object.name);
        let _ = writeln!(out);

        if object.type_id == FEATURE_TYPE {
            let shape = object
                .feature_shape
                .as_ref()
                .map(make_shape_expr)
                .unwrap_or_else(|| "Part.Shape()".to_string());
            let _ = writeln!(out, "{} = doc.addObject(\"Part::Feature\", {})", var, py_str(&object.name));
            let _ = writeln!(out, "{}.Shape = {}", var, shape);
        } else {
            let _ = writeln!(
                out,
                "{} = doc.addObject({}, {})",
                var,
                py_str(&object.type_id),
                py_str(&object.name)
            );
        }

        if object.label != object.name {
            let _ = writeln!(out, "{}.Label = {}", var, py_str(&object.label));
        }

        if let Some(sheet) = &object.sheet {
            for cell in sheet.used_cells() {
                if let Ok(Some(content)) = sheet.get(&cell) {
                    let _ = writeln!(out, "{}.set({}, {})", var, py_str(&cell), py_str(content));
                }
                if let Ok(Some(alias)) = sheet.get_alias(&cell) {
                    let _ = writeln!(out, "{}.setAlias({}, {})", var, py_str(&cell), py_str(alias));
                }
            }
            continue;
        }

        for (prop, value) in &object.properties {
            if prop == "Polygon" {
                let _ = writeln!(out, "{}.{} = {}", var, prop, *value as i64);
            } else {
                let _ = writeln!(out, "{}.{} = {}", var, prop, py_num(*value));
            }
        }
        if object.placement != Placement::default() {
            let _ = writeln!(out, "{}.Placement = {}", var, placement_expr(&object.placement));
        }
        for (path, expression) in &object.expressions {
            let _ = writeln!(
                out,
                "{}.setExpression({}, {})",
                var,
                py_str(path),
                py_str(expression)
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "doc.recompute()");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PropertyValue, Vector3};
    use tempfile::TempDir;

    fn sample() -> Document {
        let mut doc = Document::new("Sample");
        doc.add_object("Part::Box", "Box").unwrap();
        doc.set_property("Box", "Placement.Base", PropertyValue::Vector(Vector3::new(5.0, 0.0, 0.0)))
            .unwrap();
        doc.add_object(SHEET_TYPE, "Params").unwrap();
        doc.sheet_mut("Params").unwrap().set("B2", "10").unwrap();
        doc.sheet_mut("Params").unwrap().set_alias("B2", "len").unwrap();
        doc.set_expression("Box", "Length", "Params.len").unwrap();
        doc
    }

    #[test]
    fn test_macro_contains_objects_and_bindings() {
        let script = to_macro(&sample());

        assert!(script.contains("doc.addObject(\"Part::Box\", \"Box\")"));
        assert!(script.contains("obj_Box.Length = 10.0"));
        assert!(script.contains("App.Vector(5.0, 0.0, 0.0)"));
        assert!(script.contains("obj_Params.setAlias(\"B2\", \"len\")"));
        assert!(script.contains("obj_Box.setExpression(\"Length\", \"Params.len\")"));
        assert!(script.trim_end().ends_with("doc.recompute()"));

        let sheet_at = script.find("Spreadsheet::Sheet").unwrap();
        let box_at = script.find("Part::Box").unwrap();
        assert!(sheet_at < box_at);
    }

    #[test]
    fn test_write_and_read_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("design.json");

        write_to_path(&sample(), &path).unwrap();
        let restored = read_from_path(&path).unwrap();

        assert_eq!(restored.object_names(), vec!["Box", "Params"]);
        assert_eq!(
            restored.get_object("Box").unwrap().expressions.get("Length").map(String::as_str),
            Some("Params.len")
        );
    }

    #[test]
    fn test_write_macro_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("design.FCMacro");

        write_to_path(&sample(), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Generated by vibecad"));
    }
}
