//! Shape table shared by direct creation and parametric creation.
//!
//! Each entry maps a [`ShapeKind`] to its document type, the properties it
//! sets, how each property is derived from the command's dimensions, and
//! how the creation summary is worded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::command::Dimensions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ShapeKind {
    Box,
    Cylinder,
    Sphere,
    Cone,
    Torus,
    Wedge,
    Hexagon,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 7] = [
        ShapeKind::Box,
        ShapeKind::Cylinder,
        ShapeKind::Sphere,
        ShapeKind::Cone,
        ShapeKind::Torus,
        ShapeKind::Wedge,
        ShapeKind::Hexagon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Box => "box",
            Self::Cylinder => "cylinder",
            Self::Sphere => "sphere",
            Self::Cone => "cone",
            Self::Torus => "torus",
            Self::Wedge => "wedge",
            Self::Hexagon => "hexagon",
        }
    }

    /// Capitalized name used as the default object name
    pub fn display_name(&self) -> &'static str {
        self.spec().base_name
    }

    pub fn spec(&self) -> &'static ShapeSpec {
        SHAPE_TABLE
            .iter()
            .find(|spec| spec.kind == *self)
            .unwrap_or(&SHAPE_TABLE[0])
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShapeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "box" | "cube" | "cuboid" | "rectangular" | "block" => Ok(Self::Box),
            "cylinder" | "tube" | "pipe" | "rod" => Ok(Self::Cylinder),
            "sphere" | "ball" => Ok(Self::Sphere),
            "cone" => Ok(Self::Cone),
            "torus" | "ring" | "donut" => Ok(Self::Torus),
            "wedge" => Ok(Self::Wedge),
            "hexagon" | "hex" | "prism" => Ok(Self::Hexagon),
            other => Err(format!("unsupported shape '{}'", other)),
        }
    }
}

impl TryFrom<String> for ShapeKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where a parameter's value comes from when the command omits it
#[derive(Debug, Clone, Copy)]
pub enum Fallback {
    Value(f64),
    /// Reuse the value already resolved for another parameter
    SameAs(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Document property the value lands in
    pub property: &'static str,
    /// Suffix of the spreadsheet variable (`Box_length`)
    pub variable: &'static str,
    /// Human description stored next to the variable
    pub description: &'static str,
    /// Dimension keys tried in order, each with a scale factor
    pub sources: &'static [(&'static str, f64)],
    pub fallback: Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SummaryStyle {
    /// `(10.0 x 20.0 x 30.0 mm)`
    Extents,
    /// `(radius 5.0 mm, height 10.0 mm)`
    Labeled,
}

#[derive(Debug)]
pub struct ShapeSpec {
    pub kind: ShapeKind,
    pub type_id: &'static str,
    pub base_name: &'static str,
    pub params: &'static [ParamSpec],
    /// Properties set to constants regardless of the command
    pub fixed: &'static [(&'static str, f64)],
    pub summary: SummaryStyle,
}

const RADIUS_SOURCES: &[(&str, f64)] = &[("radius", 1.0), ("diameter", 0.5)];
const HEIGHT_SOURCES: &[(&str, f64)] = &[("height", 1.0)];

pub static SHAPE_TABLE: [ShapeSpec; 7] = [
    ShapeSpec {
        kind: ShapeKind::Box,
        type_id: "Part::Box",
        base_name: "Box",
        params: &[
            ParamSpec {
                property: "Length",
                variable: "length",
                description: "Length",
                sources: &[("length", 1.0)],
                fallback: Fallback::Value(10.0),
            },
            ParamSpec {
                property: "Width",
                variable: "width",
                description: "Width",
                sources: &[("width", 1.0)],
                fallback: Fallback::SameAs("length"),
            },
            ParamSpec {
                property: "Height",
                variable: "height",
                description: "Height",
                sources: HEIGHT_SOURCES,
                fallback: Fallback::SameAs("length"),
            },
        ],
        fixed: &[],
        summary: SummaryStyle::Extents,
    },
    ShapeSpec {
        kind: ShapeKind::Cylinder,
        type_id: "Part::Cylinder",
        base_name: "Cylinder",
        params: &[
            ParamSpec {
                property: "Radius",
                variable: "radius",
                description: "Radius",
                sources: RADIUS_SOURCES,
                fallback: Fallback::Value(5.0),
            },
            ParamSpec {
                property: "Height",
                variable: "height",
                description: "Height",
                sources: HEIGHT_SOURCES,
                fallback: Fallback::Value(10.0),
            },
        ],
        fixed: &[],
        summary: SummaryStyle::Labeled,
    },
    ShapeSpec {
        kind: ShapeKind::Sphere,
        type_id: "Part::Sphere",
        base_name: "Sphere",
        params: &[ParamSpec {
            property: "Radius",
            variable: "radius",
            description: "Radius",
            sources: RADIUS_SOURCES,
            fallback: Fallback::Value(5.0),
        }],
        fixed: &[],
        summary: SummaryStyle::Labeled,
    },
    ShapeSpec {
        kind: ShapeKind::Cone,
        type_id: "Part::Cone",
        base_name: "Cone",
        params: &[
            ParamSpec {
                property: "Radius1",
                variable: "radius1",
                description: "Base radius",
                sources: &[("radius1", 1.0), ("radius", 1.0), ("diameter", 0.5)],
                fallback: Fallback::Value(5.0),
            },
            ParamSpec {
                property: "Radius2",
                variable: "radius2",
                description: "Top radius",
                sources: &[("radius2", 1.0), ("top_radius", 1.0)],
                fallback: Fallback::Value(0.0),
            },
            ParamSpec {
                property: "Height",
                variable: "height",
                description: "Height",
                sources: HEIGHT_SOURCES,
                fallback: Fallback::Value(10.0),
            },
        ],
        fixed: &[],
        summary: SummaryStyle::Labeled,
    },
    ShapeSpec {
        kind: ShapeKind::Torus,
        type_id: "Part::Torus",
        base_name: "Torus",
        params: &[
            ParamSpec {
                property: "Radius1",
                variable: "major_radius",
                description: "Major radius",
                sources: &[("major_radius", 1.0), ("radius1", 1.0), ("radius", 1.0), ("diameter", 0.5)],
                fallback: Fallback::Value(20.0),
            },
            ParamSpec {
                property: "Radius2",
                variable: "minor_radius",
                description: "Tube radius",
                sources: &[("minor_radius", 1.0), ("tube_radius", 1.0), ("radius2", 1.0)],
                fallback: Fallback::Value(5.0),
            },
        ],
        fixed: &[],
        summary: SummaryStyle::Labeled,
    },
    ShapeSpec {
        kind: ShapeKind::Wedge,
        type_id: "Part::Wedge",
        base_name: "Wedge",
        params: &[
            ParamSpec {
                property: "Xmax",
                variable: "length",
                description: "Length",
                sources: &[("length", 1.0)],
                fallback: Fallback::Value(10.0),
            },
            ParamSpec {
                property: "Ymax",
                variable: "width",
                description: "Width",
                sources: &[("width", 1.0)],
                fallback: Fallback::SameAs("length"),
            },
            ParamSpec {
                property: "Zmax",
                variable: "height",
                description: "Height",
                sources: HEIGHT_SOURCES,
                fallback: Fallback::SameAs("length"),
            },
        ],
        fixed: &[("Xmin", 0.0), ("Ymin", 0.0), ("Zmin", 0.0), ("X2min", 0.0), ("X2max", 0.0)],
        summary: SummaryStyle::Extents,
    },
    ShapeSpec {
        kind: ShapeKind::Hexagon,
        type_id: "Part::Prism",
        base_name: "Hexagon",
        params: &[
            ParamSpec {
                property: "Circumradius",
                variable: "circumradius",
                description: "Circumradius (half the across-corners width)",
                sources: &[("width", 0.5), ("diameter", 0.5), ("size", 0.5), ("radius", 1.0)],
                fallback: Fallback::Value(10.0),
            },
            ParamSpec {
                property: "Height",
                variable: "height",
                description: "Height",
                sources: HEIGHT_SOURCES,
                fallback: Fallback::Value(10.0),
            },
        ],
        fixed: &[("Polygon", 6.0)],
        summary: SummaryStyle::Labeled,
    },
];

#[derive(Debug, Clone)]
pub struct ResolvedParam {
    pub spec: &'static ParamSpec,
    pub value: f64,
}

impl ShapeSpec {
    /// Resolve every parameter from `dims`, applying defaults in table order
    pub fn resolve(&self, dims: &Dimensions) -> Vec<ResolvedParam> {
        let mut resolved: Vec<ResolvedParam> = Vec::with_capacity(self.params.len());
        for spec in self.params {
            let explicit = spec
                .sources
                .iter()
                .find_map(|(key, scale)| dims.get(*key).map(|v| v * scale));

            let value = explicit.unwrap_or_else(|| match spec.fallback {
                Fallback::Value(v) => v,
                Fallback::SameAs(other) => resolved
                    .iter()
                    .find(|r| r.spec.variable == other)
                    .map(|r| r.value)
                    .unwrap_or_default(),
            });
            resolved.push(ResolvedParam { spec, value });
        }
        resolved
    }

    /// Human summary, e.g. `Box Box (10.0 x 20.0 x 30.0 mm)`
    pub fn summary(&self, name: &str, params: &[ResolvedParam]) -> String {
        let detail = match self.summary {
            SummaryStyle::Extents => {
                let extents: Vec<String> = params.iter().map(|p| format!("{:.1}", p.value)).collect();
                format!("{} mm", extents.join(" x "))
            }
            SummaryStyle::Labeled => params
                .iter()
                .map(|p| format!("{} {:.1} mm", p.spec.variable.replace('_', " "), p.value))
                .collect::<Vec<_>>()
                .join(", "),
        };
        format!("{} {} ({})", self.base_name, name, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(pairs: &[(&str, f64)]) -> Dimensions {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn values(kind: ShapeKind, d: &Dimensions) -> Vec<f64> {
        kind.spec().resolve(d).iter().map(|p| p.value).collect()
    }

    #[test]
    fn test_every_kind_has_a_table_entry() {
        for kind in ShapeKind::ALL {
            assert_eq!(kind.spec().kind, kind);
        }
    }

    #[test]
    fn test_box_width_and_height_follow_length() {
        assert_eq!(values(ShapeKind::Box, &dims(&[])), vec![10.0, 10.0, 10.0]);
        assert_eq!(values(ShapeKind::Box, &dims(&[("length", 40.0)])), vec![40.0, 40.0, 40.0]);
        assert_eq!(
            values(ShapeKind::Box, &dims(&[("length", 10.0), ("width", 20.0), ("height", 30.0)])),
            vec![10.0, 20.0, 30.0]
        );
    }

    #[test]
    fn test_radius_from_diameter() {
        assert_eq!(values(ShapeKind::Cylinder, &dims(&[("diameter", 25.0), ("height", 50.0)])), vec![12.5, 50.0]);
        assert_eq!(values(ShapeKind::Sphere, &dims(&[])), vec![5.0]);
        assert_eq!(values(ShapeKind::Cone, &dims(&[("radius", 3.0)])), vec![3.0, 0.0, 10.0]);
    }

    #[test]
    fn test_hexagon_circumradius_is_half_width() {
        assert_eq!(values(ShapeKind::Hexagon, &dims(&[("width", 30.0)])), vec![15.0, 10.0]);
        assert_eq!(ShapeKind::Hexagon.spec().fixed, &[("Polygon", 6.0)]);
    }

    #[test]
    fn test_summary_styles() {
        let spec = ShapeKind::Box.spec();
        let params = spec.resolve(&dims(&[("length", 10.0), ("width", 20.0), ("height", 30.0)]));
        assert_eq!(spec.summary("Box", &params), "Box Box (10.0 x 20.0 x 30.0 mm)");

        let spec = ShapeKind::Cylinder.spec();
        let params = spec.resolve(&dims(&[]));
        assert_eq!(
            spec.summary("Cylinder001", &params),
            "Cylinder Cylinder001 (radius 5.0 mm, height 10.0 mm)"
        );
    }

    #[test]
    fn test_shape_kind_parsing() {
        assert_eq!("Cube".parse::<ShapeKind>().unwrap(), ShapeKind::Box);
        assert_eq!("pipe".parse::<ShapeKind>().unwrap(), ShapeKind::Cylinder);
        assert!("dodecahedron".parse::<ShapeKind>().is_err());

        let kind: ShapeKind = serde_json::from_str("\"ball\"").unwrap();
        assert_eq!(kind, ShapeKind::Sphere);
        assert_eq!(serde_json::to_string(&ShapeKind::Hexagon).unwrap(), "\"hexagon\"");
    }
}
