use regex::Regex;

use crate::command::Dimensions;
use crate::shapes::ShapeKind;

/// Millimeters per unit; unknown or missing units count as millimeters.
pub fn unit_factor(unit: &str) -> f64 {
    match unit {
        "mm" => 1.0,
        "cm" => 10.0,
        "dm" => 100.0,
        "m" => 1000.0,
        "in" | "\"" => 25.4,
        "ft" | "'" => 304.8,
        _ => 1.0,
    }
}

const NUMBER: &str = r"(\d+(?:\.\d+)?)";
const UNIT: &str = r#"([a-z"']*)"#;
const NAMED_FIELDS: [&str; 5] = ["diameter", "radius", "height", "length", "width"];

/// Regex-based shape and dimension detection for free-text prompts
pub struct DimensionExtractor {
    shape_patterns: Vec<(ShapeKind, Regex)>,
    extents: Regex,
    named: Vec<(&'static str, Regex)>,
}

impl Default for DimensionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DimensionExtractor {
    pub fn new() -> Self {
        let shape_patterns = vec![
            (ShapeKind::Box, Regex::new(r"\b(box|cube|rectangular|cuboid)\b").unwrap()),
            (ShapeKind::Cylinder, Regex::new(r"\b(cylinder|tube|pipe)\b").unwrap()),
            (ShapeKind::Sphere, Regex::new(r"\b(sphere|ball)\b").unwrap()),
            (ShapeKind::Cone, Regex::new(r"\bcone\b").unwrap()),
        ];

        let extents = Regex::new(&format!(
            r"{n}\s*[x×*]\s*{n}\s*[x×*]\s*{n}\s*{u}",
            n = NUMBER,
            u = UNIT
        ))
        .unwrap();

        let named = NAMED_FIELDS
            .iter()
            .map(|field| {
                let pattern = format!(r"\b{}\s*[:=]?\s*{}\s*{}", field, NUMBER, UNIT);
                (*field, Regex::new(&pattern).unwrap())
            })
            .collect();

        Self {
            shape_patterns,
            extents,
            named,
        }
    }

    /// First shape keyword found, checked in fixed order box, cylinder, sphere, cone
    pub fn detect_shape(&self, text: &str) -> Option<ShapeKind> {
        let text = text.to_lowercase();
        self.shape_patterns
            .iter()
            .find(|(_, re)| re.is_match(&text))
            .map(|(kind, _)| *kind)
    }

    /// Dimensions in millimeters; empty when the text names none.
    ///
    /// An `NxNxN` triple fills length, width and height; named fields
    /// (`diameter 25`, `height 5 cm`) are applied afterwards and win.
    pub fn extract_dimensions(&self, text: &str) -> Dimensions {
        let text = text.to_lowercase();
        let mut dims = Dimensions::new();

        if let Some(caps) = self.extents.captures(&text) {
            let factor = unit_factor(caps.get(4).map_or("", |m| m.as_str()));
            for (i, field) in ["length", "width", "height"].iter().enumerate() {
                if let Ok(value) = caps[i + 1].parse::<f64>() {
                    dims.insert(field.to_string(), value * factor);
                }
            }
        }

        for (field, re) in &self.named {
            if let Some(caps) = re.captures(&text) {
                let factor = unit_factor(caps.get(2).map_or("", |m| m.as_str()));
                if let Ok(value) = caps[1].parse::<f64>() {
                    dims.insert(field.to_string(), value * factor);
                }
            }
        }

        dims
    }

    pub fn parse(&self, text: &str) -> (Option<ShapeKind>, Dimensions) {
        (self.detect_shape(text), self.extract_dimensions(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(dims: &Dimensions, key: &str) -> f64 {
        *dims.get(key).unwrap()
    }

    #[test]
    fn test_extents_with_centimeters() {
        let extractor = DimensionExtractor::new();
        let (shape, dims) = extractor.parse("create a box 8x8x8 cm");

        assert_eq!(shape, Some(ShapeKind::Box));
        assert_eq!(get(&dims, "length"), 80.0);
        assert_eq!(get(&dims, "width"), 80.0);
        assert_eq!(get(&dims, "height"), 80.0);
    }

    #[test]
    fn test_named_fields() {
        let extractor = DimensionExtractor::new();
        let (shape, dims) = extractor.parse("make a cylinder height 50 diameter 25");

        assert_eq!(shape, Some(ShapeKind::Cylinder));
        assert_eq!(get(&dims, "height"), 50.0);
        assert_eq!(get(&dims, "diameter"), 25.0);
        assert!(!dims.contains_key("radius"));
    }

    #[test]
    fn test_units() {
        let extractor = DimensionExtractor::new();

        let dims = extractor.extract_dimensions("sphere radius 1.5 in");
        assert!((get(&dims, "radius") - 38.1).abs() < 1e-9);

        let dims = extractor.extract_dimensions("Tube Length 2 M");
        assert_eq!(get(&dims, "length"), 2000.0);

        let dims = extractor.extract_dimensions("box 1x2x3\"");
        assert!((get(&dims, "height") - 76.2).abs() < 1e-9);

        let dims = extractor.extract_dimensions("box 10x20x30 furlongs");
        assert_eq!(get(&dims, "length"), 10.0);
    }

    #[test]
    fn test_named_field_overrides_extents() {
        let extractor = DimensionExtractor::new();
        let dims = extractor.extract_dimensions("box 10x20x30 mm with height 5 cm");

        assert_eq!(get(&dims, "length"), 10.0);
        assert_eq!(get(&dims, "width"), 20.0);
        assert_eq!(get(&dims, "height"), 50.0);
    }

    #[test]
    fn test_no_dimensions_gives_empty_map() {
        let extractor = DimensionExtractor::new();
        assert!(extractor.extract_dimensions("make me a cube").is_empty());
    }

    #[test]
    fn test_shape_order_and_word_boundaries() {
        let extractor = DimensionExtractor::new();

        assert_eq!(extractor.detect_shape("a BALL on a cube"), Some(ShapeKind::Box));
        assert_eq!(extractor.detect_shape("traffic cone"), Some(ShapeKind::Cone));
        assert_eq!(extractor.detect_shape("boxer shorts"), None);
        assert_eq!(extractor.detect_shape("nothing here"), None);
    }
}
