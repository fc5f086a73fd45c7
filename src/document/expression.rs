//! Arithmetic expressions used by property bindings and `=` spreadsheet cells.
//!
//! Grammar: `+ - * /`, parentheses, unary minus, numbers with an optional
//! length unit, and references. A reference is `Sheet.alias`,
//! `Object.Property`, or a bare `alias` resolved against the sheet the
//! formula lives in.

use super::{CellRef, Document, DocumentError, PropertyValue};

const MAX_DEPTH: usize = 32;

/// Evaluate `text` against `doc`. `sheet` is the spreadsheet a formula
/// belongs to, for bare alias lookups.
pub fn evaluate(doc: &Document, text: &str, sheet: Option<&str>) -> Result<f64, DocumentError> {
    evaluate_at(doc, text, sheet, 0)
}

fn evaluate_at(doc: &Document, text: &str, sheet: Option<&str>, depth: usize) -> Result<f64, DocumentError> {
    let fail = |reason: String| DocumentError::Expression {
        expression: text.to_string(),
        reason,
    };
    if depth > MAX_DEPTH {
        return Err(fail("reference cycle".into()));
    }

    let tokens = tokenize(text).map_err(fail)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        doc,
        sheet,
        depth,
    };
    let value = parser.sum().map_err(fail)?;
    if parser.pos != parser.tokens.len() {
        return Err(fail("unexpected trailing input".into()));
    }
    if !value.is_finite() {
        return Err(fail("result is not a finite number".into()));
    }
    Ok(value)
}

/// Numeric value of a cell: plain numbers (optionally with a unit) or
/// `=formula`.
pub fn cell_value(doc: &Document, sheet: &str, cell: CellRef) -> Result<f64, DocumentError> {
    cell_value_at(doc, sheet, cell, 0)
}

fn cell_value_at(doc: &Document, sheet: &str, cell: CellRef, depth: usize) -> Result<f64, DocumentError> {
    let content = doc
        .sheet(sheet)
        .ok_or_else(|| DocumentError::NotASpreadsheet(sheet.to_string()))?
        .content(cell)
        .ok_or_else(|| DocumentError::Expression {
            expression: format!("{}.{}", sheet, cell),
            reason: "cell is empty".into(),
        })?;

    match content.strip_prefix('=') {
        Some(formula) => evaluate_at(doc, formula, Some(sheet), depth + 1),
        None => evaluate_at(doc, content, Some(sheet), depth + 1),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let mut value: f64 = literal
                .parse()
                .map_err(|_| format!("bad number '{}'", literal))?;

            // A unit glued to or following a number scales it to millimeters
            let mut j = i;
            while j < chars.len() && chars[j] == ' ' {
                j += 1;
            }
            let unit_start = j;
            while j < chars.len() && chars[j].is_ascii_alphabetic() {
                j += 1;
            }
            let unit: String = chars[unit_start..j].iter().collect();
            if let Some(factor) = unit_scale(&unit) {
                value *= factor;
                i = j;
            }
            tokens.push(Token::Number(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/()".contains(c) {
            tokens.push(Token::Op(c));
            i += 1;
        } else {
            return Err(format!("unexpected character '{}'", c));
        }
    }
    Ok(tokens)
}

fn unit_scale(unit: &str) -> Option<f64> {
    match unit {
        "mm" => Some(1.0),
        "cm" => Some(10.0),
        "m" => Some(1000.0),
        "in" => Some(25.4),
        "deg" => Some(1.0),
        _ => None,
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    doc: &'a Document,
    sheet: Option<&'a str>,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn sum(&mut self) -> Result<f64, String> {
        let mut value = self.product()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.product()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn product(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '/' && rhs == 0.0 {
                return Err("division by zero".into());
            }
            value = if op == '*' { value * rhs } else { value / rhs };
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Op('-')) => Ok(-self.factor()?),
            Some(Token::Op('+')) => self.factor(),
            Some(Token::Op('(')) => {
                let value = self.sum()?;
                match self.next() {
                    Some(Token::Op(')')) => Ok(value),
                    _ => Err("missing ')'".into()),
                }
            }
            Some(Token::Ident(name)) => self.reference(&name),
            Some(Token::Op(c)) => Err(format!("unexpected '{}'", c)),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn reference(&self, name: &str) -> Result<f64, String> {
        let (owner, member) = match name.split_once('.') {
            Some((owner, member)) => (Some(owner), member),
            None => (None, name),
        };

        let sheet_name = owner.or(self.sheet).ok_or_else(|| format!("unknown name '{}'", name))?;
        if let Some(sheet) = self.doc.sheet(sheet_name) {
            let cell = sheet
                .cell_for_alias(member)
                .or_else(|| member.parse::<CellRef>().ok())
                .ok_or_else(|| format!("'{}' has no alias '{}'", sheet_name, member))?;
            return cell_value_at(self.doc, sheet_name, cell, self.depth).map_err(|e| e.to_string());
        }

        match self.doc.get_property(sheet_name, member) {
            Ok(PropertyValue::Number(value)) => Ok(value),
            Ok(_) => Err(format!("'{}' is not numeric", name)),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SHEET_TYPE;

    fn doc_with_sheet() -> Document {
        let mut doc = Document::new("Test");
        doc.add_object(SHEET_TYPE, "Params").unwrap();
        let sheet = doc.sheet_mut("Params").unwrap();
        sheet.set("B2", "10").unwrap();
        sheet.set_alias("B2", "width").unwrap();
        sheet.set("B3", "=width * 2 + 1").unwrap();
        sheet.set_alias("B3", "double_width").unwrap();
        doc
    }

    #[test]
    fn test_arithmetic_precedence() {
        let doc = Document::new("Test");
        assert_eq!(evaluate(&doc, "1 + 2 * 3", None).unwrap(), 7.0);
        assert_eq!(evaluate(&doc, "(1 + 2) * 3", None).unwrap(), 9.0);
        assert_eq!(evaluate(&doc, "-4 / 2", None).unwrap(), -2.0);
        assert_eq!(evaluate(&doc, "2 cm + 5mm", None).unwrap(), 25.0);
    }

    #[test]
    fn test_sheet_alias_and_formula_cells() {
        let doc = doc_with_sheet();
        assert_eq!(evaluate(&doc, "Params.width", None).unwrap(), 10.0);
        assert_eq!(evaluate(&doc, "Params.double_width", None).unwrap(), 21.0);
        assert_eq!(evaluate(&doc, "Params.B2 / 4", None).unwrap(), 2.5);
    }

    #[test]
    fn test_object_property_reference() {
        let mut doc = Document::new("Test");
        doc.add_object("Part::Box", "Box").unwrap();
        assert_eq!(evaluate(&doc, "Box.Height * 3", None).unwrap(), 30.0);
    }

    #[test]
    fn test_errors() {
        let mut doc = doc_with_sheet();
        assert!(evaluate(&doc, "1 / 0", None).is_err());
        assert!(evaluate(&doc, "Params.missing", None).is_err());
        assert!(evaluate(&doc, "width", None).is_err());
        assert!(evaluate(&doc, "1 +", None).is_err());
        assert!(evaluate(&doc, "2 $ 3", None).is_err());

        let sheet = doc.sheet_mut("Params").unwrap();
        sheet.set("B4", "=loop_b").unwrap();
        sheet.set_alias("B4", "loop_a").unwrap();
        sheet.set("B5", "=loop_a").unwrap();
        sheet.set_alias("B5", "loop_b").unwrap();
        let err = evaluate(&doc, "Params.loop_a", None).unwrap_err();
        assert!(err.to_string().contains("reference cycle"));
    }
}
