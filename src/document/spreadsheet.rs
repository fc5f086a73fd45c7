use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::DocumentError;

/// Cell address such as `B12`; orders row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub column: u32,
}

impl CellRef {
    pub fn new(column: u32, row: u32) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut letters = Vec::new();
        let mut n = self.column;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        let column: String = letters.into_iter().rev().collect();
        write!(f, "{}{}", column, self.row)
    }
}

impl FromStr for CellRef {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DocumentError::InvalidCell(s.to_string());
        let s = s.trim();
        let split = s.find(|c: char| c.is_ascii_digit()).ok_or_else(invalid)?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }

        let column = letters
            .to_ascii_uppercase()
            .bytes()
            .fold(0u32, |acc, b| acc * 26 + (b - b'A' + 1) as u32);
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Ok(Self { row, column })
    }
}

impl Serialize for CellRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CellRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Cell grid with aliases, the backing store of parametric variables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spreadsheet {
    cells: BTreeMap<CellRef, String>,
    aliases: BTreeMap<CellRef, String>,
}

impl Spreadsheet {
    pub fn set(&mut self, cell: &str, content: &str) -> Result<(), DocumentError> {
        let cell: CellRef = cell.parse()?;
        if content.is_empty() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, content.to_string());
        }
        Ok(())
    }

    pub fn get(&self, cell: &str) -> Result<Option<&str>, DocumentError> {
        let cell: CellRef = cell.parse()?;
        Ok(self.cells.get(&cell).map(String::as_str))
    }

    /// Name a cell so expressions can refer to it as `Sheet.alias`
    pub fn set_alias(&mut self, cell: &str, alias: &str) -> Result<(), DocumentError> {
        let cell: CellRef = cell.parse()?;
        let invalid = |reason: &str| DocumentError::InvalidAlias {
            alias: alias.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = alias.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return Err(invalid("must start with a letter or underscore")),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("only letters, digits and underscores are allowed"));
        }
        if alias.parse::<CellRef>().is_ok() {
            return Err(invalid("looks like a cell address"));
        }
        if let Some(owner) = self.cell_for_alias(alias) {
            if owner != cell {
                return Err(invalid(&format!("already used by {}", owner)));
            }
        }

        self.aliases.insert(cell, alias.to_string());
        Ok(())
    }

    pub fn get_alias(&self, cell: &str) -> Result<Option<&str>, DocumentError> {
        let cell: CellRef = cell.parse()?;
        Ok(self.aliases.get(&cell).map(String::as_str))
    }

    pub fn cell_for_alias(&self, alias: &str) -> Option<CellRef> {
        self.aliases
            .iter()
            .find(|(_, a)| a.as_str() == alias)
            .map(|(cell, _)| *cell)
    }

    pub fn content(&self, cell: CellRef) -> Option<&str> {
        self.cells.get(&cell).map(String::as_str)
    }

    /// Non-empty cells in row-major order
    pub fn used_cells(&self) -> Vec<String> {
        self.cells.keys().map(CellRef::to_string).collect()
    }

    /// Highest row holding any content, 0 when empty
    pub fn last_row(&self) -> u32 {
        self.cells.keys().map(|c| c.row).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_ref_parse_and_display() {
        let cell: CellRef = "B12".parse().unwrap();
        assert_eq!(cell, CellRef::new(2, 12));
        assert_eq!(cell.to_string(), "B12");

        let wide: CellRef = "aa3".parse().unwrap();
        assert_eq!(wide.column, 27);
        assert_eq!(wide.to_string(), "AA3");

        assert!("12".parse::<CellRef>().is_err());
        assert!("A0".parse::<CellRef>().is_err());
        assert!("A-1".parse::<CellRef>().is_err());
    }

    #[test]
    fn test_used_cells_are_row_major() {
        let mut sheet = Spreadsheet::default();
        sheet.set("B2", "10").unwrap();
        sheet.set("A1", "Variable").unwrap();
        sheet.set("A2", "Box_length").unwrap();
        sheet.set("C1", "Unit").unwrap();

        assert_eq!(sheet.used_cells(), vec!["A1", "C1", "A2", "B2"]);
        assert_eq!(sheet.last_row(), 2);

        sheet.set("A2", "").unwrap();
        assert_eq!(sheet.get("A2").unwrap(), None);
    }

    #[test]
    fn test_aliases_are_unique_identifiers() {
        let mut sheet = Spreadsheet::default();
        sheet.set_alias("B2", "Box_length").unwrap();

        assert_eq!(sheet.get_alias("B2").unwrap(), Some("Box_length"));
        assert_eq!(sheet.cell_for_alias("Box_length"), Some(CellRef::new(2, 2)));
        assert!(sheet.set_alias("B3", "Box_length").is_err());
        assert!(sheet.set_alias("B3", "2fast").is_err());
        assert!(sheet.set_alias("B3", "C4").is_err());
        assert!(sheet.set_alias("B3", "with space").is_err());
    }

    #[test]
    fn test_serializes_cells_by_address() {
        let mut sheet = Spreadsheet::default();
        sheet.set("B2", "10").unwrap();
        sheet.set_alias("B2", "size").unwrap();

        let json = serde_json::to_string(&sheet).unwrap();
        assert!(json.contains("\"B2\":\"10\""));

        let back: Spreadsheet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cell_for_alias("size"), Some(CellRef::new(2, 2)));
    }
}
