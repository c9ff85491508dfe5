//! Cells and the shared stores a sheet evaluates against.
//!
//! A [`Grid`] holds what the user entered, a [`ValueCache`] what the last
//! pass computed. Both are shared with the Rhai builtins.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::cell_ref::CellRef;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CellType {
    Empty,
    Text(String),
    Number(f64),
    /// Formula source without the leading `=`.
    Script(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cell {
    pub contents: CellType,
    /// Formatted result of the latest pass.
    #[serde(skip)]
    pub cached_value: Option<String>,
}

impl Cell {
    fn with(contents: CellType) -> Cell {
        Cell {
            contents,
            cached_value: None,
        }
    }

    pub fn empty() -> Cell {
        Cell::with(CellType::Empty)
    }

    pub fn text(text: &str) -> Cell {
        Cell::with(CellType::Text(text.to_string()))
    }

    pub fn number(n: f64) -> Cell {
        Cell::with(CellType::Number(n))
    }

    pub fn formula(source: &str) -> Cell {
        Cell::with(CellType::Script(source.to_string()))
    }

    /// Interpret loosely typed input: `=` starts a formula, quotes force
    /// text, anything numeric is a number and the rest is text.
    pub fn parse(input: &str) -> Cell {
        let input = input.trim();
        if input.is_empty() {
            Cell::empty()
        } else if let Some(source) = input.strip_prefix('=') {
            Cell::formula(source)
        } else if let Some(quoted) = input
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            Cell::text(quoted)
        } else if let Ok(n) = input.parse::<f64>() {
            Cell::number(n)
        } else {
            Cell::text(input)
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self.contents, CellType::Script(_))
    }
}

/// Cell inputs keyed by position.
pub type Grid = Arc<DashMap<CellRef, Cell>>;

/// Values computed by the most recent evaluation of each formula cell.
///
/// Formula reads (`A1`, `@A1`) see these values, so a self-reference such as
/// `A1 + 1` observes the value from the previous evaluation.
pub type ValueCache = Arc<DashMap<CellRef, rhai::Dynamic>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert!(matches!(Cell::parse("  ").contents, CellType::Empty));
        assert!(matches!(Cell::parse("=A1+1").contents, CellType::Script(ref s) if s == "A1+1"));
        assert!(matches!(Cell::parse("\"7\"").contents, CellType::Text(ref s) if s == "7"));
        assert!(matches!(Cell::parse("7.5").contents, CellType::Number(n) if n == 7.5));
        assert!(matches!(Cell::parse("hello").contents, CellType::Text(_)));
    }

    #[test]
    fn test_lone_quote_is_text() {
        assert!(matches!(Cell::parse("\"").contents, CellType::Text(ref s) if s == "\""));
    }
}
