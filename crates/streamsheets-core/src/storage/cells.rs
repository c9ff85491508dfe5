//! Cell lines in `.grd` format (`A1: =A1 + 1`), as embedded in machine files.

use crate::error::{Result, StreamsheetError};
use dashmap::DashMap;
use std::sync::Arc;
use streamsheets_engine::engine::{Cell, CellRef, CellType, Grid};

/// Parse `.grd` cell lines into a Grid
pub fn parse_grd_content(content: &str) -> Result<Grid> {
    let grid: Grid = Arc::new(DashMap::new());

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((cell_ref_str, value_str)) = line.split_once(':') else {
            return Err(StreamsheetError::Parse {
                line: line_num + 1,
                message: "Expected 'CELLREF: VALUE' format".to_string(),
            });
        };

        let cell_ref_str = cell_ref_str.trim();
        let cell_ref = CellRef::from_str(cell_ref_str).ok_or_else(|| StreamsheetError::Parse {
            line: line_num + 1,
            message: format!("Invalid cell reference: {}", cell_ref_str),
        })?;

        let cell = parse_cell_value(value_str, line_num + 1)?;
        grid.insert(cell_ref, cell);
    }

    Ok(grid)
}

fn parse_cell_value(value: &str, line_num: usize) -> Result<Cell> {
    let value = value.trim();

    if value.is_empty() {
        return Ok(Cell::empty());
    }

    if let Some(formula) = value.strip_prefix('=') {
        return Ok(Cell::formula(formula.trim()));
    }

    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let text = unescape_grd_text(&value[1..value.len() - 1]);
        return Ok(Cell::text(&text));
    }

    if let Ok(n) = value.parse::<f64>() {
        return Ok(Cell::number(n));
    }

    Err(StreamsheetError::Parse {
        line: line_num,
        message: format!("Invalid value: {}. Use quotes for text.", value),
    })
}

fn unescape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn escape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(ch),
        }
    }
    out
}

/// Write the cells of a grid back to `.grd` lines, row-major.
pub fn write_grd_content(grid: &Grid) -> String {
    let mut cells: Vec<_> = grid
        .iter()
        .map(|e| (e.key().clone(), e.value().contents.clone()))
        .collect();
    cells.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    for (cell_ref, contents) in cells {
        let value_str = match contents {
            CellType::Empty => continue,
            CellType::Number(n) => n.to_string(),
            CellType::Text(s) => format!("\"{}\"", escape_grd_text(&s)),
            CellType::Script(s) => format!("={}", s),
        };
        out.push_str(&format!("{}: {}\n", cell_ref, value_str));
    }
    out
}
