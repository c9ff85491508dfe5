//! Formula preprocessing.
//!
//! Before formulas can be evaluated by Rhai, cell references like `A1` must
//! be transformed into function calls. This module handles:
//!
//! - **Cell reads**: `A1` → `CELL(0, 0)` and `@A1` → `VALUE(0, 0)`
//! - **Range functions**: `SUM(A1:B5)` → `SUM_RANGE(0, 0, 1, 4)` (col/row)
//! - **Reference functions**: `CONTINUE(B3)` → `CONTINUE_AT(1, 2)`, so the
//!   jump target is passed as an address rather than read as a value
//! - **Position**: `ROW()` / `COL()` → the 1-based position of the cell

use regex::Regex;
use std::sync::OnceLock;

use super::cell_ref::CellRef;

fn cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z]+)([0-9]+)\b").expect("cell regex must compile"))
}

fn value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z]+)([0-9]+)\b").expect("value regex must compile"))
}

fn row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bROW\(\s*\)").expect("ROW regex must compile"))
}

fn col_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bCOL\(\s*\)").expect("COL regex must compile"))
}

pub fn preprocess_script(script: &str) -> String {
    preprocess_script_with_context(script, None)
}

/// Preprocess a formula with the position of the cell that owns it.
/// When context is provided, ROW() and COL() are replaced with 1-based row/col values.
// NOTE: builtin coordinate order is col/row.
pub fn preprocess_script_with_context(script: &str, context: Option<&CellRef>) -> String {
    let script = if let Some(cell_ref) = context {
        let script = row_re()
            .replace_all(script, (cell_ref.row + 1).to_string())
            .to_string();
        col_re()
            .replace_all(&script, (cell_ref.col + 1).to_string())
            .to_string()
    } else {
        script.to_string()
    };

    let with_ranges = crate::builtins::range_fn_re()
        .replace_all(&script, |caps: &regex::Captures| {
            let Some(rhai_name) = crate::builtins::range_rhai_name(&caps[1]) else {
                return caps[0].to_string();
            };
            match (CellRef::from_str(&caps[2]), CellRef::from_str(&caps[3])) {
                (Some(start), Some(end)) => format!(
                    "{}({}, {}, {}, {})",
                    rhai_name, start.col, start.row, end.col, end.row
                ),
                _ => caps[0].to_string(),
            }
        })
        .to_string();

    let with_targets = crate::builtins::ref_fn_re()
        .replace_all(&with_ranges, |caps: &regex::Captures| {
            let Some(rhai_name) = crate::builtins::ref_rhai_name(&caps[1]) else {
                return caps[0].to_string();
            };
            match CellRef::from_str(&caps[2]) {
                Some(target) => format!("{}({}, {})", rhai_name, target.col, target.row),
                None => caps[0].to_string(),
            }
        })
        .to_string();

    map_outside_strings(&with_targets, replace_cell_refs)
}

fn replace_cell_refs(segment: &str) -> String {
    let segment = value_re()
        .replace_all(segment, |caps: &regex::Captures| {
            match CellRef::from_str(&format!("{}{}", &caps[1], &caps[2])) {
                Some(cr) => format!("VALUE({}, {})", cr.col, cr.row),
                None => caps[0].to_string(),
            }
        })
        .to_string();

    cell_re()
        .replace_all(&segment, |caps: &regex::Captures| {
            match CellRef::from_str(&format!("{}{}", &caps[1], &caps[2])) {
                Some(cr) => format!("CELL({}, {})", cr.col, cr.row),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

/// Apply `f` to every segment of `script` that is not inside a string literal.
fn map_outside_strings(script: &str, f: impl Fn(&str) -> String) -> String {
    let bytes = script.as_bytes();
    let mut out = String::with_capacity(script.len());
    let mut seg_start = 0;
    let mut in_string = false;
    let mut backslashes = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if b == b'\\' {
                backslashes += 1;
                continue;
            }
            if b == b'"' && backslashes % 2 == 0 {
                out.push_str(&script[seg_start..=i]);
                in_string = false;
                seg_start = i + 1;
            }
            backslashes = 0;
        } else if b == b'"' {
            out.push_str(&f(&script[seg_start..i]));
            in_string = true;
            seg_start = i;
            backslashes = 0;
        }
    }

    if seg_start < script.len() {
        if in_string {
            out.push_str(&script[seg_start..]);
        } else {
            out.push_str(&f(&script[seg_start..]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_cell_refs() {
        assert_eq!(preprocess_script("A1"), "CELL(0, 0)");
        assert_eq!(preprocess_script("A1 + B2"), "CELL(0, 0) + CELL(1, 1)");
        assert_eq!(preprocess_script("@A1 + B1"), "VALUE(0, 0) + CELL(1, 0)");
    }

    #[test]
    fn test_preprocess_ignores_string_literals() {
        assert_eq!(
            preprocess_script("EXECUTE(\"S2\", A1)"),
            "EXECUTE(\"S2\", CELL(0, 0))"
        );
        assert_eq!(preprocess_script("\"a \\\" B1\" + C1"), "\"a \\\" B1\" + CELL(2, 0)");
    }

    #[test]
    fn test_preprocess_range_functions() {
        assert_eq!(preprocess_script("SUM(A1:B5)"), "SUM_RANGE(0, 0, 1, 4)");
        assert_eq!(
            preprocess_script("SUM(A1:A3) + B1"),
            "SUM_RANGE(0, 0, 0, 2) + CELL(1, 0)"
        );
    }

    #[test]
    fn test_preprocess_continue_target_is_an_address() {
        assert_eq!(preprocess_script("CONTINUE(B3)"), "CONTINUE_AT(1, 2)");
        assert_eq!(
            preprocess_script("if A1 > 2.0 { CONTINUE( C10 ) }"),
            "if CELL(0, 0) > 2.0 { CONTINUE_AT(2, 9) }"
        );
        // String form is resolved at runtime.
        assert_eq!(preprocess_script("CONTINUE(\"B3\")"), "CONTINUE(\"B3\")");
    }

    #[test]
    fn test_preprocess_row_col_context() {
        let at = CellRef::new(2, 4);
        assert_eq!(preprocess_script_with_context("ROW() + COL()", Some(&at)), "5 + 3");
    }
}
