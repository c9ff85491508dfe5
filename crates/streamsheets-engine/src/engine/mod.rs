//! Formula engine API.
//!
//! This module provides the evaluation side of a streamsheet:
//!
//! - [`Cell`], [`CellType`], [`Grid`], [`ValueCache`] - Cell storage
//! - [`CellRef`] - Cell reference parsing (A1 notation ↔ row/col indices)
//! - [`preprocess_script`] - Transform formulas for Rhai evaluation
//! - [`create_engine`] - Create a Rhai engine with built-in functions
//! - [`SheetContext`], [`Directive`] - The side channel between builtins and the stepping loop
//! - [`ErrorCode`] - Tagged error values stored in cells
//! - [`format_dynamic`] - Format values for display

mod cell;
mod cell_ref;
mod context;
mod error_code;
mod eval;
mod format;
mod json;
mod preprocess;

pub use cell::{Cell, CellType, Grid, ValueCache};
pub use cell_ref::CellRef;
pub use context::{ContextState, Directive, ExecuteRequest, PassInfo, SheetContext};
pub use error_code::ErrorCode;
pub use eval::{
    MAX_OPERATIONS, compile_formula, create_engine, create_engine_with_functions, eval_compiled,
};
pub use format::{format_dynamic, format_number, is_truthy};
pub use json::{dynamic_to_json, json_to_dynamic, resolve_path};
pub use preprocess::{preprocess_script, preprocess_script_with_context};

pub use rhai::{AST, Dynamic, Engine};
