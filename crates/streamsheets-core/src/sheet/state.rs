use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use streamsheets_engine::engine::{
    AST, Cell, CellRef, CellType, Dynamic, Engine, ErrorCode, Grid, SheetContext, ValueCache,
    create_engine_with_functions, format_dynamic,
};

use crate::error::{Result, StreamsheetError};
use crate::storage::parse_grd_content;

/// Evaluations allowed in one pass before it is cut off with `#LIMIT`.
pub const DEFAULT_MAX_EVALUATIONS: usize = 10_000;

/// A grid of cells plus the evaluator bound to it.
pub struct Sheet {
    pub(super) grid: Grid,
    pub(super) value_cache: ValueCache,
    pub(super) context: SheetContext,
    pub(super) engine: Engine,
    pub(super) custom_ast: Option<AST>,
    /// Compiled formulas, keyed by cell. Dropped whenever the cell changes.
    pub(super) compiled: HashMap<CellRef, std::result::Result<AST, ErrorCode>>,
    pub(super) condition_column: Option<usize>,
    pub(super) max_evaluations: usize,
    /// Call site of a blocking `EXECUTE` that interrupted the last pass.
    pub(super) resume_at: Option<CellRef>,
}

impl Sheet {
    /// Create an empty sheet, compiling `custom_functions` into its evaluator.
    pub fn new(custom_functions: Option<&str>) -> Result<Sheet> {
        let grid: Grid = Arc::new(DashMap::new());
        let value_cache = ValueCache::default();
        let context = SheetContext::new();
        let (engine, custom_ast, compile_error) = create_engine_with_functions(
            grid.clone(),
            value_cache.clone(),
            context.clone(),
            custom_functions,
        );
        if let Some(err) = compile_error {
            return Err(StreamsheetError::RhaiCompile(err));
        }

        Ok(Sheet {
            grid,
            value_cache,
            context,
            engine,
            custom_ast,
            compiled: HashMap::new(),
            condition_column: None,
            max_evaluations: DEFAULT_MAX_EVALUATIONS,
            resume_at: None,
        })
    }

    /// Load cells written in `.grd` line format (`A1: =A1 + 1`).
    pub fn load_cells(&mut self, content: &str) -> Result<()> {
        let parsed = parse_grd_content(content)?;
        for (cell_ref, cell) in parsed.iter().map(|e| (e.key().clone(), e.value().clone())) {
            self.set_cell(cell_ref, cell);
        }
        Ok(())
    }

    pub fn set_cell(&mut self, cell_ref: CellRef, cell: Cell) {
        self.compiled.remove(&cell_ref);
        self.value_cache.remove(&cell_ref);
        if matches!(cell.contents, CellType::Empty) {
            self.grid.remove(&cell_ref);
        } else {
            self.grid.insert(cell_ref, cell);
        }
    }

    /// Set a cell from user input (`=formula`, `"text"`, number).
    pub fn set_cell_input(&mut self, cell_ref: CellRef, input: &str) {
        self.set_cell(cell_ref, Cell::parse(input));
    }

    pub fn cell(&self, cell_ref: &CellRef) -> Option<Cell> {
        self.grid.get(cell_ref).map(|entry| entry.value().clone())
    }

    /// Current value of a cell: the last computed value for formulas, the
    /// content for constants.
    pub fn value(&self, cell_ref: &CellRef) -> Option<Dynamic> {
        if let Some(value) = self.value_cache.get(cell_ref) {
            return Some(value.clone());
        }
        let contents = self.grid.get(cell_ref).map(|entry| entry.contents.clone())?;
        match contents {
            CellType::Number(n) => Some(Dynamic::from(n)),
            CellType::Text(s) => Some(Dynamic::from(s)),
            CellType::Empty | CellType::Script(_) => None,
        }
    }

    pub fn display_value(&self, cell_ref: &CellRef) -> String {
        self.value(cell_ref)
            .map(|v| format_dynamic(&v))
            .unwrap_or_default()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn context(&self) -> &SheetContext {
        &self.context
    }

    /// Defined cells in row-major order.
    pub fn cell_refs(&self) -> Vec<CellRef> {
        let mut refs: Vec<CellRef> = self.grid.iter().map(|e| e.key().clone()).collect();
        refs.sort();
        refs
    }

    /// Forget all computed values; formulas start from scratch on the next pass.
    pub fn clear_values(&mut self) {
        self.value_cache.clear();
        for mut entry in self.grid.iter_mut() {
            entry.cached_value = None;
        }
        self.resume_at = None;
    }

    pub fn condition_column(&self) -> Option<usize> {
        self.condition_column
    }

    /// Column whose falsy value skips the rest of its row.
    pub fn set_condition_column(&mut self, column: Option<usize>) {
        self.condition_column = column;
    }

    pub fn max_evaluations(&self) -> usize {
        self.max_evaluations
    }

    pub fn set_max_evaluations(&mut self, max: usize) {
        self.max_evaluations = max.max(1);
    }

    /// True while the sheet waits to resume an interrupted pass.
    pub fn is_interrupted(&self) -> bool {
        self.resume_at.is_some()
    }

    pub fn resume_at(&self) -> Option<&CellRef> {
        self.resume_at.as_ref()
    }

    /// Drop an interrupted pass; the next pass starts from the top.
    pub fn clear_interruption(&mut self) {
        self.resume_at = None;
    }
}
