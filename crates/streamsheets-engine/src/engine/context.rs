//! Per-sheet evaluation context shared with the formula builtins.
//!
//! Builtins cannot reach the scheduler directly. Read-only pass data
//! (current message, loop position, step counters, cycle) is published here
//! before each pass, and control-flow builtins (`CONTINUE`, `RETURN`, `STOP`,
//! `EXECUTE`, `OUTBOX`) record [`Directive`]s that the stepping loop drains
//! after every cell.

use rhai::Dynamic;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use super::cell_ref::CellRef;

/// A call into another streamsheet requested by `EXECUTE(...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecuteRequest {
    pub sheet: String,
    pub repetitions: u32,
    pub args: Option<Value>,
    pub asynchronous: bool,
}

/// Side effects recorded by builtins while a cell is evaluated.
#[derive(Clone, Debug)]
pub enum Directive {
    Continue(CellRef),
    Return(Dynamic),
    Stop,
    Execute(ExecuteRequest),
    Outbox(Value),
}

/// Read-only data visible to formulas during one pass.
#[derive(Clone, Debug, Default)]
pub struct PassInfo {
    pub message: Option<Value>,
    pub loop_element: Option<Value>,
    pub loop_index: usize,
    pub steps: u64,
    pub repeatsteps: u64,
    pub cycle: u64,
}

#[derive(Debug, Default)]
pub struct ContextState {
    pub info: PassInfo,
    pub directives: Vec<Directive>,
}

/// Cheaply cloneable handle; every clone sees the same state.
#[derive(Clone, Debug, Default)]
pub struct SheetContext {
    state: Arc<Mutex<ContextState>>,
}

impl SheetContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        // A panicking builtin must not wedge the sheet.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Publish the data for the next pass and discard stale directives.
    pub fn begin_pass(&self, info: PassInfo) {
        let mut state = self.lock();
        state.info = info;
        state.directives.clear();
    }

    pub fn info(&self) -> PassInfo {
        self.lock().info.clone()
    }

    pub fn push(&self, directive: Directive) {
        self.lock().directives.push(directive);
    }

    pub fn take_directives(&self) -> Vec<Directive> {
        std::mem::take(&mut self.lock().directives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_directives() {
        let ctx = SheetContext::new();
        let other = ctx.clone();
        other.push(Directive::Stop);
        assert_eq!(ctx.take_directives().len(), 1);
        assert!(ctx.take_directives().is_empty());
    }

    #[test]
    fn test_begin_pass_clears_leftovers() {
        let ctx = SheetContext::new();
        ctx.push(Directive::Stop);
        ctx.begin_pass(PassInfo {
            steps: 4,
            ..PassInfo::default()
        });
        assert!(ctx.take_directives().is_empty());
        assert_eq!(ctx.info().steps, 4);
    }
}
