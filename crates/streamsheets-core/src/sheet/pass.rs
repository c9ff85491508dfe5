//! One calculation pass over a sheet.
//!
//! Cells are evaluated in row-major order (the condition column first within
//! its row). After every cell the directives recorded by the builtins are
//! applied: `CONTINUE` moves the calculation pointer, `RETURN` and `STOP`
//! end the pass, `EXECUTE` and `OUTBOX` are handed to a [`DirectiveHandler`].

use serde_json::Value;
use tracing::{trace, warn};

use streamsheets_engine::engine::{
    CellRef, CellType, Directive, Dynamic, ErrorCode, ExecuteRequest, PassInfo, compile_formula,
    eval_compiled, format_dynamic, is_truthy,
};

use super::state::Sheet;

/// Result of asking another streamsheet to execute.
#[derive(Clone, Debug)]
pub enum CallStatus {
    /// The call completed synchronously with this value.
    Done(Dynamic),
    /// The callee answers later. A blocking wait interrupts the pass.
    Waiting { blocking: bool },
    Failed(ErrorCode),
}

/// Receives the directives that leave the sheet.
pub trait DirectiveHandler {
    fn on_execute(&mut self, at: &CellRef, request: ExecuteRequest) -> CallStatus;
    fn on_outbox(&mut self, payload: Value);
}

#[derive(Clone, Debug)]
pub enum PassEnd {
    /// Ran past the last defined cell (or a `CONTINUE` beyond it).
    Finished,
    Returned(Dynamic),
    Stopped,
    /// A blocking `EXECUTE` is waiting; the next pass resumes at its cell.
    Interrupted,
    /// The evaluation budget ran out.
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct PassOutcome {
    pub end: PassEnd,
    /// A `CONTINUE` jumped back to or before the current cell.
    pub backward_jump: bool,
    pub evaluated: usize,
}

impl PassOutcome {
    /// Whether the pass completed its message position.
    pub fn completed(&self) -> bool {
        matches!(self.end, PassEnd::Finished) && !self.backward_jump
    }

    pub fn returned(&self) -> Option<&Dynamic> {
        match &self.end {
            PassEnd::Returned(value) => Some(value),
            _ => None,
        }
    }
}

impl Sheet {
    fn order_key(&self, cell_ref: &CellRef) -> (usize, usize) {
        let col_key = match self.condition_column {
            Some(cc) if cc == cell_ref.col => 0,
            _ => cell_ref.col + 1,
        };
        (cell_ref.row, col_key)
    }

    /// Defined cells in calculation order.
    pub fn calculation_order(&self) -> Vec<CellRef> {
        let mut order = self.cell_refs();
        order.sort_by_key(|c| self.order_key(c));
        order
    }

    fn position_of(&self, order: &[CellRef], target: &CellRef) -> usize {
        let key = self.order_key(target);
        order.partition_point(|c| self.order_key(c) < key)
    }

    /// Evaluate one cell. Constants are their own value.
    fn evaluate(&mut self, at: &CellRef) -> Dynamic {
        let contents = self.grid.get(at).map(|entry| entry.contents.clone());
        match contents {
            Some(CellType::Number(n)) => Dynamic::from(n),
            Some(CellType::Text(s)) => Dynamic::from(s),
            Some(CellType::Script(formula)) => {
                let compiled = self.compiled.entry(at.clone()).or_insert_with(|| {
                    compile_formula(&self.engine, &formula, at, self.custom_ast.as_ref())
                });
                match compiled {
                    Ok(ast) => eval_compiled(&self.engine, ast),
                    Err(code) => code.into_dynamic(),
                }
            }
            Some(CellType::Empty) | None => Dynamic::UNIT,
        }
    }

    fn store(&self, at: &CellRef, value: Dynamic) {
        let is_script = match self.grid.get_mut(at) {
            Some(mut cell) => {
                cell.cached_value = Some(format_dynamic(&value));
                cell.is_script()
            }
            None => false,
        };
        if is_script {
            self.value_cache.insert(at.clone(), value);
        }
    }

    /// Run one pass.
    ///
    /// `info` is published to the builtins for the duration of the pass.
    /// An interrupted previous pass is resumed at its call site.
    pub fn execute_pass(
        &mut self,
        info: PassInfo,
        handler: &mut dyn DirectiveHandler,
    ) -> PassOutcome {
        let order = self.calculation_order();
        let mut pos = match self.resume_at.take() {
            Some(at) => self.position_of(&order, &at),
            None => 0,
        };
        self.context.begin_pass(info);

        let mut backward_jump = false;
        let mut evaluated = 0usize;

        while pos < order.len() {
            let at = order[pos].clone();
            if evaluated >= self.max_evaluations {
                warn!(cell = %at, limit = self.max_evaluations, "evaluation budget exhausted");
                self.store(&at, ErrorCode::Limit.into_dynamic());
                return PassOutcome {
                    end: PassEnd::Exhausted,
                    backward_jump,
                    evaluated,
                };
            }
            evaluated += 1;

            let mut value = self.evaluate(&at);
            let mut next = pos + 1;
            let mut jumped = false;
            let mut end: Option<PassEnd> = None;

            for directive in self.context.take_directives() {
                match directive {
                    Directive::Continue(target) => {
                        let idx = self.position_of(&order, &target);
                        trace!(from = %at, to = %target, "continue");
                        if idx <= pos {
                            backward_jump = true;
                        }
                        next = idx;
                        jumped = true;
                    }
                    Directive::Return(result) => end = Some(PassEnd::Returned(result)),
                    Directive::Stop => end = Some(PassEnd::Stopped),
                    Directive::Execute(request) => match handler.on_execute(&at, request) {
                        CallStatus::Done(result) => value = result,
                        CallStatus::Waiting { blocking } => {
                            value = ErrorCode::Waiting.into_dynamic();
                            if blocking && end.is_none() {
                                self.resume_at = Some(at.clone());
                                end = Some(PassEnd::Interrupted);
                            }
                        }
                        CallStatus::Failed(code) => value = code.into_dynamic(),
                    },
                    Directive::Outbox(payload) => handler.on_outbox(payload),
                }
            }

            let skip_row = !jumped
                && self.condition_column == Some(at.col)
                && !is_truthy(&value);
            self.store(&at, value);

            if let Some(end) = end {
                return PassOutcome {
                    end,
                    backward_jump,
                    evaluated,
                };
            }
            if skip_row {
                next = order.partition_point(|c| c.row <= at.row);
            }
            pos = next;
        }

        PassOutcome {
            end: PassEnd::Finished,
            backward_jump,
            evaluated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamsheets_engine::engine::PassInfo;

    #[derive(Default)]
    struct Recorder {
        executed: Vec<(CellRef, ExecuteRequest)>,
        outbox: Vec<Value>,
        answer: Option<CallStatus>,
    }

    impl DirectiveHandler for Recorder {
        fn on_execute(&mut self, at: &CellRef, request: ExecuteRequest) -> CallStatus {
            self.executed.push((at.clone(), request));
            self.answer
                .clone()
                .unwrap_or(CallStatus::Done(Dynamic::from(true)))
        }

        fn on_outbox(&mut self, payload: Value) {
            self.outbox.push(payload);
        }
    }

    fn sheet(cells: &str) -> Sheet {
        let mut sheet = Sheet::new(None).unwrap();
        sheet.load_cells(cells).unwrap();
        sheet
    }

    fn pass(sheet: &mut Sheet, handler: &mut Recorder) -> PassOutcome {
        sheet.execute_pass(PassInfo::default(), handler)
    }

    fn number(sheet: &Sheet, a1: &str) -> f64 {
        sheet
            .value(&CellRef::from_str(a1).unwrap())
            .unwrap()
            .as_float()
            .unwrap()
    }

    #[test]
    fn test_counters_advance_once_per_pass() {
        let mut s = sheet("A1: =A1 + 1\nB1: =A1 * 10\n");
        let mut h = Recorder::default();
        assert!(pass(&mut s, &mut h).completed());
        assert!(pass(&mut s, &mut h).completed());
        assert_eq!(number(&s, "A1"), 2.0);
        assert_eq!(number(&s, "B1"), 20.0);
    }

    #[test]
    fn test_forward_continue_skips_cells() {
        let mut s = sheet("A1: =CONTINUE(A3)\nA2: =A2 + 1\nA3: =A3 + 1\n");
        let mut h = Recorder::default();
        let outcome = pass(&mut s, &mut h);
        assert!(outcome.completed());
        assert!(s.value(&CellRef::from_str("A2").unwrap()).is_none());
        assert_eq!(number(&s, "A3"), 1.0);
    }

    #[test]
    fn test_backward_continue_marks_pass_incomplete() {
        // A1 loops back to itself until it reaches 3.
        let mut s = sheet("A1: =A1 + 1\nA2: =if A1 < 3.0 { CONTINUE(A1) } else { false }\n");
        let mut h = Recorder::default();
        let outcome = pass(&mut s, &mut h);
        assert!(matches!(outcome.end, PassEnd::Finished));
        assert!(outcome.backward_jump);
        assert!(!outcome.completed());
        assert_eq!(number(&s, "A1"), 3.0);
        assert_eq!(outcome.evaluated, 6);
    }

    #[test]
    fn test_continue_beyond_last_cell_ends_pass() {
        let mut s = sheet("A1: =A1 + 1\nA2: =CONTINUE(Z99)\nA3: =A3 + 1\n");
        let mut h = Recorder::default();
        let outcome = pass(&mut s, &mut h);
        assert!(outcome.completed());
        assert!(s.value(&CellRef::from_str("A3").unwrap()).is_none());
    }

    #[test]
    fn test_continue_to_undefined_cell_resumes_at_next_defined() {
        let mut s = sheet("A1: =CONTINUE(B2)\nA2: =A2 + 1\nC2: =C2 + 1\n");
        let mut h = Recorder::default();
        pass(&mut s, &mut h);
        assert!(s.value(&CellRef::from_str("A2").unwrap()).is_none());
        assert_eq!(number(&s, "C2"), 1.0);
    }

    #[test]
    fn test_runaway_loop_hits_budget() {
        let mut s = sheet("A1: =A1 + 1\nA2: =CONTINUE(A1)\n");
        s.set_max_evaluations(10);
        let mut h = Recorder::default();
        let outcome = pass(&mut s, &mut h);
        assert!(matches!(outcome.end, PassEnd::Exhausted));
        assert!(!outcome.completed());
        assert_eq!(s.display_value(&CellRef::from_str("A1").unwrap()), "#LIMIT");
    }

    #[test]
    fn test_condition_column_skips_row() {
        let mut s = sheet("A1: =A1 + 1\nB1: 0\nC1: =C1 + 1\nA2: =A2 + 1\n");
        s.set_condition_column(Some(1));
        let mut h = Recorder::default();
        pass(&mut s, &mut h);
        // B1 is evaluated first and is falsy: A1 and C1 are skipped.
        assert!(s.value(&CellRef::from_str("A1").unwrap()).is_none());
        assert!(s.value(&CellRef::from_str("C1").unwrap()).is_none());
        assert_eq!(number(&s, "A2"), 1.0);
    }

    #[test]
    fn test_return_and_stop_end_the_pass() {
        let mut s = sheet("A1: =RETURN(7)\nA2: =A2 + 1\n");
        let mut h = Recorder::default();
        let outcome = pass(&mut s, &mut h);
        assert_eq!(outcome.returned().unwrap().as_int().unwrap(), 7);
        assert!(s.value(&CellRef::from_str("A2").unwrap()).is_none());

        let mut s = sheet("A1: =STOP()\nA2: =A2 + 1\n");
        let outcome = pass(&mut s, &mut h);
        assert!(matches!(outcome.end, PassEnd::Stopped));
        assert!(!outcome.completed());
    }

    #[test]
    fn test_execute_result_becomes_cell_value() {
        let mut s = sheet("A1: =EXECUTE(\"Worker\", 2)\n");
        let mut h = Recorder {
            answer: Some(CallStatus::Done(Dynamic::from(5_i64))),
            ..Recorder::default()
        };
        pass(&mut s, &mut h);
        assert_eq!(h.executed.len(), 1);
        assert_eq!(h.executed[0].1.repetitions, 2);
        assert_eq!(s.display_value(&CellRef::from_str("A1").unwrap()), "5");
    }

    #[test]
    fn test_blocking_wait_interrupts_and_resumes_at_call_site() {
        let mut s = sheet("A1: =A1 + 1\nA2: =EXECUTE(\"Worker\")\nA3: =A3 + 1\n");
        let mut h = Recorder {
            answer: Some(CallStatus::Waiting { blocking: true }),
            ..Recorder::default()
        };
        let outcome = pass(&mut s, &mut h);
        assert!(matches!(outcome.end, PassEnd::Interrupted));
        assert!(s.is_interrupted());
        assert_eq!(s.display_value(&CellRef::from_str("A2").unwrap()), "#WAITING");
        assert!(s.value(&CellRef::from_str("A3").unwrap()).is_none());

        h.answer = Some(CallStatus::Done(Dynamic::from(true)));
        let outcome = pass(&mut s, &mut h);
        assert!(outcome.completed());
        // The resumed pass starts at the call site: A1 is not re-evaluated.
        assert_eq!(number(&s, "A1"), 1.0);
        assert_eq!(number(&s, "A3"), 1.0);
        assert_eq!(s.display_value(&CellRef::from_str("A2").unwrap()), "TRUE");
    }

    #[test]
    fn test_outbox_payloads_reach_handler() {
        let mut s = sheet("A1: =OUTBOX(#{ v: A1 })\n");
        let mut h = Recorder::default();
        pass(&mut s, &mut h);
        assert_eq!(h.outbox, vec![serde_json::json!({ "v": 0.0 })]);
    }
}
