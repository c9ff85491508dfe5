use streamsheets_engine::engine::{Dynamic, ErrorCode};
use tracing::{debug, warn};

use super::{StepTrigger, TriggerConfig, TriggerCore, TriggerKind};
use crate::host::{Caller, Host, TaskId};
use crate::sheet::{CallStatus, PassEnd, PassOutcome};
use crate::streamsheet::SheetProcess;

/// Calculates when another streamsheet calls `EXECUTE`.
///
/// A non-endless callee runs its repetitions synchronously and answers at
/// once. An endless callee records the caller, progresses through deferred
/// repeats and answers when it evaluates `RETURN`.
pub struct ExecuteTrigger {
    core: TriggerCore,
    caller: Option<Caller>,
}

impl ExecuteTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        ExecuteTrigger {
            core: TriggerCore::new(config),
            caller: None,
        }
    }

    /// The call being served, if the answer is still outstanding.
    pub fn caller(&self) -> Option<&Caller> {
        self.caller.as_ref()
    }

    pub fn execute(
        &mut self,
        repetitions: u32,
        caller: Caller,
        process: &mut SheetProcess,
        host: &mut dyn Host,
    ) -> CallStatus {
        if self.caller.is_some() || process.is_processing_paused() {
            warn!(sheet = %process.name(), "execute while a previous call is still running");
            return CallStatus::Failed(ErrorCode::Calc);
        }
        let blocking = caller.blocking;

        if self.core.is_endless() {
            debug!(sheet = %process.name(), "endless execute started");
            self.caller = Some(caller);
            let stats = process.stats_mut();
            stats.steps += 1;
            stats.repeatsteps = 0;
            self.core.begin_run();
            self.core.schedule(process, host);
            return CallStatus::Waiting { blocking };
        }

        process.stats_mut().steps += 1;
        self.core.begin_run();
        let mut result = Dynamic::from(true);
        for n in 1..=repetitions {
            process.stats_mut().repeatsteps = u64::from(n);
            let outcome = self.core.process(process, host);
            match outcome.end {
                PassEnd::Returned(value) => {
                    result = value;
                    break;
                }
                PassEnd::Interrupted => {
                    // The callee itself waits on a call; answer once it resumes.
                    self.caller = Some(caller);
                    return CallStatus::Waiting { blocking };
                }
                PassEnd::Stopped => break,
                PassEnd::Finished | PassEnd::Exhausted => {}
            }
        }
        self.core.stop_repeat(host);
        process.finish_message();
        CallStatus::Done(result)
    }

    fn answer(&mut self, outcome: Option<PassOutcome>, process: &mut SheetProcess, host: &mut dyn Host) {
        let Some(outcome) = outcome else {
            return;
        };
        let value = match outcome.end {
            PassEnd::Returned(value) => value,
            PassEnd::Interrupted => return,
            // A synchronous call interrupted mid-way ends with its resumed pass.
            _ if self.caller.is_some() && !self.core.is_endless() => {
                self.core.stop_repeat(host);
                process.finish_message();
                Dynamic::from(true)
            }
            _ => return,
        };
        if let Some(caller) = self.caller.take() {
            debug!(sheet = %process.name(), "answering execute");
            host.resolve_call(caller, value);
        }
    }
}

impl StepTrigger for ExecuteTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Execute
    }

    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TriggerCore {
        &mut self.core
    }

    fn is_triggered(&self) -> bool {
        self.core.is_repeating() || self.caller.is_some()
    }

    fn dispose(&mut self, host: &mut dyn Host) {
        self.core.cancel(host);
        self.caller = None;
    }

    fn stop(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        self.core.stop(process, host);
        self.caller = None;
    }

    /// Only calls calculate an execute sheet. A step merely restarts a run
    /// whose progression was paused.
    fn step(&mut self, process: &mut SheetProcess, _manual: bool, host: &mut dyn Host) {
        let core = &self.core;
        if core.is_endless()
            && core.is_repeating()
            && core.is_active()
            && core.pending().is_none()
            && core.pre_process(process)
        {
            self.core.schedule(process, host);
        }
    }

    fn repeat(&mut self, task: TaskId, process: &mut SheetProcess, host: &mut dyn Host) {
        let outcome = self.core.repeat(task, process, host);
        self.answer(outcome, process, host);
    }

    fn resume_processing(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        let outcome = self.core.resume_processing(process, host);
        self.answer(outcome, process, host);
    }
}
