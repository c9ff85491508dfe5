use streamsheets_engine::engine::Dynamic;
use tracing::trace;

use super::TriggerConfig;
use crate::host::{Host, TaskId};
use crate::sheet::{PassEnd, PassOutcome};
use crate::streamsheet::SheetProcess;

/// Bookkeeping shared by every trigger variant.
#[derive(Clone, Debug)]
pub struct TriggerCore {
    config: TriggerConfig,
    active: bool,
    repeating: bool,
    pending: Option<TaskId>,
}

impl TriggerCore {
    pub fn new(config: TriggerConfig) -> Self {
        TriggerCore {
            config,
            active: true,
            repeating: false,
            pending: None,
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn is_endless(&self) -> bool {
        self.config.is_endless()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    pub fn pending(&self) -> Option<TaskId> {
        self.pending
    }

    pub fn start(&mut self, process: &mut SheetProcess) {
        self.active = true;
        process.stats_mut().repeatsteps = 0;
    }

    pub fn pause(&mut self, host: &mut dyn Host) {
        self.active = false;
        self.cancel(host);
    }

    /// Reactivate without firing.
    pub fn resume(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        self.cancel(host);
        self.repeating = false;
        process.stats_mut().repeatsteps = 0;
        self.active = true;
    }

    /// Open a repeat run without stepping (used by `EXECUTE`).
    pub fn begin_run(&mut self) {
        self.repeating = true;
    }

    /// End the current repeat run.
    pub fn stop_repeat(&mut self, host: &mut dyn Host) {
        self.cancel(host);
        self.repeating = false;
    }

    /// Cancel the pending deferred repeat, if any.
    pub fn cancel(&mut self, host: &mut dyn Host) {
        if let Some(task) = self.pending.take() {
            host.cancel_repeat(task);
        }
    }

    pub fn schedule(&mut self, process: &SheetProcess, host: &mut dyn Host) {
        self.cancel(host);
        self.pending = Some(host.schedule_repeat(process.id()));
    }

    /// Whether a pass may run now.
    pub fn pre_process(&self, process: &SheetProcess) -> bool {
        !process.is_processing_paused()
    }

    /// React to how a pass ended. Returns the `RETURN` value, if any.
    pub fn post_process(
        &mut self,
        process: &SheetProcess,
        outcome: &PassOutcome,
        host: &mut dyn Host,
    ) -> Option<Dynamic> {
        match &outcome.end {
            PassEnd::Returned(value) => {
                self.stop_repeat(host);
                host.signal_completion(process.id());
                Some(value.clone())
            }
            PassEnd::Stopped => {
                self.stop_repeat(host);
                None
            }
            _ => None,
        }
    }

    /// Run one pass and apply its outcome.
    pub fn process(&mut self, process: &mut SheetProcess, host: &mut dyn Host) -> PassOutcome {
        let outcome = process.run_pass(host, self.repeating);
        self.post_process(process, &outcome, host);
        outcome
    }

    /// The shared stepping rules.
    ///
    /// Endless triggers open a repeat run on their first step. A scheduler
    /// step schedules the next repeat before running the pass; a manual step
    /// counts a repeat step and runs without scheduling.
    pub fn step(
        &mut self,
        process: &mut SheetProcess,
        manual: bool,
        host: &mut dyn Host,
    ) -> Option<PassOutcome> {
        if !self.pre_process(process) || self.pending.is_some() {
            return None;
        }
        if !self.is_endless() {
            process.stats_mut().steps += 1;
            return Some(self.process(process, host));
        }

        let fresh = !self.repeating;
        if fresh {
            self.repeating = true;
            let stats = process.stats_mut();
            stats.steps += 1;
            stats.repeatsteps = 0;
        }
        if manual || !fresh {
            process.stats_mut().repeatsteps += 1;
        }
        if !manual {
            self.schedule(process, host);
        }
        Some(self.process(process, host))
    }

    /// Body of a deferred repeat. Stale or inactive repeats are dropped.
    pub fn repeat(
        &mut self,
        task: TaskId,
        process: &mut SheetProcess,
        host: &mut dyn Host,
    ) -> Option<PassOutcome> {
        if self.pending != Some(task) {
            trace!(sheet = %process.name(), "ignoring stale repeat");
            return None;
        }
        self.pending = None;
        if !self.active || !self.repeating || !self.pre_process(process) {
            return None;
        }
        process.stats_mut().repeatsteps += 1;
        self.schedule(process, host);
        Some(self.process(process, host))
    }

    /// Continue a pass interrupted by a blocking call, once it resolved.
    pub fn resume_processing(
        &mut self,
        process: &mut SheetProcess,
        host: &mut dyn Host,
    ) -> Option<PassOutcome> {
        if !self.pre_process(process) || !process.take_resume_request() {
            return None;
        }
        if self.repeating && self.active && self.pending.is_none() {
            self.schedule(process, host);
        }
        Some(self.process(process, host))
    }
}
