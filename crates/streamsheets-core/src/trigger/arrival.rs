use super::{StepTrigger, TriggerConfig, TriggerCore, TriggerKind};
use crate::host::Host;
use crate::streamsheet::SheetProcess;

/// Calculates when a message arrives while the machine runs.
///
/// Machine cycles fire it only for input that queued up while the sheet was
/// busy, one pass per cycle. Manual steps always do.
pub struct ArrivalTrigger {
    core: TriggerCore,
}

impl ArrivalTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        ArrivalTrigger {
            core: TriggerCore::new(config),
        }
    }
}

impl StepTrigger for ArrivalTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Arrival
    }

    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TriggerCore {
        &mut self.core
    }

    fn step(&mut self, process: &mut SheetProcess, manual: bool, host: &mut dyn Host) {
        // Scheduler steps continue an open repeat run, e.g. after a pause,
        // or pick up messages that arrived while the sheet was busy.
        if manual || self.core.is_repeating() || process.has_backlog() {
            self.core.step(process, manual, host);
        }
    }

    fn on_message(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        self.core.step(process, false, host);
    }
}
