use super::{StepTrigger, TriggerConfig, TriggerCore, TriggerKind};
use crate::host::Host;
use crate::streamsheet::SheetProcess;

/// Calculates on every step, scheduler or manual. Ignores `repeat`.
pub struct ContinuousTrigger {
    core: TriggerCore,
}

impl ContinuousTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        ContinuousTrigger {
            core: TriggerCore::new(config),
        }
    }
}

impl StepTrigger for ContinuousTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Continuously
    }

    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TriggerCore {
        &mut self.core
    }

    fn is_endless(&self) -> bool {
        false
    }

    fn step(&mut self, process: &mut SheetProcess, _manual: bool, host: &mut dyn Host) {
        if !self.core.pre_process(process) {
            return;
        }
        process.stats_mut().steps += 1;
        self.core.process(process, host);
    }
}
