use super::{StepTrigger, TriggerConfig, TriggerCore, TriggerKind};
use crate::host::Host;
use crate::streamsheet::SheetProcess;

/// Never calculates.
pub struct NoneTrigger {
    core: TriggerCore,
}

impl NoneTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        NoneTrigger {
            core: TriggerCore::new(config),
        }
    }
}

impl StepTrigger for NoneTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::None
    }

    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TriggerCore {
        &mut self.core
    }

    fn step(&mut self, _process: &mut SheetProcess, _manual: bool, _host: &mut dyn Host) {}
}
