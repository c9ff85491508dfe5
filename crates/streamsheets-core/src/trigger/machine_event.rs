use tracing::debug;

use super::{StepTrigger, TriggerConfig, TriggerCore, TriggerKind};
use crate::host::{Host, ListenerId, MachineEvent};
use crate::streamsheet::SheetProcess;

/// Calculates on machine start, stop, or both.
///
/// An endless stop sheet keeps the machine in `WillStop` until it `RETURN`s.
pub struct MachineEventTrigger {
    core: TriggerCore,
    kind: TriggerKind,
    listeners: Vec<ListenerId>,
}

impl MachineEventTrigger {
    pub fn new(kind: TriggerKind, config: TriggerConfig) -> Self {
        MachineEventTrigger {
            core: TriggerCore::new(config),
            kind,
            listeners: Vec::new(),
        }
    }

    pub fn is_attached(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub fn listens_to(&self, event: MachineEvent) -> bool {
        self.kind.events().contains(&event)
    }
}

impl StepTrigger for MachineEventTrigger {
    fn kind(&self) -> TriggerKind {
        self.kind
    }

    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TriggerCore {
        &mut self.core
    }

    fn attach(&mut self, process: &SheetProcess, host: &mut dyn Host) {
        if self.is_attached() {
            return;
        }
        for event in self.kind.events() {
            self.listeners.push(host.subscribe(process.id(), *event));
        }
        debug!(sheet = %process.name(), kind = %self.kind, "subscribed to machine events");
    }

    fn dispose(&mut self, host: &mut dyn Host) {
        self.core.cancel(host);
        for listener in self.listeners.drain(..) {
            host.unsubscribe(listener);
        }
    }

    fn step(&mut self, process: &mut SheetProcess, manual: bool, host: &mut dyn Host) {
        if manual || self.core.is_repeating() {
            self.core.step(process, manual, host);
        }
    }

    fn on_machine_event(
        &mut self,
        event: MachineEvent,
        process: &mut SheetProcess,
        host: &mut dyn Host,
    ) {
        if self.listens_to(event) {
            self.core.step(process, false, host);
        }
    }
}
