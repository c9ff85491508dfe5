//! StreamSheet: a sheet, its inbox and the trigger that drives it.

mod calls;
mod process;

pub use calls::CallTable;
pub use process::{SheetProcess, Stats};

use tracing::{debug, info};

use crate::host::{Caller, Host, MachineEvent, MachineState, SheetId, TaskId};
use crate::messaging::{Inbox, LoopSettings, Message};
use crate::sheet::{CallStatus, Sheet};
use crate::trigger::{Trigger, TriggerConfig, TriggerKind};
use streamsheets_engine::engine::ErrorCode;

pub struct StreamSheet {
    process: SheetProcess,
    trigger: Trigger,
}

impl StreamSheet {
    /// Create a streamsheet. The trigger is attached when the streamsheet
    /// is added to a machine.
    pub fn new(name: impl Into<String>, sheet: Sheet, trigger: TriggerConfig) -> Self {
        StreamSheet {
            process: SheetProcess::new(name, sheet),
            trigger: Trigger::from_config(trigger),
        }
    }

    pub fn id(&self) -> SheetId {
        self.process.id()
    }

    pub fn name(&self) -> &str {
        self.process.name()
    }

    pub fn sheet(&self) -> &Sheet {
        self.process.sheet()
    }

    pub fn sheet_mut(&mut self) -> &mut Sheet {
        self.process.sheet_mut()
    }

    pub fn inbox(&self) -> &Inbox {
        self.process.inbox()
    }

    pub fn inbox_mut(&mut self) -> &mut Inbox {
        self.process.inbox_mut()
    }

    pub fn stats(&self) -> Stats {
        self.process.stats()
    }

    pub fn loop_index(&self) -> usize {
        self.process.loop_index()
    }

    pub fn process(&self) -> &SheetProcess {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut SheetProcess {
        &mut self.process
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn trigger_kind(&self) -> TriggerKind {
        self.trigger.kind()
    }

    pub fn set_loop_settings(&mut self, settings: LoopSettings) {
        self.process.set_loop_settings(settings);
    }

    pub fn put_message(&mut self, message: Message) -> Option<Message> {
        self.process.put_message(message)
    }

    pub fn pause_processing(&mut self) {
        self.process.pause_processing();
    }

    pub fn resume_processing(&mut self) {
        self.process.resume_processing();
    }

    pub(crate) fn attach(&mut self, host: &mut dyn Host) {
        self.trigger.as_step_mut().attach(&self.process, host);
    }

    pub(crate) fn dispose(&mut self, host: &mut dyn Host) {
        self.trigger.as_step_mut().dispose(host);
    }

    /// Replace the trigger. The previous one is disposed; `None` installs a
    /// trigger that never fires.
    pub fn set_trigger(&mut self, config: Option<TriggerConfig>, host: &mut dyn Host) {
        let config = config.unwrap_or_else(TriggerConfig::none);
        self.dispose(host);
        self.trigger = Trigger::from_config(config);
        self.attach(host);
        if host.state() == MachineState::Running {
            self.trigger.as_step_mut().start(&mut self.process, host);
        }
        info!(sheet = %self.name(), kind = %self.trigger.kind(), "trigger replaced");
    }

    /// One step: either continue an interrupted pass whose call was answered,
    /// or let the trigger decide.
    pub fn trigger_step(&mut self, manual: bool, host: &mut dyn Host) {
        let trigger = self.trigger.as_step_mut();
        if self.process.wants_resume() {
            trigger.resume_processing(&mut self.process, host);
        } else {
            trigger.step(&mut self.process, manual, host);
        }
    }

    pub(crate) fn repeat(&mut self, task: TaskId, host: &mut dyn Host) {
        self.trigger
            .as_step_mut()
            .repeat(task, &mut self.process, host);
    }

    /// Serve an `EXECUTE` call. Only execute-triggered streamsheets accept
    /// calls; `message` carries the call arguments and is queued only when
    /// the call is accepted.
    pub fn execute(
        &mut self,
        repetitions: u32,
        message: Message,
        caller: Caller,
        host: &mut dyn Host,
    ) -> CallStatus {
        let Trigger::Execute(trigger) = &mut self.trigger else {
            debug!(sheet = %self.process.name(), "execute on a sheet without execute trigger");
            return CallStatus::Failed(ErrorCode::Value);
        };
        if trigger.caller().is_some() || self.process.is_processing_paused() {
            return CallStatus::Failed(ErrorCode::Calc);
        }
        self.process.put_message(message);
        trigger.execute(repetitions, caller, &mut self.process, host)
    }

    /// Whether an execute-triggered sheet is serving a call.
    pub fn is_executing(&self) -> bool {
        match &self.trigger {
            Trigger::Execute(trigger) => trigger.caller().is_some(),
            _ => false,
        }
    }

    pub(crate) fn on_machine_event(&mut self, event: MachineEvent, host: &mut dyn Host) {
        self.trigger
            .as_step_mut()
            .on_machine_event(event, &mut self.process, host);
    }

    pub(crate) fn on_message(&mut self, host: &mut dyn Host) {
        self.trigger.as_step_mut().on_message(&mut self.process, host);
    }

    pub fn start(&mut self, host: &mut dyn Host) {
        self.trigger.as_step_mut().start(&mut self.process, host);
    }

    pub fn pause(&mut self, host: &mut dyn Host) {
        self.trigger.as_step_mut().pause(host);
    }

    pub fn resume(&mut self) {
        self.trigger.as_step_mut().resume();
    }

    pub fn stop(&mut self, host: &mut dyn Host) {
        self.trigger.as_step_mut().stop(&mut self.process, host);
        self.process.reset_calls();
    }

    /// True for an endless stop sheet, which the machine waits for on stop.
    pub fn holds_stop(&self) -> bool {
        self.trigger.kind().events().contains(&MachineEvent::Stop) && self.trigger.is_endless()
    }
}
