//! Machine: owns the streamsheets, the cycle clock and the deferred-task queue.
//!
//! A streamsheet is taken out of its slot while it is stepped and handed
//! the machine as its [`Host`]. A call that reaches an empty slot is a
//! re-entrant call and fails with `#CALC`.

mod listeners;
mod tasks;

pub use listeners::Listeners;
pub use tasks::TaskQueue;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use streamsheets_engine::engine::{Dynamic, ErrorCode, ExecuteRequest};

use crate::error::{Result, StreamsheetError};
use crate::host::{Caller, Host, ListenerId, MachineEvent, MachineState, SheetId, TaskId};
use crate::messaging::{DEFAULT_CAPACITY, LoopSettings, Message, MessageBox, Outbox};
use crate::sheet::{CallStatus, Sheet};
use crate::streamsheet::StreamSheet;
use crate::trigger::TriggerConfig;

pub const DEFAULT_CYCLETIME_MS: u64 = 50;

struct Slot {
    id: SheetId,
    name: String,
    /// `None` while the streamsheet is being stepped.
    sheet: Option<StreamSheet>,
}

pub struct Machine {
    id: Uuid,
    name: String,
    state: MachineState,
    cycle: u64,
    cycletime: u64,
    slots: Vec<Slot>,
    tasks: TaskQueue,
    listeners: Listeners,
    outbox: Outbox,
    /// Endless stop sheets that have not signalled completion yet.
    stop_pending: Vec<SheetId>,
    /// Answers for callers that were taken out when their callee returned.
    deferred: Vec<(Caller, Dynamic)>,
    functions: Option<String>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("cycle", &self.cycle)
            .field("cycletime", &self.cycletime)
            .finish_non_exhaustive()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new("Machine")
    }
}

impl Machine {
    pub fn new(name: impl Into<String>) -> Self {
        Machine {
            id: Uuid::new_v4(),
            name: name.into(),
            state: MachineState::Stopped,
            cycle: 0,
            cycletime: DEFAULT_CYCLETIME_MS,
            slots: Vec::new(),
            tasks: TaskQueue::new(),
            listeners: Listeners::new(),
            outbox: MessageBox::outbox(DEFAULT_CAPACITY),
            stop_pending: Vec::new(),
            deferred: Vec::new(),
            functions: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn current_cycle(&self) -> u64 {
        self.cycle
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.cycle.saturating_mul(self.cycletime)
    }

    pub fn cycletime(&self) -> u64 {
        self.cycletime
    }

    pub fn set_cycletime(&mut self, cycletime: u64) {
        self.cycletime = cycletime.max(1);
    }

    /// Custom Rhai functions available to sheets built with [`Machine::new_sheet`].
    pub fn set_functions(&mut self, script: Option<String>) {
        self.functions = script;
    }

    pub fn functions(&self) -> Option<&str> {
        self.functions.as_deref()
    }

    /// Build an empty sheet with the machine's custom functions.
    pub fn new_sheet(&self) -> Result<Sheet> {
        Sheet::new(self.functions.as_deref())
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Endless stop sheets that have not signalled completion yet.
    pub fn pending_stop_sheets(&self) -> usize {
        self.stop_pending.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn streamsheets(&self) -> impl Iterator<Item = &StreamSheet> {
        self.slots.iter().filter_map(|slot| slot.sheet.as_ref())
    }

    pub fn streamsheet(&self, name: &str) -> Option<&StreamSheet> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .and_then(|slot| slot.sheet.as_ref())
    }

    pub fn streamsheet_mut(&mut self, name: &str) -> Option<&mut StreamSheet> {
        self.slots
            .iter_mut()
            .find(|slot| slot.name == name)
            .and_then(|slot| slot.sheet.as_mut())
    }

    fn slot_id(&self, name: &str) -> Option<SheetId> {
        self.slots.iter().find(|slot| slot.name == name).map(|slot| slot.id)
    }

    fn sheet_ids(&self) -> Vec<SheetId> {
        self.slots.iter().map(|slot| slot.id).collect()
    }

    /// Take a streamsheet out of its slot, run `f` with the machine as host
    /// and put it back. `None` if the sheet is unknown or already taken.
    fn with_sheet<R>(
        &mut self,
        id: SheetId,
        f: impl FnOnce(&mut StreamSheet, &mut Machine) -> R,
    ) -> Option<R> {
        let mut sheet = self
            .slots
            .iter_mut()
            .find(|slot| slot.id == id)?
            .sheet
            .take()?;
        let result = f(&mut sheet, self);
        self.put_back(sheet);
        Some(result)
    }

    fn put_back(&mut self, mut sheet: StreamSheet) {
        let id = sheet.id();
        let mut index = 0;
        while index < self.deferred.len() {
            if self.deferred[index].0.sheet == id {
                let (caller, value) = self.deferred.remove(index);
                sheet
                    .process_mut()
                    .resolve_call(&caller.at, value, caller.blocking);
            } else {
                index += 1;
            }
        }
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            slot.sheet = Some(sheet);
        }
    }

    /// Add a streamsheet; its trigger is attached and, if the machine runs,
    /// started.
    pub fn add_streamsheet(&mut self, mut sheet: StreamSheet) -> Result<SheetId> {
        if self.slots.iter().any(|slot| slot.name == sheet.name()) {
            return Err(StreamsheetError::DuplicateSheet(sheet.name().to_string()));
        }
        let id = sheet.id();
        sheet.attach(self);
        if self.state == MachineState::Running {
            sheet.start(self);
        }
        debug!(sheet = %sheet.name(), kind = %sheet.trigger_kind(), "streamsheet added");
        self.slots.push(Slot {
            id,
            name: sheet.name().to_string(),
            sheet: Some(sheet),
        });
        Ok(id)
    }

    /// Remove a streamsheet and dispose its trigger.
    pub fn remove_streamsheet(&mut self, name: &str) -> Option<StreamSheet> {
        let index = self.slots.iter().position(|slot| slot.name == name)?;
        let mut sheet = self.slots[index].sheet.take()?;
        self.slots.remove(index);
        sheet.dispose(self);
        let id = sheet.id();
        self.stop_pending.retain(|pending| *pending != id);
        self.deferred.retain(|(caller, _)| caller.sheet != id);
        debug!(sheet = %name, "streamsheet removed");
        Some(sheet)
    }

    /// Queue a message into the named inbox. Arrival triggers fire while the
    /// machine runs.
    pub fn put_message(&mut self, name: &str, message: Message) -> bool {
        let Some(id) = self.slot_id(name) else {
            return false;
        };
        let running = self.state == MachineState::Running;
        self.with_sheet(id, |sheet, machine| {
            sheet.put_message(message);
            if running {
                sheet.on_message(machine);
            }
        })
        .is_some()
    }

    /// Replace the trigger of the named streamsheet; `None` installs `none`.
    pub fn update_trigger(&mut self, name: &str, config: Option<TriggerConfig>) -> bool {
        let Some(id) = self.slot_id(name) else {
            return false;
        };
        self.with_sheet(id, |sheet, machine| sheet.set_trigger(config, machine))
            .is_some()
    }

    pub fn update_loop(&mut self, name: &str, settings: LoopSettings) -> bool {
        match self.streamsheet_mut(name) {
            Some(sheet) => {
                sheet.set_loop_settings(settings);
                true
            }
            None => false,
        }
    }

    pub fn start(&mut self) -> bool {
        match self.state {
            MachineState::Stopped => {
                self.cycle = 0;
                self.state = MachineState::Running;
                for id in self.sheet_ids() {
                    self.with_sheet(id, |sheet, machine| sheet.start(machine));
                }
                info!(machine = %self.name, "machine started");
                self.emit(MachineEvent::Start);
                true
            }
            MachineState::Paused => {
                self.state = MachineState::Running;
                for slot in self.slots.iter_mut() {
                    if let Some(sheet) = slot.sheet.as_mut() {
                        sheet.resume();
                    }
                }
                info!(machine = %self.name, "machine resumed");
                true
            }
            MachineState::Running | MachineState::WillStop => false,
        }
    }

    pub fn pause(&mut self) -> bool {
        if self.state != MachineState::Running {
            return false;
        }
        self.state = MachineState::Paused;
        for id in self.sheet_ids() {
            self.with_sheet(id, |sheet, machine| sheet.pause(machine));
        }
        info!(machine = %self.name, "machine paused");
        true
    }

    /// Stop the machine.
    ///
    /// With endless stop sheets the first call only moves to `WillStop` and
    /// lets them run; a second call stops for good.
    pub fn stop(&mut self) -> bool {
        match self.state {
            MachineState::Stopped => false,
            MachineState::WillStop => {
                if !self.stop_pending.is_empty() {
                    warn!(
                        machine = %self.name,
                        pending = self.stop_pending.len(),
                        "forcing stop before stop sheets completed"
                    );
                }
                self.finish_stop();
                true
            }
            MachineState::Running | MachineState::Paused => {
                for id in self.sheet_ids() {
                    self.with_sheet(id, |sheet, machine| sheet.stop(machine));
                }
                self.stop_pending = self
                    .streamsheets()
                    .filter(|sheet| sheet.holds_stop())
                    .map(|sheet| sheet.id())
                    .collect();
                self.state = MachineState::WillStop;
                self.emit(MachineEvent::Stop);

                let waiting = self.streamsheets().any(|sheet| sheet.holds_stop());
                if waiting {
                    info!(machine = %self.name, "stop requested, waiting for stop sheets");
                } else {
                    self.finish_stop();
                }
                true
            }
        }
    }

    fn finish_stop(&mut self) {
        self.state = MachineState::Stopped;
        for id in self.sheet_ids() {
            self.with_sheet(id, |sheet, machine| sheet.stop(machine));
        }
        self.tasks.clear();
        self.stop_pending.clear();
        self.deferred.clear();
        info!(machine = %self.name, cycle = self.cycle, "machine stopped");
    }

    fn emit(&mut self, event: MachineEvent) {
        let targets: Vec<SheetId> = self
            .slots
            .iter()
            .map(|slot| slot.id)
            .filter(|id| self.listeners.is_listening(*id, event))
            .collect();
        debug!(machine = %self.name, ?event, listeners = targets.len(), "machine event");
        for id in targets {
            self.with_sheet(id, |sheet, machine| sheet.on_machine_event(event, machine));
        }
    }

    /// One machine tick: a scheduler step for every streamsheet, then one
    /// turn of deferred repeats. Returns false if the machine is not running.
    pub fn cycle(&mut self) -> bool {
        let ids = match self.state {
            MachineState::Running => self.sheet_ids(),
            MachineState::WillStop => self.stop_pending.clone(),
            MachineState::Stopped | MachineState::Paused => return false,
        };
        self.cycle += 1;
        for id in ids {
            self.with_sheet(id, |sheet, machine| sheet.trigger_step(false, machine));
        }
        self.turn();
        true
    }

    /// Step every streamsheet manually. Only allowed while not running.
    pub fn step(&mut self) -> bool {
        if matches!(self.state, MachineState::Running | MachineState::WillStop) {
            return false;
        }
        self.cycle += 1;
        for id in self.sheet_ids() {
            self.with_sheet(id, |sheet, machine| sheet.trigger_step(true, machine));
        }
        self.turn();
        true
    }

    /// Run the deferred repeats queued before this turn. Returns how many ran.
    pub fn turn(&mut self) -> usize {
        let turn = self.tasks.start_turn();
        let mut ran = 0;
        while let Some((task, id)) = self.tasks.next_due(turn) {
            if self
                .with_sheet(id, |sheet, machine| sheet.repeat(task, machine))
                .is_none()
            {
                debug!(sheet = %id, "dropping repeat of a missing streamsheet");
            }
            ran += 1;
        }
        ran
    }

    /// Run up to `cycles` cycles; stops early when the machine stops running.
    pub fn run(&mut self, cycles: u64) -> u64 {
        let mut ran = 0;
        while ran < cycles && self.cycle() {
            ran += 1;
        }
        ran
    }
}

impl Host for Machine {
    fn current_cycle(&self) -> u64 {
        self.cycle
    }

    fn elapsed_ms(&self) -> u64 {
        Machine::elapsed_ms(self)
    }

    fn state(&self) -> MachineState {
        self.state
    }

    fn schedule_repeat(&mut self, sheet: SheetId) -> TaskId {
        self.tasks.schedule(sheet)
    }

    fn cancel_repeat(&mut self, task: TaskId) {
        self.tasks.cancel(task);
    }

    fn execute(&mut self, caller: Caller, request: &ExecuteRequest) -> CallStatus {
        let Some(index) = self.slots.iter().position(|slot| slot.name == request.sheet) else {
            debug!(sheet = %request.sheet, "execute of unknown streamsheet");
            return CallStatus::Failed(ErrorCode::Ref);
        };
        let Some(mut callee) = self.slots[index].sheet.take() else {
            warn!(sheet = %request.sheet, "re-entrant execute");
            return CallStatus::Failed(ErrorCode::Calc);
        };

        let source = self
            .slots
            .iter()
            .find(|slot| slot.id == caller.sheet)
            .map(|slot| slot.name.clone())
            .unwrap_or_default();
        let payload = request
            .args
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let message = Message::new(payload)
            .with_request_id(Uuid::new_v4().to_string())
            .with_source(source);

        debug!(
            caller = %caller.sheet,
            callee = %request.sheet,
            repetitions = request.repetitions,
            blocking = caller.blocking,
            "execute"
        );
        let status = callee.execute(request.repetitions, message, caller, self);
        self.put_back(callee);
        status
    }

    fn resolve_call(&mut self, caller: Caller, value: Dynamic) {
        let slot = self.slots.iter_mut().find(|slot| slot.id == caller.sheet);
        let slot_known = slot.is_some();
        match slot.and_then(|slot| slot.sheet.as_mut()) {
            Some(sheet) => {
                sheet
                    .process_mut()
                    .resolve_call(&caller.at, value, caller.blocking);
            }
            // Taken out of its slot; `put_back` delivers it.
            None if slot_known => self.deferred.push((caller, value)),
            None => debug!(sheet = %caller.sheet, "dropping answer for a removed caller"),
        }
    }

    fn signal_completion(&mut self, sheet: SheetId) {
        if let Some(index) = self.stop_pending.iter().position(|id| *id == sheet) {
            self.stop_pending.remove(index);
            debug!(sheet = %sheet, "stop sheet completed");
        }
    }

    fn subscribe(&mut self, sheet: SheetId, event: MachineEvent) -> ListenerId {
        self.listeners.subscribe(sheet, event)
    }

    fn unsubscribe(&mut self, listener: ListenerId) {
        self.listeners.unsubscribe(listener);
    }

    fn send_outbox(&mut self, message: Message) {
        self.outbox.put(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::Trigger;
    use streamsheets_engine::engine::CellRef;

    fn streamsheet(machine: &Machine, name: &str, trigger: TriggerConfig, cells: &str) -> StreamSheet {
        let mut sheet = machine.new_sheet().unwrap();
        sheet.load_cells(cells).unwrap();
        StreamSheet::new(name, sheet, trigger)
    }

    fn display(machine: &Machine, sheet: &str, cell: &str) -> String {
        machine
            .streamsheet(sheet)
            .unwrap()
            .sheet()
            .display_value(&CellRef::from_str(cell).unwrap())
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut machine = Machine::new("m");
        assert!(!machine.pause());
        assert!(!machine.stop());
        assert!(machine.start());
        assert!(!machine.start());
        assert!(machine.pause());
        assert!(!machine.cycle());
        assert!(machine.start());
        assert_eq!(machine.state(), MachineState::Running);
        assert!(machine.stop());
        assert_eq!(machine.state(), MachineState::Stopped);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut machine = Machine::new("m");
        let a = streamsheet(&machine, "S1", TriggerConfig::none(), "");
        let b = streamsheet(&machine, "S1", TriggerConfig::none(), "");
        machine.add_streamsheet(a).unwrap();
        assert!(matches!(
            machine.add_streamsheet(b),
            Err(StreamsheetError::DuplicateSheet(_))
        ));
    }

    #[test]
    fn test_continuous_sheet_steps_every_cycle() {
        let mut machine = Machine::new("m");
        let s = streamsheet(&machine, "S1", TriggerConfig::new("continuously"), "A1: =A1 + 1\n");
        machine.add_streamsheet(s).unwrap();
        machine.start();
        assert_eq!(machine.run(3), 3);
        assert_eq!(display(&machine, "S1", "A1"), "3");
        assert_eq!(machine.streamsheet("S1").unwrap().stats().steps, 3);
        assert_eq!(machine.current_cycle(), 3);
    }

    #[test]
    fn test_arrival_fires_only_on_messages_while_running() {
        let mut machine = Machine::new("m");
        let s = streamsheet(&machine, "S1", TriggerConfig::new("arrival"), "A1: =A1 + 1\n");
        machine.add_streamsheet(s).unwrap();

        assert!(machine.put_message("S1", Message::new(serde_json::json!({}))));
        assert_eq!(machine.streamsheet("S1").unwrap().stats().steps, 0);

        machine.start();
        machine.run(2);
        assert_eq!(machine.streamsheet("S1").unwrap().stats().steps, 0);
        machine.put_message("S1", Message::new(serde_json::json!({})));
        assert_eq!(machine.streamsheet("S1").unwrap().stats().steps, 1);
        assert!(!machine.put_message("nobody", Message::new(Value::Null)));
    }

    #[test]
    fn test_machine_start_trigger_fires_once() {
        let mut machine = Machine::new("m");
        let s = streamsheet(&machine, "S1", TriggerConfig::new("start"), "A1: =A1 + 1\n");
        machine.add_streamsheet(s).unwrap();
        machine.start();
        machine.run(3);
        assert_eq!(display(&machine, "S1", "A1"), "1");
    }

    #[test]
    fn test_execute_error_codes() {
        let mut machine = Machine::new("m");
        let caller = streamsheet(
            &machine,
            "A",
            TriggerConfig::new("arrival"),
            "A1: =EXECUTE(\"missing\")\nA2: =EXECUTE(\"Plain\")\nA3: =EXECUTE(\"A\")\n",
        );
        let plain = streamsheet(&machine, "Plain", TriggerConfig::none(), "A1: 1\n");
        machine.add_streamsheet(caller).unwrap();
        machine.add_streamsheet(plain).unwrap();

        machine.step();
        assert_eq!(display(&machine, "A", "A1"), "#REF");
        assert_eq!(display(&machine, "A", "A2"), "#VALUE");
        assert_eq!(display(&machine, "A", "A3"), "#CALC");
    }

    #[test]
    fn test_execute_queues_arguments_with_request_id() {
        let mut machine = Machine::new("m");
        let caller = streamsheet(
            &machine,
            "A",
            TriggerConfig::new("arrival"),
            "A1: =EXECUTE(\"B\", 1, #{ n: 5 })\n",
        );
        let callee = streamsheet(
            &machine,
            "B",
            TriggerConfig::new("execute"),
            "A1: =INBOXDATA(\"n\")\nA2: =RETURN(A1 * 2)\n",
        );
        machine.add_streamsheet(caller).unwrap();
        machine.add_streamsheet(callee).unwrap();

        machine.step();
        assert_eq!(display(&machine, "B", "A1"), "5");
        assert_eq!(display(&machine, "A", "A1"), "10");
        let b = machine.streamsheet("B").unwrap();
        let message = b.inbox().peek().unwrap();
        assert!(message.metadata.request_id.is_some());
        assert_eq!(message.metadata.source.as_deref(), Some("A"));
    }

    #[test]
    fn test_outbox_collects_messages() {
        let mut machine = Machine::new("m");
        let s = streamsheet(
            &machine,
            "S1",
            TriggerConfig::new("continuously"),
            "A1: =OUTBOX(#{ n: 1 })\n",
        );
        machine.add_streamsheet(s).unwrap();
        machine.start();
        machine.run(2);
        assert_eq!(machine.outbox().size(), 2);
        assert_eq!(machine.outbox().peek().unwrap().metadata.source.as_deref(), Some("S1"));
    }

    #[test]
    fn test_remove_disposes_listeners() {
        let mut machine = Machine::new("m");
        let s = streamsheet(&machine, "S1", TriggerConfig::new("startstop"), "");
        machine.add_streamsheet(s).unwrap();
        assert_eq!(machine.listeners.len(), 2);
        assert!(machine.remove_streamsheet("S1").is_some());
        assert!(machine.listeners.is_empty());
        assert!(machine.remove_streamsheet("S1").is_none());
    }

    #[test]
    fn test_answer_for_removed_caller_is_dropped() {
        let mut machine = Machine::new("m");
        let a = streamsheet(
            &machine,
            "A",
            TriggerConfig::new("continuously"),
            "A1: =EXECUTE(\"B\", 1, #{}, true)\n",
        );
        let b = streamsheet(
            &machine,
            "B",
            TriggerConfig::endless("execute"),
            "A1: =if REPEATSTEPS() >= 2 { RETURN(7) } else { false }\n",
        );
        machine.add_streamsheet(a).unwrap();
        machine.add_streamsheet(b).unwrap();
        machine.start();

        machine.cycle();
        assert!(machine.remove_streamsheet("A").is_some());
        machine.run(3);
        assert!(machine.deferred.is_empty());
        assert!(matches!(
            machine.streamsheet("B").unwrap().trigger(),
            Trigger::Execute(execute) if execute.caller().is_none()
        ));
    }

    #[test]
    fn test_update_trigger_to_none() {
        let mut machine = Machine::new("m");
        let s = streamsheet(&machine, "S1", TriggerConfig::new("continuously"), "A1: =A1 + 1\n");
        machine.add_streamsheet(s).unwrap();
        machine.start();
        machine.run(2);
        assert!(machine.update_trigger("S1", None));
        machine.run(2);
        assert_eq!(display(&machine, "S1", "A1"), "2");
    }
}
