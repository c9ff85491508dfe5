use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use streamsheets_engine::engine::{CellRef, Dynamic, ExecuteRequest, PassInfo};

use super::calls::CallTable;
use crate::host::{Caller, Host, SheetId};
use crate::messaging::{Advance, Inbox, LoopCursor, LoopSettings, Message, MessageBox};
use crate::sheet::{CallStatus, DirectiveHandler, PassEnd, PassOutcome, Sheet};

/// Run statistics of a streamsheet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Triggered steps (one per repeat run for endless triggers).
    pub steps: u64,
    /// Passes within the current repeat run.
    pub repeatsteps: u64,
}

/// Everything a streamsheet owns except its trigger.
///
/// Triggers drive a `SheetProcess`: they decide when [`SheetProcess::run_pass`]
/// is called and how the step counters move.
pub struct SheetProcess {
    id: SheetId,
    name: String,
    sheet: Sheet,
    inbox: Inbox,
    cursor: LoopCursor,
    loop_settings: LoopSettings,
    stats: Stats,
    calls: CallTable,
    paused: bool,
    resume_requested: bool,
}

/// Routes the directives of one pass to the call table and the host.
struct CallSite<'a> {
    caller: SheetId,
    source: &'a str,
    calls: &'a mut CallTable,
    host: &'a mut dyn Host,
}

impl DirectiveHandler for CallSite<'_> {
    fn on_execute(&mut self, at: &CellRef, request: ExecuteRequest) -> CallStatus {
        if let Some(status) = self.calls.poll(at) {
            return status;
        }
        let caller = Caller {
            sheet: self.caller,
            at: at.clone(),
            blocking: !request.asynchronous,
        };
        let status = self.host.execute(caller, &request);
        if let CallStatus::Waiting { blocking } = status {
            self.calls.wait(at.clone(), blocking);
        }
        status
    }

    fn on_outbox(&mut self, payload: Value) {
        self.host
            .send_outbox(Message::new(payload).with_source(self.source));
    }
}

impl SheetProcess {
    pub fn new(name: impl Into<String>, sheet: Sheet) -> Self {
        SheetProcess {
            id: SheetId::new(),
            name: name.into(),
            sheet,
            inbox: MessageBox::default(),
            cursor: LoopCursor::new(),
            loop_settings: LoopSettings::default(),
            stats: Stats::default(),
            calls: CallTable::new(),
            paused: false,
            resume_requested: false,
        }
    }

    pub fn id(&self) -> SheetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn sheet_mut(&mut self) -> &mut Sheet {
        &mut self.sheet
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn inbox_mut(&mut self) -> &mut Inbox {
        &mut self.inbox
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    pub fn loop_settings(&self) -> &LoopSettings {
        &self.loop_settings
    }

    pub fn set_loop_settings(&mut self, settings: LoopSettings) {
        self.loop_settings = settings;
        self.cursor.reset();
    }

    pub fn set_inbox_capacity(&mut self, capacity: usize) {
        let mut inbox = MessageBox::inbox(capacity);
        for message in self.inbox.drain() {
            inbox.put(message);
        }
        self.inbox = inbox;
    }

    /// Loop index visible to the current (or next) pass.
    pub fn loop_index(&self) -> usize {
        self.cursor.loop_index(&self.inbox, &self.loop_settings)
    }

    /// Whether queued input is still waiting for a pass.
    pub fn has_backlog(&self) -> bool {
        self.cursor.has_backlog(&self.inbox, &self.loop_settings)
    }

    pub fn current_message(&self) -> Option<&Message> {
        self.inbox.peek()
    }

    pub fn put_message(&mut self, message: Message) -> Option<Message> {
        self.inbox.put(message)
    }

    /// Mark the current message as consumed; the next pass pops it.
    pub fn finish_message(&mut self) {
        self.cursor.schedule(Advance::Message);
    }

    pub fn is_processing_paused(&self) -> bool {
        self.paused
    }

    /// Stop processing until [`SheetProcess::resume_processing`]; steps are
    /// ignored meanwhile.
    pub fn pause_processing(&mut self) {
        self.paused = true;
    }

    pub fn resume_processing(&mut self) {
        self.paused = false;
        self.resume_requested = self.sheet.is_interrupted();
    }

    /// Whether an interrupted pass is ready to continue.
    pub fn wants_resume(&self) -> bool {
        self.resume_requested && !self.paused
    }

    pub fn take_resume_request(&mut self) -> bool {
        std::mem::take(&mut self.resume_requested)
    }

    /// Deliver the answer of a call issued at `at`.
    pub fn resolve_call(&mut self, at: &CellRef, value: Dynamic, blocking: bool) {
        if !self.calls.resolve(at, value) {
            debug!(sheet = %self.name, cell = %at, "dropping answer for unknown call");
            return;
        }
        if blocking {
            self.paused = false;
            self.resume_requested = true;
        }
    }

    /// Forget outstanding calls and any interrupted pass.
    pub fn reset_calls(&mut self) {
        self.calls.clear();
        self.sheet.clear_interruption();
        self.paused = false;
        self.resume_requested = false;
    }

    /// Run one calculation pass.
    ///
    /// The loop cursor moves first (unless an interrupted pass is resumed),
    /// then the sheet is evaluated, then the cursor advance for the next
    /// pass is recorded from the outcome.
    pub fn run_pass(&mut self, host: &mut dyn Host, repeating: bool) -> PassOutcome {
        if !self.sheet.is_interrupted() {
            self.cursor.pre_step(&mut self.inbox, &self.loop_settings);
        }

        let info = PassInfo {
            message: self.inbox.peek().map(|m| m.payload.clone()),
            loop_element: self
                .cursor
                .element(&self.inbox, &self.loop_settings)
                .cloned(),
            loop_index: self.cursor.loop_index(&self.inbox, &self.loop_settings),
            steps: self.stats.steps,
            repeatsteps: self.stats.repeatsteps,
            cycle: host.current_cycle(),
        };

        let mut site = CallSite {
            caller: self.id,
            source: &self.name,
            calls: &mut self.calls,
            host,
        };
        let outcome = self.sheet.execute_pass(info, &mut site);

        let advance = match outcome.end {
            PassEnd::Returned(_) => Advance::Message,
            _ if outcome.completed() && repeating => Advance::Element,
            _ if outcome.completed() => Advance::Next,
            _ => Advance::None,
        };
        self.cursor.schedule(advance);
        if matches!(outcome.end, PassEnd::Interrupted) {
            self.paused = true;
        }

        trace!(
            sheet = %self.name,
            steps = self.stats.steps,
            repeatsteps = self.stats.repeatsteps,
            evaluated = outcome.evaluated,
            end = ?outcome.end,
            "pass finished"
        );
        outcome
    }
}
