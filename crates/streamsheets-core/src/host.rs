//! The interface a streamsheet uses to reach the machine that runs it.
//!
//! Triggers and call sites never hold a reference to the machine. Every
//! operation that needs the scheduler receives a `&mut dyn Host` instead,
//! which the machine provides while it has the streamsheet taken out of its
//! slot.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use streamsheets_engine::engine::{CellRef, Dynamic, ExecuteRequest};

use crate::messaging::Message;
use crate::sheet::CallStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(Uuid);

impl SheetId {
    pub fn new() -> Self {
        SheetId(Uuid::new_v4())
    }
}

impl Default for SheetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a deferred repeat in the machine's task queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Handle of a machine-event subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    Stopped,
    Running,
    Paused,
    /// Stop was requested; endless stop sheets are still finishing.
    WillStop,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MachineState::Stopped => "stopped",
            MachineState::Running => "running",
            MachineState::Paused => "paused",
            MachineState::WillStop => "will_stop",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MachineEvent {
    Start,
    Stop,
}

/// The cell that issued an `EXECUTE` and is waiting for its answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub sheet: SheetId,
    pub at: CellRef,
    /// A blocking caller pauses its processing until the call resolves.
    pub blocking: bool,
}

pub trait Host {
    fn current_cycle(&self) -> u64;

    /// Machine clock in milliseconds (`cycle * cycletime`).
    fn elapsed_ms(&self) -> u64;

    fn state(&self) -> MachineState;

    fn schedule_repeat(&mut self, sheet: SheetId) -> TaskId;

    fn cancel_repeat(&mut self, task: TaskId);

    /// Run `EXECUTE` on the named streamsheet on behalf of `caller`.
    fn execute(&mut self, caller: Caller, request: &ExecuteRequest) -> CallStatus;

    /// Answer a call that reported `Waiting`.
    fn resolve_call(&mut self, caller: Caller, value: Dynamic);

    /// A streamsheet finished its run with `RETURN`.
    fn signal_completion(&mut self, sheet: SheetId);

    fn subscribe(&mut self, sheet: SheetId, event: MachineEvent) -> ListenerId;

    fn unsubscribe(&mut self, listener: ListenerId);

    fn send_outbox(&mut self, message: Message);
}
