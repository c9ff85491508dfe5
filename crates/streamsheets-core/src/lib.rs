//! streamsheets-core - sheets that recalculate on triggers, fed by message
//! inboxes and scheduled by a machine.

pub mod error;
pub mod host;
pub mod machine;
pub mod messaging;
pub mod sheet;
pub mod storage;
pub mod streamsheet;
pub mod trigger;

pub use error::{Result, StreamsheetError};
pub use host::{Caller, Host, MachineEvent, MachineState, SheetId};
pub use machine::Machine;
pub use messaging::{LoopSettings, Message};
pub use sheet::Sheet;
pub use storage::{load_machine, parse_machine, save_machine};
pub use streamsheet::{Stats, StreamSheet};
pub use trigger::{Repeat, TriggerConfig, TriggerKind};

pub use streamsheets_engine::engine::CellRef;
