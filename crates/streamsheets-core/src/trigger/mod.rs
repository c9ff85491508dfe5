//! Triggers decide when a streamsheet recalculates.
//!
//! Every trigger variant implements [`StepTrigger`] and composes a
//! [`TriggerCore`] for the shared bookkeeping (active flag, repeat run,
//! pending deferred repeat). [`Trigger`] is the closed set of variants the
//! factory can build from a [`TriggerConfig`].
//!
//! Conventions:
//! - A scheduler step is `step(manual = false)`, issued once per machine cycle.
//! - A manual step is `step(manual = true)`, issued by `Machine::step`.
//! - Endless progression runs through deferred repeats in the machine's task
//!   queue. The next repeat is always scheduled before the current pass runs.

mod arrival;
mod base;
mod continuous;
mod execute;
mod machine_event;
mod none;
mod timer;

pub use arrival::ArrivalTrigger;
pub use base::TriggerCore;
pub use continuous::ContinuousTrigger;
pub use execute::ExecuteTrigger;
pub use machine_event::MachineEventTrigger;
pub use none::NoneTrigger;
pub use timer::TimerTrigger;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::host::{Host, MachineEvent, TaskId};
use crate::streamsheet::SheetProcess;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Arrival,
    Continuously,
    Execute,
    MachineStart,
    MachineStop,
    MachineStartStop,
    None,
    Random,
    Time,
    Once,
}

pub struct TriggerType {
    pub name: &'static str,
    pub kind: TriggerKind,
    pub description: &'static str,
}

/// Every trigger type name accepted in configuration.
pub static TRIGGER_TYPES: &[TriggerType] = &[
    TriggerType {
        name: "arrival",
        kind: TriggerKind::Arrival,
        description: "Calculate when a message arrives in the inbox",
    },
    TriggerType {
        name: "continuously",
        kind: TriggerKind::Continuously,
        description: "Calculate on every machine cycle",
    },
    TriggerType {
        name: "always",
        kind: TriggerKind::Continuously,
        description: "Alias of continuously",
    },
    TriggerType {
        name: "execute",
        kind: TriggerKind::Execute,
        description: "Calculate when another streamsheet calls EXECUTE",
    },
    TriggerType {
        name: "start",
        kind: TriggerKind::MachineStart,
        description: "Calculate when the machine starts",
    },
    TriggerType {
        name: "stop",
        kind: TriggerKind::MachineStop,
        description: "Calculate when the machine stops",
    },
    TriggerType {
        name: "startstop",
        kind: TriggerKind::MachineStartStop,
        description: "Calculate when the machine starts and when it stops",
    },
    TriggerType {
        name: "none",
        kind: TriggerKind::None,
        description: "Never calculate",
    },
    TriggerType {
        name: "random",
        kind: TriggerKind::Random,
        description: "Calculate after a random delay between min and max ms",
    },
    TriggerType {
        name: "time",
        kind: TriggerKind::Time,
        description: "Calculate every interval ms",
    },
    TriggerType {
        name: "once",
        kind: TriggerKind::Once,
        description: "Calculate once, interval ms after start",
    },
];

impl TriggerKind {
    /// Look up a type name. Unknown or empty names fall back to arrival.
    pub fn from_name(name: &str) -> TriggerKind {
        let name = name.trim();
        TRIGGER_TYPES
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.kind)
            .unwrap_or(TriggerKind::Arrival)
    }

    pub fn name(&self) -> &'static str {
        TRIGGER_TYPES
            .iter()
            .find(|t| t.kind == *self)
            .map(|t| t.name)
            .unwrap_or("arrival")
    }

    pub fn events(&self) -> &'static [MachineEvent] {
        match self {
            TriggerKind::MachineStart => &[MachineEvent::Start],
            TriggerKind::MachineStop => &[MachineEvent::Stop],
            TriggerKind::MachineStartStop => &[MachineEvent::Start, MachineEvent::Stop],
            _ => &[],
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    #[default]
    Once,
    Endless,
}

pub const DEFAULT_INTERVAL_MS: u64 = 1000;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub repeat: Repeat,
    /// Period of `time`, delay of `once` (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Bounds of the `random` delay (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

impl TriggerConfig {
    pub fn new(kind: &str) -> Self {
        TriggerConfig {
            kind: Some(kind.to_string()),
            ..TriggerConfig::default()
        }
    }

    pub fn endless(kind: &str) -> Self {
        TriggerConfig {
            repeat: Repeat::Endless,
            ..TriggerConfig::new(kind)
        }
    }

    pub fn none() -> Self {
        TriggerConfig::new("none")
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_range(mut self, min: u64, max: u64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn trigger_kind(&self) -> TriggerKind {
        TriggerKind::from_name(self.kind.as_deref().unwrap_or(""))
    }

    pub fn is_endless(&self) -> bool {
        self.repeat == Repeat::Endless
    }
}

/// The step/repeat contract shared by all trigger variants.
pub trait StepTrigger {
    fn kind(&self) -> TriggerKind;
    fn core(&self) -> &TriggerCore;
    fn core_mut(&mut self) -> &mut TriggerCore;

    fn is_endless(&self) -> bool {
        self.core().is_endless()
    }

    /// Whether the trigger currently drives a run of its streamsheet.
    fn is_triggered(&self) -> bool {
        self.core().is_repeating()
    }

    /// Bind to the machine (machine-event triggers subscribe here).
    fn attach(&mut self, _process: &SheetProcess, _host: &mut dyn Host) {}

    /// Detach from the machine. Disposing twice is a no-op.
    fn dispose(&mut self, host: &mut dyn Host) {
        self.core_mut().cancel(host);
    }

    fn start(&mut self, process: &mut SheetProcess, _host: &mut dyn Host) {
        self.core_mut().start(process);
    }

    fn pause(&mut self, host: &mut dyn Host) {
        self.core_mut().pause(host);
    }

    fn resume(&mut self) {
        self.core_mut().resume();
    }

    fn stop(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        self.core_mut().stop(process, host);
    }

    fn stop_repeat(&mut self, host: &mut dyn Host) {
        self.core_mut().stop_repeat(host);
    }

    fn step(&mut self, process: &mut SheetProcess, manual: bool, host: &mut dyn Host);

    /// A deferred repeat came due.
    fn repeat(&mut self, task: TaskId, process: &mut SheetProcess, host: &mut dyn Host) {
        self.core_mut().repeat(task, process, host);
    }

    /// Continue a pass that was interrupted by a blocking call.
    fn resume_processing(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        self.core_mut().resume_processing(process, host);
    }

    fn on_machine_event(
        &mut self,
        _event: MachineEvent,
        _process: &mut SheetProcess,
        _host: &mut dyn Host,
    ) {
    }

    /// A message was put into the inbox while the machine is running.
    fn on_message(&mut self, _process: &mut SheetProcess, _host: &mut dyn Host) {}
}

/// The closed set of trigger variants.
pub enum Trigger {
    None(NoneTrigger),
    Continuously(ContinuousTrigger),
    Execute(ExecuteTrigger),
    Arrival(ArrivalTrigger),
    MachineEvent(MachineEventTrigger),
    Timer(TimerTrigger),
}

impl Trigger {
    /// Build the trigger for a configuration. Never fails: unknown types
    /// become arrival triggers.
    pub fn from_config(config: TriggerConfig) -> Trigger {
        match config.trigger_kind() {
            TriggerKind::None => Trigger::None(NoneTrigger::new(config)),
            TriggerKind::Continuously => Trigger::Continuously(ContinuousTrigger::new(config)),
            TriggerKind::Execute => Trigger::Execute(ExecuteTrigger::new(config)),
            TriggerKind::Arrival => Trigger::Arrival(ArrivalTrigger::new(config)),
            kind @ (TriggerKind::MachineStart
            | TriggerKind::MachineStop
            | TriggerKind::MachineStartStop) => {
                Trigger::MachineEvent(MachineEventTrigger::new(kind, config))
            }
            kind @ (TriggerKind::Random | TriggerKind::Time | TriggerKind::Once) => {
                Trigger::Timer(TimerTrigger::new(kind, config))
            }
        }
    }

    pub fn as_step(&self) -> &dyn StepTrigger {
        match self {
            Trigger::None(t) => t,
            Trigger::Continuously(t) => t,
            Trigger::Execute(t) => t,
            Trigger::Arrival(t) => t,
            Trigger::MachineEvent(t) => t,
            Trigger::Timer(t) => t,
        }
    }

    pub fn as_step_mut(&mut self) -> &mut dyn StepTrigger {
        match self {
            Trigger::None(t) => t,
            Trigger::Continuously(t) => t,
            Trigger::Execute(t) => t,
            Trigger::Arrival(t) => t,
            Trigger::MachineEvent(t) => t,
            Trigger::Timer(t) => t,
        }
    }

    pub fn kind(&self) -> TriggerKind {
        self.as_step().kind()
    }

    pub fn config(&self) -> &TriggerConfig {
        self.as_step().core().config()
    }

    pub fn is_endless(&self) -> bool {
        self.as_step().is_endless()
    }
}
