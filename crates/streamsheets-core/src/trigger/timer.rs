use rand::Rng;
use tracing::trace;

use super::{DEFAULT_INTERVAL_MS, StepTrigger, TriggerConfig, TriggerCore, TriggerKind};
use crate::host::Host;
use crate::streamsheet::SheetProcess;

/// Time based triggers (`time`, `random`, `once`).
///
/// Deadlines are measured on the machine clock (`cycle * cycletime`), so a
/// run is reproducible regardless of wall-clock jitter. A due timer fires as
/// a scheduler step on the next cycle.
pub struct TimerTrigger {
    core: TriggerCore,
    kind: TriggerKind,
    due: Option<u64>,
    fired: bool,
}

impl TimerTrigger {
    pub fn new(kind: TriggerKind, config: TriggerConfig) -> Self {
        TimerTrigger {
            core: TriggerCore::new(config),
            kind,
            due: None,
            fired: false,
        }
    }

    /// Next deadline on the machine clock, if armed.
    pub fn due(&self) -> Option<u64> {
        self.due
    }

    fn delay(&self) -> u64 {
        let config = self.core.config();
        match self.kind {
            TriggerKind::Random => {
                let min = config.min.unwrap_or(0);
                let max = config.max.unwrap_or(DEFAULT_INTERVAL_MS);
                if min < max {
                    rand::thread_rng().gen_range(min..max)
                } else {
                    min
                }
            }
            _ => config.interval.unwrap_or(DEFAULT_INTERVAL_MS),
        }
    }

    fn arm(&mut self, now: u64) {
        self.due = Some(now + self.delay());
    }
}

impl StepTrigger for TimerTrigger {
    fn kind(&self) -> TriggerKind {
        self.kind
    }

    fn core(&self) -> &TriggerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TriggerCore {
        &mut self.core
    }

    fn is_triggered(&self) -> bool {
        self.core.is_repeating() || self.due.is_some()
    }

    fn start(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        self.core.start(process);
        self.fired = false;
        self.arm(host.elapsed_ms());
    }

    fn stop(&mut self, process: &mut SheetProcess, host: &mut dyn Host) {
        self.core.stop(process, host);
        self.due = None;
        self.fired = false;
    }

    fn step(&mut self, process: &mut SheetProcess, manual: bool, host: &mut dyn Host) {
        if manual {
            self.core.step(process, true, host);
            return;
        }

        let now = host.elapsed_ms();
        if self.due.is_none() {
            if self.kind == TriggerKind::Once && self.fired {
                return;
            }
            // Added while the machine was already running.
            self.arm(now);
        }
        let Some(due) = self.due else {
            return;
        };
        if now < due {
            return;
        }

        trace!(sheet = %process.name(), due, now, "timer fired");
        if self.kind == TriggerKind::Once {
            self.fired = true;
            self.due = None;
        } else {
            self.arm(now);
        }
        self.core.step(process, false, host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_delay_within_bounds() {
        let timer = TimerTrigger::new(
            TriggerKind::Random,
            TriggerConfig::new("random").with_range(100, 200),
        );
        for _ in 0..50 {
            let delay = timer.delay();
            assert!((100..200).contains(&delay));
        }
    }

    #[test]
    fn test_degenerate_random_range_uses_min() {
        let timer = TimerTrigger::new(
            TriggerKind::Random,
            TriggerConfig::new("random").with_range(300, 300),
        );
        assert_eq!(timer.delay(), 300);
    }

    #[test]
    fn test_interval_defaults() {
        let timer = TimerTrigger::new(TriggerKind::Time, TriggerConfig::new("time"));
        assert_eq!(timer.delay(), DEFAULT_INTERVAL_MS);
        let timer = TimerTrigger::new(TriggerKind::Once, TriggerConfig::new("once").with_interval(5));
        assert_eq!(timer.delay(), 5);
    }
}
