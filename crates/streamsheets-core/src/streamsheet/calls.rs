use std::collections::HashMap;

use streamsheets_engine::engine::{CellRef, Dynamic};

use crate::sheet::CallStatus;

#[derive(Clone, Debug)]
enum PendingCall {
    Waiting { blocking: bool },
    Resolved(Dynamic),
}

/// Outgoing `EXECUTE` calls of one streamsheet, keyed by call-site cell.
///
/// Re-evaluating a waiting call site reports `Waiting` without calling
/// again. A resolved answer is handed out once and then forgotten, so the
/// next evaluation of the cell issues a fresh call.
#[derive(Clone, Debug, Default)]
pub struct CallTable {
    calls: HashMap<CellRef, PendingCall>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of the call issued at `at`, if one is outstanding or answered.
    pub fn poll(&mut self, at: &CellRef) -> Option<CallStatus> {
        match self.calls.get(at)? {
            PendingCall::Waiting { blocking } => Some(CallStatus::Waiting {
                blocking: *blocking,
            }),
            PendingCall::Resolved(_) => match self.calls.remove(at) {
                Some(PendingCall::Resolved(value)) => Some(CallStatus::Done(value)),
                _ => None,
            },
        }
    }

    pub fn wait(&mut self, at: CellRef, blocking: bool) {
        self.calls.insert(at, PendingCall::Waiting { blocking });
    }

    /// Record the answer for a waiting call. Unknown call sites are ignored.
    pub fn resolve(&mut self, at: &CellRef, value: Dynamic) -> bool {
        match self.calls.get_mut(at) {
            Some(entry @ PendingCall::Waiting { .. }) => {
                *entry = PendingCall::Resolved(value);
                true
            }
            _ => false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.calls
            .values()
            .any(|c| matches!(c, PendingCall::Waiting { .. }))
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}
