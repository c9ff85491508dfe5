use crate::host::{ListenerId, MachineEvent, SheetId};

/// Machine-event subscriptions, in subscription order.
#[derive(Debug, Default)]
pub struct Listeners {
    entries: Vec<(ListenerId, SheetId, MachineEvent)>,
    next_id: u64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sheet: SheetId, event: MachineEvent) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, sheet, event));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(listener, _, _)| *listener != id);
        self.entries.len() != before
    }

    pub fn is_listening(&self, sheet: SheetId, event: MachineEvent) -> bool {
        self.entries
            .iter()
            .any(|(_, s, e)| *s == sheet && *e == event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
