//! Loop cursor over an array inside the current inbox message.
//!
//! The cursor is advanced lazily: the end of a pass records how the cursor
//! should move ([`Advance`]) and the start of the next pass applies it. This
//! keeps the message and element a formula saw stable until the next step.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::queue::MessageBox;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopSettings {
    /// Dotted path or JSON pointer naming an array in the payload.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub enabled: bool,
}

impl LoopSettings {
    pub fn over(path: impl Into<String>) -> Self {
        LoopSettings {
            path: path.into(),
            enabled: true,
        }
    }
}

/// How the cursor moves before the next pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Advance {
    /// Stay on the current element (the pass did not complete).
    #[default]
    None,
    /// Next element, pinning at the last one. Used inside repeat runs.
    Element,
    /// Next element; past the pinned last element, the next message.
    Next,
    /// The message was consumed by `RETURN` or an `EXECUTE` call.
    Message,
}

#[derive(Clone, Debug, Default)]
pub struct LoopCursor {
    message: Option<Uuid>,
    index: usize,
    pinned: bool,
    pending: Advance,
}

impl LoopCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how the cursor should move before the next pass.
    ///
    /// A consumed message is never downgraded by a later, weaker advance.
    pub fn schedule(&mut self, advance: Advance) {
        if self.pending != Advance::Message {
            self.pending = advance;
        }
    }

    pub fn pending(&self) -> Advance {
        self.pending
    }

    /// Apply the recorded advance and attach to the current head message.
    pub fn pre_step(&mut self, inbox: &mut MessageBox, settings: &LoopSettings) {
        let len = self.current_len(inbox, settings);
        match std::mem::take(&mut self.pending) {
            Advance::None => {}
            Advance::Element => {
                if self.index < len {
                    self.index += 1;
                }
            }
            Advance::Next => {
                if len == 0 {
                    self.consume(inbox, settings);
                } else if self.index < len {
                    self.index += 1;
                } else if !self.pinned {
                    self.pinned = true;
                } else {
                    self.consume(inbox, settings);
                }
            }
            Advance::Message => self.consume(inbox, settings),
        }
        self.attach(inbox, settings);
    }

    fn consume(&mut self, inbox: &mut MessageBox, settings: &LoopSettings) {
        // Looping over the only queued message starts over instead of
        // leaving the sheet without input.
        if settings.enabled && inbox.size() == 1 && self.current_len(inbox, settings) > 0 {
            self.index = 1;
            self.pinned = false;
            return;
        }
        inbox.pop();
        self.message = None;
    }

    fn attach(&mut self, inbox: &MessageBox, settings: &LoopSettings) {
        let head = inbox.peek().map(|m| m.id);
        if head != self.message {
            self.message = head;
            self.pinned = false;
            self.index = if self.current_len(inbox, settings) > 0 { 1 } else { 0 };
        }
    }

    fn current_len(&self, inbox: &MessageBox, settings: &LoopSettings) -> usize {
        if !settings.enabled {
            return 0;
        }
        inbox.peek().map_or(0, |m| m.array_len(&settings.path))
    }

    /// 1-based loop index; 0 when looping is off, no message is present or
    /// the path does not name a non-empty array.
    pub fn loop_index(&self, inbox: &MessageBox, settings: &LoopSettings) -> usize {
        let len = self.current_len(inbox, settings);
        if len == 0 || self.message != inbox.peek().map(|m| m.id) {
            return 0;
        }
        self.index.min(len)
    }

    pub fn element<'a>(&self, inbox: &'a MessageBox, settings: &LoopSettings) -> Option<&'a Value> {
        let index = self.loop_index(inbox, settings);
        inbox.peek()?.element(&settings.path, index)
    }

    /// Whether the recorded advance leaves input the sheet has not processed
    /// yet: another element of the attached message, or a message queued
    /// behind it. Incomplete passes and repeat runs report none; the last
    /// message never rewinds here.
    pub fn has_backlog(&self, inbox: &MessageBox, settings: &LoopSettings) -> bool {
        let Some(head) = inbox.peek() else {
            return false;
        };
        if self.message != Some(head.id) {
            return false;
        }
        let queued_behind = inbox.size() > 1;
        match self.pending {
            Advance::None | Advance::Element => false,
            Advance::Message => queued_behind,
            Advance::Next => {
                let len = self.current_len(inbox, settings);
                (len > 0 && (self.index < len || !self.pinned)) || queued_behind
            }
        }
    }

    /// Forget the position, e.g. after the inbox was cleared.
    pub fn reset(&mut self) {
        *self = LoopCursor::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Message;
    use serde_json::json;

    fn two_by_two() -> MessageBox {
        let mut inbox = MessageBox::default();
        inbox.put(Message::new(json!({ "items": [1, 2] })));
        inbox.put(Message::new(json!({ "items": [3, 4] })));
        inbox
    }

    #[test]
    fn test_completed_passes_walk_pin_and_pop() {
        let mut inbox = two_by_two();
        let settings = LoopSettings::over("items");
        let mut cursor = LoopCursor::new();
        let mut seen = Vec::new();
        for _ in 0..8 {
            cursor.pre_step(&mut inbox, &settings);
            seen.push(cursor.loop_index(&inbox, &settings));
            cursor.schedule(Advance::Next);
        }
        assert_eq!(seen, vec![1, 2, 2, 1, 2, 2, 1, 2]);
        assert_eq!(inbox.size(), 1);
    }

    #[test]
    fn test_incomplete_pass_keeps_position() {
        let mut inbox = two_by_two();
        let settings = LoopSettings::over("items");
        let mut cursor = LoopCursor::new();
        cursor.pre_step(&mut inbox, &settings);
        cursor.schedule(Advance::None);
        cursor.pre_step(&mut inbox, &settings);
        assert_eq!(cursor.loop_index(&inbox, &settings), 1);
        assert_eq!(cursor.element(&inbox, &settings), Some(&json!(1)));
    }

    #[test]
    fn test_without_looping_every_completed_pass_pops() {
        let mut inbox = two_by_two();
        let settings = LoopSettings::default();
        let mut cursor = LoopCursor::new();
        cursor.pre_step(&mut inbox, &settings);
        assert_eq!(cursor.loop_index(&inbox, &settings), 0);
        cursor.schedule(Advance::Next);
        cursor.pre_step(&mut inbox, &settings);
        assert_eq!(inbox.peek().unwrap().payload, json!({ "items": [3, 4] }));
        cursor.schedule(Advance::Next);
        cursor.pre_step(&mut inbox, &settings);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_consumed_message_is_not_downgraded() {
        let mut inbox = two_by_two();
        let settings = LoopSettings::over("items");
        let mut cursor = LoopCursor::new();
        cursor.pre_step(&mut inbox, &settings);
        cursor.schedule(Advance::Message);
        cursor.schedule(Advance::Element);
        cursor.pre_step(&mut inbox, &settings);
        assert_eq!(inbox.size(), 1);
        assert_eq!(cursor.loop_index(&inbox, &settings), 1);
    }

    #[test]
    fn test_backlog_follows_pending_advance() {
        let mut inbox = two_by_two();
        let settings = LoopSettings::over("items");
        let mut cursor = LoopCursor::new();
        assert!(!cursor.has_backlog(&inbox, &settings));

        cursor.pre_step(&mut inbox, &settings);
        cursor.schedule(Advance::None);
        assert!(!cursor.has_backlog(&inbox, &settings));
        cursor.schedule(Advance::Next);
        assert!(cursor.has_backlog(&inbox, &settings));

        // Onto the second message and its last element.
        for _ in 0..3 {
            cursor.pre_step(&mut inbox, &settings);
            cursor.schedule(Advance::Next);
        }
        cursor.pre_step(&mut inbox, &settings);
        cursor.schedule(Advance::Next);
        assert_eq!(inbox.size(), 1);
        assert_eq!(cursor.loop_index(&inbox, &settings), 2);
        assert!(cursor.has_backlog(&inbox, &settings));
        cursor.pre_step(&mut inbox, &settings);
        cursor.schedule(Advance::Next);
        assert!(!cursor.has_backlog(&inbox, &settings));
    }

    #[test]
    fn test_consumed_message_leaves_backlog_only_behind_it() {
        let mut inbox = two_by_two();
        let settings = LoopSettings::default();
        let mut cursor = LoopCursor::new();
        cursor.pre_step(&mut inbox, &settings);
        cursor.schedule(Advance::Message);
        assert!(cursor.has_backlog(&inbox, &settings));
        cursor.pre_step(&mut inbox, &settings);
        cursor.schedule(Advance::Message);
        assert!(!cursor.has_backlog(&inbox, &settings));
    }

    #[test]
    fn test_loop_index_zero_without_array() {
        let mut inbox = MessageBox::default();
        let settings = LoopSettings::over("items");
        let mut cursor = LoopCursor::new();
        cursor.pre_step(&mut inbox, &settings);
        assert_eq!(cursor.loop_index(&inbox, &settings), 0);

        inbox.put(Message::new(json!({ "items": "scalar" })));
        cursor.pre_step(&mut inbox, &settings);
        assert_eq!(cursor.loop_index(&inbox, &settings), 0);
    }
}
