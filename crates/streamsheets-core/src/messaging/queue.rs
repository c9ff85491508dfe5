use std::collections::VecDeque;
use tracing::warn;

use super::message::Message;

pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded FIFO message queue, used for streamsheet inboxes and the machine outbox.
///
/// An inbox keeps its head when full: the head is the message being
/// processed, so the oldest message waiting behind it is dropped instead.
/// An outbox simply drops its oldest message.
#[derive(Debug, Clone)]
pub struct MessageBox {
    messages: VecDeque<Message>,
    capacity: usize,
    keep_head: bool,
}

pub type Inbox = MessageBox;
pub type Outbox = MessageBox;

impl MessageBox {
    pub fn inbox(capacity: usize) -> Self {
        MessageBox {
            messages: VecDeque::new(),
            capacity: capacity.max(1),
            keep_head: true,
        }
    }

    pub fn outbox(capacity: usize) -> Self {
        MessageBox {
            messages: VecDeque::new(),
            capacity: capacity.max(1),
            keep_head: false,
        }
    }

    /// Queue a message. Returns the message dropped to make room, if any.
    pub fn put(&mut self, message: Message) -> Option<Message> {
        let dropped = if self.messages.len() >= self.capacity {
            if self.keep_head && self.messages.len() > 1 {
                self.messages.remove(1)
            } else {
                self.messages.pop_front()
            }
        } else {
            None
        };
        if let Some(dropped) = &dropped {
            warn!(message = %dropped.id, capacity = self.capacity, "message box full, dropping message");
        }
        self.messages.push_back(message);
        dropped
    }

    pub fn peek(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn drain(&mut self) -> Vec<Message> {
        self.messages.drain(..).collect()
    }
}

impl Default for MessageBox {
    fn default() -> Self {
        MessageBox::inbox(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbered(n: i64) -> Message {
        Message::new(json!({ "n": n }))
    }

    #[test]
    fn test_fifo_order() {
        let mut inbox = MessageBox::default();
        inbox.put(numbered(1));
        inbox.put(numbered(2));
        assert_eq!(inbox.size(), 2);
        assert_eq!(inbox.peek().unwrap().payload, json!({ "n": 1 }));
        assert_eq!(inbox.pop().unwrap().payload, json!({ "n": 1 }));
        assert_eq!(inbox.pop().unwrap().payload, json!({ "n": 2 }));
        assert!(inbox.pop().is_none());
    }

    #[test]
    fn test_full_inbox_keeps_current_message() {
        let mut inbox = MessageBox::inbox(2);
        inbox.put(numbered(1));
        inbox.put(numbered(2));
        let dropped = inbox.put(numbered(3)).unwrap();
        assert_eq!(dropped.payload, json!({ "n": 2 }));
        assert_eq!(inbox.peek().unwrap().payload, json!({ "n": 1 }));
        assert_eq!(inbox.size(), 2);
    }

    #[test]
    fn test_full_outbox_drops_oldest() {
        let mut outbox = MessageBox::outbox(2);
        outbox.put(numbered(1));
        outbox.put(numbered(2));
        let dropped = outbox.put(numbered(3)).unwrap();
        assert_eq!(dropped.payload, json!({ "n": 1 }));
        let rest: Vec<_> = outbox.drain().into_iter().map(|m| m.payload).collect();
        assert_eq!(rest, vec![json!({ "n": 2 }), json!({ "n": 3 })]);
        assert!(outbox.is_empty());
    }
}
