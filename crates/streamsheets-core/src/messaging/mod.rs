//! Messages, inbox/outbox queues and the loop cursor.

mod cursor;
mod message;
mod queue;

pub use cursor::{Advance, LoopCursor, LoopSettings};
pub use message::{Message, Metadata};
pub use queue::{DEFAULT_CAPACITY, Inbox, MessageBox, Outbox};
