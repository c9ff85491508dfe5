use std::collections::VecDeque;

use crate::host::{SheetId, TaskId};

#[derive(Clone, Copy, Debug)]
struct Task {
    id: TaskId,
    sheet: SheetId,
    turn: u64,
}

/// Deferred repeats, drained one turn at a time.
///
/// A turn only runs the tasks that were queued before it began. Tasks queued
/// while a turn runs carry that turn's number and wait for the next one.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    next_id: u64,
    turn: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, sheet: SheetId) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.tasks.push_back(Task {
            id,
            sheet,
            turn: self.turn,
        });
        id
    }

    /// Remove a queued task. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    /// Begin a turn and return its number.
    pub fn start_turn(&mut self) -> u64 {
        self.turn += 1;
        self.turn
    }

    /// Pop the next task that was queued before `turn` began.
    pub fn next_due(&mut self, turn: u64) -> Option<(TaskId, SheetId)> {
        match self.tasks.front() {
            Some(task) if task.turn < turn => {
                let task = self.tasks.pop_front()?;
                Some((task.id, task.sheet))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
