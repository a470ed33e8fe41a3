//! In-memory admission queue with priority ordering and an id index.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::core::Task;
use crate::util::serde::{Priority, TaskId};

/// Ordering key of a queued task: highest priority first, FIFO on the
/// ordering time within a priority, then submission sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    priority: Priority,
    ordered_at: DateTime<Utc>,
    seq: u64,
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first (reversed so it sorts to the front)
        match other.priority.cmp(&self.priority) {
            Ordering::Equal => self
                .ordered_at
                .cmp(&other.ordered_at)
                .then_with(|| self.seq.cmp(&other.seq)),
            other => other,
        }
    }
}

/// Priority queue of pending tasks.
///
/// A `BTreeMap` keeps the admission order and a `HashMap` indexes entries by
/// task id, so peek, push, pop, lookup and removal by id are all O(log n)
/// or better.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    order: BTreeMap<QueueKey, TaskId>,
    entries: HashMap<TaskId, (QueueKey, Task)>,
    next_seq: u64,
}

impl AdmissionQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task at its priority position. A task already queued under
    /// the same id is replaced.
    pub fn push(&mut self, task: Task) {
        self.remove(&task.id);
        let key = QueueKey {
            priority: task.priority,
            ordered_at: task.ordered_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.order.insert(key, task.id);
        self.entries.insert(task.id, (key, task));
    }

    /// Next task to admit, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Task> {
        let (_, id) = self.order.first_key_value()?;
        self.entries.get(id).map(|(_, task)| task)
    }

    /// Remove and return the next task to admit.
    pub fn pop(&mut self) -> Option<Task> {
        let (_, id) = self.order.pop_first()?;
        self.entries.remove(&id).map(|(_, task)| task)
    }

    /// Remove a specific task.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let (key, task) = self.entries.remove(id)?;
        self.order.remove(&key);
        Some(task)
    }

    /// Look up a queued task.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.entries.get(id).map(|(_, task)| task)
    }

    /// Whether the task is queued.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    /// Queued tasks in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> + '_ {
        self.order
            .values()
            .filter_map(|id| self.entries.get(id).map(|(_, task)| task))
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
