//! Reprioritizable priority queue keyed by (priority, transfer id).
//!
//! Backed by an ordered map whose key ordering is priority descending,
//! id descending on ties, so iteration order is deterministic and the
//! first entry is always the next one to service. A secondary id index
//! makes lookup, removal, and reprioritization O(log n) without scanning.
//!
//! Misuse is a caller bug, not a recoverable condition: pushing a
//! duplicate entry or reprioritizing an id that is not present panics.

use std::collections::{BTreeMap, HashMap};

use skein_core::TransferId;

#[derive(Debug, Clone, Copy)]
struct QueueKey {
    priority: f32,
    id: TransferId,
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    // Ascending map order = descending priority, descending id on ties.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .total_cmp(&other.priority)
            .reverse()
            .then_with(|| self.id.cmp(&other.id).reverse())
    }
}

/// Max-priority queue with stable tie ordering and id-keyed access.
#[derive(Debug, Default)]
pub struct PriQueueMap<V> {
    entries: BTreeMap<QueueKey, V>,
    priorities: HashMap<TransferId, f32>,
}

impl<V> PriQueueMap<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            priorities: HashMap::new(),
        }
    }

    /// Insert an entry. Panics if the id is already queued — two entries
    /// for one transfer would mean a duplicated transfer object upstream.
    pub fn push(&mut self, priority: f32, id: TransferId, value: V) {
        if self.priorities.insert(id, priority).is_some() {
            panic!("transfer {id} pushed twice into priority queue");
        }
        self.entries.insert(QueueKey { priority, id }, value);
    }

    /// Remove and return the highest-priority entry.
    pub fn pop(&mut self) -> Option<(TransferId, V)> {
        let (key, value) = self.entries.pop_first()?;
        self.priorities.remove(&key.id);
        Some((key.id, value))
    }

    /// Move an entry to a new priority, leaving every other entry's
    /// relative order untouched. Panics if the id is not queued, or if the
    /// index and the tree disagree — either means queue state corruption.
    pub fn reprioritize(&mut self, new_priority: f32, id: TransferId) {
        let current = match self.priorities.get(&id) {
            Some(&priority) => priority,
            None => panic!("reprioritize of unqueued transfer {id}"),
        };
        let value = self
            .entries
            .remove(&QueueKey {
                priority: current,
                id,
            })
            .unwrap_or_else(|| panic!("priority queue index corrupt for transfer {id}"));
        self.priorities.insert(id, new_priority);
        self.entries.insert(
            QueueKey {
                priority: new_priority,
                id,
            },
            value,
        );
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.priorities.contains_key(&id)
    }

    pub fn priority_of(&self, id: TransferId) -> Option<f32> {
        self.priorities.get(&id).copied()
    }

    pub fn get(&self, id: TransferId) -> Option<&V> {
        let priority = *self.priorities.get(&id)?;
        self.entries.get(&QueueKey { priority, id })
    }

    pub fn get_mut(&mut self, id: TransferId) -> Option<&mut V> {
        let priority = *self.priorities.get(&id)?;
        self.entries.get_mut(&QueueKey { priority, id })
    }

    /// Remove an entry by id. Returns None if it is not queued.
    pub fn remove(&mut self, id: TransferId) -> Option<V> {
        let priority = self.priorities.remove(&id)?;
        let value = self
            .entries
            .remove(&QueueKey { priority, id })
            .unwrap_or_else(|| panic!("priority queue index corrupt for transfer {id}"));
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in service order: priority descending, id descending on ties.
    pub fn ids_by_priority(&self) -> Vec<TransferId> {
        self.entries.keys().map(|key| key.id).collect()
    }

    /// Entries in service order.
    pub fn iter(&self) -> impl Iterator<Item = (TransferId, &V)> {
        self.entries.iter().map(|(key, value)| (key.id, value))
    }
}
