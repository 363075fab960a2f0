// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use fetcharr_domain::{ItemId, ItemState};

/// In-memory FIFOs of item ids keyed by state. The store stays
/// authoritative; queues are rebuilt from it on startup and kept in step by
/// the same code paths that perform transitions. Ids are unique across all
/// queues because an item has exactly one state.
#[derive(Default)]
pub struct QueueSet {
    queues: Mutex<HashMap<ItemState, VecDeque<ItemId>>>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace queue contents from `(id, state)` rows in store order.
    /// Terminal states carry no queue and are ignored.
    pub fn rebuild(&self, rows: impl IntoIterator<Item = (ItemId, ItemState)>) {
        let mut queues = self.lock();
        queues.clear();
        for (id, state) in rows {
            if ItemState::queue_states().contains(&state) {
                queues.entry(state).or_default().push_back(id);
            }
        }
    }

    pub fn enqueue(&self, state: ItemState, id: ItemId) {
        let mut queues = self.lock();
        let queue = queues.entry(state).or_default();
        if !queue.contains(&id) {
            queue.push_back(id);
        }
    }

    pub fn pop(&self, state: ItemState) -> Option<ItemId> {
        self.lock().get_mut(&state)?.pop_front()
    }

    /// Drain up to `limit` ids from the front of a queue.
    pub fn pop_batch(&self, state: ItemState, limit: usize) -> Vec<ItemId> {
        let mut queues = self.lock();
        let Some(queue) = queues.get_mut(&state) else {
            return Vec::new();
        };
        let take = limit.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Drop the id from whichever queue holds it.
    pub fn remove(&self, id: ItemId) {
        let mut queues = self.lock();
        for queue in queues.values_mut() {
            queue.retain(|held| *held != id);
        }
    }

    /// Move an id between queues, preserving arrival order in the target.
    pub fn requeue(&self, id: ItemId, to: ItemState) {
        self.remove(id);
        if ItemState::queue_states().contains(&to) {
            self.enqueue(to, id);
        }
    }

    pub fn len(&self, state: ItemState) -> usize {
        self.lock().get(&state).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, state: ItemState) -> bool {
        self.len(state) == 0
    }

    pub fn snapshot(&self, state: ItemState) -> Vec<ItemId> {
        self.lock()
            .get(&state)
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Queue lengths for every non-empty queue, for the admin surface.
    pub fn depths(&self) -> Vec<(ItemState, usize)> {
        let queues = self.lock();
        let mut depths: Vec<(ItemState, usize)> = queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(state, q)| (*state, q.len()))
            .collect();
        depths.sort_by_key(|(state, _)| state.as_str());
        depths
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ItemState, VecDeque<ItemId>>> {
        self.queues.lock().expect("queue lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let queues = QueueSet::new();
        let ids: Vec<ItemId> = (0..3).map(|_| ItemId::new()).collect();

        for id in &ids {
            queues.enqueue(ItemState::Wanted, *id);
        }

        assert_eq!(queues.pop(ItemState::Wanted), Some(ids[0]));
        assert_eq!(queues.pop(ItemState::Wanted), Some(ids[1]));
        assert_eq!(queues.pop(ItemState::Wanted), Some(ids[2]));
        assert_eq!(queues.pop(ItemState::Wanted), None);
    }

    #[test]
    fn enqueue_is_idempotent_per_id() {
        let queues = QueueSet::new();
        let id = ItemId::new();
        queues.enqueue(ItemState::Scraping, id);
        queues.enqueue(ItemState::Scraping, id);
        assert_eq!(queues.len(ItemState::Scraping), 1);
    }

    #[test]
    fn rebuild_skips_terminal_states() {
        let queues = QueueSet::new();
        let wanted = ItemId::new();
        let collected = ItemId::new();

        queues.rebuild([
            (wanted, ItemState::Wanted),
            (collected, ItemState::Collected),
        ]);

        assert_eq!(queues.len(ItemState::Wanted), 1);
        assert_eq!(queues.len(ItemState::Collected), 0);
    }

    #[test]
    fn requeue_moves_between_queues() {
        let queues = QueueSet::new();
        let id = ItemId::new();
        queues.enqueue(ItemState::Wanted, id);

        queues.requeue(id, ItemState::Scraping);
        assert!(queues.is_empty(ItemState::Wanted));
        assert_eq!(queues.snapshot(ItemState::Scraping), vec![id]);

        // Moving into a terminal state just drops the id.
        queues.requeue(id, ItemState::Collected);
        assert!(queues.is_empty(ItemState::Scraping));
        assert_eq!(queues.len(ItemState::Collected), 0);
    }

    #[test]
    fn pop_batch_respects_limit() {
        let queues = QueueSet::new();
        let ids: Vec<ItemId> = (0..5).map(|_| ItemId::new()).collect();
        for id in &ids {
            queues.enqueue(ItemState::Checking, *id);
        }

        let batch = queues.pop_batch(ItemState::Checking, 3);
        assert_eq!(batch, ids[..3].to_vec());
        assert_eq!(queues.len(ItemState::Checking), 2);
    }
}
