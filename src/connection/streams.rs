use std::collections::HashMap;

use crate::connection::Waiter;
use crate::constant::{MAX_STREAM_ID, MIN_STREAM_ID};
use crate::protocol::Request;

/// A request in flight: the original request (kept for paging continuations
/// and the prepared-hash notification) and where its reply goes
pub(crate) struct Slot {
    pub request: Request,
    pub waiter: Waiter,
}

/// In-flight request table keyed by stream id
///
/// Ids are handed out from [`MIN_STREAM_ID`]..=[`MAX_STREAM_ID`] in
/// ascending order, wrapping back to the minimum. `last_id` only advances
/// when a slot is actually registered, so a rejected submission does not
/// burn an id.
pub(crate) struct StreamTable {
    slots: HashMap<u16, Slot>,
    last_id: u16,
}

impl StreamTable {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            last_id: MIN_STREAM_ID - 1,
        }
    }

    /// Candidate id for the next request
    pub fn next_id(&self) -> u16 {
        if self.last_id >= MAX_STREAM_ID {
            MIN_STREAM_ID
        } else {
            self.last_id + 1
        }
    }

    /// True when the candidate id still has a pending request (wrap-around
    /// caught up with an unanswered stream)
    pub fn occupied(&self, id: u16) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn register(&mut self, id: u16, slot: Slot) {
        self.slots.insert(id, slot);
        self.last_id = id;
    }

    pub fn take(&mut self, id: u16) -> Option<Slot> {
        self.slots.remove(&id)
    }

    /// Remove every slot; used when the socket dies
    pub fn drain(&mut self) -> Vec<Slot> {
        self.slots.drain().map(|(_, slot)| slot).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    fn slot() -> Slot {
        let (tx, _rx) = oneshot::channel();
        Slot {
            request: Request::Options,
            waiter: Waiter::Sync(tx),
        }
    }

    #[test]
    fn ids_start_at_the_minimum_and_ascend() {
        let mut table = StreamTable::new();
        for expected in MIN_STREAM_ID..MIN_STREAM_ID + 5 {
            let id = table.next_id();
            assert_eq!(id, expected);
            table.register(id, slot());
            assert!(table.take(id).is_some());
        }
    }

    #[test]
    fn wraps_to_the_minimum_past_the_maximum() {
        let mut table = StreamTable::new();
        for _ in MIN_STREAM_ID..=MAX_STREAM_ID {
            let id = table.next_id();
            table.register(id, slot());
            table.take(id);
        }
        assert_eq!(table.last_id, MAX_STREAM_ID);
        assert_eq!(table.next_id(), MIN_STREAM_ID);
    }

    #[test]
    fn collision_is_visible_without_eviction() {
        let mut table = StreamTable::new();
        let id = table.next_id();
        table.register(id, slot());
        assert!(table.occupied(id));
        // The unanswered slot survives; nothing was replaced.
        assert_eq!(table.len(), 1);
        assert!(table.take(id).is_some());
        assert!(!table.occupied(id));
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table = StreamTable::new();
        for _ in 0..3 {
            let id = table.next_id();
            table.register(id, slot());
        }
        assert_eq!(table.drain().len(), 3);
        assert!(table.is_empty());
    }
}
