//! # Large Object Bodies
//!
//! A LOB body too large to travel inline lives as a dedicated tuple source of
//! `Varbinary` chunk rows. `LobBody` is the shared handle to it:
//!
//! ```text
//!   row value ──┐
//!   row value ──┼──> LobHandle (Arc) ──drop──> LobReclaimQueue ──cleanup_lobs──> remove source
//!   ref map   ──┘
//! ```
//!
//! Every clone of a `LobBody` shares one `LobHandle`. When the last clone is
//! dropped (the rows holding it were discarded and the owning buffer was
//! removed) the handle queues its tuple source id. `BufferManager::cleanup_lobs`
//! drains at most `lob_cleanup_batch` queued ids per call and removes their
//! chunk sources. Removing the manager's sources explicitly always works too.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use super::TupleSourceId;

#[derive(Debug, Default)]
pub(crate) struct LobReclaimQueue {
    pending: Mutex<VecDeque<TupleSourceId>>,
}

impl LobReclaimQueue {
    fn push(&self, tuple_source: TupleSourceId) {
        self.pending.lock().push_back(tuple_source);
    }

    /// Takes at most `limit` queued ids, oldest first.
    pub(crate) fn drain(&self, limit: usize) -> Vec<TupleSourceId> {
        let mut pending = self.pending.lock();
        let take = limit.min(pending.len());
        pending.drain(..take).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

struct LobHandle {
    tuple_source: TupleSourceId,
    length: u64,
    reclaim: Arc<LobReclaimQueue>,
}

impl Drop for LobHandle {
    fn drop(&mut self) {
        self.reclaim.push(self.tuple_source.clone());
    }
}

#[derive(Clone)]
pub struct LobBody {
    handle: Arc<LobHandle>,
}

impl LobBody {
    pub(crate) fn new(tuple_source: TupleSourceId, length: u64, reclaim: Arc<LobReclaimQueue>) -> Self {
        Self {
            handle: Arc::new(LobHandle {
                tuple_source,
                length,
                reclaim,
            }),
        }
    }

    /// The tuple source holding the chunks.
    pub fn tuple_source(&self) -> &TupleSourceId {
        &self.handle.tuple_source
    }

    pub fn length(&self) -> u64 {
        self.handle.length
    }

    /// Number of live handles sharing this body.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.handle)
    }
}

impl std::fmt::Debug for LobBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobBody")
            .field("tuple_source", &self.handle.tuple_source)
            .field("length", &self.handle.length)
            .finish()
    }
}

impl PartialEq for LobBody {
    fn eq(&self, other: &Self) -> bool {
        self.handle.tuple_source == other.handle.tuple_source
    }
}

impl Eq for LobBody {}

impl Hash for LobBody {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.tuple_source.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_drop_queues_the_source() {
        let queue = Arc::new(LobReclaimQueue::default());
        let body = LobBody::new(TupleSourceId::new("5", None), 10, Arc::clone(&queue));
        let clone = body.clone();
        assert_eq!(body.handle_count(), 2);

        drop(body);
        assert_eq!(queue.len(), 0);
        drop(clone);
        assert_eq!(queue.drain(10), vec![TupleSourceId::new("5", None)]);
    }

    #[test]
    fn drain_is_bounded() {
        let queue = Arc::new(LobReclaimQueue::default());
        for n in 0..5 {
            drop(LobBody::new(
                TupleSourceId::new(n.to_string(), None),
                0,
                Arc::clone(&queue),
            ));
        }
        assert_eq!(queue.drain(2).len(), 2);
        assert_eq!(queue.len(), 3);
    }
}
