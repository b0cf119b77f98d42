//! Publish-set accessor: double-buffered collections for render-owned resources
//!
//! Every category of render-owned resource (renderables, transports, scales,
//! recorders, effects, timeline and note-clip systems) is shared through the
//! same discipline: the control thread stages add/remove operations against a
//! [`PublishSet`] and atomically publishes them, while the render thread reads
//! a consistent snapshot once per quantum through a [`PublishSetReader`].
//!
//! # Real-Time Safety
//!
//! Publication goes through `basedrop::SharedCell`: the reader side is a
//! single atomic pointer load, and replaced sets are queued on the basedrop
//! collector instead of being freed wherever the last reference drops. The
//! render thread therefore never observes a partially-updated set, never
//! takes a lock, and never runs a deallocator.
//!
//! Staging is bounded. `writer_add`/`writer_remove` return `false` when the
//! staging area (or the stable set) is full; the modification queue retries on
//! a later tick rather than blocking.

use basedrop::{Handle, Shared, SharedCell};
use std::sync::Arc;

/// A staged, not-yet-published change to one set
enum StagedOp<T> {
    Add(Shared<T>),
    Remove(Shared<T>),
}

/// Control-thread writer half of a published set
pub struct PublishSet<T: Send + Sync + 'static> {
    staged: Vec<StagedOp<T>>,
    committed: Vec<Shared<T>>,
    cell: Arc<SharedCell<Vec<Shared<T>>>>,
    capacity: usize,
    gc: Handle,
}

/// Render-thread reader half of a published set
pub struct PublishSetReader<T: Send + Sync + 'static> {
    cell: Arc<SharedCell<Vec<Shared<T>>>>,
}

/// True when two `Shared` handles point at the same allocation
///
/// Removal is keyed by allocation identity: the clone staged for removal must
/// originate from the same `Shared::new` as the clone staged for addition.
fn same_allocation<T>(a: &Shared<T>, b: &Shared<T>) -> bool {
    std::ptr::eq::<T>(&**a, &**b)
}

impl<T: Send + Sync + 'static> PublishSet<T> {
    /// Create a writer/reader pair with a fixed capacity
    ///
    /// `capacity` bounds the stable set. The staging area holds up to
    /// `2 * capacity` operations, enough to remove and refill every slot in
    /// one tick. All allocations for the staged path happen here.
    pub fn new(capacity: usize, gc: &Handle) -> (PublishSet<T>, PublishSetReader<T>) {
        let cell = Arc::new(SharedCell::new(Shared::new(gc, Vec::new())));
        let writer = PublishSet {
            staged: Vec::with_capacity(capacity * 2),
            committed: Vec::with_capacity(capacity),
            cell: cell.clone(),
            capacity,
            gc: gc.clone(),
        };
        (writer, PublishSetReader { cell })
    }

    /// Stage an addition. Returns `false` on capacity exhaustion; the caller
    /// retries on a later tick.
    pub fn writer_add(&mut self, item: Shared<T>) -> bool {
        if self.staged.len() == self.capacity * 2 || self.projected_len() >= self.capacity {
            return false;
        }
        self.staged.push(StagedOp::Add(item));
        true
    }

    /// Stage a removal. Returns `false` only when the staging area is full.
    ///
    /// Removing an item that is not in the set stages cleanly and publishes as
    /// a no-op.
    pub fn writer_remove(&mut self, item: &Shared<T>) -> bool {
        if self.staged.len() == self.capacity * 2 {
            return false;
        }
        self.staged.push(StagedOp::Remove(item.clone()));
        true
    }

    /// Atomically publish all staged changes.
    ///
    /// The render thread observes either the previous set or the fully
    /// updated one, never an intermediate state. Returns `false` when nothing
    /// was staged.
    pub fn writer_update(&mut self) -> bool {
        if self.staged.is_empty() {
            return false;
        }

        let mut next = self.committed.clone();
        for op in self.staged.drain(..) {
            match op {
                StagedOp::Add(item) => next.push(item),
                StagedOp::Remove(item) => {
                    if let Some(pos) = next.iter().position(|e| same_allocation(e, &item)) {
                        next.remove(pos);
                    }
                }
            }
        }

        self.committed = next.clone();
        // The previous set is retired through the collector, not dropped on
        // whichever thread holds the last snapshot.
        self.cell.set(Shared::new(&self.gc, next));
        true
    }

    /// The set as of the last `writer_update`
    pub fn committed(&self) -> &[Shared<T>] {
        &self.committed
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Set size implied by the committed set plus all staged operations
    fn projected_len(&self) -> usize {
        let mut len = self.committed.len();
        for op in &self.staged {
            match op {
                StagedOp::Add(_) => len += 1,
                StagedOp::Remove(_) => len = len.saturating_sub(1),
            }
        }
        len
    }
}

impl<T: Send + Sync + 'static> PublishSetReader<T> {
    /// Take a consistent snapshot of the stable set.
    ///
    /// Lock-free and allocation-free; call once per quantum and iterate the
    /// returned snapshot.
    pub fn read(&self) -> Shared<Vec<Shared<T>>> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;

    fn set_of(reader: &PublishSetReader<u32>) -> Vec<u32> {
        reader.read().iter().map(|s| **s).collect()
    }

    #[test]
    fn test_staged_changes_invisible_until_update() {
        let collector = Collector::new();
        let (mut writer, reader) = PublishSet::new(8, &collector.handle());

        let a = Shared::new(&collector.handle(), 1u32);
        assert!(writer.writer_add(a.clone()));
        assert!(set_of(&reader).is_empty());

        assert!(writer.writer_update());
        assert_eq!(set_of(&reader), vec![1]);
    }

    #[test]
    fn test_update_without_staged_changes_is_noop() {
        let collector = Collector::new();
        let (mut writer, _reader) = PublishSet::<u32>::new(8, &collector.handle());
        assert!(!writer.writer_update());
    }

    #[test]
    fn test_visible_set_matches_staged_operations_in_order() {
        let collector = Collector::new();
        let (mut writer, reader) = PublishSet::new(8, &collector.handle());

        let a = Shared::new(&collector.handle(), 1u32);
        let b = Shared::new(&collector.handle(), 2u32);
        let c = Shared::new(&collector.handle(), 3u32);

        assert!(writer.writer_add(a.clone()));
        assert!(writer.writer_add(b.clone()));
        assert!(writer.writer_update());
        assert_eq!(set_of(&reader), vec![1, 2]);

        // Remove then add in one batch; publication applies both in order.
        assert!(writer.writer_remove(&a));
        assert!(writer.writer_add(c));
        assert!(writer.writer_update());
        assert_eq!(set_of(&reader), vec![2, 3]);
    }

    #[test]
    fn test_remove_of_absent_item_publishes_as_noop() {
        let collector = Collector::new();
        let (mut writer, reader) = PublishSet::new(8, &collector.handle());

        let a = Shared::new(&collector.handle(), 1u32);
        let stranger = Shared::new(&collector.handle(), 1u32);

        assert!(writer.writer_add(a));
        assert!(writer.writer_update());

        // Same value, different allocation: identity does not match.
        assert!(writer.writer_remove(&stranger));
        assert!(writer.writer_update());
        assert_eq!(set_of(&reader), vec![1]);
    }

    #[test]
    fn test_add_fails_at_capacity() {
        let collector = Collector::new();
        let (mut writer, reader) = PublishSet::new(2, &collector.handle());

        let a = Shared::new(&collector.handle(), 1u32);
        let b = Shared::new(&collector.handle(), 2u32);
        let c = Shared::new(&collector.handle(), 3u32);

        assert!(writer.writer_add(a.clone()));
        assert!(writer.writer_add(b));
        assert!(!writer.writer_add(c.clone()));
        assert!(writer.writer_update());

        // A removal frees room for a retry.
        assert!(writer.writer_remove(&a));
        assert!(writer.writer_add(c));
        assert!(writer.writer_update());
        assert_eq!(set_of(&reader), vec![2, 3]);
    }

    #[test]
    fn test_reader_snapshot_survives_later_updates() {
        let collector = Collector::new();
        let (mut writer, reader) = PublishSet::new(8, &collector.handle());

        let a = Shared::new(&collector.handle(), 1u32);
        writer.writer_add(a.clone());
        writer.writer_update();

        let snapshot = reader.read();
        writer.writer_remove(&a);
        writer.writer_update();

        // The old snapshot is still intact; the new one reflects the removal.
        assert_eq!(snapshot.len(), 1);
        assert!(reader.read().is_empty());
    }
}
