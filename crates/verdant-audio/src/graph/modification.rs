//! Render modification queue
//!
//! Graph membership changes (add/remove of any resource category) are queued
//! on the control thread and drained once per tick into the per-category
//! publish sets. Submission order is preserved: the first change that cannot
//! be staged halts the pass, so dependent pairs ("add before remove") are
//! never applied out of order. After the pass every category is published
//! exactly once, whether or not it changed, keeping publication timing
//! uniform.

use std::collections::VecDeque;

use basedrop::{Handle, Shared};

use super::categories::{NodeSlot, NoteClipSystem, Recorder, Scale, TimelineSystem, Transport};
use crate::publish::{PublishSet, PublishSetReader};

/// One staged membership operation against a category's set
pub enum SetOp<T: Send + Sync + 'static> {
    Add(Shared<T>),
    Remove(Shared<T>),
}

/// A pending modification, dispatched to its category's accessor
///
/// Each variant carries the operation for exactly one category; the queue
/// iterates them uniformly.
pub enum GraphChange {
    Renderable(SetOp<NodeSlot>),
    Effect(SetOp<NodeSlot>),
    Transport(SetOp<Transport>),
    Scale(SetOp<Scale>),
    Recorder(SetOp<Recorder>),
    Timeline(SetOp<TimelineSystem>),
    NoteClips(SetOp<NoteClipSystem>),
}

/// Control-thread writer halves for all seven categories
pub struct GraphSets {
    pub renderables: PublishSet<NodeSlot>,
    pub effects: PublishSet<NodeSlot>,
    pub transports: PublishSet<Transport>,
    pub scales: PublishSet<Scale>,
    pub recorders: PublishSet<Recorder>,
    pub timelines: PublishSet<TimelineSystem>,
    pub note_clips: PublishSet<NoteClipSystem>,
}

/// Render-thread reader halves for all seven categories
pub struct GraphReaders {
    pub renderables: PublishSetReader<NodeSlot>,
    pub effects: PublishSetReader<NodeSlot>,
    pub transports: PublishSetReader<Transport>,
    pub scales: PublishSetReader<Scale>,
    pub recorders: PublishSetReader<Recorder>,
    pub timelines: PublishSetReader<TimelineSystem>,
    pub note_clips: PublishSetReader<NoteClipSystem>,
}

impl GraphSets {
    /// Create all category sets with a shared capacity
    pub fn new(capacity: usize, gc: &Handle) -> (GraphSets, GraphReaders) {
        let (renderables, renderables_r) = PublishSet::new(capacity, gc);
        let (effects, effects_r) = PublishSet::new(capacity, gc);
        let (transports, transports_r) = PublishSet::new(capacity, gc);
        let (scales, scales_r) = PublishSet::new(capacity, gc);
        let (recorders, recorders_r) = PublishSet::new(capacity, gc);
        let (timelines, timelines_r) = PublishSet::new(capacity, gc);
        let (note_clips, note_clips_r) = PublishSet::new(capacity, gc);
        (
            GraphSets {
                renderables,
                effects,
                transports,
                scales,
                recorders,
                timelines,
                note_clips,
            },
            GraphReaders {
                renderables: renderables_r,
                effects: effects_r,
                transports: transports_r,
                scales: scales_r,
                recorders: recorders_r,
                timelines: timelines_r,
                note_clips: note_clips_r,
            },
        )
    }

    /// Publish every category exactly once
    fn update_all(&mut self) {
        self.renderables.writer_update();
        self.effects.writer_update();
        self.transports.writer_update();
        self.scales.writer_update();
        self.recorders.writer_update();
        self.timelines.writer_update();
        self.note_clips.writer_update();
    }
}

/// Stage a single operation; on failure, hand the change back unconsumed
fn apply<T: Send + Sync + 'static>(
    set: &mut PublishSet<T>,
    op: SetOp<T>,
) -> Result<(), SetOp<T>> {
    match op {
        SetOp::Add(item) => {
            if set.writer_add(item.clone()) {
                Ok(())
            } else {
                Err(SetOp::Add(item))
            }
        }
        SetOp::Remove(item) => {
            if set.writer_remove(&item) {
                Ok(())
            } else {
                Err(SetOp::Remove(item))
            }
        }
    }
}

/// Ordered FIFO of pending graph modifications
///
/// A modification is either applied (and leaves the queue) or stays pending;
/// under sustained capacity pressure it remains pending indefinitely and
/// everything queued behind it waits.
#[derive(Default)]
pub struct ModificationQueue {
    pending: VecDeque<GraphChange>,
}

impl ModificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: GraphChange) {
        self.pending.push_back(change);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain as many modifications as the accessors will stage, in submission
    /// order, stopping at the first failure; then publish every category once.
    /// Returns the number of modifications applied.
    pub fn commit(&mut self, sets: &mut GraphSets) -> usize {
        let mut applied = 0;

        while let Some(change) = self.pending.pop_front() {
            let result = match change {
                GraphChange::Renderable(op) => {
                    apply(&mut sets.renderables, op).map_err(GraphChange::Renderable)
                }
                GraphChange::Effect(op) => apply(&mut sets.effects, op).map_err(GraphChange::Effect),
                GraphChange::Transport(op) => {
                    apply(&mut sets.transports, op).map_err(GraphChange::Transport)
                }
                GraphChange::Scale(op) => apply(&mut sets.scales, op).map_err(GraphChange::Scale),
                GraphChange::Recorder(op) => {
                    apply(&mut sets.recorders, op).map_err(GraphChange::Recorder)
                }
                GraphChange::Timeline(op) => {
                    apply(&mut sets.timelines, op).map_err(GraphChange::Timeline)
                }
                GraphChange::NoteClips(op) => {
                    apply(&mut sets.note_clips, op).map_err(GraphChange::NoteClips)
                }
            };

            match result {
                Ok(()) => applied += 1,
                Err(change) => {
                    // Halt: later modifications must not overtake this one.
                    self.pending.push_front(change);
                    break;
                }
            }
        }

        sets.update_all();
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;

    fn transport(gc: &Handle, id: u64) -> Shared<Transport> {
        Shared::new(gc, Transport::new(id, 120.0))
    }

    fn visible_transport_ids(readers: &GraphReaders) -> Vec<u64> {
        readers.transports.read().iter().map(|t| t.id()).collect()
    }

    #[test]
    fn test_commit_applies_in_submission_order() {
        let collector = Collector::new();
        let gc = collector.handle();
        let (mut sets, readers) = GraphSets::new(8, &gc);
        let mut queue = ModificationQueue::new();

        let a = transport(&gc, 1);
        let b = transport(&gc, 2);
        queue.push(GraphChange::Transport(SetOp::Add(a.clone())));
        queue.push(GraphChange::Transport(SetOp::Add(b)));
        queue.push(GraphChange::Transport(SetOp::Remove(a)));

        assert_eq!(queue.commit(&mut sets), 3);
        assert!(queue.is_empty());
        assert_eq!(visible_transport_ids(&readers), vec![2]);
    }

    #[test]
    fn test_first_failure_halts_the_pass() {
        let collector = Collector::new();
        let gc = collector.handle();
        // Transport capacity 1; scales have room.
        let (mut sets, readers) = GraphSets::new(1, &gc);
        let mut queue = ModificationQueue::new();

        let a = transport(&gc, 1);
        let b = transport(&gc, 2);
        queue.push(GraphChange::Transport(SetOp::Add(a)));
        queue.push(GraphChange::Transport(SetOp::Add(b)));
        queue.push(GraphChange::Scale(SetOp::Add(Shared::new(
            &gc,
            Scale::equal_temperament(1, 440.0, 12),
        ))));

        // Second transport does not fit; the scale queued behind it must not
        // be applied this tick even though its own set has room.
        assert_eq!(queue.commit(&mut sets), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(visible_transport_ids(&readers), vec![1]);
        assert!(readers.scales.read().is_empty());
    }

    #[test]
    fn test_pending_modification_retries_on_later_tick() {
        let collector = Collector::new();
        let gc = collector.handle();
        let (mut sets, readers) = GraphSets::new(1, &gc);
        let mut queue = ModificationQueue::new();

        let a = transport(&gc, 1);
        let b = transport(&gc, 2);
        queue.push(GraphChange::Transport(SetOp::Add(a)));
        queue.push(GraphChange::Transport(SetOp::Add(b)));
        assert_eq!(queue.commit(&mut sets), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(visible_transport_ids(&readers), vec![1]);

        // Another tick with no capacity freed: still pending.
        assert_eq!(queue.commit(&mut sets), 0);

        // Free the slot, then retry: the pending add goes through.
        let committed_first = sets.transports.committed()[0].clone();
        assert!(sets.transports.writer_remove(&committed_first));
        assert_eq!(queue.commit(&mut sets), 1);
        assert!(queue.is_empty());
        assert_eq!(visible_transport_ids(&readers), vec![2]);
    }
}
