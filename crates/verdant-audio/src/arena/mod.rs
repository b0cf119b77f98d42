//! Render buffer arena: bump-allocated pages handed off through events
//!
//! Nodes that want to ship bulk data to the control thread (waveforms,
//! analysis frames) allocate views out of pre-allocated pages during
//! `process`, fill them, and tie each one to an event. The control thread
//! acquires a buffer only once its gating event becomes visible, reads it,
//! and releases it back over a reclaim ring; the render thread frees reclaimed
//! views at the top of the next quantum. No allocation or locking happens on
//! the render path after construction.
//!
//! Ownership is a strict baton pass: render writes until the handoff, the
//! control thread reads after acquisition, and nobody touches a view in
//! between. The unsafe channel accessors on [`BufferView`] rely on exactly
//! that protocol.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::types::EventId;

/// Upper bound on channels per buffer view
pub const MAX_BUFFER_CHANNELS: usize = 8;

/// Interpretation of one channel's words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    F32,
    I32,
}

/// Backing words of one page. Views hand out slices of disjoint sub-ranges;
/// the handoff protocol guarantees no two owners alias a range.
struct PageStorage {
    words: UnsafeCell<Box<[f32]>>,
}

// Disjointness of live views is maintained by the bump allocator; the cell is
// only a way to write through shared references.
unsafe impl Send for PageStorage {}
unsafe impl Sync for PageStorage {}

/// A multi-channel slice of one arena page
///
/// Deliberately not `Clone`: exactly one owner may read or write at a time.
pub struct BufferView {
    page: Arc<PageStorage>,
    page_index: usize,
    offset: usize,
    num_channels: usize,
    num_frames: usize,
    channel_types: [ChannelType; MAX_BUFFER_CHANNELS],
}

impl BufferView {
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn channel_type(&self, index: usize) -> ChannelType {
        assert!(index < self.num_channels);
        self.channel_types[index]
    }

    fn words(&self, index: usize) -> (usize, usize) {
        assert!(index < self.num_channels, "channel index out of range");
        let start = self.offset + index * self.num_frames;
        (start, start + self.num_frames)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        assert_eq!(self.channel_types[index], ChannelType::F32);
        let (start, end) = self.words(index);
        unsafe { &(&(*self.page.words.get()))[start..end] }
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        assert_eq!(self.channel_types[index], ChannelType::F32);
        let (start, end) = self.words(index);
        unsafe { &mut (&mut (*self.page.words.get()))[start..end] }
    }

    pub fn channel_i32(&self, index: usize) -> &[i32] {
        assert_eq!(self.channel_types[index], ChannelType::I32);
        let (start, end) = self.words(index);
        bytemuck::cast_slice(unsafe { &(&(*self.page.words.get()))[start..end] })
    }

    pub fn channel_i32_mut(&mut self, index: usize) -> &mut [i32] {
        assert_eq!(self.channel_types[index], ChannelType::I32);
        let (start, end) = self.words(index);
        bytemuck::cast_slice_mut(unsafe { &mut (&mut (*self.page.words.get()))[start..end] })
    }

    fn num_words(&self) -> usize {
        self.num_channels * self.num_frames
    }
}

/// A filled buffer waiting for (or delivered with) its gating event
pub struct BufferAwaitingEvent {
    pub view: BufferView,
    pub event: EventId,
    /// Producer-chosen stream tag (which waveform, which analyzer)
    pub tag: u32,
    /// Producer-chosen sequence number within the tag
    pub instance: u32,
}

struct ArenaCounters {
    words_in_use: AtomicUsize,
    peak_words: AtomicUsize,
    epoch_peak_words: AtomicUsize,
    epoch_requested_words: AtomicUsize,
    last_epoch_peak_words: AtomicUsize,
    last_epoch_requested_words: AtomicUsize,
    failed_allocations: AtomicU64,
    dropped_handoffs: AtomicU64,
}

/// Point-in-time snapshot of arena usage
#[derive(Debug, Clone, Copy)]
pub struct ArenaStats {
    pub num_pages: usize,
    pub page_words: usize,
    pub words_reserved: usize,
    pub words_in_use: usize,
    pub peak_words: usize,
    /// Highest words in use during the last completed quantum
    pub last_epoch_peak_words: usize,
    /// Words requested during the last completed quantum, successful or not
    pub last_epoch_requested_words: usize,
    pub failed_allocations: u64,
    pub dropped_handoffs: u64,
}

struct Page {
    storage: Arc<PageStorage>,
    offset: usize,
    live: usize,
}

/// Create a connected render/control pair.
///
/// All page memory is allocated here. `handoff_capacity` bounds buffers
/// awaiting acquisition; `reclaim_capacity` bounds buffers awaiting free.
pub fn buffer_arena(
    num_pages: usize,
    page_words: usize,
    handoff_capacity: usize,
    reclaim_capacity: usize,
) -> (BufferArenaUi, BufferArenaRender) {
    let (handoff_tx, handoff_rx) = RingBuffer::new(handoff_capacity);
    let (reclaim_tx, reclaim_rx) = RingBuffer::new(reclaim_capacity);
    let counters = Arc::new(ArenaCounters {
        words_in_use: AtomicUsize::new(0),
        peak_words: AtomicUsize::new(0),
        epoch_peak_words: AtomicUsize::new(0),
        epoch_requested_words: AtomicUsize::new(0),
        last_epoch_peak_words: AtomicUsize::new(0),
        last_epoch_requested_words: AtomicUsize::new(0),
        failed_allocations: AtomicU64::new(0),
        dropped_handoffs: AtomicU64::new(0),
    });
    let pages = (0..num_pages)
        .map(|_| Page {
            storage: Arc::new(PageStorage {
                words: UnsafeCell::new(vec![0.0; page_words].into_boxed_slice()),
            }),
            offset: 0,
            live: 0,
        })
        .collect();
    let ui = BufferArenaUi {
        handoff_rx,
        reclaim_tx,
        pending: Vec::new(),
        received: Vec::new(),
        counters: counters.clone(),
        num_pages,
        page_words,
    };
    let render = BufferArenaRender {
        pages,
        page_words,
        handoff_tx,
        reclaim_rx,
        counters,
    };
    (ui, render)
}

/// Render-thread half: bump allocation, handoff, frees
pub struct BufferArenaRender {
    pages: Vec<Page>,
    page_words: usize,
    handoff_tx: Producer<BufferAwaitingEvent>,
    reclaim_rx: Consumer<BufferView>,
    counters: Arc<ArenaCounters>,
}

impl BufferArenaRender {
    /// Close out the previous epoch's accounting and free everything the
    /// control thread released. Called at the top of every quantum.
    pub fn render_begin_quantum(&mut self) {
        let peak = self.counters.epoch_peak_words.load(Ordering::Relaxed);
        let requested = self.counters.epoch_requested_words.load(Ordering::Relaxed);
        self.counters
            .last_epoch_peak_words
            .store(peak, Ordering::Relaxed);
        self.counters
            .last_epoch_requested_words
            .store(requested, Ordering::Relaxed);
        self.counters
            .epoch_requested_words
            .store(0, Ordering::Relaxed);

        while let Ok(view) = self.reclaim_rx.pop() {
            self.render_free(view);
        }
        let in_use = self.counters.words_in_use.load(Ordering::Relaxed);
        self.counters.epoch_peak_words.store(in_use, Ordering::Relaxed);
    }

    /// Bump-allocate a view with the given channel layout. Fails fast with
    /// `None` when no page has room; the caller skips its capture for this
    /// quantum.
    pub fn render_allocate(
        &mut self,
        channel_types: &[ChannelType],
        num_frames: usize,
    ) -> Option<BufferView> {
        assert!(
            !channel_types.is_empty() && channel_types.len() <= MAX_BUFFER_CHANNELS,
            "unsupported channel count"
        );
        let num_words = channel_types.len() * num_frames;
        self.counters
            .epoch_requested_words
            .fetch_add(num_words, Ordering::Relaxed);
        if num_words > self.page_words {
            self.counters.failed_allocations.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let found = self
            .pages
            .iter_mut()
            .enumerate()
            .find(|(_, p)| p.offset + num_words <= self.page_words);
        let Some((page_index, page)) = found else {
            self.counters.failed_allocations.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let offset = page.offset;
        page.offset += num_words;
        page.live += 1;

        let mut types = [ChannelType::F32; MAX_BUFFER_CHANNELS];
        types[..channel_types.len()].copy_from_slice(channel_types);

        let in_use = self
            .counters
            .words_in_use
            .fetch_add(num_words, Ordering::Relaxed)
            + num_words;
        self.counters.peak_words.fetch_max(in_use, Ordering::Relaxed);
        self.counters
            .epoch_peak_words
            .fetch_max(in_use, Ordering::Relaxed);

        Some(BufferView {
            page: page.storage.clone(),
            page_index,
            offset,
            num_channels: channel_types.len(),
            num_frames,
            channel_types: types,
        })
    }

    /// Return a view to its page. The page's space is reusable only once
    /// every view on it is freed; a page with no live views rewinds to empty.
    pub fn render_free(&mut self, view: BufferView) {
        let num_words = view.num_words();
        let page = &mut self.pages[view.page_index];
        page.live -= 1;
        if page.live == 0 {
            page.offset = 0;
        }
        self.counters.words_in_use.fetch_sub(num_words, Ordering::Relaxed);
    }

    /// Tie a filled view to `event` and queue it for the control thread.
    /// The view stays invisible until the event itself becomes visible. When
    /// the handoff ring is full the view is freed immediately and the drop
    /// counted.
    pub fn render_wait_for_event(
        &mut self,
        view: BufferView,
        event: EventId,
        tag: u32,
        instance: u32,
    ) {
        let entry = BufferAwaitingEvent {
            view,
            event,
            tag,
            instance,
        };
        if let Err(rtrb::PushError::Full(entry)) = self.handoff_tx.push(entry) {
            self.counters.dropped_handoffs.fetch_add(1, Ordering::Relaxed);
            self.render_free(entry.view);
        }
    }
}

struct PendingBuffer {
    entry: BufferAwaitingEvent,
    /// Set when a drop notice arrived while this entry was already pending;
    /// a second notice means its event can no longer arrive.
    marked: bool,
}

/// Control-thread half: acquisition gated on events, release, reclamation
pub struct BufferArenaUi {
    handoff_rx: Consumer<BufferAwaitingEvent>,
    reclaim_tx: Producer<BufferView>,
    pending: Vec<PendingBuffer>,
    received: Vec<BufferAwaitingEvent>,
    counters: Arc<ArenaCounters>,
    num_pages: usize,
    page_words: usize,
}

impl BufferArenaUi {
    /// Match pending buffers against this poll's newly visible events.
    ///
    /// `newly_ready` is the set of event ids delivered this poll. When
    /// `dropped_some_events` is set, a pending buffer's event may have been
    /// among the casualties; entries that survive two drop notices without
    /// their event arriving are reclaimed.
    pub fn ui_update(&mut self, newly_ready: &[EventId], dropped_some_events: bool) {
        while let Ok(entry) = self.handoff_rx.pop() {
            self.pending.push(PendingBuffer {
                entry,
                marked: false,
            });
        }

        let mut keep = Vec::with_capacity(self.pending.len());
        for mut pending in self.pending.drain(..) {
            if newly_ready.contains(&pending.entry.event) {
                self.received.push(pending.entry);
            } else if dropped_some_events && pending.marked {
                // Orphaned: its event was emitted before events we have
                // already seen, so it is never coming.
                match self.reclaim_tx.push(pending.entry.view) {
                    Ok(()) => {}
                    Err(rtrb::PushError::Full(view)) => {
                        pending.entry.view = view;
                        keep.push(pending);
                    }
                }
            } else {
                if dropped_some_events {
                    pending.marked = true;
                }
                keep.push(pending);
            }
        }
        self.pending = keep;
    }

    /// Buffers whose events arrived since the last call. The caller owns the
    /// views until it releases them.
    pub fn ui_read_newly_received(&mut self) -> Vec<BufferAwaitingEvent> {
        std::mem::take(&mut self.received)
    }

    /// Return a view for reuse. `Err` hands the view back when the reclaim
    /// ring is momentarily full; retry on a later tick.
    pub fn ui_release(&mut self, view: BufferView) -> Result<(), BufferView> {
        match self.reclaim_tx.push(view) {
            Ok(()) => Ok(()),
            Err(rtrb::PushError::Full(view)) => Err(view),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            num_pages: self.num_pages,
            page_words: self.page_words,
            words_reserved: self.num_pages * self.page_words,
            words_in_use: self.counters.words_in_use.load(Ordering::Relaxed),
            peak_words: self.counters.peak_words.load(Ordering::Relaxed),
            last_epoch_peak_words: self
                .counters
                .last_epoch_peak_words
                .load(Ordering::Relaxed),
            last_epoch_requested_words: self
                .counters
                .last_epoch_requested_words
                .load(Ordering::Relaxed),
            failed_allocations: self.counters.failed_allocations.load(Ordering::Relaxed),
            dropped_handoffs: self.counters.dropped_handoffs.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_write_read_per_channel() {
        let (_ui, mut render) = buffer_arena(1, 64, 4, 4);
        let mut view = render
            .render_allocate(&[ChannelType::F32, ChannelType::I32], 8)
            .unwrap();

        view.channel_mut(0).fill(0.5);
        view.channel_i32_mut(1).fill(-3);

        assert_eq!(view.channel(0), &[0.5; 8]);
        assert_eq!(view.channel_i32(1), &[-3; 8]);
    }

    #[test]
    fn test_allocation_fails_fast_when_full() {
        let (ui, mut render) = buffer_arena(1, 16, 4, 4);

        let a = render.render_allocate(&[ChannelType::F32], 12).unwrap();
        assert!(render.render_allocate(&[ChannelType::F32], 12).is_none());
        assert_eq!(ui.stats().failed_allocations, 1);

        // Freeing the only live view rewinds the page.
        render.render_free(a);
        assert_eq!(ui.stats().words_in_use, 0);
        assert!(render.render_allocate(&[ChannelType::F32], 12).is_some());
    }

    #[test]
    fn test_page_rewinds_only_when_all_views_freed() {
        let (_ui, mut render) = buffer_arena(1, 32, 4, 4);

        let a = render.render_allocate(&[ChannelType::F32], 16).unwrap();
        let b = render.render_allocate(&[ChannelType::F32], 16).unwrap();
        render.render_free(a);

        // Page still occupied by b; the freed range is not reusable yet.
        assert!(render.render_allocate(&[ChannelType::F32], 16).is_none());
        render.render_free(b);
        assert!(render.render_allocate(&[ChannelType::F32], 16).is_some());
    }

    #[test]
    fn test_buffer_invisible_until_event_arrives() {
        let (mut ui, mut render) = buffer_arena(1, 64, 4, 4);
        let view = render.render_allocate(&[ChannelType::F32], 8).unwrap();
        render.render_wait_for_event(view, EventId::new(7), 1, 0);

        ui.ui_update(&[], false);
        assert!(ui.ui_read_newly_received().is_empty());

        ui.ui_update(&[EventId::new(7)], false);
        let received = ui.ui_read_newly_received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, EventId::new(7));
        assert_eq!(received[0].tag, 1);
    }

    #[test]
    fn test_release_returns_space_to_render() {
        let (mut ui, mut render) = buffer_arena(1, 16, 4, 4);
        let view = render.render_allocate(&[ChannelType::F32], 16).unwrap();
        render.render_wait_for_event(view, EventId::new(1), 0, 0);

        ui.ui_update(&[EventId::new(1)], false);
        let mut received = ui.ui_read_newly_received();
        let entry = received.pop().unwrap();
        assert!(ui.ui_release(entry.view).is_ok());

        // Space comes back at the top of the next quantum.
        assert!(render.render_allocate(&[ChannelType::F32], 16).is_none());
        render.render_begin_quantum();
        assert!(render.render_allocate(&[ChannelType::F32], 16).is_some());
    }

    #[test]
    fn test_orphaned_buffer_reclaimed_after_two_drop_notices() {
        let (mut ui, mut render) = buffer_arena(1, 16, 4, 4);
        let view = render.render_allocate(&[ChannelType::F32], 16).unwrap();
        render.render_wait_for_event(view, EventId::new(9), 0, 0);

        // First notice marks; the event could still be in flight.
        ui.ui_update(&[], true);
        render.render_begin_quantum();
        assert_eq!(ui.stats().words_in_use, 16);

        // Second notice reclaims.
        ui.ui_update(&[], true);
        render.render_begin_quantum();
        assert_eq!(ui.stats().words_in_use, 0);
        assert!(ui.ui_read_newly_received().is_empty());
    }

    #[test]
    fn test_epoch_stats_published_at_quantum_start() {
        let (ui, mut render) = buffer_arena(1, 32, 4, 4);
        render.render_begin_quantum();

        let a = render.render_allocate(&[ChannelType::F32], 16).unwrap();
        // 32 more words do not fit behind the first 16; counts as requested.
        assert!(render
            .render_allocate(&[ChannelType::F32, ChannelType::F32], 16)
            .is_none());
        render.render_free(a);

        render.render_begin_quantum();
        let stats = ui.stats();
        assert_eq!(stats.words_reserved, 32);
        assert_eq!(stats.last_epoch_peak_words, 16);
        assert_eq!(stats.last_epoch_requested_words, 48);
        assert_eq!(stats.words_in_use, 0);
    }

    #[test]
    fn test_full_handoff_ring_frees_and_counts() {
        let (ui, mut render) = buffer_arena(1, 64, 1, 4);

        let a = render.render_allocate(&[ChannelType::F32], 8).unwrap();
        let b = render.render_allocate(&[ChannelType::F32], 8).unwrap();
        render.render_wait_for_event(a, EventId::new(1), 0, 0);
        render.render_wait_for_event(b, EventId::new(2), 0, 1);

        assert_eq!(ui.stats().dropped_handoffs, 1);
        assert_eq!(ui.stats().words_in_use, 8);
    }
}
