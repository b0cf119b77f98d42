//! Audio event system: render-to-control notifications gated on DAC time
//!
//! Nodes emit events during `process`; at the end of the quantum each event is
//! stamped with the stream time at which its frame actually reaches the DAC
//! and pushed over a bounded lock-free ring. The control thread polls with the
//! current stream time and only sees events whose moment has arrived, so a
//! visualizer never reacts to audio the listener has not heard yet.
//!
//! Both the per-quantum packet and the ring are bounded; overflow drops events
//! and trips a sticky drop counter the control thread can poll.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::params::AudioParameterId;
use crate::types::{AudioEventStreamHandle, EventId};

/// Payload of one event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPayload {
    /// A parameter's effective value changed on the render thread
    ParameterUpdate { param: AudioParameterId, value: f32 },
    /// An arena buffer tagged by its producer is ready for the control thread
    BufferReady { tag: u32, instance: u32 },
    /// A transport crossed a reporting boundary
    TransportPosition { transport: u64, frame: u64 },
}

/// One event as emitted from inside `process`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioEvent {
    pub stream: AudioEventStreamHandle,
    /// Frame within the emitting quantum
    pub frame_offset: u32,
    pub payload: EventPayload,
}

/// An event stamped with its id and DAC arrival time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedEvent {
    pub id: EventId,
    /// Stream time in seconds at which the event's frame reaches the DAC
    pub ready_time: f64,
    pub event: AudioEvent,
}

/// Events delivered by one control-thread poll
#[derive(Debug, Default)]
pub struct EventUpdate {
    /// Ready events for general consumption (everything but `BufferReady`)
    pub newly_ready: Vec<StampedEvent>,
    /// Ready `BufferReady` events, routed to the buffer arena
    pub newly_acquired: Vec<StampedEvent>,
}

/// Sizing diagnostics; advisory, not load-bearing for correctness
#[derive(Debug, Clone, Copy, Default)]
pub struct EventStats {
    pub ring_capacity: usize,
    pub packet_capacity: usize,
    /// Events received but not yet ready at the last poll
    pub num_pending: usize,
    pub num_received: u64,
    pub num_dropped: u64,
}

impl EventStats {
    /// Fraction of the ring the pending backlog would fill
    pub fn load_factor(&self) -> f64 {
        self.num_pending as f64 / self.ring_capacity as f64
    }
}

/// Create a connected render/control pair.
///
/// `ring_capacity` bounds stamped events in flight; `packet_capacity` bounds
/// events emitted within one quantum.
pub fn event_channel(
    ring_capacity: usize,
    packet_capacity: usize,
) -> (AudioEventSystemUi, AudioEventSystemRender) {
    let (tx, rx) = RingBuffer::new(ring_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let ui = AudioEventSystemUi {
        rx,
        pending: Vec::new(),
        dropped: dropped.clone(),
        dropped_seen: 0,
        num_received: 0,
        ring_capacity,
        packet_capacity,
    };
    let render = AudioEventSystemRender {
        tx,
        packet: Vec::with_capacity(packet_capacity),
        packet_capacity,
        next_id: 0,
        dropped,
    };
    (ui, render)
}

/// Render-thread half: collects a packet per quantum, stamps it at the end
pub struct AudioEventSystemRender {
    tx: Producer<StampedEvent>,
    packet: Vec<(EventId, AudioEvent)>,
    packet_capacity: usize,
    next_id: u64,
    dropped: Arc<AtomicU64>,
}

impl AudioEventSystemRender {
    /// Reset the packet. Called at the top of every quantum.
    pub fn render_begin_process(&mut self) {
        self.packet.clear();
    }

    /// Queue one event for delivery. Returns its id, or `None` when the
    /// packet is full and the event was dropped.
    pub fn render_push_event(
        &mut self,
        stream: AudioEventStreamHandle,
        frame_offset: u32,
        payload: EventPayload,
    ) -> Option<EventId> {
        if self.packet.len() == self.packet_capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let id = EventId::new(self.next_id);
        self.next_id += 1;
        self.packet.push((
            id,
            AudioEvent {
                stream,
                frame_offset,
                payload,
            },
        ));
        Some(id)
    }

    /// Stamp this quantum's packet and hand it to the control thread.
    ///
    /// `quantum_dac_time` is the stream time at which frame 0 of this quantum
    /// reaches the DAC; each event's ready time adds its frame offset.
    pub fn render_end_process(&mut self, quantum_dac_time: f64, sample_rate: u32) {
        for (id, event) in self.packet.drain(..) {
            let ready_time = quantum_dac_time + event.frame_offset as f64 / sample_rate as f64;
            let stamped = StampedEvent {
                id,
                ready_time,
                event,
            };
            if self.tx.push(stamped).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Control-thread half: polls for events whose DAC time has passed
pub struct AudioEventSystemUi {
    rx: Consumer<StampedEvent>,
    /// Received but not yet ready
    pending: Vec<StampedEvent>,
    dropped: Arc<AtomicU64>,
    dropped_seen: u64,
    num_received: u64,
    ring_capacity: usize,
    packet_capacity: usize,
}

impl AudioEventSystemUi {
    /// Drain the ring and deliver every event whose ready time is at or
    /// before `current_stream_time`. Not-yet-ready events are held for a
    /// later poll; no accepted event is lost or delivered twice.
    pub fn ui_update(&mut self, current_stream_time: f64) -> EventUpdate {
        while let Ok(stamped) = self.rx.pop() {
            self.num_received += 1;
            self.pending.push(stamped);
        }

        let mut update = EventUpdate::default();
        self.pending.retain(|stamped| {
            if stamped.ready_time > current_stream_time {
                return true;
            }
            match stamped.event.payload {
                EventPayload::BufferReady { .. } => update.newly_acquired.push(*stamped),
                _ => update.newly_ready.push(*stamped),
            }
            false
        });
        update
    }

    /// True when events were dropped since the last call. Edge-triggered.
    pub fn ui_check_dropped_events(&mut self) -> bool {
        let dropped = self.dropped.load(Ordering::Relaxed);
        let changed = dropped != self.dropped_seen;
        self.dropped_seen = dropped;
        changed
    }

    pub fn stats(&self) -> EventStats {
        EventStats {
            ring_capacity: self.ring_capacity,
            packet_capacity: self.packet_capacity,
            num_pending: self.pending.len(),
            num_received: self.num_received,
            num_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: AudioEventStreamHandle = AudioEventStreamHandle::DEFAULT;

    fn position(frame: u64) -> EventPayload {
        EventPayload::TransportPosition {
            transport: 1,
            frame,
        }
    }

    #[test]
    fn test_events_held_until_dac_time_passes() {
        let (mut ui, mut render) = event_channel(16, 8);

        render.render_begin_process();
        render.render_push_event(STREAM, 0, position(0));
        render.render_push_event(STREAM, 24_000, position(24_000));
        render.render_end_process(1.0, 48_000);

        // At t=1.0 only the offset-0 event has reached the DAC.
        let update = ui.ui_update(1.0);
        assert_eq!(update.newly_ready.len(), 1);
        assert_eq!(update.newly_ready[0].event.frame_offset, 0);

        // The later event arrives exactly once, at its own time.
        let update = ui.ui_update(1.25);
        assert!(update.newly_ready.is_empty());
        let update = ui.ui_update(1.5);
        assert_eq!(update.newly_ready.len(), 1);
        assert_eq!(update.newly_ready[0].event.frame_offset, 24_000);

        // Nothing is delivered twice.
        assert!(ui.ui_update(10.0).newly_ready.is_empty());
    }

    #[test]
    fn test_buffer_ready_routed_separately() {
        let (mut ui, mut render) = event_channel(16, 8);

        render.render_begin_process();
        render.render_push_event(STREAM, 0, position(0));
        render.render_push_event(STREAM, 0, EventPayload::BufferReady { tag: 3, instance: 0 });
        render.render_end_process(0.0, 48_000);

        let update = ui.ui_update(0.0);
        assert_eq!(update.newly_ready.len(), 1);
        assert_eq!(update.newly_acquired.len(), 1);
        assert!(matches!(
            update.newly_acquired[0].event.payload,
            EventPayload::BufferReady { tag: 3, .. }
        ));
    }

    #[test]
    fn test_packet_overflow_drops_and_reports() {
        let (mut ui, mut render) = event_channel(16, 2);

        render.render_begin_process();
        assert!(render.render_push_event(STREAM, 0, position(0)).is_some());
        assert!(render.render_push_event(STREAM, 1, position(1)).is_some());
        assert!(render.render_push_event(STREAM, 2, position(2)).is_none());
        render.render_end_process(0.0, 48_000);

        assert!(ui.ui_check_dropped_events());
        // Edge-triggered: clear until the next drop.
        assert!(!ui.ui_check_dropped_events());
        assert_eq!(ui.ui_update(0.0).newly_ready.len(), 2);
        assert_eq!(ui.stats().num_dropped, 1);
    }

    #[test]
    fn test_ring_overflow_drops_and_reports() {
        let (mut ui, mut render) = event_channel(2, 8);

        render.render_begin_process();
        for i in 0..4 {
            render.render_push_event(STREAM, i, position(i as u64));
        }
        render.render_end_process(0.0, 48_000);

        let update = ui.ui_update(0.0);
        assert_eq!(update.newly_ready.len(), 2);
        assert!(ui.ui_check_dropped_events());
        assert_eq!(ui.stats().num_dropped, 2);
    }

    #[test]
    fn test_event_ids_are_monotonic_across_quanta() {
        let (mut ui, mut render) = event_channel(16, 8);

        render.render_begin_process();
        let a = render.render_push_event(STREAM, 0, position(0)).unwrap();
        render.render_end_process(0.0, 48_000);

        render.render_begin_process();
        let b = render.render_push_event(STREAM, 0, position(1)).unwrap();
        render.render_end_process(0.01, 48_000);

        assert!(b > a);
        let update = ui.ui_update(1.0);
        let ids: Vec<EventId> = update.newly_ready.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
