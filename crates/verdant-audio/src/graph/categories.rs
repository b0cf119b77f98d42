//! Render-owned resource categories
//!
//! Seven categories of resource live in publish sets read by the render
//! thread: renderables, effects, transports, scales, recorders, timeline
//! systems and note-clip systems. Renderables and effects are processor
//! nodes behind render-exclusive cells; transports expose lock-free atomics
//! readable by the UI at any time; the remaining categories are immutable
//! snapshots that are republished when edited.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::cell::{RenderCell, RenderClaim};
use super::node::AudioNode;
use crate::types::{NodeId, Sample};

/// A published slot holding a processor node
///
/// The node's identity is cached so the control thread can address parameters
/// without touching the node itself; the node state is mutated only through
/// the render-exclusive cell.
pub struct NodeSlot {
    id: NodeId,
    node: RenderCell<Box<dyn AudioNode>>,
}

impl NodeSlot {
    pub fn new(node: Box<dyn AudioNode>) -> Self {
        Self {
            id: node.id(),
            node: RenderCell::new(node),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Claim the node for processing. Render driver only.
    pub fn claim(&self) -> RenderClaim<'_, Box<dyn AudioNode>> {
        self.node.claim()
    }
}

/// Playback clock advanced by the render thread
///
/// All fields the UI reads are relaxed atomics, so position and tempo can be
/// displayed without touching the render thread.
pub struct Transport {
    id: u64,
    playing: AtomicBool,
    /// Tempo in BPM, stored as f64 bits
    tempo_bits: AtomicU64,
    position_frames: AtomicU64,
}

impl Transport {
    pub fn new(id: u64, tempo_bpm: f64) -> Self {
        Self {
            id,
            playing: AtomicBool::new(false),
            tempo_bits: AtomicU64::new(tempo_bpm.to_bits()),
            position_frames: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    #[inline]
    pub fn tempo_bpm(&self) -> f64 {
        f64::from_bits(self.tempo_bits.load(Ordering::Relaxed))
    }

    pub fn set_tempo_bpm(&self, bpm: f64) {
        self.tempo_bits.store(bpm.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn position_frames(&self) -> u64 {
        self.position_frames.load(Ordering::Relaxed)
    }

    pub fn seek_frames(&self, frames: u64) {
        self.position_frames.store(frames, Ordering::Relaxed);
    }

    /// Advance the playhead by one quantum. Render driver only.
    pub fn advance(&self, frames: u64) {
        self.position_frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Musical position in beats at the current tempo
    pub fn score_position(&self, sample_rate: u32) -> f64 {
        let seconds = self.position_frames() as f64 / sample_rate as f64;
        seconds * self.tempo_bpm() / 60.0
    }
}

/// A tuning table: reference frequency plus per-degree ratios within one octave
///
/// Immutable after construction; retuning republishes a new scale.
pub struct Scale {
    id: u64,
    reference_hz: f64,
    ratios: Vec<f64>,
}

impl Scale {
    /// `ratios` must be non-empty and hold the ratio of each scale degree to
    /// the reference, in ascending order, covering one octave.
    pub fn new(id: u64, reference_hz: f64, ratios: Vec<f64>) -> Self {
        assert!(!ratios.is_empty(), "scale requires at least one degree");
        Self {
            id,
            reference_hz,
            ratios,
        }
    }

    /// Equal temperament with `divisions` steps per octave
    pub fn equal_temperament(id: u64, reference_hz: f64, divisions: u32) -> Self {
        let ratios = (0..divisions)
            .map(|i| 2.0f64.powf(i as f64 / divisions as f64))
            .collect();
        Self::new(id, reference_hz, ratios)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn num_degrees(&self) -> usize {
        self.ratios.len()
    }

    /// Frequency of a scale degree; degrees outside one octave fold with
    /// octave doubling/halving.
    pub fn frequency_of(&self, degree: i32) -> f64 {
        let n = self.ratios.len() as i32;
        let octave = degree.div_euclid(n);
        let idx = degree.rem_euclid(n) as usize;
        self.reference_hz * self.ratios[idx] * 2.0f64.powi(octave)
    }
}

/// Render-side capture of the quantum mix into a bounded ring
///
/// The control thread drains the paired [`RecorderTap`]. When the tap falls
/// behind, whole frames are dropped and counted; the render thread never
/// waits.
pub struct Recorder {
    id: u64,
    num_channels: usize,
    tx: RenderCell<rtrb::Producer<Sample>>,
    dropped_frames: Arc<AtomicU64>,
}

/// Control-thread consumer half of a [`Recorder`]
pub struct RecorderTap {
    rx: rtrb::Consumer<Sample>,
    num_channels: usize,
    dropped_frames: Arc<AtomicU64>,
}

impl Recorder {
    /// Create a recorder/tap pair with room for `capacity_frames` frames
    pub fn new(id: u64, num_channels: usize, capacity_frames: usize) -> (Recorder, RecorderTap) {
        let (tx, rx) = rtrb::RingBuffer::new(capacity_frames * num_channels);
        let dropped = Arc::new(AtomicU64::new(0));
        let recorder = Recorder {
            id,
            num_channels,
            tx: RenderCell::new(tx),
            dropped_frames: dropped.clone(),
        };
        let tap = RecorderTap {
            rx,
            num_channels,
            dropped_frames: dropped,
        };
        (recorder, tap)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Capture one quantum of planar audio, interleaving into the ring.
    /// Render driver only. Frames that do not fit are dropped whole.
    pub fn capture(&self, planar: &[Sample], num_channels: usize, num_frames: usize) {
        let channels = self.num_channels.min(num_channels);
        let mut tx = self.tx.claim();
        for frame in 0..num_frames {
            if tx.slots() < self.num_channels {
                self.dropped_frames
                    .fetch_add((num_frames - frame) as u64, Ordering::Relaxed);
                return;
            }
            for ch in 0..self.num_channels {
                let sample = if ch < channels {
                    planar[ch * num_frames + frame]
                } else {
                    0.0
                };
                // Room was checked above; a failed push here is unreachable.
                let _ = tx.push(sample);
            }
        }
    }
}

impl RecorderTap {
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Drain captured samples (interleaved) into `out`; returns frames read
    pub fn read(&mut self, out: &mut Vec<Sample>) -> usize {
        let available_frames = self.rx.slots() / self.num_channels;
        for _ in 0..available_frames * self.num_channels {
            match self.rx.pop() {
                Ok(sample) => out.push(sample),
                Err(_) => break,
            }
        }
        available_frames
    }

    /// Total frames dropped because the tap fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

/// One clip placement on a timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineClip {
    pub clip_id: u64,
    pub start_frame: u64,
    pub end_frame: u64,
}

/// An immutable published arrangement of clips
///
/// Edits build a new system and republish it through the modification queue.
pub struct TimelineSystem {
    id: u64,
    clips: Vec<TimelineClip>,
}

impl TimelineSystem {
    pub fn new(id: u64, mut clips: Vec<TimelineClip>) -> Self {
        clips.sort_by_key(|c| c.start_frame);
        Self { id, clips }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn clips(&self) -> &[TimelineClip] {
        &self.clips
    }

    /// Clips whose span contains `frame`
    pub fn active_at(&self, frame: u64) -> impl Iterator<Item = &TimelineClip> {
        self.clips
            .iter()
            .filter(move |c| c.start_frame <= frame && frame < c.end_frame)
    }
}

/// One note in a clip, in absolute frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub start_frame: u64,
    pub duration_frames: u64,
    pub key: i32,
    pub velocity: f32,
}

/// An immutable published collection of note events, sorted by start frame
pub struct NoteClipSystem {
    id: u64,
    notes: Vec<NoteEvent>,
}

impl NoteClipSystem {
    pub fn new(id: u64, mut notes: Vec<NoteEvent>) -> Self {
        notes.sort_by_key(|n| n.start_frame);
        Self { id, notes }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    /// Notes starting within `[start_frame, end_frame)` — one render quantum
    pub fn notes_starting_in(&self, start_frame: u64, end_frame: u64) -> &[NoteEvent] {
        let lo = self.notes.partition_point(|n| n.start_frame < start_frame);
        let hi = self.notes.partition_point(|n| n.start_frame < end_frame);
        &self.notes[lo..hi]
    }
}
