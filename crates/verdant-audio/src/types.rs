//! Common types for the Verdant audio core
//!
//! Identifiers and per-quantum bookkeeping shared by every subsystem.
//! Everything here is `Copy` and crosses the render boundary by value.

/// Default sample rate requested from the device (48kHz, professional standard)
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Largest render quantum the core pre-allocates scratch space for.
/// Covers all valid power-of-two quanta up to 4096 frames.
pub const MAX_RENDER_QUANTUM: usize = 4096;

/// Audio sample type used throughout the render path
pub type Sample = f32;

/// Identifier of a graph node (renderable or effect)
///
/// Assigned once at node construction and never reused; parameter addressing
/// is keyed by `(NodeId, parameter index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Token identifying which control-thread actor currently owns the right to
/// set a parameter or edit a break-point set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterId(u32);

impl WriterId {
    /// Reserved writer under which the break-point evaluator stages values.
    /// UI writers must use a different id.
    pub const AUTOMATION: WriterId = WriterId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Monotonically increasing id assigned to events on the render thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle identifying an event stream
///
/// Most producers use [`AudioEventStreamHandle::DEFAULT`]; subsystems that
/// want their events demultiplexed separately allocate their own handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioEventStreamHandle(u32);

impl AudioEventStreamHandle {
    /// The well-known default stream
    pub const DEFAULT: AudioEventStreamHandle = AudioEventStreamHandle(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Per-quantum render information handed to every node's `process` call
#[derive(Debug, Clone, Copy)]
pub struct RenderQuantumInfo {
    /// Sample rate of the open stream
    pub sample_rate: u32,
    /// Frames in this quantum (constant for the lifetime of an open stream)
    pub num_frames: u32,
    /// Absolute render frame counter at the start of this quantum
    pub render_frame: u64,
}

impl RenderQuantumInfo {
    /// Stream time in seconds at the start of this quantum
    pub fn stream_time(&self) -> f64 {
        self.render_frame as f64 / self.sample_rate as f64
    }
}
