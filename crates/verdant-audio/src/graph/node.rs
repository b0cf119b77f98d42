//! Processor-node boundary
//!
//! Audio content (oscillators, filters, granular engines, ...) lives outside
//! this crate and plugs in through [`AudioNode`]. The render driver calls
//! `process` once per quantum; implementations must write exactly
//! `info.num_frames` frames to every output channel and must neither block
//! nor allocate.

use crate::arena::BufferArenaRender;
use crate::event::AudioEventSystemRender;
use crate::params::AudioParameterChanges;
use crate::types::{NodeId, RenderQuantumInfo, Sample};

use crate::params::AudioParameterDescriptor;

/// Data type carried by a node port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// Planar audio samples
    Audio,
    /// Control-rate signal (one value per quantum)
    Control,
}

/// Describes one input or output port of a node
///
/// Read by the graph executor to validate connections; optional ports may be
/// left unconnected.
#[derive(Debug, Clone, Copy)]
pub struct PortDescriptor {
    pub data_type: PortType,
    pub optional: bool,
}

impl PortDescriptor {
    pub const fn audio() -> Self {
        Self {
            data_type: PortType::Audio,
            optional: false,
        }
    }

    pub const fn optional_audio() -> Self {
        Self {
            data_type: PortType::Audio,
            optional: true,
        }
    }
}

/// Planar view over one quantum of multi-channel audio
///
/// Channels are stored back to back in a single pre-allocated scratch slice;
/// no allocation happens when a view is constructed on the render path.
pub struct QuantumBuffers<'a> {
    data: &'a mut [Sample],
    num_channels: usize,
    num_frames: usize,
}

impl<'a> QuantumBuffers<'a> {
    /// Wrap a planar scratch slice. `data` must hold exactly
    /// `num_channels * num_frames` samples.
    pub fn new(data: &'a mut [Sample], num_channels: usize, num_frames: usize) -> Self {
        debug_assert_eq!(data.len(), num_channels * num_frames);
        Self {
            data,
            num_channels,
            num_frames,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn channel(&self, ch: usize) -> &[Sample] {
        let start = ch * self.num_frames;
        &self.data[start..start + self.num_frames]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        let start = ch * self.num_frames;
        &mut self.data[start..start + self.num_frames]
    }

    pub fn fill_silence(&mut self) {
        self.data.fill(0.0);
    }
}

/// Render-side systems a node may use during `process`
///
/// Parameter changes are read through [`AudioParameterChanges::view_by_parent`];
/// events go out through the event system; visualization snapshots come from
/// the arena and must tolerate allocation failure.
pub struct RenderServices<'a> {
    pub params: &'a AudioParameterChanges,
    pub events: &'a mut AudioEventSystemRender,
    pub arena: &'a mut BufferArenaRender,
}

/// A processor node executed by the render thread once per quantum
pub trait AudioNode: Send {
    /// Stable identity; parameter changes are addressed to this id
    fn id(&self) -> NodeId;

    /// Input port layout
    fn inputs(&self) -> &[PortDescriptor];

    /// Output port layout
    fn outputs(&self) -> &[PortDescriptor];

    /// Declare this node's parameters, once, at construction/connection time
    fn parameter_descriptors(&self) -> Vec<AudioParameterDescriptor>;

    /// Render one quantum. Must write `info.num_frames` frames to each output
    /// channel; must not block or allocate.
    fn process(
        &mut self,
        input: &QuantumBuffers<'_>,
        output: &mut QuantumBuffers<'_>,
        services: &mut RenderServices<'_>,
        info: &RenderQuantumInfo,
    );
}
