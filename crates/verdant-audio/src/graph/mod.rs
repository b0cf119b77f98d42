//! Render graph: node boundary, resource categories, modification protocol
//!
//! Membership of every render-owned collection changes only through the
//! [`ModificationQueue`] → [`PublishSet`](crate::publish::PublishSet)
//! pipeline; the render thread sees whole published sets, never intermediate
//! states.

mod categories;
mod cell;
mod modification;
mod node;

pub use categories::{
    NodeSlot, NoteClipSystem, NoteEvent, Recorder, RecorderTap, Scale, TimelineClip,
    TimelineSystem, Transport,
};
pub use cell::{RenderCell, RenderClaim};
pub use modification::{GraphChange, GraphReaders, GraphSets, ModificationQueue, SetOp};
pub use node::{AudioNode, PortDescriptor, PortType, QuantumBuffers, RenderServices};
