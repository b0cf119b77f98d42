//! Verdant Audio - real-time synchronization core for the Verdant instrument

pub mod arena;
pub mod core;
pub mod event;
pub mod graph;
pub mod params;
pub mod publish;
pub mod stream;
pub mod types;

pub use crate::core::{
    AudioCore, AudioCoreConfig, EffectHandle, NoteClipHandle, RecorderHandle, RenderContext,
    RenderableHandle, ScaleHandle, TimelineHandle, TransportHandle, UiUpdate,
};
pub use types::*;
