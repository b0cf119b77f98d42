//! Stream configuration
//!
//! Defines device selection, frame sizing, and the render mode for the
//! output stream.

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_SAMPLE_RATE, MAX_RENDER_QUANTUM};

/// Default frames per device buffer when no preference is specified.
/// 512 frames is a safe default that works on most systems.
pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 512;

/// Default frames per render quantum
pub const DEFAULT_FRAMES_PER_RENDER_QUANTUM: u32 = 256;

/// How render quanta are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderMode {
    /// Render directly inside the device callback. Lowest latency; requires
    /// the quantum to match the device buffer exactly.
    #[default]
    Callback,

    /// Render on a dedicated thread ahead of the callback, decoupled through
    /// a lock-free sample ring. Tolerates quantum sizes smaller than the
    /// device buffer at the cost of added latency.
    RenderAhead,
}

/// Frame sizing for the device buffer and the render quantum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Frames per device callback buffer
    pub frames_per_buffer: u32,
    /// Frames per render quantum
    pub frames_per_render_quantum: u32,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            frames_per_render_quantum: DEFAULT_FRAMES_PER_RENDER_QUANTUM,
        }
    }
}

impl FrameInfo {
    pub fn new(frames_per_buffer: u32, frames_per_render_quantum: u32) -> Self {
        Self {
            frames_per_buffer,
            frames_per_render_quantum,
        }
    }

    /// Validate against the chosen render mode.
    ///
    /// Both sizes must be powers of two, the quantum must not exceed the
    /// pre-allocated scratch bound, and in [`RenderMode::Callback`] the
    /// quantum must equal the device buffer.
    pub fn is_valid(&self, mode: RenderMode) -> bool {
        let pow2 = |v: u32| v > 0 && v.is_power_of_two();
        if !pow2(self.frames_per_buffer) || !pow2(self.frames_per_render_quantum) {
            return false;
        }
        if self.frames_per_render_quantum as usize > MAX_RENDER_QUANTUM {
            return false;
        }
        match mode {
            RenderMode::Callback => self.frames_per_buffer == self.frames_per_render_quantum,
            RenderMode::RenderAhead => self.frames_per_render_quantum <= self.frames_per_buffer,
        }
    }

    /// One-way output latency in milliseconds at `sample_rate`
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.frames_per_buffer as f32 / sample_rate as f32) * 1000.0
    }
}

/// Audio device identifier
///
/// Includes both the device name and the host backend (JACK, ALSA, etc.)
/// so devices from different hosts can be addressed on systems with multiple
/// audio backends available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "Jack", "Alsa", "CoreAudio")
    /// If None, uses the default/preferred host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for opening the output stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamParams {
    /// Output device (None = use system default)
    pub device: Option<DeviceId>,

    /// Preferred sample rate (None = device default, typically 44100 or 48000)
    pub sample_rate: Option<u32>,

    /// Output channels requested from the device
    pub channels: u16,

    /// Frame sizing
    pub frame_info: FrameInfo,

    /// How quanta are driven
    pub render_mode: RenderMode,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: Some(DEFAULT_SAMPLE_RATE),
            channels: 2,
            frame_info: FrameInfo::default(),
            render_mode: RenderMode::default(),
        }
    }
}

impl StreamParams {
    /// Set the output device
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the preferred sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Set the output channel count
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Set frame sizing
    pub fn with_frame_info(mut self, frame_info: FrameInfo) -> Self {
        self.frame_info = frame_info;
        self
    }

    /// Set the render mode
    pub fn with_render_mode(mut self, mode: RenderMode) -> Self {
        self.render_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_mode_requires_matching_sizes() {
        assert!(FrameInfo::new(256, 256).is_valid(RenderMode::Callback));
        assert!(!FrameInfo::new(512, 256).is_valid(RenderMode::Callback));
    }

    #[test]
    fn test_render_ahead_allows_smaller_quantum() {
        assert!(FrameInfo::new(256, 256).is_valid(RenderMode::RenderAhead));
        assert!(FrameInfo::new(512, 128).is_valid(RenderMode::RenderAhead));
        // Quantum larger than the device buffer cannot be scheduled.
        assert!(!FrameInfo::new(128, 512).is_valid(RenderMode::RenderAhead));
    }

    #[test]
    fn test_non_power_of_two_rejected() {
        assert!(!FrameInfo::new(100, 100).is_valid(RenderMode::Callback));
        assert!(!FrameInfo::new(100, 64).is_valid(RenderMode::RenderAhead));
        assert!(!FrameInfo::new(0, 64).is_valid(RenderMode::RenderAhead));
    }

    #[test]
    fn test_oversized_quantum_rejected() {
        assert!(!FrameInfo::new(8192, 8192).is_valid(RenderMode::Callback));
    }
}
