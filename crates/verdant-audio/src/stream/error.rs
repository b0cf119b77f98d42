//! Stream error types

use thiserror::Error;

use super::config::FrameInfo;

/// Errors that can occur opening or controlling the output stream
#[derive(Error, Debug)]
pub enum StreamError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Rejected frame sizes (non power-of-two, out of range, or mismatched
    /// for the chosen render mode)
    #[error("Invalid frame configuration: {frames_per_buffer} frames/buffer, {frames_per_render_quantum} frames/quantum")]
    InvalidFrameInfo {
        frames_per_buffer: u32,
        frames_per_render_quantum: u32,
    },

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Failed to pause stream
    #[error("Failed to pause audio stream: {0}")]
    StreamPauseError(String),
}

impl StreamError {
    pub fn invalid_frame_info(info: &FrameInfo) -> Self {
        Self::InvalidFrameInfo {
            frames_per_buffer: info.frames_per_buffer,
            frames_per_render_quantum: info.frames_per_render_quantum,
        }
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
