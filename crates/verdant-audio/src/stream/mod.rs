//! Output stream lifecycle
//!
//! Wraps a cpal output stream around the shared [`RenderContext`]. Two render
//! modes are supported: rendering directly inside the device callback, or
//! rendering ahead on a dedicated thread decoupled through a lock-free sample
//! ring (the callback then only pops samples and never waits on the renderer).
//!
//! The stream is an explicit state machine (`Closed → Open → Started ⇄
//! Stopped → Closed`). Transition misuse panics; device and configuration
//! failures are `Err`.

mod config;
mod device;
mod error;

pub use config::{
    DeviceId, FrameInfo, RenderMode, StreamParams, DEFAULT_FRAMES_PER_BUFFER,
    DEFAULT_FRAMES_PER_RENDER_QUANTUM,
};
pub use device::{default_output_device, devices_for, find_device, output_devices, AudioDevice};
pub use error::{StreamError, StreamResult};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use crate::core::RenderContext;
use crate::types::DEFAULT_SAMPLE_RATE;

/// Lifecycle state of the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Open,
    Started,
    Stopped,
}

/// Facts about the open stream, as negotiated with the device
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub device_name: String,
    pub sample_rate: u32,
    /// Channels delivered to the device (may exceed the rendered channels;
    /// extras are zero-filled)
    pub device_channels: u16,
    /// Channels actually rendered
    pub channels: u16,
    pub frame_info: FrameInfo,
    pub render_mode: RenderMode,
    pub latency_ms: f32,
}

struct RenderThread {
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl RenderThread {
    fn shut_down(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// The output stream state machine
pub struct AudioStream {
    state: StreamState,
    stream: Option<Stream>,
    render_thread: Option<RenderThread>,
    info: Option<StreamInfo>,
}

impl Default for AudioStream {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioStream {
    pub fn new() -> Self {
        Self {
            state: StreamState::Closed,
            stream: None,
            render_thread: None,
            info: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Facts about the stream while it is open
    pub fn info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    /// Open the stream against the configured (or default) device.
    ///
    /// Validates frame sizing before touching any device, negotiates a device
    /// configuration, wires the render context in, and leaves the stream in
    /// `Open` (not yet audible).
    ///
    /// # Panics
    ///
    /// Panics when the stream is not `Closed`.
    pub fn open(
        &mut self,
        params: &StreamParams,
        ctx: Arc<Mutex<RenderContext>>,
    ) -> StreamResult<()> {
        assert_eq!(
            self.state,
            StreamState::Closed,
            "opening a stream that is not closed"
        );
        if !params.frame_info.is_valid(params.render_mode) {
            return Err(StreamError::invalid_frame_info(&params.frame_info));
        }

        let device = match &params.device {
            Some(id) => device::find_device(id)?,
            None => device::cpal_default_device()?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio device: {}", device_name);

        let supported = output_config(&device, params)?;
        let sample_rate = supported.sample_rate().0;
        let device_channels = supported.channels().max(params.channels);

        let stream_config = StreamConfig {
            channels: device_channels,
            sample_rate: supported.sample_rate(),
            buffer_size: CpalBufferSize::Fixed(params.frame_info.frames_per_buffer),
        };

        let latency_ms = params.frame_info.latency_ms(sample_rate);
        log::info!(
            "Audio config: {} channels, {}Hz, {} frames/buffer, {} frames/quantum (~{:.1}ms latency, {:?})",
            device_channels,
            sample_rate,
            params.frame_info.frames_per_buffer,
            params.frame_info.frames_per_render_quantum,
            latency_ms,
            params.render_mode,
        );

        {
            let mut ctx = ctx.lock().unwrap();
            ctx.configure(params.frame_info, sample_rate, params.channels as usize);
        }

        let (stream, render_thread) = match params.render_mode {
            RenderMode::Callback => (
                build_callback_stream(&device, &stream_config, ctx)?,
                None,
            ),
            RenderMode::RenderAhead => {
                let (stream, thread) =
                    build_render_ahead_stream(&device, &stream_config, params, ctx)?;
                (stream, Some(thread))
            }
        };

        self.stream = Some(stream);
        self.render_thread = render_thread;
        self.info = Some(StreamInfo {
            device_name,
            sample_rate,
            device_channels,
            channels: params.channels,
            frame_info: params.frame_info,
            render_mode: params.render_mode,
            latency_ms,
        });
        self.state = StreamState::Open;
        Ok(())
    }

    /// Make the stream audible.
    ///
    /// # Panics
    ///
    /// Panics unless the stream is `Open` or `Stopped`.
    pub fn start(&mut self) -> StreamResult<()> {
        assert!(
            matches!(self.state, StreamState::Open | StreamState::Stopped),
            "starting a stream that is not open or stopped"
        );
        self.stream
            .as_ref()
            .expect("stream present in open state")
            .play()
            .map_err(|e| StreamError::StreamPlayError(e.to_string()))?;
        self.state = StreamState::Started;
        Ok(())
    }

    /// Pause playback; the stream stays open and can be started again.
    ///
    /// # Panics
    ///
    /// Panics unless the stream is `Started`.
    pub fn stop(&mut self) -> StreamResult<()> {
        assert_eq!(
            self.state,
            StreamState::Started,
            "stopping a stream that is not started"
        );
        self.stream
            .as_ref()
            .expect("stream present in started state")
            .pause()
            .map_err(|e| StreamError::StreamPauseError(e.to_string()))?;
        self.state = StreamState::Stopped;
        Ok(())
    }

    /// Tear the stream down. Valid from any state; idempotent.
    pub fn close(&mut self) {
        if let Some(thread) = self.render_thread.take() {
            thread.shut_down();
        }
        self.stream = None;
        self.info = None;
        self.state = StreamState::Closed;
    }

    /// Replace the stream configuration in one motion: close, reopen, start.
    ///
    /// Frame sizing is validated before the running stream is touched, so an
    /// invalid request leaves the current stream playing. Any later failure
    /// leaves the stream `Closed`.
    pub fn change(
        &mut self,
        params: &StreamParams,
        ctx: Arc<Mutex<RenderContext>>,
    ) -> StreamResult<()> {
        if !params.frame_info.is_valid(params.render_mode) {
            return Err(StreamError::invalid_frame_info(&params.frame_info));
        }
        self.close();
        let started = self.open(params, ctx).and_then(|()| self.start());
        if let Err(e) = started {
            // Never leave a half-reconfigured stream behind: a failure after
            // the old stream is gone tears the new one down too.
            self.close();
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Get the best output configuration for a device
fn output_config(
    device: &cpal::Device,
    params: &StreamParams,
) -> StreamResult<cpal::SupportedStreamConfig> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| StreamError::ConfigError(e.to_string()))?
        .collect();

    if supported_configs.is_empty() {
        return Err(StreamError::ConfigError(
            "No supported output configurations".to_string(),
        ));
    }

    let target_sample_rate = params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);

    // Prefer f32, enough channels, and the requested sample rate.
    let best_config = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= params.channels)
        .find(|c| {
            target_sample_rate >= c.min_sample_rate().0
                && target_sample_rate <= c.max_sample_rate().0
        })
        .or_else(|| {
            supported_configs
                .iter()
                .find(|c| c.channels() >= params.channels)
        })
        .or_else(|| supported_configs.first())
        .ok_or_else(|| {
            StreamError::ConfigError("No suitable output configuration found".to_string())
        })?;

    let sample_rate = if target_sample_rate >= best_config.min_sample_rate().0
        && target_sample_rate <= best_config.max_sample_rate().0
    {
        cpal::SampleRate(target_sample_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_sample_rate,
            fallback.0
        );
        fallback
    };

    Ok(best_config.clone().with_sample_rate(sample_rate))
}

/// Build a stream that renders quanta directly inside the device callback
fn build_callback_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    ctx: Arc<Mutex<RenderContext>>,
) -> StreamResult<Stream> {
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut ctx = ctx.lock().unwrap();
                ctx.render_into_interleaved(data, channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| StreamError::StreamBuildError(e.to_string()))
}

/// Build a stream fed from a dedicated render thread through a sample ring.
///
/// The render thread keeps the ring topped up one quantum at a time; the
/// callback only pops and plays silence on underrun.
fn build_render_ahead_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    params: &StreamParams,
    ctx: Arc<Mutex<RenderContext>>,
) -> StreamResult<(Stream, RenderThread)> {
    let channels = config.channels as usize;
    let quantum_samples = params.frame_info.frames_per_render_quantum as usize * channels;
    // 4x the device buffer absorbs scheduling jitter between the two threads.
    let ring_capacity = params.frame_info.frames_per_buffer as usize * channels * 4;
    let (mut tx, mut rx) = rtrb::RingBuffer::<f32>::new(ring_capacity);
    log::debug!("Render-ahead ring created with capacity {} samples", ring_capacity);

    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let join = std::thread::Builder::new()
        .name("verdant-render".to_string())
        .spawn(move || {
            let mut scratch = vec![0.0f32; quantum_samples];
            while !thread_stop.load(Ordering::Acquire) {
                if tx.slots() >= quantum_samples {
                    {
                        let mut ctx = ctx.lock().unwrap();
                        ctx.render_into_interleaved(&mut scratch, channels);
                    }
                    for &sample in &scratch {
                        // Space was checked above; a failed push only means
                        // the consumer vanished.
                        if tx.push(sample).is_err() {
                            return;
                        }
                    }
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        })
        .map_err(|e| StreamError::StreamBuildError(e.to_string()))?;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    // Underrun plays silence; happens briefly at startup or
                    // when the renderer falls behind.
                    *sample = rx.pop().unwrap_or(0.0);
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| StreamError::StreamBuildError(e.to_string()))?;

    Ok((
        stream,
        RenderThread {
            stop,
            join: Some(join),
        },
    ))
}
