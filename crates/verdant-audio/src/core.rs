//! The audio core: explicit context object tying every subsystem together
//!
//! [`AudioCore`] owns the control-thread halves (publish sets, modification
//! queue, parameter system, event system, arena) and the stream; the paired
//! [`RenderContext`] owns the render-thread halves and is driven by the
//! stream's callback or render-ahead thread. Nothing here is global: two
//! cores in one process stay fully independent.
//!
//! The control thread's cycle is `ui_begin_update` (collect events and
//! buffers), arbitrary edits, then `ui_end_update` (evaluate automation,
//! commit parameters, commit graph modifications, run the collector).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use basedrop::{Collector, Handle, Shared};

use crate::arena::{
    buffer_arena, ArenaStats, BufferArenaRender, BufferArenaUi, BufferAwaitingEvent, BufferView,
};
use crate::event::{
    event_channel, AudioEventSystemRender, AudioEventSystemUi, EventStats, StampedEvent,
};
use crate::graph::{
    AudioNode, GraphChange, GraphReaders, GraphSets, ModificationQueue, NodeSlot, NoteClipSystem,
    NoteEvent, QuantumBuffers, Recorder, RecorderTap, RenderServices, Scale, SetOp, TimelineClip,
    TimelineSystem, Transport,
};
use crate::params::{parameter_system, ParameterStats, ParameterSystemRender, ParameterSystemUi};
use crate::stream::{
    AudioStream, FrameInfo, StreamInfo, StreamParams, StreamResult, StreamState,
};
use crate::types::{
    EventId, RenderQuantumInfo, Sample, DEFAULT_SAMPLE_RATE, MAX_RENDER_QUANTUM,
};

/// Capacities for every bounded path through the core
#[derive(Debug, Clone)]
pub struct AudioCoreConfig {
    /// Per-category publish set capacity
    pub set_capacity: usize,
    /// Parameter changes in flight between commits
    pub param_ring_capacity: usize,
    /// Parameter changes delivered to one quantum
    pub param_log_capacity: usize,
    /// Stamped events in flight
    pub event_ring_capacity: usize,
    /// Events emitted within one quantum
    pub event_packet_capacity: usize,
    /// Arena page count
    pub arena_pages: usize,
    /// Words per arena page
    pub arena_page_words: usize,
    /// Arena buffers awaiting acquisition
    pub arena_handoff_capacity: usize,
    /// Arena buffers awaiting free
    pub arena_reclaim_capacity: usize,
    /// Stream configuration used by `open_stream`
    pub stream: StreamParams,
}

impl Default for AudioCoreConfig {
    fn default() -> Self {
        Self {
            set_capacity: 64,
            param_ring_capacity: 1024,
            param_log_capacity: 1024,
            event_ring_capacity: 256,
            event_packet_capacity: 64,
            arena_pages: 8,
            arena_page_words: 1 << 16,
            arena_handoff_capacity: 64,
            arena_reclaim_capacity: 64,
            stream: StreamParams::default(),
        }
    }
}

macro_rules! resource_handle {
    ($(#[$doc:meta])* $name:ident, $inner:ty) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name(Shared<$inner>);

        impl std::ops::Deref for $name {
            type Target = $inner;
            fn deref(&self) -> &$inner {
                &self.0
            }
        }
    };
}

resource_handle!(
    /// Handle to an added renderable node
    RenderableHandle,
    NodeSlot
);
resource_handle!(
    /// Handle to an added master effect
    EffectHandle,
    NodeSlot
);
resource_handle!(
    /// Handle to an added transport; playback state is readable and writable
    /// at any time through its atomics
    TransportHandle,
    Transport
);
resource_handle!(
    /// Handle to an added scale
    ScaleHandle,
    Scale
);
resource_handle!(
    /// Handle to an added recorder; samples come out of the paired tap
    RecorderHandle,
    Recorder
);
resource_handle!(
    /// Handle to an added timeline system
    TimelineHandle,
    TimelineSystem
);
resource_handle!(
    /// Handle to an added note-clip system
    NoteClipHandle,
    NoteClipSystem
);

/// Everything collected by one `ui_begin_update`
#[derive(Default)]
pub struct UiUpdate {
    /// Events whose DAC time has arrived (buffer-gating events excluded)
    pub events: Vec<StampedEvent>,
    /// Arena buffers acquired this poll
    pub buffers: Vec<BufferAwaitingEvent>,
    /// Events were dropped somewhere since the last poll
    pub dropped_events: bool,
}

/// Render-thread half of the core
///
/// Owned by the stream behind a mutex the render driver holds for the length
/// of a quantum; the control thread only locks it during reconfiguration,
/// which never overlaps a running stream.
pub struct RenderContext {
    graph: GraphReaders,
    params: ParameterSystemRender,
    events: AudioEventSystemRender,
    arena: BufferArenaRender,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    frames_per_quantum: u32,
    channels: usize,
    mix: Vec<Sample>,
    node_in: Vec<Sample>,
    node_out: Vec<Sample>,
}

impl RenderContext {
    fn new(
        graph: GraphReaders,
        params: ParameterSystemRender,
        events: AudioEventSystemRender,
        arena: BufferArenaRender,
        frames_rendered: Arc<AtomicU64>,
    ) -> Self {
        Self {
            graph,
            params,
            events,
            arena,
            frames_rendered,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_quantum: 0,
            channels: 2,
            mix: vec![0.0; 2 * MAX_RENDER_QUANTUM],
            node_in: vec![0.0; 2 * MAX_RENDER_QUANTUM],
            node_out: vec![0.0; 2 * MAX_RENDER_QUANTUM],
        }
    }

    /// Size the context for a (re)opened stream. Control thread only; all
    /// scratch allocation happens here, never inside a quantum.
    pub fn configure(&mut self, frame_info: FrameInfo, sample_rate: u32, channels: usize) {
        self.sample_rate = sample_rate;
        self.frames_per_quantum = frame_info.frames_per_render_quantum;
        self.channels = channels;
        let scratch = channels * MAX_RENDER_QUANTUM;
        self.mix.resize(scratch, 0.0);
        self.node_in.resize(scratch, 0.0);
        self.node_out.resize(scratch, 0.0);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Render one quantum into the internal mix.
    ///
    /// Order per quantum: refill parameter log and reset the event packet,
    /// reclaim arena space, snapshot the published sets, advance playing
    /// transports, run every renderable against silent input and sum, chain
    /// master effects over the mix, feed recorders, then stamp and send this
    /// quantum's events.
    pub fn render_quantum(&mut self) {
        let num_frames = self.frames_per_quantum as usize;
        if num_frames == 0 {
            return;
        }
        let channels = self.channels;
        let samples = channels * num_frames;
        let render_frame = self.frames_rendered.load(Ordering::Relaxed);
        let info = RenderQuantumInfo {
            sample_rate: self.sample_rate,
            num_frames: num_frames as u32,
            render_frame,
        };

        self.params.render_begin_process();
        self.events.render_begin_process();
        self.arena.render_begin_quantum();

        let renderables = self.graph.renderables.read();
        let effects = self.graph.effects.read();
        let transports = self.graph.transports.read();
        let recorders = self.graph.recorders.read();

        for transport in transports.iter() {
            if transport.is_playing() {
                transport.advance(num_frames as u64);
            }
        }

        self.mix[..samples].fill(0.0);

        for slot in renderables.iter() {
            self.node_in[..samples].fill(0.0);
            self.node_out[..samples].fill(0.0);
            let input = QuantumBuffers::new(&mut self.node_in[..samples], channels, num_frames);
            let mut output =
                QuantumBuffers::new(&mut self.node_out[..samples], channels, num_frames);
            let mut services = RenderServices {
                params: self.params.render_read_changes(),
                events: &mut self.events,
                arena: &mut self.arena,
            };
            let mut node = slot.claim();
            node.process(&input, &mut output, &mut services, &info);
            drop(node);
            for (dst, src) in self.mix[..samples].iter_mut().zip(&self.node_out[..samples]) {
                *dst += *src;
            }
        }

        // Effects run in series over the summed mix.
        for slot in effects.iter() {
            self.node_in[..samples].copy_from_slice(&self.mix[..samples]);
            self.node_out[..samples].fill(0.0);
            let input = QuantumBuffers::new(&mut self.node_in[..samples], channels, num_frames);
            let mut output =
                QuantumBuffers::new(&mut self.node_out[..samples], channels, num_frames);
            let mut services = RenderServices {
                params: self.params.render_read_changes(),
                events: &mut self.events,
                arena: &mut self.arena,
            };
            let mut node = slot.claim();
            node.process(&input, &mut output, &mut services, &info);
            drop(node);
            self.mix[..samples].copy_from_slice(&self.node_out[..samples]);
        }

        for recorder in recorders.iter() {
            recorder.capture(&self.mix[..samples], channels, num_frames);
        }

        self.frames_rendered
            .fetch_add(num_frames as u64, Ordering::Relaxed);
        let quantum_dac_time = render_frame as f64 / self.sample_rate as f64;
        self.events
            .render_end_process(quantum_dac_time, self.sample_rate);
    }

    /// Render whole quanta into an interleaved device buffer.
    ///
    /// Fills as many complete quanta as fit; a partial tail (device buffer
    /// not a multiple of the quantum) plays silence. Rendered channels beyond
    /// `device_channels` are dropped, missing ones are zero-filled.
    pub fn render_into_interleaved(&mut self, data: &mut [f32], device_channels: usize) {
        let num_frames = self.frames_per_quantum as usize;
        if num_frames == 0 || device_channels == 0 {
            data.fill(0.0);
            return;
        }

        let mut cursor = 0;
        let mut frames_left = data.len() / device_channels;
        while frames_left >= num_frames {
            self.render_quantum();
            let copied = self.channels.min(device_channels);
            for frame in 0..num_frames {
                let base = cursor + frame * device_channels;
                for ch in 0..device_channels {
                    data[base + ch] = if ch < copied {
                        self.mix[ch * num_frames + frame]
                    } else {
                        0.0
                    };
                }
            }
            cursor += num_frames * device_channels;
            frames_left -= num_frames;
        }
        data[cursor..].fill(0.0);
    }
}

/// Control-thread face of the audio core
pub struct AudioCore {
    collector: Collector,
    gc: Handle,
    sets: GraphSets,
    queue: ModificationQueue,
    params: ParameterSystemUi,
    events: AudioEventSystemUi,
    arena: BufferArenaUi,
    stream: AudioStream,
    stream_params: StreamParams,
    render: Arc<Mutex<RenderContext>>,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    transports: Vec<TransportHandle>,
    next_resource_id: u64,
}

impl AudioCore {
    /// Build a core and all of its bounded channels. No device is touched
    /// until `open_stream`.
    pub fn new(config: AudioCoreConfig) -> Self {
        let collector = Collector::new();
        let gc = collector.handle();
        let (sets, readers) = GraphSets::new(config.set_capacity, &gc);
        let (params_ui, params_render) =
            parameter_system(config.param_ring_capacity, config.param_log_capacity);
        let (events_ui, events_render) =
            event_channel(config.event_ring_capacity, config.event_packet_capacity);
        let (arena_ui, arena_render) = buffer_arena(
            config.arena_pages,
            config.arena_page_words,
            config.arena_handoff_capacity,
            config.arena_reclaim_capacity,
        );
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let render = Arc::new(Mutex::new(RenderContext::new(
            readers,
            params_render,
            events_render,
            arena_render,
            frames_rendered.clone(),
        )));
        let sample_rate = config.stream.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);

        Self {
            collector,
            gc,
            sets,
            queue: ModificationQueue::new(),
            params: params_ui,
            events: events_ui,
            arena: arena_ui,
            stream: AudioStream::new(),
            stream_params: config.stream,
            render,
            frames_rendered,
            sample_rate,
            transports: Vec::new(),
            next_resource_id: 1,
        }
    }

    fn next_resource_id(&mut self) -> u64 {
        let id = self.next_resource_id;
        self.next_resource_id += 1;
        id
    }

    // ── Stream lifecycle ──────────────────────────────────────────────────

    /// Open and start the configured stream
    pub fn open_stream(&mut self) -> StreamResult<()> {
        let params = self.stream_params.clone();
        self.stream.open(&params, self.render.clone())?;
        self.adopt_stream_rate();
        self.stream.start()
    }

    /// Swap in a new stream configuration (close, reopen, start).
    ///
    /// Invalid frame sizing is rejected before the running stream is
    /// touched; the previous stream keeps playing. Any later failure leaves
    /// the stream `Closed` and keeps the last-good configuration, so
    /// `open_stream` restores what was playing before.
    pub fn change_stream(&mut self, params: StreamParams) -> StreamResult<()> {
        self.stream.change(&params, self.render.clone())?;
        self.stream_params = params;
        self.adopt_stream_rate();
        Ok(())
    }

    pub fn stop_stream(&mut self) -> StreamResult<()> {
        self.stream.stop()
    }

    pub fn close_stream(&mut self) {
        self.stream.close();
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream.info()
    }

    fn adopt_stream_rate(&mut self) {
        if let Some(info) = self.stream.info() {
            self.sample_rate = info.sample_rate;
        }
    }

    /// The shared render context, for driving quanta without a device
    /// (offline rendering and tests)
    pub fn render_context(&self) -> Arc<Mutex<RenderContext>> {
        self.render.clone()
    }

    /// Stream time in seconds derived from frames actually rendered
    pub fn current_stream_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    // ── Graph membership ──────────────────────────────────────────────────

    /// Queue a renderable for addition and register its parameters.
    /// Takes effect at the next `ui_end_update`.
    pub fn add_renderable(&mut self, node: Box<dyn AudioNode>) -> RenderableHandle {
        self.params.register_parameters(node.parameter_descriptors());
        let shared = Shared::new(&self.gc, NodeSlot::new(node));
        self.queue
            .push(GraphChange::Renderable(SetOp::Add(shared.clone())));
        RenderableHandle(shared)
    }

    /// Queue a renderable for removal and forget its parameters
    pub fn remove_renderable(&mut self, handle: &RenderableHandle) {
        self.params.unregister_node(handle.id());
        self.queue
            .push(GraphChange::Renderable(SetOp::Remove(handle.0.clone())));
    }

    /// Queue a master effect for addition. Effects process the summed mix in
    /// the order they were added.
    pub fn add_effect(&mut self, node: Box<dyn AudioNode>) -> EffectHandle {
        self.params.register_parameters(node.parameter_descriptors());
        let shared = Shared::new(&self.gc, NodeSlot::new(node));
        self.queue
            .push(GraphChange::Effect(SetOp::Add(shared.clone())));
        EffectHandle(shared)
    }

    pub fn remove_effect(&mut self, handle: &EffectHandle) {
        self.params.unregister_node(handle.id());
        self.queue
            .push(GraphChange::Effect(SetOp::Remove(handle.0.clone())));
    }

    pub fn add_transport(&mut self, tempo_bpm: f64) -> TransportHandle {
        let id = self.next_resource_id();
        let shared = Shared::new(&self.gc, Transport::new(id, tempo_bpm));
        self.queue
            .push(GraphChange::Transport(SetOp::Add(shared.clone())));
        let handle = TransportHandle(shared);
        self.transports.push(handle.clone());
        handle
    }

    pub fn remove_transport(&mut self, handle: &TransportHandle) {
        self.transports.retain(|t| t.id() != handle.id());
        self.queue
            .push(GraphChange::Transport(SetOp::Remove(handle.0.clone())));
    }

    pub fn add_scale(&mut self, reference_hz: f64, ratios: Vec<f64>) -> ScaleHandle {
        let id = self.next_resource_id();
        let shared = Shared::new(&self.gc, Scale::new(id, reference_hz, ratios));
        self.queue
            .push(GraphChange::Scale(SetOp::Add(shared.clone())));
        ScaleHandle(shared)
    }

    pub fn remove_scale(&mut self, handle: &ScaleHandle) {
        self.queue
            .push(GraphChange::Scale(SetOp::Remove(handle.0.clone())));
    }

    /// Add a recorder capturing the master mix; captured samples come out of
    /// the returned tap.
    pub fn add_recorder(
        &mut self,
        num_channels: usize,
        capacity_frames: usize,
    ) -> (RecorderHandle, RecorderTap) {
        let id = self.next_resource_id();
        let (recorder, tap) = Recorder::new(id, num_channels, capacity_frames);
        let shared = Shared::new(&self.gc, recorder);
        self.queue
            .push(GraphChange::Recorder(SetOp::Add(shared.clone())));
        (RecorderHandle(shared), tap)
    }

    pub fn remove_recorder(&mut self, handle: &RecorderHandle) {
        self.queue
            .push(GraphChange::Recorder(SetOp::Remove(handle.0.clone())));
    }

    pub fn add_timeline(&mut self, clips: Vec<TimelineClip>) -> TimelineHandle {
        let id = self.next_resource_id();
        let shared = Shared::new(&self.gc, TimelineSystem::new(id, clips));
        self.queue
            .push(GraphChange::Timeline(SetOp::Add(shared.clone())));
        TimelineHandle(shared)
    }

    pub fn remove_timeline(&mut self, handle: &TimelineHandle) {
        self.queue
            .push(GraphChange::Timeline(SetOp::Remove(handle.0.clone())));
    }

    pub fn add_note_clips(&mut self, notes: Vec<NoteEvent>) -> NoteClipHandle {
        let id = self.next_resource_id();
        let shared = Shared::new(&self.gc, NoteClipSystem::new(id, notes));
        self.queue
            .push(GraphChange::NoteClips(SetOp::Add(shared.clone())));
        NoteClipHandle(shared)
    }

    pub fn remove_note_clips(&mut self, handle: &NoteClipHandle) {
        self.queue
            .push(GraphChange::NoteClips(SetOp::Remove(handle.0.clone())));
    }

    // ── Control-thread cycle ──────────────────────────────────────────────

    /// Parameter system access for staging values and editing automation
    pub fn params(&mut self) -> &mut ParameterSystemUi {
        &mut self.params
    }

    /// Collect everything that became visible since the last poll: ready
    /// events, acquired arena buffers, drop notices.
    pub fn ui_begin_update(&mut self) -> UiUpdate {
        let dropped_events = self.events.ui_check_dropped_events();
        let now = self.current_stream_time();
        let update = self.events.ui_update(now);
        let ready_ids: Vec<EventId> = update.newly_acquired.iter().map(|s| s.id).collect();
        self.arena.ui_update(&ready_ids, dropped_events);
        UiUpdate {
            events: update.newly_ready,
            buffers: self.arena.ui_read_newly_received(),
            dropped_events,
        }
    }

    /// Publish this tick's edits: evaluate the active automation curve at
    /// the playing transport's position, commit staged parameter changes,
    /// commit queued graph modifications, and run the collector.
    pub fn ui_end_update(&mut self) {
        let position = self
            .transports
            .iter()
            .find(|t| t.is_playing())
            .map(|t| t.score_position(self.sample_rate));
        if let Some(position) = position {
            self.params.ui_apply_break_points(position);
        }
        self.params.ui_commit();
        self.queue.commit(&mut self.sets);
        self.collector.collect();
    }

    /// Hand an acquired arena buffer back for reuse. `Err` returns the view
    /// when the reclaim path is momentarily full; retry next tick.
    pub fn release_buffer(&mut self, view: BufferView) -> Result<(), BufferView> {
        self.arena.ui_release(view)
    }

    // ── Diagnostics ───────────────────────────────────────────────────────

    pub fn parameter_stats(&self) -> ParameterStats {
        self.params.stats()
    }

    pub fn event_stats(&self) -> EventStats {
        self.events.stats()
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }
}

impl Drop for AudioCore {
    fn drop(&mut self) {
        self.stream.close();
        self.collector.collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::params::{
        AudioParameterDescriptor, AudioParameterId, ParameterFlags, ParameterRamp,
    };
    use crate::stream::RenderMode;
    use crate::types::{AudioEventStreamHandle, NodeId, WriterId};

    /// Emits a constant level on both channels and reports each quantum's
    /// start frame as an event.
    struct LevelNode {
        id: NodeId,
        ramp: ParameterRamp,
    }

    impl LevelNode {
        fn new(id: u64, level: f32) -> Self {
            Self {
                id: NodeId::new(id),
                ramp: ParameterRamp::new(level),
            }
        }
    }

    const OUTPUTS: [crate::graph::PortDescriptor; 1] = [crate::graph::PortDescriptor::audio()];

    impl AudioNode for LevelNode {
        fn id(&self) -> NodeId {
            self.id
        }

        fn inputs(&self) -> &[crate::graph::PortDescriptor] {
            &[]
        }

        fn outputs(&self) -> &[crate::graph::PortDescriptor] {
            &OUTPUTS
        }

        fn parameter_descriptors(&self) -> Vec<AudioParameterDescriptor> {
            vec![AudioParameterDescriptor {
                id: AudioParameterId::new(self.id, 0),
                name: "level",
                min_value: 0.0,
                max_value: 1.0,
                default_value: self.ramp.value(),
                flags: ParameterFlags::default(),
            }]
        }

        fn process(
            &mut self,
            _input: &QuantumBuffers<'_>,
            output: &mut QuantumBuffers<'_>,
            services: &mut RenderServices<'_>,
            info: &RenderQuantumInfo,
        ) {
            let view = services.params.view_by_parent(self.id).view_by_parameter(0);
            self.ramp.apply_changes(services.params, view);

            for frame in 0..output.num_frames() {
                let value = self.ramp.next_frame();
                for ch in 0..output.num_channels() {
                    output.channel_mut(ch)[frame] = value;
                }
            }
            services.events.render_push_event(
                AudioEventStreamHandle::DEFAULT,
                0,
                EventPayload::TransportPosition {
                    transport: 0,
                    frame: info.render_frame,
                },
            );
        }
    }

    fn offline_core() -> AudioCore {
        let core = AudioCore::new(AudioCoreConfig::default());
        core.render_context()
            .lock()
            .unwrap()
            .configure(FrameInfo::new(256, 256), 48_000, 2);
        core
    }

    #[test]
    fn test_added_node_renders_into_the_mix() {
        let mut core = offline_core();
        core.add_renderable(Box::new(LevelNode::new(1, 0.25)));
        core.ui_end_update();

        let mut out = vec![0.0f32; 256 * 2];
        core.render_context()
            .lock()
            .unwrap()
            .render_into_interleaved(&mut out, 2);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_node_invisible_before_ui_end_update() {
        let mut core = offline_core();
        core.add_renderable(Box::new(LevelNode::new(1, 0.25)));

        let mut out = vec![1.0f32; 256 * 2];
        core.render_context()
            .lock()
            .unwrap()
            .render_into_interleaved(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_parameter_change_reaches_node() {
        let mut core = offline_core();
        let handle = core.add_renderable(Box::new(LevelNode::new(1, 0.0)));
        core.ui_end_update();

        let param = AudioParameterId::new(handle.id(), 0);
        core.params()
            .ui_set_value_with_ramp(WriterId::new(1), param, 1.0, 0);
        core.ui_end_update();

        let mut out = vec![0.0f32; 256 * 2];
        core.render_context()
            .lock()
            .unwrap()
            .render_into_interleaved(&mut out, 2);
        assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_events_flow_back_after_their_dac_time() {
        let mut core = offline_core();
        core.add_renderable(Box::new(LevelNode::new(1, 0.1)));
        core.ui_end_update();

        let mut out = vec![0.0f32; 256 * 2];
        core.render_context()
            .lock()
            .unwrap()
            .render_into_interleaved(&mut out, 2);

        // 256 frames have been rendered; the event was stamped for frame 0.
        let update = core.ui_begin_update();
        assert_eq!(update.events.len(), 1);
        assert!(!update.dropped_events);
        assert!(matches!(
            update.events[0].event.payload,
            EventPayload::TransportPosition { frame: 0, .. }
        ));
    }

    #[test]
    fn test_transport_advances_only_while_playing() {
        let mut core = offline_core();
        let transport = core.add_transport(120.0);
        core.ui_end_update();

        let ctx = core.render_context();
        ctx.lock().unwrap().render_quantum();
        assert_eq!(transport.position_frames(), 0);

        transport.set_playing(true);
        ctx.lock().unwrap().render_quantum();
        assert_eq!(transport.position_frames(), 256);
    }

    #[test]
    fn test_recorder_captures_the_mix() {
        let mut core = offline_core();
        core.add_renderable(Box::new(LevelNode::new(1, 0.5)));
        let (_handle, mut tap) = core.add_recorder(2, 4096);
        core.ui_end_update();

        core.render_context().lock().unwrap().render_quantum();

        let mut samples = Vec::new();
        assert_eq!(tap.read(&mut samples), 256);
        assert!(samples.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_effect_processes_after_renderables() {
        /// Halves whatever it is fed.
        struct HalveEffect;
        impl AudioNode for HalveEffect {
            fn id(&self) -> NodeId {
                NodeId::new(99)
            }
            fn inputs(&self) -> &[crate::graph::PortDescriptor] {
                &OUTPUTS
            }
            fn outputs(&self) -> &[crate::graph::PortDescriptor] {
                &OUTPUTS
            }
            fn parameter_descriptors(&self) -> Vec<AudioParameterDescriptor> {
                Vec::new()
            }
            fn process(
                &mut self,
                input: &QuantumBuffers<'_>,
                output: &mut QuantumBuffers<'_>,
                _services: &mut RenderServices<'_>,
                _info: &RenderQuantumInfo,
            ) {
                for ch in 0..output.num_channels() {
                    for frame in 0..output.num_frames() {
                        output.channel_mut(ch)[frame] = input.channel(ch)[frame] * 0.5;
                    }
                }
            }
        }

        let mut core = offline_core();
        core.add_renderable(Box::new(LevelNode::new(1, 0.8)));
        core.add_effect(Box::new(HalveEffect));
        core.ui_end_update();

        let mut out = vec![0.0f32; 256 * 2];
        core.render_context()
            .lock()
            .unwrap()
            .render_into_interleaved(&mut out, 2);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_removed_node_falls_silent() {
        let mut core = offline_core();
        let handle = core.add_renderable(Box::new(LevelNode::new(1, 0.25)));
        core.ui_end_update();

        core.remove_renderable(&handle);
        core.ui_end_update();

        let mut out = vec![1.0f32; 256 * 2];
        core.render_context()
            .lock()
            .unwrap()
            .render_into_interleaved(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_automation_follows_playing_transport() {
        let mut core = offline_core();
        let handle = core.add_renderable(Box::new(LevelNode::new(1, 0.0)));
        let transport = core.add_transport(120.0);
        core.ui_end_update();

        let param = AudioParameterId::new(handle.id(), 0);
        let set = core
            .params()
            .ui_create_break_point_set(WriterId::AUTOMATION, param);
        core.params()
            .ui_insert_break_point(WriterId::AUTOMATION, set, 0.0, 0.0);
        core.params()
            .ui_insert_break_point(WriterId::AUTOMATION, set, 4.0, 1.0);
        core.params().ui_set_active_break_point_set(Some(set));

        // One second at 120 BPM puts the playhead at beat 2, halfway up.
        transport.set_playing(true);
        transport.seek_frames(48_000);
        core.ui_end_update();
        assert_eq!(core.params().value_of(param), Some(0.5));
    }

    #[test]
    fn test_change_stream_rejects_invalid_frames_without_closing() {
        let mut core = offline_core();
        let params = StreamParams::default()
            .with_frame_info(FrameInfo::new(100, 100))
            .with_render_mode(RenderMode::Callback);
        assert!(core.change_stream(params).is_err());
        // The (closed) prior stream state is untouched.
        assert_eq!(core.stream_state(), StreamState::Closed);
    }

    #[test]
    fn test_change_stream_device_failure_closes_cleanly() {
        let mut core = offline_core();
        let params = StreamParams::default()
            .with_device(crate::stream::DeviceId::new("no such device anywhere"));

        // Valid frame sizing, so the failure happens after the swap begins.
        assert!(core.change_stream(params).is_err());
        assert_eq!(core.stream_state(), StreamState::Closed);
        assert!(core.stream_info().is_none());
    }

    #[test]
    fn test_partial_device_buffer_tail_is_silence() {
        let mut core = offline_core();
        core.add_renderable(Box::new(LevelNode::new(1, 0.25)));
        core.ui_end_update();

        // 300 frames: one full quantum plus a 44-frame tail.
        let mut out = vec![1.0f32; 300 * 2];
        core.render_context()
            .lock()
            .unwrap()
            .render_into_interleaved(&mut out, 2);
        assert!(out[..256 * 2].iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert!(out[256 * 2..].iter().all(|&s| s == 0.0));
    }
}
