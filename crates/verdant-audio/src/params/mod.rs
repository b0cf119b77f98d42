//! Parameter system: staged control-thread writes, per-quantum render log
//!
//! Parameters are registered when their node is added and addressed by
//! `(node, index)`. The control thread stages value changes (directly or from
//! the active break-point curve) and pushes them over a bounded lock-free ring
//! at commit time; the render thread drains the ring into a flat
//! [`AudioParameterChanges`] log once per quantum. Overflow anywhere drops
//! changes and raises the resynchronize flag instead of blocking.
//!
//! Write access is cooperative: a parameter remembers which [`WriterId`] last
//! claimed it, and `ui_set_value_if_no_other_writer` lets the automation
//! evaluator and interactive controls avoid fighting over one knob.

mod break_points;
mod changes;
mod ramp;

pub use break_points::{BreakPoint, BreakPointSet, BreakPointSetHandle, BreakPointStore};
pub use changes::{AudioParameterChange, AudioParameterChanges, ParameterChanges, ParentChanges};
pub use ramp::ParameterRamp;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::types::{NodeId, WriterId};

/// Frames over which a plain `ui_set_value` ramps to its target.
/// Long enough to avoid zipper noise at any supported sample rate.
pub const DEFAULT_RAMP_FRAMES: u32 = 64;

/// Stable address of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioParameterId {
    pub node: NodeId,
    pub index: u16,
}

impl AudioParameterId {
    pub const fn new(node: NodeId, index: u16) -> Self {
        Self { node, index }
    }
}

/// Behavioral flags carried by a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterFlags {
    /// Writable from the control thread; read-only parameters are reported by
    /// the node and never staged
    pub editable: bool,
    /// Effective-value changes are worth reporting back through the event
    /// system (meters and debug views)
    pub monitorable: bool,
}

impl Default for ParameterFlags {
    fn default() -> Self {
        Self {
            editable: true,
            monitorable: true,
        }
    }
}

/// Static description of one parameter, reported by its node at registration
#[derive(Debug, Clone)]
pub struct AudioParameterDescriptor {
    pub id: AudioParameterId,
    pub name: &'static str,
    pub min_value: f32,
    pub max_value: f32,
    pub default_value: f32,
    pub flags: ParameterFlags,
}

impl AudioParameterDescriptor {
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min_value, self.max_value)
    }
}

/// Control-side mirror of one parameter's last staged value
struct ParameterValue {
    value: f32,
    /// Writer that most recently claimed this parameter, if any
    owner: Option<WriterId>,
}

/// Counters exposed for diagnostics
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterStats {
    pub num_staged: u64,
    pub num_committed: u64,
    pub num_dropped: u64,
}

/// Create a connected control/render pair.
///
/// `ring_capacity` bounds changes in flight between commits; `log_capacity`
/// bounds changes delivered to one quantum.
pub fn parameter_system(
    ring_capacity: usize,
    log_capacity: usize,
) -> (ParameterSystemUi, ParameterSystemRender) {
    let (tx, rx) = RingBuffer::new(ring_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let ui = ParameterSystemUi {
        descriptors: HashMap::new(),
        values: HashMap::new(),
        break_points: BreakPointStore::new(),
        staged: Vec::new(),
        tx,
        dropped: dropped.clone(),
        stats: ParameterStats::default(),
    };
    let render = ParameterSystemRender {
        rx,
        log: AudioParameterChanges::with_capacity(log_capacity),
        dropped,
        dropped_seen: 0,
    };
    (ui, render)
}

/// Control-thread half of the parameter system
pub struct ParameterSystemUi {
    descriptors: HashMap<AudioParameterId, AudioParameterDescriptor>,
    values: HashMap<AudioParameterId, ParameterValue>,
    break_points: BreakPointStore,
    staged: Vec<AudioParameterChange>,
    tx: Producer<AudioParameterChange>,
    dropped: Arc<AtomicU64>,
    stats: ParameterStats,
}

impl ParameterSystemUi {
    /// Register a node's parameters, typically when the node is added to the
    /// graph. Each value starts at its descriptor default with no owner.
    pub fn register_parameters(&mut self, descriptors: Vec<AudioParameterDescriptor>) {
        for desc in descriptors {
            self.values.insert(
                desc.id,
                ParameterValue {
                    value: desc.default_value,
                    owner: None,
                },
            );
            self.descriptors.insert(desc.id, desc);
        }
    }

    /// Forget every parameter belonging to `node`, typically when the node is
    /// removed from the graph.
    pub fn unregister_node(&mut self, node: NodeId) {
        self.descriptors.retain(|id, _| id.node != node);
        self.values.retain(|id, _| id.node != node);
    }

    pub fn descriptor(&self, id: AudioParameterId) -> Option<&AudioParameterDescriptor> {
        self.descriptors.get(&id)
    }

    /// Last staged value, as the control thread sees it
    pub fn value_of(&self, id: AudioParameterId) -> Option<f32> {
        self.values.get(&id).map(|v| v.value)
    }

    /// Writer currently claiming `id`, if any
    pub fn owner_of(&self, id: AudioParameterId) -> Option<WriterId> {
        self.values.get(&id).and_then(|v| v.owner)
    }

    /// Stage a value with the default smoothing ramp.
    ///
    /// # Panics
    ///
    /// Panics on an unknown parameter id or a read-only parameter; both are
    /// caller bugs, not runtime conditions.
    pub fn ui_set_value(&mut self, writer: WriterId, id: AudioParameterId, value: f32) {
        self.ui_set_value_with_ramp(writer, id, value, DEFAULT_RAMP_FRAMES);
    }

    /// Stage a value with an explicit ramp length (0 jumps immediately)
    pub fn ui_set_value_with_ramp(
        &mut self,
        writer: WriterId,
        id: AudioParameterId,
        value: f32,
        ramp_frames: u32,
    ) {
        let desc = self
            .descriptors
            .get(&id)
            .expect("setting an unregistered parameter");
        assert!(desc.flags.editable, "setting a read-only parameter");
        let value = desc.clamp(value);

        let state = self.values.get_mut(&id).expect("value missing for descriptor");
        state.value = value;
        state.owner = Some(writer);

        self.staged.push(AudioParameterChange {
            param: id,
            writer,
            value,
            start_frame: 0,
            ramp_frames,
        });
        self.stats.num_staged += 1;
    }

    /// Stage a value only if no other writer currently claims the parameter.
    ///
    /// Returns `true` when the write went through (and `writer` now owns the
    /// parameter). The automation evaluator uses this so a knob the performer
    /// is holding stays under their control.
    pub fn ui_set_value_if_no_other_writer(
        &mut self,
        writer: WriterId,
        id: AudioParameterId,
        value: f32,
    ) -> bool {
        match self.values.get(&id).and_then(|v| v.owner) {
            Some(owner) if owner != writer => false,
            _ => {
                self.ui_set_value(writer, id, value);
                true
            }
        }
    }

    /// Release `writer`'s claim so automation (or another writer) may take
    /// over. No-op unless `writer` is the current owner.
    pub fn ui_revert_to_break_points(&mut self, writer: WriterId, id: AudioParameterId) {
        if let Some(state) = self.values.get_mut(&id) {
            if state.owner == Some(writer) {
                state.owner = None;
            }
        }
    }

    // Break-point editing, delegated with the caller's writer id.

    pub fn ui_create_break_point_set(
        &mut self,
        writer: WriterId,
        param: AudioParameterId,
    ) -> BreakPointSetHandle {
        assert!(
            self.descriptors.contains_key(&param),
            "automating an unregistered parameter"
        );
        self.break_points.create(writer, param)
    }

    pub fn ui_destroy_break_point_set(&mut self, writer: WriterId, handle: BreakPointSetHandle) {
        self.break_points.destroy(writer, handle);
    }

    pub fn ui_insert_break_point(
        &mut self,
        writer: WriterId,
        handle: BreakPointSetHandle,
        position: f64,
        value: f32,
    ) {
        self.break_points
            .insert_break_point(writer, handle, position, value);
    }

    pub fn ui_remove_break_point(
        &mut self,
        writer: WriterId,
        handle: BreakPointSetHandle,
        position: f64,
    ) -> bool {
        self.break_points.remove_break_point(writer, handle, position)
    }

    pub fn ui_modify_break_point(
        &mut self,
        writer: WriterId,
        handle: BreakPointSetHandle,
        position: f64,
        value: f32,
    ) -> bool {
        self.break_points
            .modify_break_point(writer, handle, position, value)
    }

    pub fn ui_set_active_break_point_set(&mut self, handle: Option<BreakPointSetHandle>) {
        self.break_points.set_active(handle);
    }

    pub fn break_point_set(&self, handle: BreakPointSetHandle) -> Option<&BreakPointSet> {
        self.break_points.get(handle)
    }

    /// Sample the active break-point curve at `position` and stage the result
    /// under [`WriterId::AUTOMATION`], unless another writer holds the
    /// parameter. Called once per control tick with the transport's score
    /// position.
    pub fn ui_apply_break_points(&mut self, position: f64) {
        let Some(active) = self.break_points.active() else {
            return;
        };
        let param = active.param();
        let Some(value) = active.value_at(position) else {
            return;
        };
        self.ui_set_value_if_no_other_writer(WriterId::AUTOMATION, param, value);
    }

    /// Push everything staged this tick into the render-bound ring.
    ///
    /// Changes that do not fit are dropped in order and accounted for; the
    /// render side raises its resynchronize flag on the next quantum.
    pub fn ui_commit(&mut self) {
        let mut dropped_now = 0u64;
        for change in self.staged.drain(..) {
            match self.tx.push(change) {
                Ok(()) => self.stats.num_committed += 1,
                Err(rtrb::PushError::Full(_)) => dropped_now += 1,
            }
        }
        if dropped_now > 0 {
            self.stats.num_dropped += dropped_now;
            self.dropped.fetch_add(dropped_now, Ordering::Relaxed);
            warn!("parameter ring full, dropped {dropped_now} staged changes");
        }
    }

    pub fn stats(&self) -> ParameterStats {
        self.stats
    }
}

/// Render-thread half of the parameter system
pub struct ParameterSystemRender {
    rx: Consumer<AudioParameterChange>,
    log: AudioParameterChanges,
    dropped: Arc<AtomicU64>,
    dropped_seen: u64,
}

impl ParameterSystemRender {
    /// Refill the per-quantum log. Called at the top of every quantum, before
    /// any node runs.
    ///
    /// Drains the ring up to the log's capacity; anything left over stays in
    /// the ring for the next quantum, preserving submission order. Changes
    /// dropped on the control side since the last quantum raise the
    /// resynchronize flag for exactly one quantum.
    pub fn render_begin_process(&mut self) {
        self.log.clear();

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped != self.dropped_seen {
            self.dropped_seen = dropped;
            self.log.set_need_resynchronize(true);
        }

        while !self.log.is_full() {
            match self.rx.pop() {
                Ok(change) => {
                    self.log.push(change);
                }
                Err(_) => break,
            }
        }
    }

    /// The change log for the current quantum
    pub fn render_read_changes(&self) -> &AudioParameterChanges {
        &self.log
    }
}
