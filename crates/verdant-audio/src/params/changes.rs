//! Per-quantum parameter change log and its filtered views
//!
//! The render thread drains staged changes into one flat, pre-allocated log
//! per quantum. Nodes narrow it with `view_by_parent` / `view_by_parameter`;
//! both preserve original submission order. The log is consumed exactly once:
//! the next `render_begin_process` clears it.

use crate::types::{NodeId, WriterId};

use super::AudioParameterId;

/// One staged value change for one parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParameterChange {
    pub param: AudioParameterId,
    /// Writer that staged this change
    pub writer: WriterId,
    /// Target value (already clamped to the descriptor's limits)
    pub value: f32,
    /// Frame offset within the quantum at which the ramp starts
    pub start_frame: u32,
    /// Frames over which to ramp linearly from the previous value; 0 jumps
    pub ramp_frames: u32,
}

/// The flat change log for one render quantum
pub struct AudioParameterChanges {
    entries: Vec<AudioParameterChange>,
    capacity: usize,
    need_resynchronize: bool,
}

impl AudioParameterChanges {
    /// Pre-allocate the log; it never grows on the render path
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            need_resynchronize: false,
        }
    }

    pub(super) fn clear(&mut self) {
        self.entries.clear();
        self.need_resynchronize = false;
    }

    pub(super) fn set_need_resynchronize(&mut self, value: bool) {
        self.need_resynchronize = value;
    }

    /// Append without growing; `false` when the log is full (the change is
    /// dropped and accounted for by the producer side)
    pub(super) fn push(&mut self, change: AudioParameterChange) -> bool {
        if self.entries.len() == self.capacity {
            return false;
        }
        self.entries.push(change);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// True when changes were dropped upstream since the last quantum; ramping
    /// consumers should snap to current values instead of interpolating from
    /// stale state.
    pub fn need_resynchronize(&self) -> bool {
        self.need_resynchronize
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioParameterChange> {
        self.entries.iter()
    }

    /// Changes addressed to one node, in submission order
    pub fn view_by_parent(&self, node: NodeId) -> ParentChanges<'_> {
        ParentChanges {
            entries: &self.entries,
            node,
        }
    }
}

/// Changes filtered to one owning node
#[derive(Clone, Copy)]
pub struct ParentChanges<'a> {
    entries: &'a [AudioParameterChange],
    node: NodeId,
}

impl<'a> ParentChanges<'a> {
    pub fn iter(&self) -> impl Iterator<Item = &'a AudioParameterChange> {
        let node = self.node;
        self.entries.iter().filter(move |c| c.param.node == node)
    }

    /// Narrow further to one parameter index
    pub fn view_by_parameter(&self, index: u16) -> ParameterChanges<'a> {
        ParameterChanges {
            entries: self.entries,
            node: self.node,
            index,
        }
    }
}

/// Changes filtered to one `(node, parameter index)` pair
#[derive(Clone, Copy)]
pub struct ParameterChanges<'a> {
    entries: &'a [AudioParameterChange],
    node: NodeId,
    index: u16,
}

impl<'a> ParameterChanges<'a> {
    /// All matching changes, in submission order. Multiple changes within one
    /// quantum are preserved, not collapsed.
    pub fn iter(&self) -> impl Iterator<Item = &'a AudioParameterChange> {
        let (node, index) = (self.node, self.index);
        self.entries
            .iter()
            .filter(move |c| c.param.node == node && c.param.index == index)
    }

    /// Only the terminal change, for parameters that ignore intermediate
    /// values (discrete mode selectors and the like)
    pub fn collapse_to_last_change(&self) -> Option<&'a AudioParameterChange> {
        self.iter().last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(node: u64, index: u16, value: f32) -> AudioParameterChange {
        AudioParameterChange {
            param: AudioParameterId::new(NodeId::new(node), index),
            writer: WriterId::new(1),
            value,
            start_frame: 0,
            ramp_frames: 0,
        }
    }

    #[test]
    fn test_views_filter_and_preserve_order() {
        let mut log = AudioParameterChanges::with_capacity(8);
        log.push(change(5, 2, 0.1));
        log.push(change(5, 1, 0.9));
        log.push(change(7, 2, 0.5));
        log.push(change(5, 2, 0.2));

        let values: Vec<f32> = log
            .view_by_parent(NodeId::new(5))
            .view_by_parameter(2)
            .iter()
            .map(|c| c.value)
            .collect();
        assert_eq!(values, vec![0.1, 0.2]);

        let parent_count = log.view_by_parent(NodeId::new(5)).iter().count();
        assert_eq!(parent_count, 3);
    }

    #[test]
    fn test_collapse_to_last_change() {
        let mut log = AudioParameterChanges::with_capacity(8);
        log.push(change(5, 2, 0.1));
        log.push(change(5, 2, 0.2));
        log.push(change(5, 2, 0.3));

        let last = log
            .view_by_parent(NodeId::new(5))
            .view_by_parameter(2)
            .collapse_to_last_change()
            .unwrap();
        assert_eq!(last.value, 0.3);
    }

    #[test]
    fn test_push_fails_at_capacity_without_growing() {
        let mut log = AudioParameterChanges::with_capacity(2);
        assert!(log.push(change(1, 0, 0.0)));
        assert!(log.push(change(1, 0, 0.1)));
        assert!(!log.push(change(1, 0, 0.2)));
        assert_eq!(log.len(), 2);
    }
}
