//! Break-point automation curves
//!
//! A break-point set is an ordered sequence of `(score position, value)`
//! keyframes keyed by a handle. Sets are mutated only under the writer id
//! that created them; a mismatched writer is a bug in the caller and panics.
//! At most one set is active at a time; the control tick samples the active
//! curve and stages values under the automation writer.

use std::collections::HashMap;

use crate::types::WriterId;

use super::AudioParameterId;

/// One automation keyframe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakPoint {
    /// Musical position in beats
    pub position: f64,
    pub value: f32,
}

/// Opaque key for a break-point set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakPointSetHandle(u32);

impl BreakPointSetHandle {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// An ordered automation curve bound to one parameter
pub struct BreakPointSet {
    writer: WriterId,
    param: AudioParameterId,
    /// Sorted by position; positions are unique
    points: Vec<BreakPoint>,
}

impl BreakPointSet {
    fn new(writer: WriterId, param: AudioParameterId) -> Self {
        Self {
            writer,
            param,
            points: Vec::new(),
        }
    }

    pub fn param(&self) -> AudioParameterId {
        self.param
    }

    pub fn points(&self) -> &[BreakPoint] {
        &self.points
    }

    fn insert(&mut self, position: f64, value: f32) {
        match self
            .points
            .binary_search_by(|p| p.position.total_cmp(&position))
        {
            Ok(i) => self.points[i].value = value,
            Err(i) => self.points.insert(i, BreakPoint { position, value }),
        }
    }

    fn remove(&mut self, position: f64) -> bool {
        match self
            .points
            .binary_search_by(|p| p.position.total_cmp(&position))
        {
            Ok(i) => {
                self.points.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    fn modify(&mut self, position: f64, value: f32) -> bool {
        match self
            .points
            .binary_search_by(|p| p.position.total_cmp(&position))
        {
            Ok(i) => {
                self.points[i].value = value;
                true
            }
            Err(_) => false,
        }
    }

    /// Sample the curve: linear interpolation between neighbors, clamped to
    /// the first/last value outside the covered range. `None` when empty or
    /// the position is NaN.
    pub fn value_at(&self, position: f64) -> Option<f32> {
        if position.is_nan() {
            return None;
        }
        let first = self.points.first()?;
        if position <= first.position {
            return Some(first.value);
        }
        let last = self.points.last()?;
        if position >= last.position {
            return Some(last.value);
        }
        let i = self
            .points
            .partition_point(|p| p.position <= position);
        let a = self.points[i - 1];
        let b = self.points[i];
        let t = (position - a.position) / (b.position - a.position);
        Some(a.value + (b.value - a.value) * t as f32)
    }
}

/// All break-point sets plus the active selection
#[derive(Default)]
pub struct BreakPointStore {
    sets: HashMap<BreakPointSetHandle, BreakPointSet>,
    active: Option<BreakPointSetHandle>,
    next_handle: u32,
}

impl BreakPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, writer: WriterId, param: AudioParameterId) -> BreakPointSetHandle {
        let handle = BreakPointSetHandle(self.next_handle);
        self.next_handle += 1;
        self.sets.insert(handle, BreakPointSet::new(writer, param));
        handle
    }

    /// # Panics
    ///
    /// Panics when `writer` is not the set's creating writer, or the handle is
    /// stale — both are caller bugs.
    fn owned_set(&mut self, writer: WriterId, handle: BreakPointSetHandle) -> &mut BreakPointSet {
        let set = self
            .sets
            .get_mut(&handle)
            .expect("break-point set handle is stale");
        assert_eq!(
            set.writer, writer,
            "break-point set is owned by another writer"
        );
        set
    }

    pub fn insert_break_point(
        &mut self,
        writer: WriterId,
        handle: BreakPointSetHandle,
        position: f64,
        value: f32,
    ) {
        self.owned_set(writer, handle).insert(position, value);
    }

    pub fn remove_break_point(
        &mut self,
        writer: WriterId,
        handle: BreakPointSetHandle,
        position: f64,
    ) -> bool {
        self.owned_set(writer, handle).remove(position)
    }

    pub fn modify_break_point(
        &mut self,
        writer: WriterId,
        handle: BreakPointSetHandle,
        position: f64,
        value: f32,
    ) -> bool {
        self.owned_set(writer, handle).modify(position, value)
    }

    /// Destroy a set. Deactivates it if it was active.
    pub fn destroy(&mut self, writer: WriterId, handle: BreakPointSetHandle) {
        // Ownership check before removal.
        let _ = self.owned_set(writer, handle);
        self.sets.remove(&handle);
        if self.active == Some(handle) {
            self.active = None;
        }
    }

    pub fn get(&self, handle: BreakPointSetHandle) -> Option<&BreakPointSet> {
        self.sets.get(&handle)
    }

    pub fn set_active(&mut self, handle: Option<BreakPointSetHandle>) {
        if let Some(h) = handle {
            assert!(self.sets.contains_key(&h), "activating a stale handle");
        }
        self.active = handle;
    }

    pub fn active(&self) -> Option<&BreakPointSet> {
        self.active.and_then(|h| self.sets.get(&h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn param() -> AudioParameterId {
        AudioParameterId::new(NodeId::new(1), 0)
    }

    const EDITOR: WriterId = WriterId::new(7);

    #[test]
    fn test_interpolation_and_clamping() {
        let mut store = BreakPointStore::new();
        let h = store.create(EDITOR, param());
        store.insert_break_point(EDITOR, h, 0.0, 0.0);
        store.insert_break_point(EDITOR, h, 4.0, 1.0);

        let set = store.get(h).unwrap();
        assert_eq!(set.value_at(-1.0), Some(0.0));
        assert_eq!(set.value_at(2.0), Some(0.5));
        assert_eq!(set.value_at(8.0), Some(1.0));
    }

    #[test]
    fn test_insert_keeps_points_ordered() {
        let mut store = BreakPointStore::new();
        let h = store.create(EDITOR, param());
        store.insert_break_point(EDITOR, h, 2.0, 0.2);
        store.insert_break_point(EDITOR, h, 0.0, 0.0);
        store.insert_break_point(EDITOR, h, 1.0, 0.1);
        // Re-inserting at an existing position replaces the value.
        store.insert_break_point(EDITOR, h, 1.0, 0.5);

        let positions: Vec<f64> = store.get(h).unwrap().points().iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0.0, 1.0, 2.0]);
        assert_eq!(store.get(h).unwrap().value_at(1.0), Some(0.5));
    }

    #[test]
    fn test_nan_position_is_inert() {
        let mut store = BreakPointStore::new();
        let h = store.create(EDITOR, param());
        store.insert_break_point(EDITOR, h, 0.0, 0.0);
        store.insert_break_point(EDITOR, h, 1.0, 1.0);

        // NaN never matches an existing point and never samples the curve.
        assert!(!store.remove_break_point(EDITOR, h, f64::NAN));
        assert!(!store.modify_break_point(EDITOR, h, f64::NAN, 0.5));
        assert_eq!(store.get(h).unwrap().value_at(f64::NAN), None);
        assert_eq!(store.get(h).unwrap().points().len(), 2);
    }

    #[test]
    #[should_panic(expected = "owned by another writer")]
    fn test_foreign_writer_cannot_edit() {
        let mut store = BreakPointStore::new();
        let h = store.create(EDITOR, param());
        store.insert_break_point(WriterId::new(9), h, 0.0, 0.0);
    }

    #[test]
    fn test_destroy_clears_active() {
        let mut store = BreakPointStore::new();
        let h = store.create(EDITOR, param());
        store.set_active(Some(h));
        assert!(store.active().is_some());

        store.destroy(EDITOR, h);
        assert!(store.active().is_none());
        assert!(store.get(h).is_none());
    }
}
