//! Linear per-frame parameter smoothing
//!
//! Nodes hold one [`ParameterRamp`] per audible parameter and feed it the
//! quantum's change log; `next_frame` is then called once per frame inside the
//! render loop.

use super::{AudioParameterChange, AudioParameterChanges, ParameterChanges};

/// Linear ramp toward a target value
#[derive(Debug, Clone, Copy)]
pub struct ParameterRamp {
    current: f32,
    target: f32,
    frames_remaining: u32,
    step: f32,
}

impl ParameterRamp {
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            frames_remaining: 0,
            step: 0.0,
        }
    }

    /// Begin ramping toward `target`. `ramp_frames == 0` jumps immediately.
    pub fn set_target(&mut self, target: f32, ramp_frames: u32) {
        if ramp_frames == 0 {
            self.current = target;
            self.target = target;
            self.frames_remaining = 0;
            self.step = 0.0;
        } else {
            self.target = target;
            self.frames_remaining = ramp_frames;
            self.step = (target - self.current) / ramp_frames as f32;
        }
    }

    /// Apply one staged change
    pub fn apply_change(&mut self, change: &AudioParameterChange) {
        self.set_target(change.value, change.ramp_frames);
    }

    /// Apply this quantum's changes for one `(node, index)` pair. When the
    /// upstream path dropped changes, snaps to the last known value instead of
    /// interpolating from stale state.
    pub fn apply_changes(&mut self, changes: &AudioParameterChanges, change_view: ParameterChanges<'_>) {
        if changes.need_resynchronize() {
            if let Some(last) = change_view.collapse_to_last_change() {
                self.set_target(last.value, 0);
            }
            return;
        }
        for change in change_view.iter() {
            self.apply_change(change);
        }
    }

    /// Advance one frame and return the value for that frame
    pub fn next_frame(&mut self) -> f32 {
        if self.frames_remaining > 0 {
            self.current += self.step;
            self.frames_remaining -= 1;
            if self.frames_remaining == 0 {
                // Kill accumulated float error at the endpoint.
                self.current = self.target;
            }
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn is_ramping(&self) -> bool {
        self.frames_remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_reaches_target_exactly() {
        let mut ramp = ParameterRamp::new(0.0);
        ramp.set_target(1.0, 4);
        assert!(ramp.is_ramping());

        let values: Vec<f32> = (0..4).map(|_| ramp.next_frame()).collect();
        assert_eq!(values, vec![0.25, 0.5, 0.75, 1.0]);
        assert!(!ramp.is_ramping());
        assert_eq!(ramp.next_frame(), 1.0);
    }

    #[test]
    fn test_zero_frames_jumps() {
        let mut ramp = ParameterRamp::new(0.0);
        ramp.set_target(0.8, 0);
        assert_eq!(ramp.value(), 0.8);
        assert!(!ramp.is_ramping());
    }

    #[test]
    fn test_retarget_mid_ramp_ramps_from_current() {
        let mut ramp = ParameterRamp::new(0.0);
        ramp.set_target(1.0, 4);
        ramp.next_frame();
        ramp.next_frame();

        ramp.set_target(0.5, 2);
        ramp.next_frame();
        assert_eq!(ramp.next_frame(), 0.5);
    }
}
