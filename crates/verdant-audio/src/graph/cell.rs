//! Runtime-checked render-exclusive cell
//!
//! Published slots are shared (`basedrop::Shared`), but a node's processing
//! state must be mutated by the render driver. `RenderCell` grants exclusive
//! mutable access through a claim flag checked at runtime: exactly one claim
//! may be live at a time, and in practice all claims happen on the single
//! render driver while it walks a set snapshot.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A cell whose contents are mutated exclusively by the render driver
pub struct RenderCell<T> {
    claimed: AtomicBool,
    inner: UnsafeCell<T>,
}

// Safety: access to the inner value is serialized by the claim flag; a second
// claim while one is live panics instead of aliasing.
unsafe impl<T: Send> Send for RenderCell<T> {}
unsafe impl<T: Send> Sync for RenderCell<T> {}

impl<T> RenderCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            claimed: AtomicBool::new(false),
            inner: UnsafeCell::new(value),
        }
    }

    /// Claim exclusive access. Lock-free: a contended claim is a programmer
    /// error (two render drivers), not a wait condition.
    ///
    /// # Panics
    ///
    /// Panics if a claim is already live.
    pub fn claim(&self) -> RenderClaim<'_, T> {
        let was_claimed = self.claimed.swap(true, Ordering::Acquire);
        assert!(!was_claimed, "RenderCell claimed while already claimed");
        RenderClaim { cell: self }
    }
}

/// Exclusive access to a [`RenderCell`]'s contents; released on drop
pub struct RenderClaim<'a, T> {
    cell: &'a RenderCell<T>,
}

impl<T> Deref for RenderClaim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the claim flag guarantees exclusivity.
        unsafe { &*self.cell.inner.get() }
    }
}

impl<T> DerefMut for RenderClaim<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the claim flag guarantees exclusivity.
        unsafe { &mut *self.cell.inner.get() }
    }
}

impl<T> Drop for RenderClaim<'_, T> {
    fn drop(&mut self) {
        self.cell.claimed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_grants_mutable_access() {
        let cell = RenderCell::new(1u32);
        {
            let mut claim = cell.claim();
            *claim += 1;
        }
        assert_eq!(*cell.claim(), 2);
    }

    #[test]
    #[should_panic(expected = "already claimed")]
    fn test_double_claim_panics() {
        let cell = RenderCell::new(0u32);
        let _first = cell.claim();
        let _second = cell.claim();
    }
}
