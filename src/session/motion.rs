//! Ownership of the avatar's movement controls
//!
//! Timed holds and navigation goals are mutually exclusive. Each hold carries a
//! generation number: re-holding a dimension supersedes the earlier hold, and
//! the earlier hold's release becomes a no-op instead of clearing the newer one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::error::SessionError;
use super::models::ControlDimension;

/// Proof of a timed hold, returned to [`MotionLock::end_hold`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldTicket {
    pub dimension: ControlDimension,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct MotionState {
    next_generation: u64,
    holds: HashMap<ControlDimension, u64>,
    navigation: Option<u64>,
}

impl MotionState {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

#[derive(Debug, Default)]
pub struct MotionLock {
    state: Mutex<MotionState>,
}

impl MotionLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MotionState> {
        // State stays consistent across a panicking holder; nothing spans an await.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `dimension` for a timed action
    pub fn begin_hold(&self, dimension: ControlDimension) -> Result<HoldTicket, SessionError> {
        let mut state = self.lock();
        if state.navigation.is_some() {
            return Err(SessionError::Busy(format!(
                "cannot {} while a navigation goal is active",
                dimension.as_str()
            )));
        }
        let generation = state.bump();
        state.holds.insert(dimension, generation);
        Ok(HoldTicket {
            dimension,
            generation,
        })
    }

    /// Release a hold; returns false when a newer hold owns the dimension
    pub fn end_hold(&self, ticket: HoldTicket) -> bool {
        let mut state = self.lock();
        if state.holds.get(&ticket.dimension) == Some(&ticket.generation) {
            state.holds.remove(&ticket.dimension);
            true
        } else {
            false
        }
    }

    /// Claim the controls for a navigation goal, replacing any previous goal
    pub fn begin_navigation(&self) -> Result<u64, SessionError> {
        let mut state = self.lock();
        if let Some(dimension) = state.holds.keys().next() {
            return Err(SessionError::Busy(format!(
                "timed {} motion in progress",
                dimension.as_str()
            )));
        }
        let generation = state.bump();
        state.navigation = Some(generation);
        Ok(generation)
    }

    /// Release the navigation claim if `generation` still owns it
    pub fn end_navigation(&self, generation: u64) {
        let mut state = self.lock();
        if state.navigation == Some(generation) {
            state.navigation = None;
        }
    }

    pub fn cancel_navigation(&self) {
        self.lock().navigation = None;
    }

    #[cfg(test)]
    pub fn is_navigating(&self) -> bool {
        self.lock().navigation.is_some()
    }

    #[cfg(test)]
    pub fn is_held(&self, dimension: ControlDimension) -> bool {
        self.lock().holds.contains_key(&dimension)
    }

    /// Forget every claim, used when the session goes away
    pub fn reset(&self) {
        let mut state = self.lock();
        state.holds.clear();
        state.navigation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_release_keeps_newer_hold() {
        let lock = MotionLock::new();
        let first = lock.begin_hold(ControlDimension::Forward).unwrap();
        let second = lock.begin_hold(ControlDimension::Forward).unwrap();

        assert!(!lock.end_hold(first));
        assert!(lock.is_held(ControlDimension::Forward));
        assert!(lock.end_hold(second));
        assert!(!lock.is_held(ControlDimension::Forward));
    }

    #[test]
    fn test_independent_dimensions() {
        let lock = MotionLock::new();
        let jump = lock.begin_hold(ControlDimension::Jump).unwrap();
        let left = lock.begin_hold(ControlDimension::Left).unwrap();
        assert!(lock.end_hold(jump));
        assert!(lock.is_held(ControlDimension::Left));
        assert!(lock.end_hold(left));
    }

    #[test]
    fn test_hold_refused_while_navigating() {
        let lock = MotionLock::new();
        lock.begin_navigation().unwrap();
        let err = lock.begin_hold(ControlDimension::Back).unwrap_err();
        assert_eq!(err.kind(), "Busy");
    }

    #[test]
    fn test_navigation_refused_while_holding() {
        let lock = MotionLock::new();
        let ticket = lock.begin_hold(ControlDimension::Forward).unwrap();
        assert!(matches!(lock.begin_navigation(), Err(SessionError::Busy(_))));

        lock.end_hold(ticket);
        assert!(lock.begin_navigation().is_ok());
    }

    #[test]
    fn test_replaced_navigation_does_not_release_newer() {
        let lock = MotionLock::new();
        let old = lock.begin_navigation().unwrap();
        let new = lock.begin_navigation().unwrap();

        lock.end_navigation(old);
        assert!(lock.is_navigating());
        lock.end_navigation(new);
        assert!(!lock.is_navigating());
    }

    #[test]
    fn test_cancel_and_reset() {
        let lock = MotionLock::new();
        lock.begin_navigation().unwrap();
        lock.cancel_navigation();
        assert!(!lock.is_navigating());

        lock.begin_hold(ControlDimension::Right).unwrap();
        lock.reset();
        assert!(!lock.is_held(ControlDimension::Right));
    }
}
