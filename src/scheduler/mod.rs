//! # Cooperative timer reactor
//!
//! The reactor keeps every timer of the host keyed by a [`TimerHandle`]. It
//! never calls back into its owners: the host asks for the next due timer
//! with [`Reactor::pop_due`] and routes the handle to whichever component
//! registered it. A popped timer is disarmed (its waketime becomes
//! [`NEVER`]); the owner re-arms it with [`Reactor::update_timer`] when it
//! wants to run again.
//!
//! Due timers are returned ordered by waketime, ties broken by registration
//! order, so a run driven by a simulated clock is fully deterministic.

pub mod time_interface;

use std::collections::BTreeMap;
use std::fmt;

/// Waketime of a disarmed timer.
pub const NEVER: f64 = f64::INFINITY;

/// Opaque identifier of a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct Reactor {
    timers: BTreeMap<TimerHandle, f64>,
    next_id: u64,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new timer armed at `waketime` (use [`NEVER`] to register it disarmed).
    pub fn register_timer(&mut self, waketime: f64) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.timers.insert(handle, sanitize(waketime));
        tracing::trace!("Registered {} at {}", handle, waketime);
        handle
    }

    /// Move an existing timer. Returns `false` if the handle is unknown.
    pub fn update_timer(&mut self, handle: TimerHandle, waketime: f64) -> bool {
        match self.timers.get_mut(&handle) {
            Some(slot) => {
                *slot = sanitize(waketime);
                true
            }
            None => {
                tracing::debug!("Ignoring update of unknown {}", handle);
                false
            }
        }
    }

    /// Remove a timer. Returns `false` if it was not registered.
    pub fn unregister_timer(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle).is_some()
    }

    pub fn waketime(&self, handle: TimerHandle) -> Option<f64> {
        self.timers.get(&handle).copied()
    }

    pub fn is_registered(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.waketime(handle).is_some_and(|w| w < NEVER)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest waketime of any armed timer, or [`NEVER`].
    pub fn next_waketime(&self) -> f64 {
        self.timers.values().copied().fold(NEVER, f64::min)
    }

    /// Take the earliest timer due at or before `now`, disarming it.
    /// Returns the handle together with the waketime it was armed for.
    pub fn pop_due(&mut self, now: f64) -> Option<(TimerHandle, f64)> {
        let (handle, waketime) = self
            .timers
            .iter()
            .filter(|(_, w)| **w <= now && **w < NEVER)
            .fold(None, |best: Option<(TimerHandle, f64)>, (h, w)| match best {
                Some((_, bw)) if bw <= *w => best,
                _ => Some((*h, *w)),
            })?;
        self.timers.insert(handle, NEVER);
        Some((handle, waketime))
    }
}

fn sanitize(waketime: f64) -> f64 {
    if waketime.is_nan() { NEVER } else { waketime }
}
