// src/idle_timeout.rs - activity detector driven by G-code activity
//
// Printing while commands are running, Ready once the command path has been
// quiet for READY_TIMEOUT, Idle after `timeout` seconds in Ready. Each change
// is reported as a host event. The idle script runs on the way to Idle,
// before `idle-idle` goes out, so its own commands are not seen as activity.

use crate::communication::HostEvent;
use crate::gcode::ScriptTemplate;
use crate::providers::{ActivityDetector, ActivityState};
use crate::scheduler::{NEVER, Reactor, TimerHandle};
use std::cell::Cell;
use std::rc::Rc;

pub const READY_TIMEOUT: f64 = 0.5;

/// Read-only view of the detector handed to the provider registry.
#[derive(Debug, Clone)]
pub struct ActivityProbe {
    state: Rc<Cell<ActivityState>>,
}

impl ActivityDetector for ActivityProbe {
    fn activity(&self) -> ActivityState {
        self.state.get()
    }
}

#[derive(Debug)]
pub struct IdleTimeout {
    state: Rc<Cell<ActivityState>>,
    timeout: f64,
    timer: Option<TimerHandle>,
    /// Waketime requested since the last [`IdleTimeout::sync_timer`].
    pending_wake: Option<f64>,
    busy_until: f64,
    idle_script: Option<ScriptTemplate>,
    stopped: bool,
}

impl IdleTimeout {
    pub fn new(timeout: f64) -> Self {
        Self {
            state: Rc::new(Cell::new(ActivityState::Idle)),
            timeout,
            timer: None,
            pending_wake: None,
            busy_until: 0.0,
            idle_script: None,
            stopped: false,
        }
    }

    /// Script to run when the detector goes idle. An empty template is ignored.
    pub fn with_idle_script(mut self, script: ScriptTemplate) -> Self {
        self.idle_script = (!script.is_empty()).then_some(script);
        self
    }

    pub fn idle_script(&self) -> Option<&ScriptTemplate> {
        self.idle_script.as_ref()
    }

    /// Whether the next firing of the timer moves the detector to Idle.
    pub fn idle_due(&self) -> bool {
        self.timer.is_some() && self.state.get() == ActivityState::Ready
    }

    pub fn probe(&self) -> ActivityProbe {
        ActivityProbe {
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> ActivityState {
        self.state.get()
    }

    pub fn owns(&self, handle: TimerHandle) -> bool {
        self.timer == Some(handle)
    }

    pub fn handle_event(&mut self, event: HostEvent, eventtime: f64, reactor: &mut Reactor) {
        match event {
            HostEvent::Ready => {
                if self.timer.is_none() && !self.stopped {
                    self.state.set(ActivityState::Ready);
                    self.timer = Some(reactor.register_timer(eventtime + self.timeout));
                }
            }
            HostEvent::Shutdown | HostEvent::Disconnect => {
                self.stopped = true;
                if let Some(timer) = self.timer.take() {
                    reactor.unregister_timer(timer);
                }
                self.pending_wake = None;
            }
            _ => {}
        }
    }

    /// Record command activity. Returns the event to raise when this moves
    /// the detector into Printing.
    pub fn note_activity(&mut self, eventtime: f64, dwell: f64) -> Option<HostEvent> {
        self.timer?;
        self.busy_until = self.busy_until.max(eventtime + dwell);
        self.pending_wake = Some(self.busy_until + READY_TIMEOUT);
        if self.state.get() == ActivityState::Printing {
            return None;
        }
        tracing::debug!("idle_timeout: {} -> Printing at {:.3}", self.state.get(), eventtime);
        self.state.set(ActivityState::Printing);
        Some(HostEvent::IdlePrinting)
    }

    /// Apply a waketime requested by [`IdleTimeout::note_activity`].
    pub fn sync_timer(&mut self, reactor: &mut Reactor) {
        if let (Some(timer), Some(wake)) = (self.timer, self.pending_wake.take()) {
            reactor.update_timer(timer, wake);
        }
    }

    pub fn on_timer(&mut self, eventtime: f64, reactor: &mut Reactor) -> Option<HostEvent> {
        let timer = self.timer?;
        match self.state.get() {
            ActivityState::Printing => {
                tracing::debug!("idle_timeout: Printing -> Ready at {:.3}", eventtime);
                self.state.set(ActivityState::Ready);
                reactor.update_timer(timer, eventtime + self.timeout);
                Some(HostEvent::IdleReady)
            }
            ActivityState::Ready => {
                tracing::info!("idle_timeout: idle after {:.1}s", self.timeout);
                self.state.set(ActivityState::Idle);
                reactor.update_timer(timer, NEVER);
                Some(HostEvent::IdleIdle)
            }
            ActivityState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_cycle() {
        let mut reactor = Reactor::new();
        let mut idle = IdleTimeout::new(10.0);
        let view = idle.probe();

        assert_eq!(idle.note_activity(0.0, 0.0), None);
        idle.handle_event(HostEvent::Ready, 1.0, &mut reactor);
        assert_eq!(view.activity(), ActivityState::Ready);

        assert_eq!(idle.note_activity(2.0, 1.0), Some(HostEvent::IdlePrinting));
        assert_eq!(idle.note_activity(2.5, 0.0), None);
        idle.sync_timer(&mut reactor);
        assert_eq!(reactor.next_waketime(), 3.0 + READY_TIMEOUT);

        let (handle, at) = reactor.pop_due(10.0).unwrap();
        assert!(idle.owns(handle));
        assert_eq!(idle.on_timer(at, &mut reactor), Some(HostEvent::IdleReady));
        assert_eq!(view.activity(), ActivityState::Ready);

        let (_, at) = reactor.pop_due(100.0).unwrap();
        assert_eq!(at, 13.5);
        assert_eq!(idle.on_timer(at, &mut reactor), Some(HostEvent::IdleIdle));
        assert_eq!(view.activity(), ActivityState::Idle);
        assert!(reactor.pop_due(1000.0).is_none());
    }

    #[test]
    fn test_idle_due_only_from_ready() {
        let mut reactor = Reactor::new();
        let template = ScriptTemplate::new("on_idle_gcode", "M117 idle").unwrap();
        let mut idle = IdleTimeout::new(5.0).with_idle_script(template);
        assert!(!idle.idle_due());
        idle.handle_event(HostEvent::Ready, 0.0, &mut reactor);
        assert!(idle.idle_due());
        assert_eq!(idle.idle_script().map(ScriptTemplate::source), Some("M117 idle"));

        idle.note_activity(1.0, 0.0);
        assert!(!idle.idle_due());

        let blank = ScriptTemplate::new("on_idle_gcode", "  ").unwrap();
        assert!(IdleTimeout::new(5.0).with_idle_script(blank).idle_script().is_none());
    }

    #[test]
    fn test_shutdown_unregisters_timer() {
        let mut reactor = Reactor::new();
        let mut idle = IdleTimeout::new(10.0);
        idle.handle_event(HostEvent::Ready, 0.0, &mut reactor);
        assert_eq!(reactor.len(), 1);
        idle.handle_event(HostEvent::Shutdown, 1.0, &mut reactor);
        assert!(reactor.is_empty());
        assert_eq!(idle.note_activity(2.0, 0.0), None);

        idle.handle_event(HostEvent::Ready, 3.0, &mut reactor);
        assert!(reactor.is_empty());
    }
}
