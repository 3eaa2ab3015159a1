//! Synchronous, same-thread publish/subscribe of named host events.
//!
//! Publishing only enqueues. The host pump takes events out with
//! [`EventBus::next_delivery`] and hands each one to the components
//! subscribed to its name, in publish order. Nothing is delivered while a
//! component is still handling an earlier event.

use crate::state_notify::CanonicalState;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

const DEFAULT_HISTORY: usize = 64;

/// Named events travelling across the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Ready,
    Shutdown,
    Disconnect,
    IdleIdle,
    IdleReady,
    IdlePrinting,
    MenuBegin,
    MenuExit,
    PrintPaused,
    PrintResumed,
    /// Published by the state engine on every committed transition.
    State(CanonicalState),
}

impl HostEvent {
    pub fn name(&self) -> String {
        match self {
            Self::State(state) => format!("state:{}", state),
            other => other.static_name().to_string(),
        }
    }

    fn static_name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Shutdown => "shutdown",
            Self::Disconnect => "disconnect",
            Self::IdleIdle => "idle-idle",
            Self::IdleReady => "idle-ready",
            Self::IdlePrinting => "idle-printing",
            Self::MenuBegin => "menu-begin",
            Self::MenuExit => "menu-exit",
            Self::PrintPaused => "print-paused",
            Self::PrintResumed => "print-resumed",
            Self::State(_) => "state",
        }
    }
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for HostEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event = match s {
            "ready" => Self::Ready,
            "shutdown" => Self::Shutdown,
            "disconnect" => Self::Disconnect,
            "idle-idle" => Self::IdleIdle,
            "idle-ready" => Self::IdleReady,
            "idle-printing" => Self::IdlePrinting,
            "menu-begin" => Self::MenuBegin,
            "menu-exit" => Self::MenuExit,
            "print-paused" => Self::PrintPaused,
            "print-resumed" => Self::PrintResumed,
            other => {
                let state = other
                    .strip_prefix("state:")
                    .and_then(|name| name.parse::<CanonicalState>().ok())
                    .ok_or_else(|| UnknownEvent(other.to_string()))?;
                Self::State(state)
            }
        };
        Ok(event)
    }
}

/// A published event with the time it was raised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub kind: HostEvent,
    pub eventtime: f64,
}

/// Host components that can subscribe to bus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    StateNotify,
    IdleTimeout,
}

#[derive(Debug)]
pub struct EventBus {
    subscriptions: BTreeMap<String, Vec<Component>>,
    pending: VecDeque<Event>,
    history: VecDeque<Event>,
    history_limit: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    pub fn with_history(history_limit: usize) -> Self {
        Self {
            subscriptions: BTreeMap::new(),
            pending: VecDeque::new(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Subscribe `component` to every event in `events`. Subscribing twice is a no-op.
    pub fn subscribe(&mut self, component: Component, events: &[HostEvent]) {
        for event in events {
            let subscribers = self.subscriptions.entry(event.name()).or_default();
            if !subscribers.contains(&component) {
                subscribers.push(component);
            }
        }
    }

    pub fn subscribers(&self, event: &HostEvent) -> &[Component] {
        self.subscriptions
            .get(&event.name())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn publish(&mut self, kind: HostEvent, eventtime: f64) {
        tracing::debug!("Event bus: publishing '{}' at {:.3}", kind, eventtime);
        let event = Event { kind, eventtime };
        self.pending.push_back(event);
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    /// Next queued event together with the components that should receive it.
    pub fn next_delivery(&mut self) -> Option<(Event, Vec<Component>)> {
        let event = self.pending.pop_front()?;
        let targets = self.subscribers(&event.kind).to_vec();
        Some((event, targets))
    }

    /// Most recent published events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Event> {
        self.history.iter()
    }

    /// Canonical states published on the bus, oldest first.
    pub fn state_history(&self) -> Vec<CanonicalState> {
        self.history
            .iter()
            .filter_map(|event| match event.kind {
                HostEvent::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}
