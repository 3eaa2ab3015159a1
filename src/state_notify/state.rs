// src/state_notify/state.rs - canonical states, substate signals and script keys
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The single authoritative machine state exposed to all consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalState {
    #[default]
    None,
    Ready,
    Active,
    Printing,
    Paused,
    Idle,
    Inactive,
    Shutdown,
    Disconnect,
}

impl CanonicalState {
    pub const ALL: [CanonicalState; 9] = [
        Self::None,
        Self::Ready,
        Self::Active,
        Self::Printing,
        Self::Paused,
        Self::Idle,
        Self::Inactive,
        Self::Shutdown,
        Self::Disconnect,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Idle => "idle",
            Self::Inactive => "inactive",
            Self::Shutdown => "shutdown",
            Self::Disconnect => "disconnect",
        }
    }

    /// States during which a print job is loaded.
    pub fn is_print_related(&self) -> bool {
        matches!(self, Self::Printing | Self::Paused)
    }
}

impl fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown state '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for CanonicalState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.name() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Raw producer signals fed to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substate {
    IdleIdle,
    IdleReady,
    IdlePrinting,
    MenuBegin,
    MenuExit,
    PrintPaused,
    PrintResumed,
}

impl fmt::Display for Substate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IdleIdle => "idle_idle",
            Self::IdleReady => "idle_ready",
            Self::IdlePrinting => "idle_printing",
            Self::MenuBegin => "menu_begin",
            Self::MenuExit => "menu_exit",
            Self::PrintPaused => "print_paused",
            Self::PrintResumed => "print_resumed",
        };
        f.write_str(name)
    }
}

/// Configurable scripts the dispatcher knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Script {
    Ready,
    Active,
    Inactive,
    /// Keep-alive script used to signal activity without a state change.
    Noop,
}

impl Script {
    /// Script named after a state, if that state has one.
    pub fn for_state(state: CanonicalState) -> Option<Self> {
        match state {
            CanonicalState::Ready => Some(Self::Ready),
            CanonicalState::Active => Some(Self::Active),
            CanonicalState::Inactive => Some(Self::Inactive),
            // The idle script runs inside the activity detector, before
            // `idle-idle` is reported.
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Replaces the default "script named after the new state" resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateOverride {
    Use(Script),
    /// Run nothing for this transition.
    Neutral,
}

/// Resolve which script a transition into `state` runs.
pub fn resolve_script(state: CanonicalState, template: Option<TemplateOverride>) -> Option<Script> {
    match template {
        None => Script::for_state(state),
        Some(TemplateOverride::Use(script)) => Some(script),
        Some(TemplateOverride::Neutral) => None,
    }
}
