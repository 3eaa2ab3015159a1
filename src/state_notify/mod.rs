//! # State notify
//!
//! Collects the signals of the activity detector, the menu, the print job and
//! the heaters into one canonical printer state and runs the configured
//! G-code script on every state change.
//!
//! ```text
//!   idle-printing ──┐
//!   idle-ready ─────┤                     ┌──> state:<name> on the bus
//!   idle-idle ──────┼──> handle_substate ─┤
//!   menu-begin/exit ┤         ▲           └──> NotificationDispatcher ──> G-code
//!   pollers ────────┘         │                        │
//!                             └── raised events ───────┘
//! ```
//!
//! Events raised while a script runs (the activity detector noticing the
//! script's own commands) are fed back into [`StateNotify::handle_substate`]
//! before the transition that ran the script returns. The forced transition
//! to `inactive` sets a guard that keeps those events from committing another
//! state in the meantime.

pub mod dispatch;
pub mod pollers;
pub mod state;

pub use dispatch::{DeferredScript, DispatchOutcome, NotificationDispatcher};
pub use pollers::{PollerSettings, PollerTimers};
pub use state::{CanonicalState, Script, Substate, TemplateOverride, UnknownState, resolve_script};

use crate::communication::{EventBus, HostEvent};
use crate::config::StateNotifyConfig;
use crate::gcode::{GCodeError, ScriptRunner, TemplateContext, TemplateError};
use crate::providers::{MissingCollaborator, ProviderRegistry};
use crate::scheduler::{NEVER, Reactor, TimerHandle};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Template render error: {0}")]
    TemplateRender(#[from] TemplateError),
    #[error("Template execution error: {0}")]
    TemplateExecution(#[from] GCodeError),
    #[error(transparent)]
    MissingCollaborator(#[from] MissingCollaborator),
    #[error("No template configured for '{0}'")]
    MissingTemplate(Script),
}

/// Everything a handler may touch besides the engine itself.
pub struct NotifyContext<'a> {
    pub reactor: &'a mut Reactor,
    pub bus: &'a mut EventBus,
    pub runner: &'a mut dyn ScriptRunner,
    pub providers: &'a mut ProviderRegistry,
}

/// Status snapshot reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateNotifyStatus {
    pub state: CanonicalState,
    pub inactive_timeout: f64,
}

const SUBSCRIBED_EVENTS: [HostEvent; 10] = [
    HostEvent::Ready,
    HostEvent::Shutdown,
    HostEvent::Disconnect,
    HostEvent::IdleIdle,
    HostEvent::IdleReady,
    HostEvent::IdlePrinting,
    HostEvent::MenuBegin,
    HostEvent::MenuExit,
    HostEvent::PrintPaused,
    HostEvent::PrintResumed,
];

#[derive(Debug)]
pub struct StateNotify {
    state: CanonicalState,
    /// Set only while the forced `inactive` transition runs.
    ignore_change: bool,
    /// Registered on `ready`, dropped on shutdown/disconnect.
    timers: Option<PollerTimers>,
    settings: PollerSettings,
    dispatcher: NotificationDispatcher,
}

impl StateNotify {
    pub fn new(config: &StateNotifyConfig) -> Result<Self, TemplateError> {
        Ok(Self {
            state: CanonicalState::None,
            ignore_change: false,
            timers: None,
            settings: PollerSettings::from(config),
            dispatcher: NotificationDispatcher::from_config(config)?,
        })
    }

    pub fn subscribed_events() -> &'static [HostEvent] {
        &SUBSCRIBED_EVENTS
    }

    pub fn state(&self) -> CanonicalState {
        self.state
    }

    pub fn timers(&self) -> Option<PollerTimers> {
        self.timers
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn status(&self) -> StateNotifyStatus {
        StateNotifyStatus {
            state: self.state,
            inactive_timeout: self.settings.inactive_timeout,
        }
    }

    /// Response to `STATE_NOTIFY_STATE`.
    pub fn cmd_state_response(&self) -> String {
        format!("State Notify state: {}", self.state)
    }

    /// Whether `handle` belongs to this engine.
    pub fn owns(&self, handle: TimerHandle) -> bool {
        self.timers.is_some_and(|timers| timers.contains(handle)) || self.dispatcher.owns(handle)
    }

    pub fn handle_event(&mut self, event: HostEvent, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        match event {
            HostEvent::Ready => self.on_ready(eventtime, ctx),
            HostEvent::Shutdown => self.on_halt(CanonicalState::Shutdown, eventtime, ctx),
            HostEvent::Disconnect => self.on_halt(CanonicalState::Disconnect, eventtime, ctx),
            HostEvent::IdleIdle => self.handle_substate(Substate::IdleIdle, eventtime, ctx),
            HostEvent::IdleReady => self.handle_substate(Substate::IdleReady, eventtime, ctx),
            HostEvent::IdlePrinting => self.handle_substate(Substate::IdlePrinting, eventtime, ctx),
            HostEvent::MenuBegin => self.handle_substate(Substate::MenuBegin, eventtime, ctx),
            HostEvent::MenuExit => self.handle_substate(Substate::MenuExit, eventtime, ctx),
            HostEvent::PrintPaused => self.handle_substate(Substate::PrintPaused, eventtime, ctx),
            HostEvent::PrintResumed => self.handle_substate(Substate::PrintResumed, eventtime, ctx),
            HostEvent::State(_) => {}
        }
    }

    fn on_ready(&mut self, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        if matches!(self.state, CanonicalState::Shutdown | CanonicalState::Disconnect) {
            tracing::debug!("state_notify: ignoring ready after {}", self.state);
            return;
        }
        if self.timers.is_some() {
            tracing::debug!("state_notify: already ready");
            return;
        }
        let inactive_at = if self.settings.inactive_timeout > 0.0 {
            eventtime + self.settings.inactive_timeout
        } else {
            NEVER
        };
        let timers = PollerTimers {
            inactive: ctx.reactor.register_timer(inactive_at),
            pause: ctx.reactor.register_timer(NEVER),
            menu_check: ctx
                .providers
                .has_menu()
                .then(|| ctx.reactor.register_timer(NEVER)),
        };
        tracing::debug!("state_notify: registered {:?}", timers);
        self.timers = Some(timers);

        self.handle_state_change(CanonicalState::Ready, eventtime, None, ctx);
        // The ready script may already have moved the state on.
        if self.state == CanonicalState::Ready {
            self.handle_state_change(CanonicalState::Active, eventtime, None, ctx);
        }
    }

    fn on_halt(&mut self, state: CanonicalState, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        self.handle_state_change(state, eventtime, None, ctx);
        if let Some(timers) = self.timers.take() {
            for handle in timers.handles() {
                ctx.reactor.unregister_timer(handle);
            }
        }
        self.dispatcher.cancel_all(ctx.reactor);
    }

    /// Map a raw producer signal onto the canonical state.
    pub fn handle_substate(&mut self, signal: Substate, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        let Some(timers) = self.timers else {
            tracing::debug!("state_notify: ignoring {} while {}", signal, self.state);
            return;
        };
        tracing::debug!(
            "state_notify[{:.3}]: State: {}, Substate: {}",
            eventtime,
            self.state,
            signal
        );

        let mut template = None;
        let target = match signal {
            Substate::IdleIdle => {
                ctx.reactor.update_timer(timers.pause, NEVER);
                ctx.reactor.update_timer(timers.inactive, NEVER);
                if let Some(menu_check) = timers.menu_check {
                    ctx.reactor.update_timer(menu_check, NEVER);
                }
                match ctx.providers.menu_mut() {
                    Ok(menu) => menu.exit(),
                    Err(err) => tracing::debug!("state_notify: {}", err),
                }
                CanonicalState::Idle
            }
            Substate::IdleReady | Substate::MenuExit => {
                self.on_quiet(timers, eventtime, ctx);
                return;
            }
            Substate::IdlePrinting | Substate::MenuBegin => {
                ctx.reactor.update_timer(timers.inactive, NEVER);
                if signal == Substate::MenuBegin {
                    if let Some(menu_check) = timers.menu_check {
                        ctx.reactor
                            .update_timer(menu_check, eventtime + self.settings.menu_poll_interval);
                    }
                }
                ctx.reactor.update_timer(timers.pause, NEVER);
                match self.job_activity(ctx) {
                    JobActivity::None => CanonicalState::Active,
                    JobActivity::Paused if self.state == CanonicalState::Paused => {
                        self.arm_pause_poller(timers, eventtime, ctx);
                        CanonicalState::Paused
                    }
                    JobActivity::Running | JobActivity::Paused => {
                        self.arm_pause_poller(timers, eventtime, ctx);
                        if !matches!(self.state, CanonicalState::Paused | CanonicalState::Active) {
                            template = Some(TemplateOverride::Use(Script::Active));
                        }
                        CanonicalState::Printing
                    }
                }
            }
            Substate::PrintPaused | Substate::PrintResumed => {
                if !self.state.is_print_related() {
                    return;
                }
                template = Some(TemplateOverride::Neutral);
                if signal == Substate::PrintPaused {
                    CanonicalState::Paused
                } else {
                    CanonicalState::Printing
                }
            }
        };
        self.commit(target, eventtime, template, ctx);
    }

    /// `idle-ready` and `menu-exit`: the printer went quiet.
    fn on_quiet(&mut self, timers: PollerTimers, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        if !matches!(
            self.state,
            CanonicalState::Ready | CanonicalState::Active | CanonicalState::Printing
        ) {
            return;
        }
        let menu_open = ctx.providers.menu().map(|menu| menu.is_open()).unwrap_or(false);
        if !menu_open {
            self.arm_inactive_timer(timers, eventtime, ctx);
        }
        if self.state == CanonicalState::Printing {
            ctx.reactor.update_timer(timers.pause, NEVER);
            self.commit(CanonicalState::Active, eventtime, Some(TemplateOverride::Neutral), ctx);
        }
    }

    /// Commit `target` unless it is current or the guard is up.
    fn commit(
        &mut self,
        target: CanonicalState,
        eventtime: f64,
        template: Option<TemplateOverride>,
        ctx: &mut NotifyContext<'_>,
    ) {
        if self.ignore_change {
            tracing::debug!("state_notify: {} suppressed during forced transition", target);
            return;
        }
        if self.state != target {
            self.handle_state_change(target, eventtime, template, ctx);
        }
    }

    /// Move to `new_state`, publish it and run its script. A no-op when the
    /// state does not change.
    pub fn handle_state_change(
        &mut self,
        new_state: CanonicalState,
        eventtime: f64,
        template: Option<TemplateOverride>,
        ctx: &mut NotifyContext<'_>,
    ) -> Option<DispatchOutcome> {
        if new_state == self.state {
            return None;
        }
        let previous = std::mem::replace(&mut self.state, new_state);
        tracing::info!(
            "state_notify[{:.3}]: changing state from {} to {}",
            eventtime,
            previous,
            new_state
        );
        ctx.bus.publish(HostEvent::State(new_state), eventtime);

        let script = resolve_script(new_state, template)?;
        self.run_script(script, previous, eventtime, ctx)
    }

    fn run_script(
        &mut self,
        script: Script,
        previous: CanonicalState,
        eventtime: f64,
        ctx: &mut NotifyContext<'_>,
    ) -> Option<DispatchOutcome> {
        let context = TemplateContext::new()
            .with("previous_state", previous)
            .with("state", self.state)
            .with("eventtime", format!("{:.3}", eventtime));
        let outcome = self
            .dispatcher
            .dispatch(script, context, eventtime, ctx.reactor, &mut *ctx.runner)?;
        self.replay_raised(&outcome, eventtime, ctx);
        Some(outcome)
    }

    fn replay_raised(&mut self, outcome: &DispatchOutcome, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        if let DispatchOutcome::Completed(result) = outcome {
            for event in &result.raised {
                self.handle_event(*event, eventtime, ctx);
            }
        }
    }

    /// Route a fired timer. Returns false when the handle is not ours.
    pub fn handle_timer(&mut self, handle: TimerHandle, eventtime: f64, ctx: &mut NotifyContext<'_>) -> bool {
        if let Some(timers) = self.timers {
            if handle == timers.inactive {
                self.on_inactive_timer(timers, eventtime, ctx);
                return true;
            }
            if handle == timers.pause {
                self.on_pause_timer(timers, eventtime, ctx);
                return true;
            }
            if timers.menu_check == Some(handle) {
                self.on_menu_timer(timers, eventtime, ctx);
                return true;
            }
        }
        if !self.dispatcher.owns(handle) {
            return false;
        }
        if let Some(outcome) = self
            .dispatcher
            .handle_timer(handle, eventtime, ctx.reactor, &mut *ctx.runner)
        {
            self.replay_raised(&outcome, eventtime, ctx);
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobActivity {
    None,
    Running,
    Paused,
}
