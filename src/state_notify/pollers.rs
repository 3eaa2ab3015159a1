// src/state_notify/pollers.rs - timer driven detectors
//
// Inactivity: commits `inactive` once nothing holds the printer active.
// Menu check: notices a menu closed without a `menu-exit` event.
// Pause: follows the job provider while printing when pause events are not
// available.

use super::{
    CanonicalState, JobActivity, NotifyContext, NotifyError, Script, StateNotify, Substate, TemplateOverride,
};
use crate::config::{PauseDetection, StateNotifyConfig};
use crate::print_job::JobState;
use crate::providers::ActivityState;
use crate::scheduler::{NEVER, TimerHandle};

/// Timers registered when the printer becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerTimers {
    pub inactive: TimerHandle,
    pub pause: TimerHandle,
    /// Only present when a menu provider is registered.
    pub menu_check: Option<TimerHandle>,
}

impl PollerTimers {
    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.handles().any(|h| h == handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = TimerHandle> {
        [Some(self.inactive), Some(self.pause), self.menu_check].into_iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollerSettings {
    pub inactive_timeout: f64,
    pub heaters_active: bool,
    pub pause_detection: PauseDetection,
    pub pause_poll_interval: f64,
    pub menu_poll_interval: f64,
}

impl From<&StateNotifyConfig> for PollerSettings {
    fn from(config: &StateNotifyConfig) -> Self {
        Self {
            inactive_timeout: config.inactive_timeout,
            heaters_active: config.heaters_active,
            pause_detection: config.pause_detection,
            pause_poll_interval: config.pause_poll_interval,
            menu_poll_interval: config.menu_poll_interval,
        }
    }
}

impl StateNotify {
    pub(super) fn arm_inactive_timer(&self, timers: PollerTimers, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        if self.settings.inactive_timeout > 0.0 {
            ctx.reactor
                .update_timer(timers.inactive, eventtime + self.settings.inactive_timeout);
        }
    }

    pub(super) fn arm_pause_poller(&self, timers: PollerTimers, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        if self.settings.pause_detection == PauseDetection::Poll {
            ctx.reactor
                .update_timer(timers.pause, eventtime + self.settings.pause_poll_interval);
        }
    }

    pub(super) fn job_activity(&self, ctx: &NotifyContext<'_>) -> JobActivity {
        match ctx.providers.job().map(|job| job.reported_state()) {
            Ok(JobState::Printing) => JobActivity::Running,
            Ok(JobState::Paused) => JobActivity::Paused,
            Ok(_) => JobActivity::None,
            Err(err) => {
                tracing::debug!("state_notify: {}", err);
                JobActivity::None
            }
        }
    }

    /// Run the keep-alive script unless a print is loaded.
    fn keep_alive(&mut self, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        if !self.state.is_print_related() {
            self.run_script(Script::Noop, self.state, eventtime, ctx);
        }
    }

    fn heater_holding_active(&self, ctx: &NotifyContext<'_>) -> Result<Option<(String, f64)>, NotifyError> {
        Ok(ctx.providers.heaters()?.first_active_heater())
    }

    /// Activity the detector cannot see, such as a heater with a target.
    pub(super) fn printer_active(&self, eventtime: f64, ctx: &NotifyContext<'_>) -> bool {
        if let Ok(ActivityState::Printing) = ctx.providers.activity().map(|a| a.activity()) {
            tracing::debug!("state_notify[{:.3}]: activity detector reports printing", eventtime);
            return true;
        }
        match self.heater_holding_active(ctx) {
            Ok(Some((heater, target))) => {
                tracing::info!("state_notify[{:.3}]: Heater '{}' target: {}", eventtime, heater, target);
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!("state_notify: skipping heater check: {}", err);
                false
            }
        }
    }

    pub(super) fn on_inactive_timer(&mut self, timers: PollerTimers, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        if self.printer_active(eventtime, ctx) {
            ctx.reactor
                .update_timer(timers.inactive, eventtime + self.settings.inactive_timeout);
            if self.settings.heaters_active {
                self.keep_alive(eventtime, ctx);
            }
            return;
        }

        self.ignore_change = true;
        self.handle_state_change(CanonicalState::Inactive, eventtime, None, ctx);
        self.ignore_change = false;
        ctx.reactor.update_timer(timers.inactive, NEVER);
    }

    pub(super) fn on_menu_timer(&mut self, timers: PollerTimers, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        let Some(menu_check) = timers.menu_check else {
            return;
        };
        let open = ctx.providers.menu().map(|menu| menu.is_open()).unwrap_or(false);
        if !open {
            ctx.reactor.update_timer(menu_check, NEVER);
            self.handle_substate(Substate::MenuExit, eventtime, ctx);
            return;
        }
        self.keep_alive(eventtime, ctx);
        if self.timers.is_some() {
            ctx.reactor
                .update_timer(menu_check, eventtime + self.settings.menu_poll_interval);
        }
    }

    pub(super) fn on_pause_timer(&mut self, timers: PollerTimers, eventtime: f64, ctx: &mut NotifyContext<'_>) {
        let reported = match self.job_activity(ctx) {
            JobActivity::Running => CanonicalState::Printing,
            JobActivity::Paused => CanonicalState::Paused,
            JobActivity::None => {
                tracing::debug!("state_notify: no job in progress, pause poller stopped");
                ctx.reactor.update_timer(timers.pause, NEVER);
                return;
            }
        };
        if self.state != reported {
            self.handle_state_change(reported, eventtime, Some(TemplateOverride::Neutral), ctx);
        }
        if self.timers.is_some() {
            ctx.reactor
                .update_timer(timers.pause, eventtime + self.settings.pause_poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::EventBus;
    use crate::gcode::{GCodeError, ScriptOutcome, ScriptRunner};
    use crate::hardware::HeaterBank;
    use crate::print_job::PrintJobTracker;
    use crate::providers::ProviderRegistry;
    use crate::scheduler::Reactor;

    #[derive(Default)]
    struct CountingRunner {
        ran: Vec<String>,
    }

    impl ScriptRunner for CountingRunner {
        fn is_locked(&self) -> bool {
            false
        }

        fn run_script(&mut self, script: &str, _eventtime: f64) -> Result<ScriptOutcome, GCodeError> {
            self.ran.push(script.to_string());
            Ok(ScriptOutcome::default())
        }
    }

    fn ready(
        config: &StateNotifyConfig,
        providers: &mut ProviderRegistry,
        reactor: &mut Reactor,
        bus: &mut EventBus,
        runner: &mut CountingRunner,
    ) -> StateNotify {
        let mut notify = StateNotify::new(config).unwrap();
        let mut ctx = NotifyContext {
            reactor,
            bus,
            runner,
            providers,
        };
        notify.handle_event(crate::communication::HostEvent::Ready, 0.0, &mut ctx);
        notify
    }

    #[test]
    fn test_heater_target_keeps_printer_active() {
        let heaters = HeaterBank::new(["extruder", "heater_bed"], 250.0);
        heaters.set_target("heater_bed", 60.0).unwrap();
        let mut providers = ProviderRegistry::builder().heaters(heaters.clone()).build();
        let config = StateNotifyConfig {
            inactive_timeout: 10.0,
            heaters_active: true,
            ..Default::default()
        };
        let (mut reactor, mut bus, mut runner) = (Reactor::new(), EventBus::new(), CountingRunner::default());
        let mut notify = ready(&config, &mut providers, &mut reactor, &mut bus, &mut runner);
        let timers = notify.timers().unwrap();

        let (handle, at) = reactor.pop_due(10.0).unwrap();
        assert_eq!(handle, timers.inactive);
        let mut ctx = NotifyContext {
            reactor: &mut reactor,
            bus: &mut bus,
            runner: &mut runner,
            providers: &mut providers,
        };
        assert!(notify.handle_timer(handle, at, &mut ctx));
        assert_eq!(notify.state(), CanonicalState::Active);
        assert_eq!(reactor.waketime(timers.inactive), Some(20.0));
        assert_eq!(runner.ran, vec!["G4 P1"]);

        heaters.turn_off_all();
        let (handle, at) = reactor.pop_due(20.0).unwrap();
        let mut ctx = NotifyContext {
            reactor: &mut reactor,
            bus: &mut bus,
            runner: &mut runner,
            providers: &mut providers,
        };
        notify.handle_timer(handle, at, &mut ctx);
        assert_eq!(notify.state(), CanonicalState::Inactive);
        assert!(!reactor.is_armed(timers.inactive));
    }

    #[test]
    fn test_heater_without_keep_alive_runs_nothing() {
        let heaters = HeaterBank::new(["extruder"], 250.0);
        heaters.set_target("extruder", 200.0).unwrap();
        let mut providers = ProviderRegistry::builder().heaters(heaters).build();
        let config = StateNotifyConfig {
            inactive_timeout: 10.0,
            ..Default::default()
        };
        let (mut reactor, mut bus, mut runner) = (Reactor::new(), EventBus::new(), CountingRunner::default());
        let mut notify = ready(&config, &mut providers, &mut reactor, &mut bus, &mut runner);
        let (handle, at) = reactor.pop_due(10.0).unwrap();
        let mut ctx = NotifyContext {
            reactor: &mut reactor,
            bus: &mut bus,
            runner: &mut runner,
            providers: &mut providers,
        };
        notify.handle_timer(handle, at, &mut ctx);
        assert_eq!(notify.state(), CanonicalState::Active);
        assert!(runner.ran.is_empty());
        assert_eq!(reactor.next_waketime(), 20.0);
    }

    #[test]
    fn test_pause_poller_follows_job() {
        let job = PrintJobTracker::new();
        job.start("benchy.gcode").unwrap();
        let mut providers = ProviderRegistry::builder().job(job.clone()).build();
        let config = StateNotifyConfig {
            on_active_gcode: "M117 active".to_string(),
            ..Default::default()
        };
        let (mut reactor, mut bus, mut runner) = (Reactor::new(), EventBus::new(), CountingRunner::default());
        let mut notify = ready(&config, &mut providers, &mut reactor, &mut bus, &mut runner);
        let mut ctx = NotifyContext {
            reactor: &mut reactor,
            bus: &mut bus,
            runner: &mut runner,
            providers: &mut providers,
        };
        notify.handle_substate(Substate::IdlePrinting, 1.0, &mut ctx);
        assert_eq!(notify.state(), CanonicalState::Printing);
        let pause = notify.timers().unwrap().pause;
        assert!(reactor.is_armed(pause));
        let scripts_before = runner.ran.len();

        job.pause().unwrap();
        let (handle, at) = reactor.pop_due(1.1).unwrap();
        assert_eq!(handle, pause);
        let mut ctx = NotifyContext {
            reactor: &mut reactor,
            bus: &mut bus,
            runner: &mut runner,
            providers: &mut providers,
        };
        notify.handle_timer(handle, at, &mut ctx);
        assert_eq!(notify.state(), CanonicalState::Paused);
        assert!(reactor.is_armed(pause));
        assert_eq!(runner.ran.len(), scripts_before);

        job.cancel().unwrap();
        let (handle, at) = reactor.pop_due(1.3).unwrap();
        let mut ctx = NotifyContext {
            reactor: &mut reactor,
            bus: &mut bus,
            runner: &mut runner,
            providers: &mut providers,
        };
        notify.handle_timer(handle, at, &mut ctx);
        assert!(!reactor.is_armed(pause));
        assert_eq!(notify.state(), CanonicalState::Paused);
    }

    #[test]
    fn test_event_mode_never_arms_pause_poller() {
        let job = PrintJobTracker::new();
        job.start("benchy.gcode").unwrap();
        let mut providers = ProviderRegistry::builder().job(job).build();
        let config = StateNotifyConfig {
            pause_detection: PauseDetection::Event,
            ..Default::default()
        };
        let (mut reactor, mut bus, mut runner) = (Reactor::new(), EventBus::new(), CountingRunner::default());
        let mut notify = ready(&config, &mut providers, &mut reactor, &mut bus, &mut runner);
        let mut ctx = NotifyContext {
            reactor: &mut reactor,
            bus: &mut bus,
            runner: &mut runner,
            providers: &mut providers,
        };
        notify.handle_substate(Substate::IdlePrinting, 1.0, &mut ctx);
        assert_eq!(notify.state(), CanonicalState::Printing);
        assert!(!reactor.is_armed(notify.timers().unwrap().pause));
    }
}
