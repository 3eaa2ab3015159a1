// src/printer.rs - the host: owns every component and routes timers and events
//
// Time only moves through `advance_to`. Due timers fire one at a time in
// (waketime, registration) order with their own waketime as eventtime, and
// the event bus is drained after each one, so a run depends only on the
// sequence of calls made against it.

use thiserror::Error;

use crate::communication::{Component, Event, EventBus, HostEvent, UnknownEvent};
use crate::config::{Config, ConfigError};
use crate::gcode::{
    GCodeDispatch, GCodeError, ScriptOutcome, ScriptRunner, ScriptTemplate, TemplateContext, TemplateError,
    parse_line,
};
use crate::hardware::HeaterBank;
use crate::idle_timeout::IdleTimeout;
use crate::menu::MenuHandle;
use crate::print_job::{PrintJobError, PrintJobTracker};
use crate::providers::{ActivityState, ProviderRegistry};
use crate::scheduler::{Reactor, TimerHandle};
use crate::state_notify::{CanonicalState, NotifyContext, StateNotify, StateNotifyStatus};

const USER_LOCK_HOLDER: &str = "gcode";
const SCRIPT_LOCK_HOLDER: &str = "state_notify";
const IDLE_LOCK_HOLDER: &str = "idle_timeout";

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("GCode error: {0}")]
    GCode(#[from] GCodeError),
    #[error("Print job error: {0}")]
    Job(#[from] PrintJobError),
    #[error(transparent)]
    UnknownEvent(#[from] UnknownEvent),
    #[error("Event '{0}' is published by the host only")]
    ReservedEvent(String),
    #[error("Printer is shut down")]
    Shutdown,
}

/// Print job actions exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAction {
    Start { file: String },
    Pause,
    Resume,
    Cancel,
}

/// Runs transition scripts on the host G-code path. Commands a script
/// executes count as activity, so the events they cause are handed back.
struct HostScriptRunner<'a> {
    gcode: &'a mut GCodeDispatch,
    idle: &'a mut IdleTimeout,
}

impl ScriptRunner for HostScriptRunner<'_> {
    fn is_locked(&self) -> bool {
        self.gcode.lock().is_locked()
    }

    fn run_script(&mut self, script: &str, eventtime: f64) -> Result<ScriptOutcome, GCodeError> {
        let acquired = self.gcode.lock_mut().try_acquire(SCRIPT_LOCK_HOLDER);
        if !acquired {
            tracing::warn!(
                "Running script while execution lock is held by {:?}",
                self.gcode.lock().holder()
            );
        }
        let result = self.gcode.execute_script(script);
        if acquired {
            self.gcode.lock_mut().release();
        }
        let report = result?;
        let raised = if report.commands > 0 {
            self.idle.note_activity(eventtime, report.dwell).into_iter().collect()
        } else {
            Vec::new()
        };
        Ok(ScriptOutcome {
            commands: report.commands,
            raised,
        })
    }
}

pub struct Printer {
    config: Config,
    now: f64,
    halted: bool,
    reactor: Reactor,
    bus: EventBus,
    gcode: GCodeDispatch,
    idle: IdleTimeout,
    providers: ProviderRegistry,
    notify: StateNotify,
    job: PrintJobTracker,
    menu: Option<MenuHandle>,
    heaters: HeaterBank,
    /// Releases the execution lock once a user dwell is over.
    lock_release: Option<TimerHandle>,
}

impl Printer {
    pub fn new(config: Config) -> Result<Self, PrinterError> {
        config.validate()?;
        let heaters = HeaterBank::new(config.heaters.names.iter().cloned(), config.heaters.max_temp);
        let gcode = GCodeDispatch::new(heaters.clone());
        let idle = IdleTimeout::new(config.idle_timeout.timeout).with_idle_script(ScriptTemplate::new(
            "on_idle_gcode",
            &config.state_notify.on_idle_gcode,
        )?);
        let job = PrintJobTracker::new();
        let menu = config.printer.menu.then(MenuHandle::new);

        let mut builder = ProviderRegistry::builder()
            .activity(idle.probe())
            .job(job.clone())
            .heaters(heaters.clone());
        if let Some(menu) = &menu {
            builder = builder.menu(menu.clone());
        }
        let providers = builder.build();

        let notify = StateNotify::new(&config.state_notify)?;

        // The activity detector must be ready before the engine runs its
        // ready script, so it subscribes first.
        let mut bus = EventBus::new();
        bus.subscribe(
            Component::IdleTimeout,
            &[HostEvent::Ready, HostEvent::Shutdown, HostEvent::Disconnect],
        );
        bus.subscribe(Component::StateNotify, StateNotify::subscribed_events());

        Ok(Self {
            config,
            now: 0.0,
            halted: false,
            reactor: Reactor::new(),
            bus,
            gcode,
            idle,
            providers,
            notify,
            job,
            menu,
            heaters,
            lock_release: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn gcode(&self) -> &GCodeDispatch {
        &self.gcode
    }

    pub fn notify(&self) -> &StateNotify {
        &self.notify
    }

    pub fn job(&self) -> &PrintJobTracker {
        &self.job
    }

    pub fn menu(&self) -> Option<&MenuHandle> {
        self.menu.as_ref()
    }

    pub fn heaters(&self) -> &HeaterBank {
        &self.heaters
    }

    pub fn activity(&self) -> ActivityState {
        self.idle.state()
    }

    pub fn status(&self) -> StateNotifyStatus {
        self.notify.status()
    }

    /// Published events still in the history, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.bus.history().copied().collect()
    }

    pub fn next_waketime(&self) -> f64 {
        self.reactor.next_waketime()
    }

    /// Bring the host up at `now`.
    pub fn start(&mut self, now: f64) {
        self.now = self.now.max(now);
        tracing::info!("Printer ready at {:.3}", self.now);
        self.publish(HostEvent::Ready);
    }

    pub fn shutdown(&mut self) {
        if self.halted {
            return;
        }
        tracing::info!("Shutting down printer at {:.3}", self.now);
        self.publish(HostEvent::Shutdown);
        self.halted = true;
        if let Some(timer) = self.lock_release.take() {
            self.reactor.unregister_timer(timer);
        }
        self.gcode.lock_mut().release();
    }

    pub fn is_shutdown(&self) -> bool {
        self.halted
    }

    /// Publish a named event from a client.
    pub fn post_event(&mut self, name: &str) -> Result<(), PrinterError> {
        self.ensure_running()?;
        let event: HostEvent = name.parse()?;
        match event {
            HostEvent::State(_) => Err(PrinterError::ReservedEvent(name.to_string())),
            HostEvent::Shutdown => {
                self.shutdown();
                Ok(())
            }
            other => {
                self.publish(other);
                Ok(())
            }
        }
    }

    pub fn job_action(&mut self, action: JobAction) -> Result<(), PrinterError> {
        self.ensure_running()?;
        match action {
            JobAction::Start { file } => {
                self.job.start(&file)?;
                self.note_activity(0.0);
            }
            JobAction::Pause => {
                self.job.pause()?;
                self.publish(HostEvent::PrintPaused);
            }
            JobAction::Resume => {
                self.job.resume()?;
                self.publish(HostEvent::PrintResumed);
            }
            JobAction::Cancel => {
                self.job.cancel()?;
                self.note_activity(0.0);
            }
        }
        Ok(())
    }

    /// Open or close the display menu. Returns whether anything changed.
    pub fn set_menu_open(&mut self, open: bool) -> bool {
        let Some(menu) = &self.menu else {
            return false;
        };
        let changed = if open { menu.open() } else { menu.close() };
        if changed {
            self.publish(if open { HostEvent::MenuBegin } else { HostEvent::MenuExit });
        }
        changed
    }

    /// Run a user command line (or several) on the host G-code path.
    pub fn process_gcode(&mut self, script: &str) -> Result<Vec<String>, PrinterError> {
        self.ensure_running()?;
        let mut dwell = 0.0;
        let mut commands = 0;
        let mut result = Ok(());
        for line in script.lines() {
            match self.run_user_line(line) {
                Ok(Some(line_dwell)) => {
                    dwell += line_dwell;
                    commands += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if commands > 0 {
            self.hold_lock(dwell);
            self.note_activity(dwell);
        }
        result?;
        Ok(self.gcode.take_responses())
    }

    fn run_user_line(&mut self, line: &str) -> Result<Option<f64>, PrinterError> {
        let Some(command) = parse_line(line)? else {
            return Ok(None);
        };
        if command.command == "STATE_NOTIFY_STATE" {
            let response = self.notify.cmd_state_response();
            self.gcode.respond_info(&response);
            return Ok(Some(0.0));
        }
        Ok(Some(self.gcode.execute(&command)?))
    }

    /// Keep the execution lock for the length of a user dwell.
    fn hold_lock(&mut self, dwell: f64) {
        if dwell <= 0.0 {
            return;
        }
        let release_at = self.now + dwell;
        match self.lock_release {
            Some(timer) => {
                let current = self.reactor.waketime(timer).unwrap_or(release_at);
                self.reactor.update_timer(timer, current.max(release_at));
            }
            None => {
                self.gcode.lock_mut().try_acquire(USER_LOCK_HOLDER);
                self.lock_release = Some(self.reactor.register_timer(release_at));
            }
        }
    }

    fn note_activity(&mut self, dwell: f64) {
        if let Some(event) = self.idle.note_activity(self.now, dwell) {
            self.bus.publish(event, self.now);
        }
        self.idle.sync_timer(&mut self.reactor);
        self.pump();
    }

    /// Fire every timer due at or before `time`, then move the clock to `time`.
    pub fn advance_to(&mut self, time: f64) {
        while let Some((handle, waketime)) = self.reactor.pop_due(time) {
            self.now = self.now.max(waketime);
            self.fire_timer(handle, waketime);
            self.pump();
        }
        self.now = self.now.max(time);
    }

    fn fire_timer(&mut self, handle: TimerHandle, eventtime: f64) {
        if self.lock_release == Some(handle) {
            self.lock_release = None;
            self.reactor.unregister_timer(handle);
            self.gcode.lock_mut().release();
            tracing::debug!("Execution lock released at {:.3}", eventtime);
        } else if self.idle.owns(handle) {
            if self.idle.idle_due() {
                self.run_idle_script(eventtime);
            }
            if let Some(event) = self.idle.on_timer(eventtime, &mut self.reactor) {
                self.bus.publish(event, eventtime);
            }
        } else if self.notify.owns(handle) {
            self.with_notify(|notify, ctx| notify.handle_timer(handle, eventtime, ctx));
        } else {
            tracing::warn!("Dropping unowned {}", handle);
            self.reactor.unregister_timer(handle);
        }
        self.idle.sync_timer(&mut self.reactor);
    }

    /// Run the idle script while the detector is still Ready. Its commands
    /// are not reported as activity.
    fn run_idle_script(&mut self, eventtime: f64) {
        let Some(template) = self.idle.idle_script() else {
            return;
        };
        let context = TemplateContext::new()
            .with("previous_state", self.notify.state())
            .with("state", CanonicalState::Idle)
            .with("eventtime", format!("{:.3}", eventtime));
        let rendered = match template.render(&context) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::error!("Failed to render on_idle_gcode: {}", err);
                return;
            }
        };
        let acquired = self.gcode.lock_mut().try_acquire(IDLE_LOCK_HOLDER);
        if !acquired {
            tracing::warn!(
                "Running on_idle_gcode while execution lock is held by {:?}",
                self.gcode.lock().holder()
            );
        }
        match self.gcode.execute_script(&rendered) {
            Ok(report) => tracing::debug!("on_idle_gcode ran {} commands at {:.3}", report.commands, eventtime),
            Err(err) => tracing::error!("on_idle_gcode failed: {}", err),
        }
        if acquired {
            self.gcode.lock_mut().release();
        }
    }

    fn publish(&mut self, event: HostEvent) {
        self.bus.publish(event, self.now);
        self.pump();
    }

    /// Deliver queued events in publish order.
    fn pump(&mut self) {
        while let Some((event, targets)) = self.bus.next_delivery() {
            for component in targets {
                match component {
                    Component::IdleTimeout => {
                        self.idle.handle_event(event.kind, event.eventtime, &mut self.reactor)
                    }
                    Component::StateNotify => self.with_notify(|notify, ctx| {
                        notify.handle_event(event.kind, event.eventtime, ctx)
                    }),
                }
            }
            self.idle.sync_timer(&mut self.reactor);
        }
    }

    fn with_notify<R>(&mut self, f: impl FnOnce(&mut StateNotify, &mut NotifyContext<'_>) -> R) -> R {
        let Self {
            reactor,
            bus,
            gcode,
            idle,
            providers,
            notify,
            ..
        } = self;
        let mut runner = HostScriptRunner { gcode, idle };
        let mut ctx = NotifyContext {
            reactor,
            bus,
            runner: &mut runner,
            providers,
        };
        f(notify, &mut ctx)
    }

    fn ensure_running(&self) -> Result<(), PrinterError> {
        if self.halted {
            Err(PrinterError::Shutdown)
        } else {
            Ok(())
        }
    }
}
