// src/state_notify/dispatch.rs - lock-aware execution of transition scripts
use super::NotifyError;
use super::state::Script;
use crate::config::StateNotifyConfig;
use crate::gcode::{ScriptOutcome, ScriptRunner, ScriptTemplate, TemplateContext, TemplateError};
use crate::scheduler::{Reactor, TimerHandle};
use std::collections::BTreeMap;

/// A script waiting for the execution lock to free up.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredScript {
    pub handle: TimerHandle,
    pub scheduled: f64,
    pub context: TemplateContext,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The script ran inline.
    Completed(ScriptOutcome),
    /// The lock was held; a retry is armed.
    Deferred { retry_at: f64 },
    /// Rendering or running failed. Already logged.
    Failed(NotifyError),
}

#[derive(Debug)]
pub struct NotificationDispatcher {
    templates: BTreeMap<Script, ScriptTemplate>,
    pending: BTreeMap<Script, DeferredScript>,
    retry_delay: f64,
}

impl NotificationDispatcher {
    pub fn new(retry_delay: f64) -> Self {
        Self {
            templates: BTreeMap::new(),
            pending: BTreeMap::new(),
            retry_delay,
        }
    }

    /// Load the transition scripts. Empty options leave the script unset.
    /// `on_idle_gcode` belongs to the activity detector.
    pub fn from_config(config: &StateNotifyConfig) -> Result<Self, TemplateError> {
        let mut dispatcher = Self::new(config.mutex_retry_delay);
        let sources = [
            (Script::Ready, "on_ready_gcode", config.on_ready_gcode.as_str()),
            (Script::Active, "on_active_gcode", config.on_active_gcode.as_str()),
            (Script::Inactive, "on_inactive_gcode", config.on_inactive_gcode.as_str()),
            (Script::Noop, "noop_gcode", config.noop_gcode.as_str()),
        ];
        for (script, option, source) in sources {
            dispatcher.set_template(script, ScriptTemplate::new(option, source)?);
        }
        Ok(dispatcher)
    }

    pub fn set_template(&mut self, script: Script, template: ScriptTemplate) {
        if template.is_empty() {
            self.templates.remove(&script);
        } else {
            self.templates.insert(script, template);
        }
    }

    pub fn has_script(&self, script: Script) -> bool {
        self.templates.contains_key(&script)
    }

    pub fn owns(&self, handle: TimerHandle) -> bool {
        self.pending.values().any(|deferred| deferred.handle == handle)
    }

    pub fn pending(&self, script: Script) -> Option<&DeferredScript> {
        self.pending.get(&script)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run `script` now if the lock is free, otherwise arm (or move) its retry.
    /// Returns `None` when no script is configured.
    pub fn dispatch(
        &mut self,
        script: Script,
        context: TemplateContext,
        eventtime: f64,
        reactor: &mut Reactor,
        runner: &mut dyn ScriptRunner,
    ) -> Option<DispatchOutcome> {
        if !self.has_script(script) {
            return None;
        }
        if !runner.is_locked() {
            return Some(self.run(script, &context, eventtime, runner));
        }

        let retry_at = eventtime + self.retry_delay;
        match self.pending.get_mut(&script) {
            Some(deferred) => {
                reactor.update_timer(deferred.handle, retry_at);
                deferred.scheduled = retry_at;
                deferred.context = context;
                tracing::debug!("state_notify: replaced pending '{}' script, retry at {:.3}", script, retry_at);
            }
            None => {
                let handle = reactor.register_timer(retry_at);
                self.pending.insert(
                    script,
                    DeferredScript {
                        handle,
                        scheduled: retry_at,
                        context,
                    },
                );
                tracing::debug!("state_notify: execution lock held, deferring '{}' to {:.3}", script, retry_at);
            }
        }
        Some(DispatchOutcome::Deferred { retry_at })
    }

    /// Retry a deferred script whose timer fired.
    pub fn handle_timer(
        &mut self,
        handle: TimerHandle,
        eventtime: f64,
        reactor: &mut Reactor,
        runner: &mut dyn ScriptRunner,
    ) -> Option<DispatchOutcome> {
        let script = self
            .pending
            .iter()
            .find(|(_, deferred)| deferred.handle == handle)
            .map(|(script, _)| *script)?;

        if runner.is_locked() {
            let retry_at = eventtime + self.retry_delay;
            reactor.update_timer(handle, retry_at);
            if let Some(deferred) = self.pending.get_mut(&script) {
                deferred.scheduled = retry_at;
            }
            return Some(DispatchOutcome::Deferred { retry_at });
        }

        let deferred = self.pending.remove(&script)?;
        reactor.unregister_timer(deferred.handle);
        Some(self.run(script, &deferred.context, eventtime, runner))
    }

    /// Drop every pending retry.
    pub fn cancel_all(&mut self, reactor: &mut Reactor) {
        for (script, deferred) in std::mem::take(&mut self.pending) {
            tracing::debug!("state_notify: dropping pending '{}' script", script);
            reactor.unregister_timer(deferred.handle);
        }
    }

    fn run(
        &self,
        script: Script,
        context: &TemplateContext,
        eventtime: f64,
        runner: &mut dyn ScriptRunner,
    ) -> DispatchOutcome {
        let Some(template) = self.templates.get(&script) else {
            return DispatchOutcome::Failed(NotifyError::MissingTemplate(script));
        };
        tracing::info!("state_notify:   running template: {}", script);
        let result = template
            .render(context)
            .map_err(NotifyError::from)
            .and_then(|rendered| runner.run_script(&rendered, eventtime).map_err(NotifyError::from));
        match result {
            Ok(outcome) => DispatchOutcome::Completed(outcome),
            Err(err) => {
                tracing::error!("state_notify: '{}' gcode error: {}", script, err);
                DispatchOutcome::Failed(err)
            }
        }
    }
}
