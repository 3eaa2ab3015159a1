//! # Collaborator providers
//!
//! The state engine never looks collaborators up by name at runtime. Every
//! subsystem it queries is registered once, while the host is being wired,
//! through [`ProviderRegistryBuilder`]. Registering a second provider for the
//! same slot replaces the first one; after [`ProviderRegistryBuilder::build`]
//! the set of providers is fixed.
//!
//! Any slot may stay empty. Lookups then return [`MissingCollaborator`] and
//! callers skip the check that depended on it.

use crate::print_job::JobState;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Collaborator '{0}' is not registered")]
pub struct MissingCollaborator(pub &'static str);

/// Coarse activity signal reported by the idle detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    Idle,
    Ready,
    Printing,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Ready => "Ready",
            Self::Printing => "Printing",
        };
        f.write_str(name)
    }
}

pub trait ActivityDetector {
    fn activity(&self) -> ActivityState;
}

pub trait MenuProvider {
    fn is_open(&self) -> bool;
    /// Close the menu regardless of its current state.
    fn exit(&mut self);
}

pub trait JobProvider {
    fn reported_state(&self) -> JobState;
}

pub trait HeaterRegistry {
    fn heater_names(&self) -> Vec<String>;
    fn target_temperature(&self, name: &str) -> Option<f64>;

    /// First heater with a nonzero target, with that target.
    fn first_active_heater(&self) -> Option<(String, f64)> {
        self.heater_names().into_iter().find_map(|name| {
            self.target_temperature(&name)
                .filter(|target| *target > 0.0)
                .map(|target| (name, target))
        })
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    activity: Option<Box<dyn ActivityDetector>>,
    menu: Option<Box<dyn MenuProvider>>,
    job: Option<Box<dyn JobProvider>>,
    heaters: Option<Box<dyn HeaterRegistry>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("activity", &self.activity.is_some())
            .field("menu", &self.menu.is_some())
            .field("job", &self.job.is_some())
            .field("heaters", &self.heaters.is_some())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn activity(&self) -> Result<&dyn ActivityDetector, MissingCollaborator> {
        self.activity.as_deref().ok_or(MissingCollaborator("idle_timeout"))
    }

    pub fn menu(&self) -> Result<&dyn MenuProvider, MissingCollaborator> {
        self.menu.as_deref().ok_or(MissingCollaborator("menu"))
    }

    pub fn menu_mut(&mut self) -> Result<&mut (dyn MenuProvider + 'static), MissingCollaborator> {
        self.menu.as_deref_mut().ok_or(MissingCollaborator("menu"))
    }

    pub fn job(&self) -> Result<&dyn JobProvider, MissingCollaborator> {
        self.job.as_deref().ok_or(MissingCollaborator("print_stats"))
    }

    pub fn heaters(&self) -> Result<&dyn HeaterRegistry, MissingCollaborator> {
        self.heaters.as_deref().ok_or(MissingCollaborator("heaters"))
    }

    pub fn has_menu(&self) -> bool {
        self.menu.is_some()
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    registry: ProviderRegistry,
}

impl ProviderRegistryBuilder {
    pub fn activity(mut self, provider: impl ActivityDetector + 'static) -> Self {
        if self.registry.activity.is_some() {
            tracing::debug!("Replacing activity detector provider");
        }
        self.registry.activity = Some(Box::new(provider));
        self
    }

    pub fn menu(mut self, provider: impl MenuProvider + 'static) -> Self {
        if self.registry.menu.is_some() {
            tracing::debug!("Replacing menu provider");
        }
        self.registry.menu = Some(Box::new(provider));
        self
    }

    pub fn job(mut self, provider: impl JobProvider + 'static) -> Self {
        if self.registry.job.is_some() {
            tracing::debug!("Replacing job provider");
        }
        self.registry.job = Some(Box::new(provider));
        self
    }

    pub fn heaters(mut self, provider: impl HeaterRegistry + 'static) -> Self {
        if self.registry.heaters.is_some() {
            tracing::debug!("Replacing heater registry");
        }
        self.registry.heaters = Some(Box::new(provider));
        self
    }

    pub fn build(self) -> ProviderRegistry {
        self.registry
    }
}
