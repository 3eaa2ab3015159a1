pub mod event_system;

pub use event_system::{Component, Event, EventBus, HostEvent, UnknownEvent};
