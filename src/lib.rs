// src/lib.rs - printer state tracking and notification host
pub mod communication;
pub mod config;
pub mod gcode;
pub mod hardware;
pub mod idle_timeout;
pub mod menu;
pub mod print_job;
pub mod printer;
pub mod providers;
pub mod scheduler;
pub mod state_notify;
pub mod web;

pub use config::{Config, load_config};
pub use printer::{Printer, PrinterError};
pub use state_notify::{CanonicalState, StateNotify};
