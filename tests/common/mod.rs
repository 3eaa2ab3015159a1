// Shared helpers for the integration tests.
#![allow(dead_code)]

use krusty_state_notify::config::Config;
use krusty_state_notify::printer::Printer;
use krusty_state_notify::state_notify::CanonicalState;

pub fn config_with(edit: impl FnOnce(&mut Config)) -> Config {
    let mut config = Config::default();
    edit(&mut config);
    config
}

/// A printer that has just become ready at t=0.
pub fn started(config: Config) -> Printer {
    let mut printer = Printer::new(config).expect("printer should build");
    printer.start(0.0);
    printer
}

pub fn states(printer: &Printer) -> Vec<CanonicalState> {
    printer.bus().state_history()
}

pub fn responses_matching(printer: &Printer, text: &str) -> usize {
    printer.gcode().responses().filter(|r| *r == text).count()
}
