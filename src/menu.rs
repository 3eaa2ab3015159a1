// src/menu.rs - display menu state, the menu provider
use crate::providers::MenuProvider;
use std::cell::Cell;
use std::rc::Rc;

/// Shared handle on the display menu. Clones observe the same menu.
#[derive(Debug, Clone, Default)]
pub struct MenuHandle {
    open: Rc<Cell<bool>>,
}

impl MenuHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the menu. Returns `false` if it was already open.
    pub fn open(&self) -> bool {
        !self.open.replace(true)
    }

    /// Close the menu. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.open.replace(false)
    }
}

impl MenuProvider for MenuHandle {
    fn is_open(&self) -> bool {
        self.open.get()
    }

    fn exit(&mut self) {
        if self.close() {
            tracing::debug!("Menu forced closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_and_forced_exit() {
        let menu = MenuHandle::new();
        let mut provider = menu.clone();
        assert!(!provider.is_open());
        assert!(menu.open());
        assert!(!menu.open());
        assert!(provider.is_open());
        provider.exit();
        assert!(!menu.close());
        assert!(!provider.is_open());
    }
}
