use std::cell::RefCell;
use std::rc::Rc;

/// The single user-visible error slot. Clones share the slot; the last
/// writer wins.
#[derive(Debug, Clone, Default)]
pub struct ErrorSurface {
    slot: Rc<RefCell<Option<String>>>,
}

impl ErrorSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, message: impl Into<String>) {
        *self.slot.borrow_mut() = Some(message.into());
    }

    pub fn clear(&self) {
        self.slot.borrow_mut().take();
    }

    pub fn current(&self) -> Option<String> {
        self.slot.borrow().clone()
    }
}
