//! Collaborator seam to the host environment. Group containers are rendered
//! by a real tab too, so creating a group means asking the host for one.

use crate::tree::{TabId, WindowId};

pub trait HostTabs {
    /// Open the synthetic internal page backing a group container and return
    /// its tab id.
    fn create_group_tab(&mut self, window: WindowId, name: &str) -> Result<TabId, String>;
}

// Stub implementation to make integration explicit. Hands out ids from a
// range far above anything a real host assigns.
pub struct StubHost {
    next: TabId,
}

impl StubHost {
    pub fn new(first: TabId) -> Self {
        Self { next: first }
    }
}

impl Default for StubHost {
    fn default() -> Self {
        Self::new(1 << 32)
    }
}

impl HostTabs for StubHost {
    fn create_group_tab(&mut self, _window: WindowId, _name: &str) -> Result<TabId, String> {
        let id = self.next;
        self.next += 1;
        Ok(id)
    }
}
