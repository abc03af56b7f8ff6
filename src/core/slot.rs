// Lock-free holder for the active handle; an empty slot means the file was closed.
use std::sync::Arc;

use arc_swap::ArcSwapOption;

pub(crate) struct HandleSlot<H> {
    active: ArcSwapOption<H>,
}

impl<H> HandleSlot<H> {
    pub(crate) fn new(handle: Arc<H>) -> Self {
        Self {
            active: ArcSwapOption::new(Some(handle)),
        }
    }

    pub(crate) fn load(&self) -> Option<Arc<H>> {
        self.active.load_full()
    }

    /// Installs `handle` and returns whatever was active before.
    pub(crate) fn store(&self, handle: Arc<H>) -> Option<Arc<H>> {
        self.active.swap(Some(handle))
    }

    pub(crate) fn take(&self) -> Option<Arc<H>> {
        self.active.swap(None)
    }
}
