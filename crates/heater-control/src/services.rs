//! Shared runtime services.

use fsm::Scheduler;

use crate::hap::HapBus;

/// The process-wide services every controller needs: the shared timer
/// scheduler and the hap bus. Passed explicitly at construction; there is
/// no global to reach back into.
#[derive(Clone)]
pub struct Services {
    pub scheduler: Scheduler,
    pub haps: HapBus,
}

impl Services {
    /// Builds services on the current tokio runtime with a fresh hap bus.
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            haps: HapBus::new(),
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}
