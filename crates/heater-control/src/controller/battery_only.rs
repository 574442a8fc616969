//! The BatteryOnly variant: the heater-output thermocouple is gone.
//!
//! Same graph as Normal, but the battery thermocouple has to confirm the
//! start and the stop. A battery mass warms and cools far more slowly than
//! the heating element, so the confirmation deltas are small and the
//! timeouts long. With no heater-output reading there is no
//! over-temperature guard; the heater's internal thermal cutout is the only
//! backstop.

use std::sync::Arc;

use fsm::DefinitionErrors;
use parking_lot::Mutex;

use super::common::{
    base_machine, finish_machine, shared_tick, Core, Domain, HeaterEvent, HeaterState, Tuning,
};
use super::HeaterController;
use crate::config::BatteryOnlyConfig;
use crate::context::ControllerContext;
use crate::hw::{HeaterPlant, SenseRelay};
use crate::services::Services;

pub struct BatteryOnlyController {
    core: Arc<Mutex<Core<HeaterState, HeaterEvent>>>,
}

impl BatteryOnlyController {
    pub fn new(
        cfg: &BatteryOnlyConfig,
        plant: HeaterPlant,
        sense: SenseRelay,
        services: Services,
    ) -> Result<Self, DefinitionErrors> {
        let builder = base_machine("heater-battery-only");
        let scheduler = services.scheduler.clone();
        let domain = Domain::new(Tuning::battery_only(cfg), plant, sense, services);
        let core = finish_machine(builder, domain, &scheduler)?;
        Ok(Self { core })
    }
}

impl HeaterController for BatteryOnlyController {
    fn tick(&self, ctx: &ControllerContext) {
        shared_tick(&mut self.core.lock(), ctx);
    }

    fn reset(&self, ctx: &ControllerContext) {
        let mut core = self.core.lock();
        core.domain.observed.update(ctx);
        core.deliver(HeaterEvent::Reset);
    }

    fn is_off(&self) -> bool {
        self.core.lock().fsm.state() == HeaterState::Off
    }

    fn state_label(&self) -> &'static str {
        self.core.lock().fsm.state().label()
    }
}
