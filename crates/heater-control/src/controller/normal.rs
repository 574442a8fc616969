//! The Normal variant: battery and heater thermocouples both trustworthy.
//!
//! The full confirmation cycle: a cold battery starts a heating attempt,
//! the sense relay and the heater-output thermocouple independently confirm
//! that power actually flowed and heat actually appeared, and the stop side
//! is confirmed the same way in reverse. A start that produces no
//! temperature rise is retried through a growing cooldown, up to five
//! times, after which the evidence picks between a heater and an SSR fault
//! hypothesis.

use std::sync::Arc;

use fsm::DefinitionErrors;
use parking_lot::Mutex;

use super::common::{
    base_machine, finish_machine, shared_tick, Core, Domain, HeaterEvent, HeaterState, Tuning,
};
use super::HeaterController;
use crate::config::NormalConfig;
use crate::context::ControllerContext;
use crate::hw::{HeaterPlant, SenseRelay};
use crate::services::Services;

pub struct NormalController {
    core: Arc<Mutex<Core<HeaterState, HeaterEvent>>>,
}

impl NormalController {
    pub fn new(
        cfg: &NormalConfig,
        plant: HeaterPlant,
        sense: SenseRelay,
        services: Services,
    ) -> Result<Self, DefinitionErrors> {
        // On top of the shared graph: an overheating element ends the ON
        // dwell just like a warm battery does.
        let builder = base_machine("heater-normal").transition(
            HeaterState::On,
            HeaterEvent::HiHeaterTemp,
            HeaterState::ConfirmSsrOff,
        );
        let scheduler = services.scheduler.clone();
        let domain = Domain::new(Tuning::normal(cfg), plant, sense, services);
        let core = finish_machine(builder, domain, &scheduler)?;
        Ok(Self { core })
    }
}

impl HeaterController for NormalController {
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
