//! The HeaterOnly variant: the battery thermocouple is gone.
//!
//! The heater-output thermocouple does double duty. While the element is
//! cold (the OFF state) it reads close to the shed interior, so it stands
//! in for the missing battery sensor as the low-temperature trigger. Once
//! heating is confirmed there is nothing left to say when the *batteries*
//! are warm enough, so the ON dwell is computed open-loop: long enough, at
//! the measured heating rate, to lift the box from the outside temperature
//! to the window ceiling. An over-temperature guard on the element bounds
//! the damage if the estimate is wrong.

use std::sync::Arc;
use std::time::Duration;

use fsm::{DefinitionErrors, Dispatch};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::common::{
    base_machine, finish_machine, shared_tick, Core, Domain, HeaterEvent, HeaterState, Tuning,
};
use super::HeaterController;
use crate::config::HeaterOnlyConfig;
use crate::context::ControllerContext;
use crate::hap::Hap;
use crate::hw::{HeaterPlant, SenseRelay};
use crate::services::Services;
use crate::thermo::heating_seconds;

pub struct HeaterOnlyController {
    core: Arc<Mutex<Core<HeaterState, HeaterEvent>>>,
}

impl HeaterOnlyController {
    pub fn new(
        cfg: &HeaterOnlyConfig,
        plant: HeaterPlant,
        sense: SenseRelay,
        services: Services,
    ) -> Result<Self, DefinitionErrors> {
        let builder = base_machine("heater-heater-only")
            .on_entry(HeaterState::On, enter_on)
            .transition(HeaterState::On, HeaterEvent::Heated, HeaterState::ConfirmSsrOff)
            .transition(HeaterState::On, HeaterEvent::HiHeaterTemp, HeaterState::ConfirmSsrOff);
        let scheduler = services.scheduler.clone();
        let domain = Domain::new(Tuning::heater_only(cfg), plant, sense, services);
        let core = finish_machine(builder, domain, &scheduler)?;
        Ok(Self { core })
    }
}

/// Entering ON schedules the end of the open-loop dwell.
///
/// The dwell covers the climb from the outside-of-box temperature to the
/// window ceiling; the time already spent confirming the start counts
/// toward it. With neither ambient nor weather data the pre-heating
/// baseline is the least-bad stand-in, and the blind spot is reported.
fn enter_on(d: &mut Domain, dsp: &mut Dispatch<HeaterEvent>) {
    // Guaranteed by config validation for this variant.
    let Some(dps) = d.tuning.degrees_per_second else {
        return;
    };
    let t_out = match d.observed.outside_the_box() {
        Some(t) => t,
        None => {
            warn!("no ambient or outside reading; using the pre-heating baseline");
            d.services.haps.post(Hap::NoTemperatureOutsideTheBox);
            d.starting_temp
        }
    };
    let full = Duration::from_secs_f64(heating_seconds(d.observed.high - t_out, dps));
    let elapsed = d.heater_on_at.map(|at| at.elapsed()).unwrap_or_default();
    let dwell = full.saturating_sub(elapsed);
    debug!(?dwell, t_out, "open-loop heating dwell scheduled");
    dsp.set_timeout(HeaterEvent::Heated, dwell);
}

impl HeaterController for HeaterOnlyController {
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
