//! The supervisor: picks a controller variant each tick and drives it.
//!
//! Runs at a fixed rate on the shared scheduler. Each tick it snapshots the
//! sensors, selects the variant the surviving sensors allow, hands off
//! between variants when the selection changes (reset the outgoing machine,
//! swap the active pointer), computes the active temperature window from
//! the light mode, and calls `tick` on the chosen controller with a fresh
//! context.
//!
//! A controller that panics is contained; ten consecutive panics force the
//! heater off as an emergency measure while the supervisor keeps retrying.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, trace};

use crate::config::HeaterControlConfig;
use crate::context::ControllerContext;
use crate::controller::{
    BatteryOnlyController, HeaterController, HeaterOnlyController, NoTempsController,
    NormalController, Variant,
};
use crate::hw::{HeaterPlant, SenseRelay};
use crate::sensor::{LightMode, SensorHub};
use crate::services::Services;
use fsm::{Scheduler, TimerHandle};

/// Consecutive contained panics before the heater is forced off.
const MAX_TICK_FAILURES: u32 = 10;

/// Anything that can stop the supervisor from being built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigErrors),
    #[error(transparent)]
    Machine(#[from] fsm::DefinitionErrors),
}

/// Point-in-time view of the supervisor, for status surfaces and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub active: &'static str,
    pub state: &'static str,
    pub heater_on: bool,
}

pub struct HeaterSupervisor {
    core: Arc<Mutex<SupervisorCore>>,
    tick_period: std::time::Duration,
}

struct SupervisorCore {
    cfg: HeaterControlConfig,
    sensors: SensorHub,
    plant: HeaterPlant,
    normal: NormalController,
    battery_only: BatteryOnlyController,
    heater_only: HeaterOnlyController,
    no_temps: NoTempsController,
    active: Variant,
    seen_reading: bool,
    tick_failures: u32,
}

impl HeaterSupervisor {
    /// Validates the configuration and builds all four controllers.
    ///
    /// Nothing is scheduled yet; call [`HeaterSupervisor::start`] to begin
    /// ticking.
    pub fn new(
        cfg: HeaterControlConfig,
        sensors: SensorHub,
        plant: HeaterPlant,
        sense: SenseRelay,
        services: Services,
    ) -> Result<Self, BuildError> {
        cfg.validate()?;
        let tick_period = cfg.supervisor.tick_period();
        let core = SupervisorCore {
            normal: NormalController::new(&cfg.normal, plant.clone(), sense.clone(), services.clone())?,
            battery_only: BatteryOnlyController::new(
                &cfg.battery_only,
                plant.clone(),
                sense.clone(),
                services.clone(),
            )?,
            heater_only: HeaterOnlyController::new(
                &cfg.heater_only,
                plant.clone(),
                sense.clone(),
                services.clone(),
            )?,
            no_temps: NoTempsController::new(&cfg.no_temps, plant.clone(), sense, services)?,
            cfg,
            sensors,
            plant,
            active: Variant::Normal,
            seen_reading: false,
            tick_failures: 0,
        };
        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            tick_period,
        })
    }

    /// Schedules the fixed-rate tick on the shared scheduler. Dropping the
    /// returned handle stops the supervisor.
    #[must_use]
    pub fn start(&self, scheduler: &Scheduler) -> TimerHandle {
        let core = Arc::clone(&self.core);
        scheduler.schedule_fixed_rate(self.tick_period, self.tick_period, move || {
            core.lock().tick();
        })
    }

    /// Runs one tick synchronously. What the scheduled timer calls; also
    /// the hook tests use to drive the supervisor deterministically.
    pub fn tick_once(&self) {
        self.core.lock().tick();
    }

    pub fn status(&self) -> SupervisorStatus {
        let core = self.core.lock();
        SupervisorStatus {
            active: core.active_label(),
            state: core.controller(core.active).state_label(),
            heater_on: core.plant.is_on(),
        }
    }
}

impl SupervisorCore {
    fn tick(&mut self) {
        let snap = self.sensors.snapshot();

        // Startup gate: until the very first battery or heater reading ever
        // arrives, do nothing at all.
        if !self.seen_reading && snap.battery_temp.is_none() && snap.heater_temp.is_none() {
            trace!("no battery or heater reading seen yet; holding off");
            return;
        }
        self.seen_reading = true;

        let target = Variant::select(snap.battery_temp.is_some(), snap.heater_temp.is_some());
        let (low, high) = self.window(snap.light_mode);
        let ctx = ControllerContext::new(&snap, low, high);

        if target != self.active {
            info!(from = ?self.active, to = ?target, "sensor availability changed; switching controller");
            self.controller(self.active).reset(&ctx);
            self.active = target;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.controller(target).tick(&ctx)));
        match outcome {
            Ok(()) => self.tick_failures = 0,
            Err(_) => {
                self.tick_failures += 1;
                error!(
                    variant = ?target,
                    consecutive = self.tick_failures,
                    "controller tick panicked"
                );
                if self.tick_failures >= MAX_TICK_FAILURES {
                    error!("persistent controller failure; forcing heater off");
                    self.plant.heater_off();
                }
            }
        }
    }

    /// The active temperature window. Light means the sun can top the
    /// batteries up, so the generous production window applies; dark (or an
    /// unavailable light signal) selects the dormant window.
    fn window(&self, mode: Option<LightMode>) -> (f64, f64) {
        match mode.unwrap_or(LightMode::Dark) {
            LightMode::Light => (
                self.cfg.supervisor.production_low_temp,
                self.cfg.supervisor.production_high_temp,
            ),
            LightMode::Dark => (
                self.cfg.supervisor.dormant_low_temp,
                self.cfg.supervisor.dormant_high_temp,
            ),
        }
    }

    fn controller(&self, variant: Variant) -> &dyn HeaterController {
        match variant {
            Variant::Normal => &self.normal,
            Variant::BatteryOnly => &self.battery_only,
            Variant::HeaterOnly => &self.heater_only,
            Variant::NoTemps => &self.no_temps,
        }
    }

    fn active_label(&self) -> &'static str {
        match self.active {
            Variant::Normal => "normal",
            Variant::BatteryOnly => "battery-only",
            Variant::HeaterOnly => "heater-only",
            Variant::NoTemps => "no-temps",
        }
    }
}
