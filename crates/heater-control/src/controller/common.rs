//! Machinery shared by the controller variants.
//!
//! The Normal, BatteryOnly and HeaterOnly variants run the same state graph
//! and differ only in which thermocouple feeds each check and in their
//! tuning; the table, the entry/exit actions and the per-tick condition scan
//! all live here, parameterized by [`Tuning`]. NoTemps has its own graph but
//! reuses the same [`Domain`] scratch and plumbing.

use std::sync::Arc;
use std::time::Duration;

use fsm::{Dispatch, DefinitionErrors, Fsm, FsmBuilder, FsmEvent, FsmState, Scheduler, TimerHandle};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::config::{BatteryOnlyConfig, HeaterOnlyConfig, NoTempsConfig, NormalConfig};
use crate::context::ControllerContext;
use crate::hap::Hap;
use crate::hw::{HeaterPlant, SenseRelay};
use crate::services::Services;

/// Retry ceiling for failed heater starts within one heating attempt.
pub const MAX_TURN_ON_TRIES: u32 = 5;

/// Settling time between commanding the SSR and trusting the sense relay.
pub const SENSE_SETTLE: Duration = Duration::from_millis(100);

/// States of the full confirmation graph (Normal, BatteryOnly, HeaterOnly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaterState {
    Off,
    ConfirmSsrOn,
    ConfirmHeaterOn,
    On,
    ConfirmSsrOff,
    ConfirmHeaterOff,
    Cooling,
    HeaterCooling,
}

impl HeaterState {
    pub fn label(self) -> &'static str {
        match self {
            HeaterState::Off => "OFF",
            HeaterState::ConfirmSsrOn => "CONFIRM_SSR_ON",
            HeaterState::ConfirmHeaterOn => "CONFIRM_HEATER_ON",
            HeaterState::On => "ON",
            HeaterState::ConfirmSsrOff => "CONFIRM_SSR_OFF",
            HeaterState::ConfirmHeaterOff => "CONFIRM_HEATER_OFF",
            HeaterState::Cooling => "COOLING",
            HeaterState::HeaterCooling => "HEATER_COOLING",
        }
    }
}

/// Events of the full confirmation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaterEvent {
    LoBatteryTemp,
    HiBatteryTemp,
    HiHeaterTemp,
    OnSensed,
    OffSensed,
    HeaterTempRise,
    HeaterTempDrop,
    NoTempRise,
    NoTempDrop,
    Cooled,
    Heated,
    Reset,
}

/// Which thermocouple feeds a given check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempSource {
    Battery,
    Heater,
}

/// Per-variant tuning, resolved out of the config records into one flat
/// shape the shared actions can work from. Fields a variant has no use for
/// are `None`/zero and never read by its table.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    /// Source of the low-temperature trigger that starts a heating cycle.
    pub trigger_source: TempSource,
    /// Source of the rise/drop confirmation checks.
    pub confirm_source: TempSource,
    pub confirm_on_delta: f64,
    pub confirm_off_delta: f64,
    pub confirm_on_time: Duration,
    pub confirm_off_time: Duration,
    pub initial_cooldown_period: Duration,
    pub cooling_time: Duration,
    pub heater_temp_limit: Option<f64>,
    pub degrees_per_second: Option<f64>,
    pub k: Option<f64>,
    pub safety_tweak: f64,
}

impl Tuning {
    pub fn normal(cfg: &NormalConfig) -> Self {
        Self {
            trigger_source: TempSource::Battery,
            confirm_source: TempSource::Heater,
            confirm_on_delta: cfg.confirm_on_delta,
            confirm_off_delta: cfg.confirm_off_delta,
            confirm_on_time: Duration::from_millis(cfg.confirm_on_time_ms),
            confirm_off_time: Duration::from_millis(cfg.confirm_off_time_ms),
            initial_cooldown_period: Duration::from_millis(cfg.initial_cooldown_period_ms),
            cooling_time: Duration::from_millis(cfg.cooling_time_ms),
            heater_temp_limit: Some(cfg.heater_temp_limit),
            degrees_per_second: None,
            k: None,
            safety_tweak: 1.0,
        }
    }

    pub fn battery_only(cfg: &BatteryOnlyConfig) -> Self {
        Self {
            trigger_source: TempSource::Battery,
            confirm_source: TempSource::Battery,
            confirm_on_delta: cfg.confirm_on_delta,
            confirm_off_delta: cfg.confirm_off_delta,
            confirm_on_time: Duration::from_millis(cfg.confirm_on_time_ms),
            confirm_off_time: Duration::from_millis(cfg.confirm_off_time_ms),
            initial_cooldown_period: Duration::from_millis(cfg.initial_cooldown_period_ms),
            cooling_time: Duration::from_millis(cfg.cooling_time_ms),
            heater_temp_limit: None,
            degrees_per_second: None,
            k: None,
            safety_tweak: 1.0,
        }
    }

    pub fn heater_only(cfg: &HeaterOnlyConfig) -> Self {
        Self {
            trigger_source: TempSource::Heater,
            confirm_source: TempSource::Heater,
            confirm_on_delta: cfg.confirm_on_delta,
            confirm_off_delta: cfg.confirm_off_delta,
            confirm_on_time: Duration::from_millis(cfg.confirm_on_time_ms),
            confirm_off_time: Duration::from_millis(cfg.confirm_off_time_ms),
            initial_cooldown_period: Duration::from_millis(cfg.initial_cooldown_period_ms),
            cooling_time: Duration::from_millis(cfg.cooling_time_ms),
            heater_temp_limit: Some(cfg.heater_temp_limit),
            degrees_per_second: Some(cfg.degrees_per_second),
            k: None,
            safety_tweak: 1.0,
        }
    }

    pub fn no_temps(cfg: &NoTempsConfig) -> Self {
        Self {
            trigger_source: TempSource::Battery,
            confirm_source: TempSource::Battery,
            confirm_on_delta: 0.0,
            confirm_off_delta: 0.0,
            confirm_on_time: Duration::ZERO,
            confirm_off_time: Duration::ZERO,
            initial_cooldown_period: Duration::ZERO,
            cooling_time: Duration::ZERO,
            heater_temp_limit: None,
            degrees_per_second: Some(cfg.degrees_per_second),
            k: Some(cfg.k),
            safety_tweak: cfg.safety_tweak,
        }
    }
}

/// The freshest observations, refreshed on every tick (and on reset) so
/// actions fired by timers between ticks still see something recent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observed {
    pub battery_temp: Option<f64>,
    pub heater_temp: Option<f64>,
    pub ambient_temp: Option<f64>,
    pub outside_temp: Option<f64>,
    pub low: f64,
    pub high: f64,
}

impl Observed {
    pub fn update(&mut self, ctx: &ControllerContext) {
        self.battery_temp = ctx.battery_temp;
        self.heater_temp = ctx.heater_temp;
        self.ambient_temp = ctx.ambient_temp;
        self.outside_temp = ctx.outside_temp;
        self.low = ctx.low;
        self.high = ctx.high;
    }

    pub fn source(&self, source: TempSource) -> Option<f64> {
        match source {
            TempSource::Battery => self.battery_temp,
            TempSource::Heater => self.heater_temp,
        }
    }

    /// Best estimate of the temperature outside the battery box: the shed
    /// ambient sensor if it works, else the weather station.
    pub fn outside_the_box(&self) -> Option<f64> {
        self.ambient_temp.or(self.outside_temp)
    }
}

/// Controller scratch state plus the handles the FSM actions need.
pub struct Domain {
    pub tuning: Tuning,
    pub plant: HeaterPlant,
    pub sense: SenseRelay,
    pub services: Services,
    pub observed: Observed,
    /// Failed-start counter for the current heating attempt, capped at
    /// [`MAX_TURN_ON_TRIES`].
    pub turn_on_tries: u32,
    /// Confirmation baseline, snapshotted when a confirm phase begins.
    pub starting_temp: f64,
    /// Sense-relay reading latched when the SSR settle delay expires.
    pub sense_latched: bool,
    /// When the heater was last commanded on.
    pub heater_on_at: Option<Instant>,
    /// Timers that must survive state changes (the NoTemps cycle); cleared
    /// whenever the machine returns to OFF.
    pub cycle_timers: Vec<TimerHandle>,
}

impl Domain {
    pub fn new(tuning: Tuning, plant: HeaterPlant, sense: SenseRelay, services: Services) -> Self {
        Self {
            tuning,
            plant,
            sense,
            services,
            observed: Observed::default(),
            turn_on_tries: 0,
            starting_temp: 0.0,
            sense_latched: false,
            heater_on_at: None,
            cycle_timers: Vec::new(),
        }
    }
}

/// One controller's FSM together with its domain, behind one lock so event
/// handling is strictly serial.
pub struct Core<S: FsmState, E: FsmEvent> {
    pub fsm: Fsm<S, E, Domain>,
    pub domain: Domain,
}

impl<S: FsmState, E: FsmEvent> Core<S, E> {
    pub fn deliver(&mut self, event: E) {
        let Core { fsm, domain } = self;
        fsm.on_event(domain, event);
    }
}

/// Builds the machine, installs a weak-referenced delivery sink for its
/// scheduled events, and starts it.
pub fn finish_machine<S: FsmState, E: FsmEvent>(
    builder: FsmBuilder<S, E, Domain>,
    domain: Domain,
    scheduler: &Scheduler,
) -> Result<Arc<Mutex<Core<S, E>>>, DefinitionErrors> {
    let fsm = builder.build(scheduler.clone())?;
    let core = Arc::new(Mutex::new(Core { fsm, domain }));
    let weak = Arc::downgrade(&core);
    let mut guard = core.lock();
    guard.fsm.set_sink(move |event, epoch| {
        if let Some(core) = weak.upgrade() {
            let mut guard = core.lock();
            let Core { fsm, domain } = &mut *guard;
            fsm.on_scheduled(domain, event, epoch);
        }
    });
    let Core { fsm, domain } = &mut *guard;
    fsm.start(domain);
    drop(guard);
    Ok(core)
}

// --- Shared entry/exit/transition actions -------------------------------

/// OFF is the safe harbor: heater off, long-cycle timers gone. Works for
/// any event enum so the NoTemps machine can use it too.
pub fn enter_off<E>(d: &mut Domain, _dsp: &mut Dispatch<E>) {
    d.cycle_timers.clear();
    d.plant.heater_off();
}

pub fn enter_confirm_ssr_on(d: &mut Domain, dsp: &mut Dispatch<HeaterEvent>) {
    d.heater_on_at = Some(Instant::now());
    d.plant.heater_on();
    dsp.set_timeout(HeaterEvent::OnSensed, SENSE_SETTLE);
}

/// OFF → CONFIRM_SSR_ON: a fresh heating attempt begins.
pub fn act_begin_heating(d: &mut Domain, _dsp: &mut Dispatch<HeaterEvent>) {
    d.turn_on_tries = 0;
}

/// CONFIRM_SSR_ON → CONFIRM_HEATER_ON: the SSR has had its settle time;
/// latch what the sense relay says and start the rise clock.
pub fn act_on_sensed(d: &mut Domain, dsp: &mut Dispatch<HeaterEvent>) {
    d.sense_latched = d.sense.is_power_sensed();
    dsp.set_timeout(HeaterEvent::NoTempRise, d.tuning.confirm_on_time);
}

pub fn enter_confirm_heater_on(d: &mut Domain, _dsp: &mut Dispatch<HeaterEvent>) {
    if let Some(t) = d.observed.source(d.tuning.confirm_source) {
        d.starting_temp = t;
    }
}

/// CONFIRM_HEATER_ON → ON: temperature rose, the start is confirmed. Render
/// verdicts on everything the rise proves.
pub fn act_heater_started(d: &mut Domain, _dsp: &mut Dispatch<HeaterEvent>) {
    d.services.haps.post(Hap::HeaterWorking);
    d.services.haps.post(Hap::SsrWorking);
    if d.sense_latched {
        d.services.haps.post(Hap::SenseRelayWorking);
    } else {
        // Heat without sensed power: the relay (or its wiring) is suspect.
        warn!("temperature rose but the sense relay never reported power");
        d.services.haps.post(Hap::PossibleSenseRelayFailure);
    }
}

/// CONFIRM_HEATER_ON → HEATER_COOLING: no rise within the window. Back off
/// for a cooldown that grows with each failed try, and say what the failure
/// pattern implies once the retries are spent.
pub fn act_no_start(d: &mut Domain, dsp: &mut Dispatch<HeaterEvent>) {
    d.plant.heater_off();
    d.turn_on_tries = (d.turn_on_tries + 1).min(MAX_TURN_ON_TRIES);
    warn!(tries = d.turn_on_tries, "heater did not start");
    d.services.haps.post(Hap::HeaterNoStart);
    if d.turn_on_tries >= MAX_TURN_ON_TRIES {
        d.services.haps.post(if d.sense_latched {
            // Power flows but nothing heats up.
            Hap::PossibleHeaterFailure
        } else {
            Hap::PossibleSsrFailure
        });
    }
    dsp.set_timeout(
        HeaterEvent::Cooled,
        d.tuning.initial_cooldown_period * d.turn_on_tries,
    );
}

/// Leaving ON always kills power and re-baselines for the drop check,
/// whether the exit is a normal stop or a reset.
pub fn exit_on(d: &mut Domain, _dsp: &mut Dispatch<HeaterEvent>) {
    if let Some(t) = d.observed.source(d.tuning.confirm_source) {
        d.starting_temp = t;
    }
    d.plant.heater_off();
}

pub fn enter_confirm_ssr_off(_d: &mut Domain, dsp: &mut Dispatch<HeaterEvent>) {
    dsp.set_timeout(HeaterEvent::OffSensed, SENSE_SETTLE);
}

/// CONFIRM_SSR_OFF → CONFIRM_HEATER_OFF: latch the sense relay after the
/// settle time and start the drop clock.
pub fn act_off_sensed(d: &mut Domain, dsp: &mut Dispatch<HeaterEvent>) {
    d.sense_latched = d.sense.is_power_sensed();
    dsp.set_timeout(HeaterEvent::NoTempDrop, d.tuning.confirm_off_time);
}

/// CONFIRM_HEATER_OFF → COOLING on timeout: the temperature never fell. If
/// power was still sensed after the SSR was told to open, the SSR is the
/// suspect; otherwise the switch demonstrably opened.
pub fn act_no_drop(d: &mut Domain, _dsp: &mut Dispatch<HeaterEvent>) {
    if d.sense_latched {
        warn!("power still sensed after turn-off; SSR may be stuck closed");
        d.services.haps.post(Hap::PossibleSsrFailure);
    } else {
        d.services.haps.post(Hap::SsrWorking);
    }
}

pub fn enter_cooling(d: &mut Domain, dsp: &mut Dispatch<HeaterEvent>) {
    dsp.set_timeout(HeaterEvent::Cooled, d.tuning.cooling_time);
}

/// The confirmation graph shared by Normal, BatteryOnly and HeaterOnly.
/// Variants extend the returned builder with their own transitions and
/// entry hooks before building.
pub fn base_machine(name: &'static str) -> FsmBuilder<HeaterState, HeaterEvent, Domain> {
    use HeaterEvent as E;
    use HeaterState as S;

    let mut builder = FsmBuilder::new(name, S::Off)
        .seed(E::Reset)
        .on_entry(S::Off, enter_off)
        .on_entry(S::ConfirmSsrOn, enter_confirm_ssr_on)
        .on_entry(S::ConfirmHeaterOn, enter_confirm_heater_on)
        .on_exit(S::On, exit_on)
        .on_entry(S::ConfirmSsrOff, enter_confirm_ssr_off)
        .on_entry(S::Cooling, enter_cooling)
        .transition_with(S::Off, E::LoBatteryTemp, S::ConfirmSsrOn, act_begin_heating)
        .transition_with(S::ConfirmSsrOn, E::OnSensed, S::ConfirmHeaterOn, act_on_sensed)
        .transition_with(S::ConfirmHeaterOn, E::HeaterTempRise, S::On, act_heater_started)
        .transition_with(S::ConfirmHeaterOn, E::NoTempRise, S::HeaterCooling, act_no_start)
        .transition(S::HeaterCooling, E::Cooled, S::ConfirmSsrOn)
        .transition(S::On, E::HiBatteryTemp, S::ConfirmSsrOff)
        .transition_with(S::ConfirmSsrOff, E::OffSensed, S::ConfirmHeaterOff, act_off_sensed)
        .transition(S::ConfirmHeaterOff, E::HeaterTempDrop, S::Cooling)
        .transition_with(S::ConfirmHeaterOff, E::NoTempDrop, S::Cooling, act_no_drop)
        .transition(S::Cooling, E::Cooled, S::Off);

    // Every non-OFF state can be yanked straight back to OFF.
    for state in [
        S::ConfirmSsrOn,
        S::ConfirmHeaterOn,
        S::On,
        S::ConfirmSsrOff,
        S::ConfirmHeaterOff,
        S::Cooling,
        S::HeaterCooling,
    ] {
        builder = builder.transition(state, E::Reset, S::Off);
    }
    builder
}

/// The per-tick condition scan for the confirmation-graph variants.
///
/// Conditions are evaluated against the current state only, and when more
/// than one holds in the same tick they are delivered low-temperature
/// first, high-battery second, high-heater third. Events that find no
/// transition are discarded by the machine, which is what makes repeated
/// delivery of a standing condition harmless.
pub fn shared_tick(core: &mut Core<HeaterState, HeaterEvent>, ctx: &ControllerContext) {
    core.domain.observed.update(ctx);
    let state = core.fsm.state();
    let events = {
        let d = &core.domain;
        let t = &d.tuning;
        let mut events: Vec<HeaterEvent> = Vec::new();
        match state {
            HeaterState::Off => {
                if let Some(v) = d.observed.source(t.trigger_source) {
                    if v < d.observed.low {
                        events.push(HeaterEvent::LoBatteryTemp);
                    }
                }
            }
            HeaterState::ConfirmHeaterOn => {
                if let Some(v) = d.observed.source(t.confirm_source) {
                    if v > d.starting_temp + t.confirm_on_delta {
                        events.push(HeaterEvent::HeaterTempRise);
                    }
                }
            }
            HeaterState::On => {
                if t.trigger_source == TempSource::Battery {
                    if let Some(v) = d.observed.battery_temp {
                        if v > d.observed.high {
                            events.push(HeaterEvent::HiBatteryTemp);
                        }
                    }
                }
                if let Some(limit) = t.heater_temp_limit {
                    if let Some(v) = d.observed.heater_temp {
                        if v > limit {
                            events.push(HeaterEvent::HiHeaterTemp);
                        }
                    }
                }
            }
            HeaterState::ConfirmHeaterOff => {
                if let Some(v) = d.observed.source(t.confirm_source) {
                    if v < d.starting_temp + t.confirm_off_delta {
                        events.push(HeaterEvent::HeaterTempDrop);
                    }
                }
            }
            _ => {}
        }
        events
    };
    for event in events {
        core.deliver(event);
    }
}
