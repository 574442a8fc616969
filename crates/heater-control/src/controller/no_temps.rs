//! The NoTemps variant: no thermocouple inside the box at all.
//!
//! The only usable readings are the shed ambient sensor and the weather
//! station, so the whole cycle is open-loop: heat for a computed duration,
//! then wait out a computed Newton's-law cool-down before re-arming. The
//! state graph collapses accordingly; there is nothing to confirm a
//! temperature change against, only the sense relay's word on whether
//! power flowed.
//!
//! Without even an outside reading the controller refuses to act: the
//! heater is forced off and the blind spot is reported every tick until a
//! reading returns.

use std::sync::Arc;
use std::time::Duration;

use fsm::{DefinitionErrors, Dispatch, FsmBuilder, Scheduler, TimerHandle};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::common::{enter_off, finish_machine, Core, Domain, Tuning, SENSE_SETTLE};
use super::HeaterController;
use crate::config::NoTempsConfig;
use crate::context::ControllerContext;
use crate::hap::Hap;
use crate::hw::{HeaterPlant, SenseRelay};
use crate::services::Services;
use crate::thermo::{cooling_seconds, heating_seconds};

/// The collapsed open-loop graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoTempsState {
    Off,
    ConfirmSsrOn,
    On,
    ConfirmSsrOff,
    WaitForTrigger,
}

impl NoTempsState {
    pub fn label(self) -> &'static str {
        match self {
            NoTempsState::Off => "OFF",
            NoTempsState::ConfirmSsrOn => "CONFIRM_SSR_ON",
            NoTempsState::On => "ON",
            NoTempsState::ConfirmSsrOff => "CONFIRM_SSR_OFF",
            NoTempsState::WaitForTrigger => "WAIT_FOR_TRIGGER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoTempsEvent {
    LowAmbient,
    OnSensed,
    OffSensed,
    TurnOff,
    Trigger,
    Reset,
}

pub struct NoTempsController {
    core: Arc<Mutex<Core<NoTempsState, NoTempsEvent>>>,
}

impl NoTempsController {
    pub fn new(
        cfg: &NoTempsConfig,
        plant: HeaterPlant,
        sense: SenseRelay,
        services: Services,
    ) -> Result<Self, DefinitionErrors> {
        use NoTempsEvent as E;
        use NoTempsState as S;

        let mut builder = FsmBuilder::new("heater-no-temps", S::Off)
            .seed(E::Reset)
            .on_entry(S::Off, enter_off)
            .on_entry(S::ConfirmSsrOn, enter_confirm_ssr_on)
            .on_exit(S::On, exit_on)
            .on_entry(S::ConfirmSsrOff, enter_confirm_ssr_off)
            .transition(S::Off, E::LowAmbient, S::ConfirmSsrOn)
            .transition_with(S::ConfirmSsrOn, E::OnSensed, S::On, act_on_sensed)
            .transition(S::On, E::TurnOff, S::ConfirmSsrOff)
            .transition_with(S::ConfirmSsrOff, E::OffSensed, S::WaitForTrigger, act_off_sensed)
            .transition(S::WaitForTrigger, E::Trigger, S::Off);
        for state in [S::ConfirmSsrOn, S::On, S::ConfirmSsrOff, S::WaitForTrigger] {
            builder = builder.transition(state, E::Reset, S::Off);
        }

        let scheduler = services.scheduler.clone();
        let domain = Domain::new(Tuning::no_temps(cfg), plant, sense, services);
        let core = finish_machine(builder, domain, &scheduler)?;
        Ok(Self { core })
    }

    /// Arms the two long timers of one open-loop cycle: end of heating, and
    /// the re-trigger once the box has had time to cool back down.
    ///
    /// Both outlive several states, so they are controller-held rather than
    /// state-bound; OFF entry drops them, and a stale delivery lands in a
    /// state with no matching transition and is discarded.
    fn arm_cycle(core_arc: &Arc<Mutex<Core<NoTempsState, NoTempsEvent>>>, core: &mut Core<NoTempsState, NoTempsEvent>, t_out: f64) {
        let (on_s, off_s, scheduler) = {
            let d = &core.domain;
            let (Some(dps), Some(k)) = (d.tuning.degrees_per_second, d.tuning.k) else {
                error!("open-loop coefficients missing; cycle not armed");
                return;
            };
            let on_s =
                heating_seconds(d.observed.high - d.observed.low, dps) * d.tuning.safety_tweak;
            let off_s = cooling_seconds(d.observed.low, d.observed.high, t_out, k);
            (on_s, off_s, d.services.scheduler.clone())
        };
        debug!(on_s, off_s, t_out, "open-loop cycle armed");
        let turn_off = delayed_event(
            core_arc,
            &scheduler,
            Duration::from_secs_f64(on_s),
            NoTempsEvent::TurnOff,
        );
        let trigger = delayed_event(
            core_arc,
            &scheduler,
            Duration::from_secs_f64(on_s + off_s),
            NoTempsEvent::Trigger,
        );
        core.domain.cycle_timers.push(turn_off);
        core.domain.cycle_timers.push(trigger);
    }
}

fn delayed_event(
    core: &Arc<Mutex<Core<NoTempsState, NoTempsEvent>>>,
    scheduler: &Scheduler,
    delay: Duration,
    event: NoTempsEvent,
) -> TimerHandle {
    let weak = Arc::downgrade(core);
    scheduler.schedule_once(delay, move || {
        if let Some(core) = weak.upgrade() {
            core.lock().deliver(event);
        }
    })
}

fn enter_confirm_ssr_on(d: &mut Domain, dsp: &mut Dispatch<NoTempsEvent>) {
    d.heater_on_at = Some(Instant::now());
    d.plant.heater_on();
    dsp.set_timeout(NoTempsEvent::OnSensed, SENSE_SETTLE);
}

/// With no temperature feedback the sense relay is the only witness; if it
/// saw no power there is no way to tell the SSR and the relay apart.
fn act_on_sensed(d: &mut Domain, _dsp: &mut Dispatch<NoTempsEvent>) {
    d.sense_latched = d.sense.is_power_sensed();
    if d.sense_latched {
        d.services.haps.post(Hap::SsrWorking);
        d.services.haps.post(Hap::SenseRelayWorking);
    } else {
        warn!("no power sensed after turn-on and no temperature feedback to arbitrate");
        d.services.haps.post(Hap::PossibleSsrOrSenseRelayFailure);
    }
}

fn exit_on(d: &mut Domain, _dsp: &mut Dispatch<NoTempsEvent>) {
    d.plant.heater_off();
}

fn enter_confirm_ssr_off(_d: &mut Domain, dsp: &mut Dispatch<NoTempsEvent>) {
    dsp.set_timeout(NoTempsEvent::OffSensed, SENSE_SETTLE);
}

fn act_off_sensed(d: &mut Domain, _dsp: &mut Dispatch<NoTempsEvent>) {
    if d.sense.is_power_sensed() {
        warn!("power still sensed after turn-off; SSR may be stuck closed");
        d.services.haps.post(Hap::PossibleSsrFailure);
    } else {
        d.services.haps.post(Hap::SsrWorking);
    }
}

impl HeaterController for NoTempsController {
    fn tick(&self, ctx: &ControllerContext) {
        let mut core = self.core.lock();
        core.domain.observed.update(ctx);

        let Some(t_out) = core.domain.observed.outside_the_box() else {
            // Flying completely blind. Hold the heater off and say so; the
            // machine is deliberately left where it is.
            core.domain.plant.heater_off();
            core.domain.services.haps.post(Hap::NoTemperatureOutsideTheBox);
            return;
        };

        if core.fsm.state() == NoTempsState::Off && t_out < core.domain.observed.low {
            core.deliver(NoTempsEvent::LowAmbient);
            if core.fsm.state() == NoTempsState::ConfirmSsrOn {
                Self::arm_cycle(&self.core, &mut core, t_out);
            }
        }
    }

    fn reset(&self, ctx: &ControllerContext) {
        let mut core = self.core.lock();
        core.domain.observed.update(ctx);
        core.deliver(NoTempsEvent::Reset);
    }

    fn is_off(&self) -> bool {
        self.core.lock().fsm.state() == NoTempsState::Off
    }

    fn state_label(&self) -> &'static str {
        self.core.lock().fsm.state().label()
    }
}
