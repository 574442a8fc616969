//! Scenario tests for the four controller variants, driven directly (no
//! supervisor) under tokio's paused clock.
//!
//! Each test stands up one controller against in-memory pins and a private
//! hap subscription, then walks it through ticks and virtual time.

use std::sync::Arc;
use std::time::Duration;

use fsm::Scheduler;
use heater_control::config::{BatteryOnlyConfig, HeaterOnlyConfig, NoTempsConfig, NormalConfig};
use heater_control::context::ControllerContext;
use heater_control::controller::{
    BatteryOnlyController, HeaterController, HeaterOnlyController, NoTempsController,
    NormalController,
};
use heater_control::hap::{Hap, HapBus};
use heater_control::hw::{HeaterPlant, Level, MemoryPin, SenseRelay};
use heater_control::services::Services;
use tokio::sync::broadcast;

struct Rig {
    ssr: Arc<MemoryPin>,
    led: Arc<MemoryPin>,
    sense: Arc<MemoryPin>,
    haps: broadcast::Receiver<Hap>,
    services: Services,
}

fn rig() -> Rig {
    let haps = HapBus::new();
    let rx = haps.subscribe();
    Rig {
        ssr: Arc::new(MemoryPin::new(Level::High)),
        led: Arc::new(MemoryPin::new(Level::High)),
        sense: Arc::new(MemoryPin::new(Level::High)),
        haps: rx,
        services: Services {
            scheduler: Scheduler::new(),
            haps,
        },
    }
}

impl Rig {
    fn plant(&self) -> HeaterPlant {
        HeaterPlant::new(self.ssr.clone(), self.led.clone(), self.services.haps.clone())
    }

    fn sense_relay(&self) -> SenseRelay {
        SenseRelay::new(self.sense.clone())
    }

    /// Heater output asserted, LED tracking it.
    fn heater_is_on(&self) -> bool {
        self.ssr.get() == Level::Low && self.led.get() == Level::Low
    }

    fn drain_haps(&mut self) -> Vec<Hap> {
        let mut haps = Vec::new();
        loop {
            match self.haps.try_recv() {
                Ok(hap) => haps.push(hap),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        haps
    }
}

fn ctx(
    battery: Option<f64>,
    heater: Option<f64>,
    ambient: Option<f64>,
    outside: Option<f64>,
    low: f64,
    high: f64,
) -> ControllerContext {
    ControllerContext {
        battery_temp: battery,
        heater_temp: heater,
        ambient_temp: ambient,
        outside_temp: outside,
        low,
        high,
    }
}

async fn settle() {
    for _ in 0..30 {
        tokio::task::yield_now().await;
    }
}

async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

// --- Normal ------------------------------------------------------------

/// Production window, both sensors good.
fn normal_ctx(battery: f64, heater: f64) -> ControllerContext {
    ctx(Some(battery), Some(heater), Some(20.0), None, 25.0, 30.0)
}

#[tokio::test(start_paused = true)]
async fn normal_completes_a_clean_heating_cycle() {
    let mut rig = rig();
    let ctrl = NormalController::new(
        &NormalConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(!rig.heater_is_on());

    // Cold battery: the cycle begins and the heater comes on at once.
    ctrl.tick(&normal_ctx(20.0, 20.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    assert!(rig.heater_is_on());

    // Power actually flows; the sense relay pulls in.
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_ON");

    // Not enough rise yet (needs > 20 + 10).
    ctrl.tick(&normal_ctx(20.0, 29.9));
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_ON");

    ctrl.tick(&normal_ctx(20.0, 32.0));
    assert_eq!(ctrl.state_label(), "ON");
    let haps = rig.drain_haps();
    assert!(haps.contains(&Hap::HeaterOn));
    assert!(haps.contains(&Hap::HeaterWorking));
    assert!(haps.contains(&Hap::SsrWorking));
    assert!(haps.contains(&Hap::SenseRelayWorking));

    // Exactly the window ceiling is not yet "too warm".
    ctrl.tick(&normal_ctx(30.0, 32.0));
    assert_eq!(ctrl.state_label(), "ON");

    ctrl.tick(&normal_ctx(30.1, 32.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
    assert!(!rig.heater_is_on());

    rig.sense.set(Level::High);
    advance(Duration::from_millis(100)).await;
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_OFF");

    // Needs to fall strictly below 32 − 10.
    ctrl.tick(&normal_ctx(29.0, 22.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_OFF");

    ctrl.tick(&normal_ctx(29.0, 20.0));
    assert_eq!(ctrl.state_label(), "COOLING");

    advance(Duration::from_secs(180)).await;
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(!rig.heater_is_on());
    assert!(rig.drain_haps().contains(&Hap::HeaterOff));
}

#[tokio::test(start_paused = true)]
async fn normal_low_edge_is_strict() {
    let rig = rig();
    let ctrl = NormalController::new(
        &NormalConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    // Exactly the floor is not a trigger.
    ctrl.tick(&normal_ctx(25.0, 20.0));
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(!rig.heater_is_on());

    ctrl.tick(&normal_ctx(24.99, 20.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    assert!(rig.heater_is_on());
}

#[tokio::test(start_paused = true)]
async fn normal_retries_failed_starts_and_blames_the_ssr() {
    let mut rig = rig();
    let ctrl = NormalController::new(
        &NormalConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    // The SSR never switches: no sensed power, no temperature rise.
    ctrl.tick(&normal_ctx(20.0, 20.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");

    for attempt in 1..=5u32 {
        advance(Duration::from_millis(100)).await;
        assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_ON", "attempt {attempt}");

        advance(Duration::from_secs(30)).await;
        assert_eq!(ctrl.state_label(), "HEATER_COOLING", "attempt {attempt}");
        assert!(!rig.heater_is_on());

        let haps = rig.drain_haps();
        assert!(haps.contains(&Hap::HeaterNoStart), "attempt {attempt}");
        if attempt == 5 {
            assert!(haps.contains(&Hap::PossibleSsrFailure));
        } else {
            assert!(!haps.contains(&Hap::PossibleSsrFailure));
            // Cooldown grows with the retry count.
            advance(Duration::from_secs(60) * attempt).await;
            assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON", "attempt {attempt}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn normal_no_start_with_sensed_power_blames_the_heater() {
    let mut rig = rig();
    let ctrl = NormalController::new(
        &NormalConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    // Power is sensed every time, but the element never warms up: the
    // heater itself (or its thermal cutout) is the suspect.
    ctrl.tick(&normal_ctx(20.0, 20.0));
    rig.sense.set(Level::Low);
    for attempt in 1..=5u32 {
        advance(Duration::from_millis(100)).await;
        advance(Duration::from_secs(30)).await;
        rig.sense.set(Level::High); // power gone while cooling
        if attempt < 5 {
            advance(Duration::from_secs(60) * attempt).await;
            rig.sense.set(Level::Low); // and back when re-commanded
        }
    }
    let haps = rig.drain_haps();
    assert!(haps.contains(&Hap::PossibleHeaterFailure));
    assert!(!haps.contains(&Hap::PossibleSsrFailure));
}

#[tokio::test(start_paused = true)]
async fn normal_reset_from_on_is_idempotent() {
    let mut rig = rig();
    let ctrl = NormalController::new(
        &NormalConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    ctrl.tick(&normal_ctx(20.0, 20.0));
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    ctrl.tick(&normal_ctx(20.0, 32.0));
    assert_eq!(ctrl.state_label(), "ON");
    rig.drain_haps();

    let quiet = normal_ctx(26.0, 32.0);
    ctrl.reset(&quiet);
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(!rig.heater_is_on());
    assert_eq!(rig.drain_haps(), vec![Hap::HeaterOff]);

    // A second reset changes nothing.
    ctrl.reset(&quiet);
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(rig.drain_haps().is_empty());

    // And everything that was scheduled died with the reset.
    advance(Duration::from_secs(3_600)).await;
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(rig.drain_haps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn normal_stale_trigger_conditions_do_not_refire_mid_cycle() {
    let mut rig = rig();
    let ctrl = NormalController::new(
        &NormalConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    let cold = normal_ctx(20.0, 20.0);
    ctrl.tick(&cold);
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");

    // The battery is still cold on every following tick; nothing restarts
    // or doubles up.
    for _ in 0..20 {
        ctrl.tick(&cold);
    }
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    let on_count = rig
        .drain_haps()
        .iter()
        .filter(|h| **h == Hap::HeaterOn)
        .count();
    assert_eq!(on_count, 1);
}

#[tokio::test(start_paused = true)]
async fn normal_coincident_high_conditions_cause_one_transition() {
    let rig = rig();
    let ctrl = NormalController::new(
        &NormalConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    ctrl.tick(&normal_ctx(20.0, 20.0));
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    ctrl.tick(&normal_ctx(20.0, 32.0));
    assert_eq!(ctrl.state_label(), "ON");

    // Battery over the ceiling AND the element over its limit in the same
    // tick: high-battery is delivered first, high-heater finds the machine
    // already confirming the stop and is discarded.
    ctrl.tick(&normal_ctx(30.1, 90.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
    assert!(!rig.heater_is_on());
}

// --- BatteryOnly --------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn battery_only_confirms_through_the_battery() {
    let rig = rig();
    let ctrl = BatteryOnlyController::new(
        &BatteryOnlyConfig::default(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();
    let w = |battery: f64| ctx(Some(battery), None, None, Some(-10.0), 5.0, 10.0);

    ctrl.tick(&w(2.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_ON");

    // The battery moves slowly; +5 over the 2.0 baseline confirms.
    ctrl.tick(&w(6.9));
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_ON");
    ctrl.tick(&w(7.1));
    assert_eq!(ctrl.state_label(), "ON");

    ctrl.tick(&w(10.0));
    assert_eq!(ctrl.state_label(), "ON");
    ctrl.tick(&w(10.1));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
    assert!(!rig.heater_is_on());

    rig.sense.set(Level::High);
    advance(Duration::from_millis(100)).await;
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_OFF");

    // Needs to fall strictly below 10.1 − 5.
    ctrl.tick(&w(5.2));
    assert_eq!(ctrl.state_label(), "CONFIRM_HEATER_OFF");
    ctrl.tick(&w(5.0));
    assert_eq!(ctrl.state_label(), "COOLING");

    advance(Duration::from_secs(180)).await;
    assert_eq!(ctrl.state_label(), "OFF");
}

// --- HeaterOnly ---------------------------------------------------------

fn heater_only_cfg() -> HeaterOnlyConfig {
    HeaterOnlyConfig {
        degrees_per_second: 0.05,
        ..HeaterOnlyConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn heater_only_runs_a_computed_dwell() {
    let rig = rig();
    let ctrl = HeaterOnlyController::new(
        &heater_only_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();
    let w = |heater: f64| ctx(None, Some(heater), Some(-5.0), None, 5.0, 10.0);

    // A cold element while OFF approximates a cold shed.
    ctrl.tick(&w(2.0));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    ctrl.tick(&w(12.1));
    assert_eq!(ctrl.state_label(), "ON");

    // Dwell: (10 − (−5)) / 0.05 = 300 s from turn-on, 0.1 s of which has
    // already passed.
    advance(Duration::from_millis(299_800)).await;
    assert_eq!(ctrl.state_label(), "ON");
    advance(Duration::from_millis(300)).await;
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
    assert!(!rig.heater_is_on());
}

#[tokio::test(start_paused = true)]
async fn heater_only_with_warm_surroundings_stops_at_once() {
    let rig = rig();
    let ctrl = HeaterOnlyController::new(
        &heater_only_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();
    // Ambient above the window ceiling: the computed dwell is zero.
    let w = |heater: f64| ctx(None, Some(heater), Some(15.0), None, 5.0, 10.0);

    ctrl.tick(&w(2.0));
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    ctrl.tick(&w(12.1));
    settle().await;
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
}

#[tokio::test(start_paused = true)]
async fn heater_only_reports_a_missing_outside_reading() {
    let mut rig = rig();
    let ctrl = HeaterOnlyController::new(
        &heater_only_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();
    // No ambient, no weather: the dwell falls back to the pre-heating
    // baseline and the blind spot is reported.
    let w = |heater: f64| ctx(None, Some(heater), None, None, 5.0, 10.0);

    ctrl.tick(&w(2.0));
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    ctrl.tick(&w(12.1));
    assert_eq!(ctrl.state_label(), "ON");
    assert!(rig.drain_haps().contains(&Hap::NoTemperatureOutsideTheBox));

    // Baseline dwell: (10 − 2) / 0.05 = 160 s from turn-on.
    advance(Duration::from_millis(159_800)).await;
    assert_eq!(ctrl.state_label(), "ON");
    advance(Duration::from_millis(300)).await;
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
}

#[tokio::test(start_paused = true)]
async fn heater_only_overtemp_forces_the_shutdown_sequence() {
    let rig = rig();
    let ctrl = HeaterOnlyController::new(
        &heater_only_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();
    let w = |heater: f64| ctx(None, Some(heater), Some(-5.0), None, 5.0, 10.0);

    ctrl.tick(&w(2.0));
    rig.sense.set(Level::Low);
    advance(Duration::from_millis(100)).await;
    ctrl.tick(&w(12.1));
    assert_eq!(ctrl.state_label(), "ON");

    // Element past the 50 °C limit long before the dwell ends.
    ctrl.tick(&w(50.1));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
    assert!(!rig.heater_is_on());
}

// --- NoTemps ------------------------------------------------------------

fn no_temps_cfg() -> NoTempsConfig {
    NoTempsConfig {
        k: 0.001,
        degrees_per_second: 0.05,
        safety_tweak: 1.1,
    }
}

fn no_temps_ctx(outside: Option<f64>) -> ControllerContext {
    ctx(None, None, None, outside, 0.0, 5.0)
}

#[tokio::test(start_paused = true)]
async fn no_temps_cycles_fully_open_loop() {
    let mut rig = rig();
    let ctrl = NoTempsController::new(
        &no_temps_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    ctrl.tick(&no_temps_ctx(Some(-10.0)));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    assert!(rig.heater_is_on());
    rig.sense.set(Level::Low);

    advance(Duration::from_millis(100)).await;
    assert_eq!(ctrl.state_label(), "ON");
    let haps = rig.drain_haps();
    assert!(haps.contains(&Hap::SsrWorking));
    assert!(haps.contains(&Hap::SenseRelayWorking));

    // Heating leg: (5 − 0) / 0.05 × 1.1 = 110 s.
    advance(Duration::from_millis(109_800)).await;
    assert_eq!(ctrl.state_label(), "ON");
    advance(Duration::from_millis(300)).await;
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_OFF");
    assert!(!rig.heater_is_on());

    rig.sense.set(Level::High);
    advance(Duration::from_millis(100)).await;
    assert_eq!(ctrl.state_label(), "WAIT_FOR_TRIGGER");

    // Cooling leg: 1000 · ln(15/10) ≈ 405.5 s after the heating leg.
    advance(Duration::from_secs(400)).await;
    assert_eq!(ctrl.state_label(), "WAIT_FOR_TRIGGER");
    advance(Duration::from_secs(10)).await;
    assert_eq!(ctrl.state_label(), "OFF");
}

#[tokio::test(start_paused = true)]
async fn no_temps_without_outside_data_holds_the_heater_off() {
    let mut rig = rig();
    let ctrl = NoTempsController::new(
        &no_temps_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    for _ in 0..3 {
        ctrl.tick(&no_temps_ctx(None));
    }
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(!rig.heater_is_on());
    let blind = rig
        .drain_haps()
        .iter()
        .filter(|h| **h == Hap::NoTemperatureOutsideTheBox)
        .count();
    assert_eq!(blind, 3);

    // Losing the reading mid-cycle kills power without moving the machine.
    ctrl.tick(&no_temps_ctx(Some(-10.0)));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    assert!(rig.heater_is_on());

    ctrl.tick(&no_temps_ctx(None));
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");
    assert!(!rig.heater_is_on());
    assert!(rig
        .drain_haps()
        .contains(&Hap::NoTemperatureOutsideTheBox));
}

#[tokio::test(start_paused = true)]
async fn no_temps_unsensed_power_is_unattributable() {
    let mut rig = rig();
    let ctrl = NoTempsController::new(
        &no_temps_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    ctrl.tick(&no_temps_ctx(Some(-10.0)));
    // Sense relay never pulls in.
    advance(Duration::from_millis(100)).await;
    assert_eq!(ctrl.state_label(), "ON");
    let haps = rig.drain_haps();
    assert!(haps.contains(&Hap::PossibleSsrOrSenseRelayFailure));
    assert!(!haps.contains(&Hap::SenseRelayWorking));
}

#[tokio::test(start_paused = true)]
async fn no_temps_reset_cancels_the_whole_cycle() {
    let rig = rig();
    let ctrl = NoTempsController::new(
        &no_temps_cfg(),
        rig.plant(),
        rig.sense_relay(),
        rig.services.clone(),
    )
    .unwrap();

    let cold = no_temps_ctx(Some(-10.0));
    ctrl.tick(&cold);
    assert_eq!(ctrl.state_label(), "CONFIRM_SSR_ON");

    ctrl.reset(&cold);
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(!rig.heater_is_on());

    // Neither the heating-leg nor the trigger timer survives.
    advance(Duration::from_secs(1_000)).await;
    assert_eq!(ctrl.state_label(), "OFF");
    assert!(!rig.heater_is_on());
}
