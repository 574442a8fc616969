//! Wiring between the shed model and the control subsystem.
//!
//! `SimShed` owns the fake hardware (in-memory pins) and publishes the
//! model's temperatures into a [`SensorHub`] at a fixed rate, exactly the
//! way the real acquisition tasks would. Individual sensors can be failed
//! on demand to push the supervisor through its degraded variants.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fsm::{Scheduler, TimerHandle};
use heater_control::hw::{Level, MemoryPin};
use heater_control::sensor::{LightMode, SensorHub};
use parking_lot::Mutex;

use crate::model::ShedModel;

pub struct SimShed {
    model: Arc<Mutex<ShedModel>>,
    hub: SensorHub,
    ssr: Arc<MemoryPin>,
    led: Arc<MemoryPin>,
    battery_sensor_ok: Arc<AtomicBool>,
    heater_sensor_ok: Arc<AtomicBool>,
}

impl SimShed {
    pub fn new(model: ShedModel, hub: SensorHub) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            hub,
            ssr: Arc::new(MemoryPin::new(Level::High)),
            led: Arc::new(MemoryPin::new(Level::High)),
            battery_sensor_ok: Arc::new(AtomicBool::new(true)),
            heater_sensor_ok: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn ssr_pin(&self) -> Arc<MemoryPin> {
        self.ssr.clone()
    }

    pub fn led_pin(&self) -> Arc<MemoryPin> {
        self.led.clone()
    }

    /// The sense relay is energized straight off the heater power line, so
    /// in the simulation its input is simply the SSR output.
    pub fn sense_pin(&self) -> Arc<MemoryPin> {
        self.ssr.clone()
    }

    pub fn model(&self) -> Arc<Mutex<ShedModel>> {
        self.model.clone()
    }

    /// Fails or restores the battery thermocouple.
    pub fn set_battery_sensor(&self, ok: bool) {
        self.battery_sensor_ok.store(ok, Ordering::SeqCst);
    }

    /// Fails or restores the heater-output thermocouple.
    pub fn set_heater_sensor(&self, ok: bool) {
        self.heater_sensor_ok.store(ok, Ordering::SeqCst);
    }

    /// Steps the model and republishes every reading at a fixed rate.
    /// Publishes once immediately so the first supervisor tick already sees
    /// data.
    #[must_use]
    pub fn spawn(&self, scheduler: &Scheduler, step: Duration, light: LightMode) -> TimerHandle {
        let model = self.model.clone();
        let hub = self.hub.clone();
        let ssr = self.ssr.clone();
        let battery_ok = self.battery_sensor_ok.clone();
        let heater_ok = self.heater_sensor_ok.clone();
        let dt = step.as_secs_f64();

        publish(&model.lock(), &hub, &battery_ok, &heater_ok, light);

        scheduler.schedule_fixed_rate(step, step, move || {
            let heater_on = ssr.get() == Level::Low;
            let mut m = model.lock();
            m.step(dt, heater_on);
            publish(&m, &hub, &battery_ok, &heater_ok, light);
        })
    }
}

fn publish(
    model: &ShedModel,
    hub: &SensorHub,
    battery_ok: &AtomicBool,
    heater_ok: &AtomicBool,
    light: LightMode,
) {
    let jitter = || {
        if model.params.noise > 0.0 {
            (rand::random::<f64>() - 0.5) * model.params.noise
        } else {
            0.0
        }
    };

    if battery_ok.load(Ordering::SeqCst) {
        hub.battery_temp.publish(model.battery + jitter());
    } else {
        hub.battery_temp.clear();
    }
    if heater_ok.load(Ordering::SeqCst) {
        hub.heater_temp.publish(model.element + jitter());
    } else {
        hub.heater_temp.clear();
    }
    hub.ambient_temp.publish(model.interior + jitter());
    hub.outside_temp.publish(model.params.outside_temp);
    hub.light_mode.publish(light);
}
