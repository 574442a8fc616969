//! Digital I/O seams and the heater power plant.
//!
//! The control logic only ever touches the two traits here; what sits behind
//! them (an in-memory pin for simulation and tests, a sysfs GPIO line on the
//! real shed computer) is the binary's business. Wiring polarity lives here
//! too: both outputs and the sense-relay input are asserted LOW.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::hap::{Hap, HapBus};

/// Logic level on a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

/// A writable digital line. Writes are prompt, sub-millisecond I/O.
pub trait DigitalOutput: Send + Sync {
    fn write(&self, level: Level);
    fn read(&self) -> Level;
}

/// A readable digital line.
pub trait DigitalInput: Send + Sync {
    fn read(&self) -> Level;
}

/// An in-memory pin, for simulation and tests.
#[derive(Debug)]
pub struct MemoryPin {
    low: AtomicBool,
}

impl MemoryPin {
    pub fn new(level: Level) -> Self {
        Self {
            low: AtomicBool::new(level.is_low()),
        }
    }

    pub fn set(&self, level: Level) {
        self.low.store(level.is_low(), Ordering::SeqCst);
    }

    pub fn get(&self) -> Level {
        if self.low.load(Ordering::SeqCst) {
            Level::Low
        } else {
            Level::High
        }
    }
}

impl Default for MemoryPin {
    /// Deasserted (high), the safe idle level for this wiring.
    fn default() -> Self {
        Self::new(Level::High)
    }
}

impl DigitalOutput for MemoryPin {
    fn write(&self, level: Level) {
        self.set(level);
    }

    fn read(&self) -> Level {
        self.get()
    }
}

impl DigitalInput for MemoryPin {
    fn read(&self) -> Level {
        self.get()
    }
}

/// The heater SSR output plus the heater-power LED, driven as one unit so
/// the LED always tracks the heater.
///
/// `heater_on`/`heater_off` are idempotent; the `HeaterOn`/`HeaterOff` haps
/// are posted only when the output actually changes.
#[derive(Clone)]
pub struct HeaterPlant {
    ssr: Arc<dyn DigitalOutput>,
    led: Arc<dyn DigitalOutput>,
    haps: HapBus,
    on: Arc<AtomicBool>,
}

impl HeaterPlant {
    /// Takes ownership of both outputs and drives them to the deasserted
    /// (off) level.
    pub fn new(ssr: Arc<dyn DigitalOutput>, led: Arc<dyn DigitalOutput>, haps: HapBus) -> Self {
        ssr.write(Level::High);
        led.write(Level::High);
        Self {
            ssr,
            led,
            haps,
            on: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn heater_on(&self) {
        if self.on.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ssr.write(Level::Low);
        self.led.write(Level::Low);
        debug!("heater output asserted");
        self.haps.post(Hap::HeaterOn);
    }

    pub fn heater_off(&self) {
        if !self.on.swap(false, Ordering::SeqCst) {
            return;
        }
        self.ssr.write(Level::High);
        self.led.write(Level::High);
        debug!("heater output deasserted");
        self.haps.post(Hap::HeaterOff);
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

/// The sense relay: a small mechanical relay energized from the heater's
/// power line. Its contact pulls the input low while power actually flows,
/// independently of what the SSR was told to do.
#[derive(Clone)]
pub struct SenseRelay {
    input: Arc<dyn DigitalInput>,
}

impl SenseRelay {
    pub fn new(input: Arc<dyn DigitalInput>) -> Self {
        Self { input }
    }

    pub fn is_power_sensed(&self) -> bool {
        self.input.read().is_low()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant() -> (Arc<MemoryPin>, Arc<MemoryPin>, HeaterPlant, HapBus) {
        let ssr = Arc::new(MemoryPin::default());
        let led = Arc::new(MemoryPin::default());
        let haps = HapBus::new();
        let plant = HeaterPlant::new(ssr.clone(), led.clone(), haps.clone());
        (ssr, led, plant, haps)
    }

    #[test]
    fn outputs_are_asserted_low_and_led_tracks_ssr() {
        let (ssr, led, plant, _haps) = plant();
        assert_eq!(ssr.get(), Level::High);
        assert_eq!(led.get(), Level::High);

        plant.heater_on();
        assert_eq!(ssr.get(), Level::Low);
        assert_eq!(led.get(), Level::Low);

        plant.heater_off();
        assert_eq!(ssr.get(), Level::High);
        assert_eq!(led.get(), Level::High);
    }

    #[tokio::test]
    async fn on_off_haps_post_on_edges_only() {
        let (_ssr, _led, plant, haps) = plant();
        let mut rx = haps.subscribe();

        plant.heater_on();
        plant.heater_on();
        plant.heater_off();
        plant.heater_off();

        assert_eq!(rx.recv().await.unwrap(), Hap::HeaterOn);
        assert_eq!(rx.recv().await.unwrap(), Hap::HeaterOff);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sense_relay_is_asserted_low() {
        let pin = Arc::new(MemoryPin::default());
        let sense = SenseRelay::new(pin.clone());
        assert!(!sense.is_power_sensed());
        pin.set(Level::Low);
        assert!(sense.is_power_sensed());
    }
}
