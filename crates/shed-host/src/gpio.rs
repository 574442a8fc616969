//! Sysfs GPIO backend for the real shed computer.
//!
//! Exports the three lines at startup and wraps them in the control
//! library's I/O traits. GPIO writes are treated as prompt I/O; a failed
//! write is logged rather than propagated, because by the time it can fail
//! there is nobody better placed to handle it than the operator reading the
//! log.

use std::sync::Arc;

use anyhow::{Context, Result};
use heater_control::hap::HapBus;
use heater_control::hw::{DigitalInput, DigitalOutput, HeaterPlant, Level, SenseRelay};
use sysfs_gpio::{Direction, Pin};
use tracing::error;

use crate::settings::GpioSettings;

struct SysfsPin {
    pin: Pin,
    number: u64,
}

impl SysfsPin {
    /// Exports `number` as an output, initialized high (deasserted).
    fn output(number: u64) -> Result<Self> {
        let pin = Pin::new(number);
        pin.export().with_context(|| format!("exporting GPIO {number}"))?;
        pin.set_direction(Direction::High)
            .with_context(|| format!("configuring GPIO {number} as output"))?;
        Ok(Self { pin, number })
    }

    fn input(number: u64) -> Result<Self> {
        let pin = Pin::new(number);
        pin.export().with_context(|| format!("exporting GPIO {number}"))?;
        pin.set_direction(Direction::In)
            .with_context(|| format!("configuring GPIO {number} as input"))?;
        Ok(Self { pin, number })
    }

    fn level(&self) -> Level {
        match self.pin.get_value() {
            Ok(0) => Level::Low,
            Ok(_) => Level::High,
            Err(e) => {
                error!(pin = self.number, %e, "GPIO read failed");
                // Deasserted is the safe answer for both the sense input
                // and output read-back.
                Level::High
            }
        }
    }
}

impl DigitalOutput for SysfsPin {
    fn write(&self, level: Level) {
        let value = match level {
            Level::Low => 0,
            Level::High => 1,
        };
        if let Err(e) = self.pin.set_value(value) {
            error!(pin = self.number, %e, "GPIO write failed");
        }
    }

    fn read(&self) -> Level {
        self.level()
    }
}

impl DigitalInput for SysfsPin {
    fn read(&self) -> Level {
        self.level()
    }
}

/// Opens the configured lines and assembles the plant and sense relay.
pub fn open(cfg: &GpioSettings, haps: HapBus) -> Result<(HeaterPlant, SenseRelay)> {
    let ssr = Arc::new(SysfsPin::output(cfg.ssr_pin)?);
    let led = Arc::new(SysfsPin::output(cfg.led_pin)?);
    let sense = Arc::new(SysfsPin::input(cfg.sense_pin)?);
    Ok((HeaterPlant::new(ssr, led, haps), SenseRelay::new(sense)))
}
