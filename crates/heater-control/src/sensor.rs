//! Read-only views of the latest sensor readings.
//!
//! Acquisition and noise filtering happen elsewhere; this module only defines
//! the handoff: a provider publishes into a [`SharedInfo`] slot, consumers
//! see a timestamped value or nothing at all. "Nothing" is a first-class
//! answer: a thermocouple that has failed silently simply stops being
//! available, and the control layer picks a strategy accordingly.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

/// One sensor sample tagged with its acquisition time.
#[derive(Debug, Clone, Copy)]
pub struct Reading<T> {
    pub value: T,
    pub at: Instant,
}

/// A possibly-absent, timestamped piece of information.
pub trait Info<T: Copy>: Send + Sync {
    fn reading(&self) -> Option<Reading<T>>;

    fn is_available(&self) -> bool {
        self.reading().is_some()
    }

    fn get(&self) -> Option<T> {
        self.reading().map(|r| r.value)
    }
}

/// The standard provider/consumer slot: a shared cell the provider
/// overwrites and the consumer snapshots.
#[derive(Debug)]
pub struct SharedInfo<T> {
    slot: Arc<RwLock<Option<Reading<T>>>>,
}

impl<T> Clone for SharedInfo<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Copy + Send + Sync> SharedInfo<T> {
    pub fn empty() -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
        }
    }

    /// Publishes a fresh reading, stamped now.
    pub fn publish(&self, value: T) {
        *self.slot.write() = Some(Reading {
            value,
            at: Instant::now(),
        });
    }

    /// Marks the source as unavailable (sensor fault, stale data evicted).
    pub fn clear(&self) {
        *self.slot.write() = None;
    }
}

impl<T: Copy + Send + Sync> Info<T> for SharedInfo<T> {
    fn reading(&self) -> Option<Reading<T>> {
        *self.slot.read()
    }
}

/// Whether solar production is currently possible. Debounced by the
/// provider; consumers treat it as a clean discrete signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LightMode {
    Light,
    Dark,
}

/// The full set of inputs the supervisor watches. Cloning shares the
/// underlying slots, so providers and consumers can hold the same hub.
#[derive(Debug, Clone)]
pub struct SensorHub {
    pub battery_temp: SharedInfo<f64>,
    pub heater_temp: SharedInfo<f64>,
    pub ambient_temp: SharedInfo<f64>,
    pub outside_temp: SharedInfo<f64>,
    pub light_mode: SharedInfo<LightMode>,
}

impl SensorHub {
    pub fn new() -> Self {
        Self {
            battery_temp: SharedInfo::empty(),
            heater_temp: SharedInfo::empty(),
            ambient_temp: SharedInfo::empty(),
            outside_temp: SharedInfo::empty(),
            light_mode: SharedInfo::empty(),
        }
    }

    /// One coherent snapshot of every input, taken at tick time.
    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            battery_temp: self.battery_temp.get(),
            heater_temp: self.heater_temp.get(),
            ambient_temp: self.ambient_temp.get(),
            outside_temp: self.outside_temp.get(),
            light_mode: self.light_mode.get(),
        }
    }
}

impl Default for SensorHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Value snapshot of the hub; plain data, no shared state.
#[derive(Debug, Clone, Copy)]
pub struct SensorSnapshot {
    pub battery_temp: Option<f64>,
    pub heater_temp: Option<f64>,
    pub ambient_temp: Option<f64>,
    pub outside_temp: Option<f64>,
    pub light_mode: Option<LightMode>,
}
