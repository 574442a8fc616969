//! # Heater Control
//!
//! Keeps a bank of solar-storage batteries inside a safe temperature
//! envelope in an outdoor shed, by driving an electric heater through a
//! solid-state relay. Frozen or cooked batteries are dead batteries, the
//! heater's thermal cutout latches off for minutes if it is restarted hot,
//! and any of the thermocouples can fail silently, so the control problem
//! is mostly about distrust.
//!
//! ## Structure
//!
//! - [`sensor`]: possibly-absent, timestamped views of the temperature and
//!   light-mode inputs.
//! - [`hw`]: the digital I/O seams, the heater plant (SSR + LED) and the
//!   independent sense relay.
//! - [`hap`]: diagnostic events and the bus they are posted on.
//! - [`config`]: tuning records with startup validation.
//! - [`controller`]: the four variants (Normal, BatteryOnly, HeaterOnly,
//!   NoTemps), one per combination of surviving thermocouples.
//! - [`supervisor`]: selects a variant each tick and drives it.
//! - [`thermo`]: open-loop heating/cooling time math.
//!
//! Control is bang-bang with hysteresis, never PID: the hardware is a
//! resistive heater behind a relay, and the windows are degrees wide.

pub mod config;
pub mod context;
pub mod controller;
pub mod hap;
pub mod hw;
pub mod sensor;
pub mod services;
pub mod supervisor;
pub mod thermo;

pub use config::{ConfigErrors, HeaterControlConfig};
pub use context::ControllerContext;
pub use controller::{HeaterController, Variant};
pub use hap::{Hap, HapBus, Severity};
pub use hw::{DigitalInput, DigitalOutput, HeaterPlant, Level, MemoryPin, SenseRelay};
pub use sensor::{Info, LightMode, Reading, SensorHub, SensorSnapshot, SharedInfo};
pub use services::Services;
pub use supervisor::{HeaterSupervisor, SupervisorStatus};
