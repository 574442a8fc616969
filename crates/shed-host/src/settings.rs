//! Host Configuration Loader
//!
//! Parses the INI-style host configuration into strongly-typed settings:
//! the heater-control tuning tree plus the host's own concerns (GPIO pin
//! numbers, simulation parameters). Every key is optional and falls back to
//! its documented default; range checking is the control library's job and
//! happens right after loading.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use configparser::ini::Ini;
use heater_control::config::HeaterControlConfig;
use heater_control::sensor::LightMode;

/// The [gpio] section: BCM line numbers on the shed computer.
#[derive(Debug, Clone)]
pub struct GpioSettings {
    pub ssr_pin: u64,
    pub led_pin: u64,
    pub sense_pin: u64,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            ssr_pin: 17,
            led_pin: 27,
            sense_pin: 22,
        }
    }
}

/// The [sim] section: parameters for `run --sim`.
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub outside_temp: f64,
    pub start_temp: f64,
    pub step_ms: u64,
    pub light_mode: LightMode,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            outside_temp: -10.0,
            start_temp: 2.0,
            step_ms: 1_000,
            light_mode: LightMode::Dark,
        }
    }
}

/// Everything the host reads from its configuration file.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub control: HeaterControlConfig,
    pub gpio: GpioSettings,
    pub sim: SimSettings,
}

/// Loads and parses the configuration file from the given path.
pub fn load(path: &Path) -> Result<HostSettings> {
    let mut ini = Ini::new();
    ini.load(path)
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("failed to load configuration file: {path:?}"))?;

    let mut control = HeaterControlConfig::default();

    let sup = &mut control.supervisor;
    sup.tick_time_ms = uint_key(&ini, "supervisor", "tick_time", sup.tick_time_ms)?;
    sup.dormant_low_temp = float_key(&ini, "supervisor", "dormant_low_temp", sup.dormant_low_temp)?;
    sup.dormant_high_temp = float_key(&ini, "supervisor", "dormant_high_temp", sup.dormant_high_temp)?;
    sup.production_low_temp = float_key(&ini, "supervisor", "production_low_temp", sup.production_low_temp)?;
    sup.production_high_temp = float_key(&ini, "supervisor", "production_high_temp", sup.production_high_temp)?;

    let n = &mut control.normal;
    n.confirm_on_delta = float_key(&ini, "normal", "confirm_on_delta", n.confirm_on_delta)?;
    n.confirm_off_delta = float_key(&ini, "normal", "confirm_off_delta", n.confirm_off_delta)?;
    n.confirm_on_time_ms = uint_key(&ini, "normal", "confirm_on_time", n.confirm_on_time_ms)?;
    n.confirm_off_time_ms = uint_key(&ini, "normal", "confirm_off_time", n.confirm_off_time_ms)?;
    n.initial_cooldown_period_ms = uint_key(&ini, "normal", "initial_cooldown_period", n.initial_cooldown_period_ms)?;
    n.heater_temp_limit = float_key(&ini, "normal", "heater_temp_limit", n.heater_temp_limit)?;
    n.cooling_time_ms = uint_key(&ini, "normal", "cooling_time", n.cooling_time_ms)?;

    let b = &mut control.battery_only;
    b.confirm_on_delta = float_key(&ini, "battery_only", "confirm_on_delta", b.confirm_on_delta)?;
    b.confirm_off_delta = float_key(&ini, "battery_only", "confirm_off_delta", b.confirm_off_delta)?;
    b.confirm_on_time_ms = uint_key(&ini, "battery_only", "confirm_on_time", b.confirm_on_time_ms)?;
    b.confirm_off_time_ms = uint_key(&ini, "battery_only", "confirm_off_time", b.confirm_off_time_ms)?;
    b.initial_cooldown_period_ms = uint_key(&ini, "battery_only", "initial_cooldown_period", b.initial_cooldown_period_ms)?;
    b.cooling_time_ms = uint_key(&ini, "battery_only", "cooling_time", b.cooling_time_ms)?;

    let h = &mut control.heater_only;
    h.confirm_on_delta = float_key(&ini, "heater_only", "confirm_on_delta", h.confirm_on_delta)?;
    h.confirm_off_delta = float_key(&ini, "heater_only", "confirm_off_delta", h.confirm_off_delta)?;
    h.confirm_on_time_ms = uint_key(&ini, "heater_only", "confirm_on_time", h.confirm_on_time_ms)?;
    h.confirm_off_time_ms = uint_key(&ini, "heater_only", "confirm_off_time", h.confirm_off_time_ms)?;
    h.initial_cooldown_period_ms = uint_key(&ini, "heater_only", "initial_cooldown_period", h.initial_cooldown_period_ms)?;
    h.heater_temp_limit = float_key(&ini, "heater_only", "heater_temp_limit", h.heater_temp_limit)?;
    h.cooling_time_ms = uint_key(&ini, "heater_only", "cooling_time", h.cooling_time_ms)?;
    h.degrees_per_second = float_key(&ini, "heater_only", "degrees_per_second", h.degrees_per_second)?;

    let nt = &mut control.no_temps;
    nt.k = float_key(&ini, "no_temps", "k", nt.k)?;
    nt.degrees_per_second = float_key(&ini, "no_temps", "degrees_per_second", nt.degrees_per_second)?;
    nt.safety_tweak = float_key(&ini, "no_temps", "safety_tweak", nt.safety_tweak)?;

    let mut gpio = GpioSettings::default();
    gpio.ssr_pin = uint_key(&ini, "gpio", "ssr_pin", gpio.ssr_pin)?;
    gpio.led_pin = uint_key(&ini, "gpio", "led_pin", gpio.led_pin)?;
    gpio.sense_pin = uint_key(&ini, "gpio", "sense_pin", gpio.sense_pin)?;

    let mut sim = SimSettings::default();
    sim.outside_temp = float_key(&ini, "sim", "outside_temp", sim.outside_temp)?;
    sim.start_temp = float_key(&ini, "sim", "start_temp", sim.start_temp)?;
    sim.step_ms = uint_key(&ini, "sim", "step", sim.step_ms)?;
    sim.light_mode = light_key(&ini, "sim", "light_mode", sim.light_mode)?;

    Ok(HostSettings { control, gpio, sim })
}

fn float_key(ini: &Ini, section: &str, key: &str, default: f64) -> Result<f64> {
    match ini.getfloat(section, key) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(default),
        Err(e) => Err(anyhow!("[{section}] {key}: {e}")),
    }
}

fn uint_key(ini: &Ini, section: &str, key: &str, default: u64) -> Result<u64> {
    match ini.getuint(section, key) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(default),
        Err(e) => Err(anyhow!("[{section}] {key}: {e}")),
    }
}

fn light_key(ini: &Ini, section: &str, key: &str, default: LightMode) -> Result<LightMode> {
    match ini.get(section, key).as_deref() {
        None => Ok(default),
        Some("light") => Ok(LightMode::Light),
        Some("dark") => Ok(LightMode::Dark),
        Some(other) => bail!("[{section}] {key}: expected 'light' or 'dark', got '{other}'"),
    }
}
