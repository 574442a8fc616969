//! Controller and supervisor tuning, with startup validation.
//!
//! Every knob has a documented unit and an allowed range. Validation walks
//! the whole record and collects every violation as a human-readable message
//! before failing, so a bad deployment config is fixed in one round trip
//! rather than one field at a time. A failed validation is fatal at startup,
//! before any hardware action.

use std::time::Duration;

/// Supervisor-level settings: tick rate and the two temperature windows.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Tick period in milliseconds. Range 1000..=15000.
    pub tick_time_ms: u64,
    /// Window floor while solar production is impossible (°C, -10..=25).
    pub dormant_low_temp: f64,
    /// Window ceiling while solar production is impossible (°C, -10..=25).
    pub dormant_high_temp: f64,
    /// Window floor while the sun is up (°C, 0..=40).
    pub production_low_temp: f64,
    /// Window ceiling while the sun is up (°C, 0..=40).
    pub production_high_temp: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_time_ms: 5_000,
            dormant_low_temp: 5.0,
            dormant_high_temp: 10.0,
            production_low_temp: 25.0,
            production_high_temp: 30.0,
        }
    }
}

/// Tuning for the Normal variant (both thermocouples trustworthy).
#[derive(Debug, Clone)]
pub struct NormalConfig {
    /// Heater-temp rise confirming a successful start (°C, 5..=30).
    pub confirm_on_delta: f64,
    /// Heater-temp drop confirming a successful stop (°C, -30..=-5).
    pub confirm_off_delta: f64,
    /// How long to wait for the rise (ms, 10_000..=600_000).
    pub confirm_on_time_ms: u64,
    /// How long to wait for the drop (ms, 10_000..=600_000).
    pub confirm_off_time_ms: u64,
    /// Base cooldown after a failed start; scales with the retry count
    /// (ms, 10_000..=600_000).
    pub initial_cooldown_period_ms: u64,
    /// Heater-output temperature that forces a shutdown (°C, 30..=100).
    pub heater_temp_limit: f64,
    /// Dwell after a normal stop before re-arming (ms, 60_000..=600_000).
    pub cooling_time_ms: u64,
}

impl Default for NormalConfig {
    fn default() -> Self {
        Self {
            confirm_on_delta: 10.0,
            confirm_off_delta: -10.0,
            confirm_on_time_ms: 30_000,
            confirm_off_time_ms: 30_000,
            initial_cooldown_period_ms: 60_000,
            heater_temp_limit: 80.0,
            cooling_time_ms: 180_000,
        }
    }
}

/// Tuning for the BatteryOnly variant. Confirmation works off the battery
/// thermocouple, which moves far more slowly than the heater output, hence
/// the smaller deltas and longer timeouts. There is no heater-temperature
/// limit; that sensor is the one that is gone.
#[derive(Debug, Clone)]
pub struct BatteryOnlyConfig {
    /// Battery-temp rise confirming a successful start (°C, 0.1..=30).
    pub confirm_on_delta: f64,
    /// Battery-temp drop confirming a successful stop (°C, -30..=-0.1).
    pub confirm_off_delta: f64,
    /// How long to wait for the rise (ms, 10_000..=600_000).
    pub confirm_on_time_ms: u64,
    /// How long to wait for the drop (ms, 10_000..=600_000).
    pub confirm_off_time_ms: u64,
    /// Base cooldown after a failed start (ms, 10_000..=600_000).
    pub initial_cooldown_period_ms: u64,
    /// Dwell after a normal stop before re-arming (ms, 60_000..=600_000).
    pub cooling_time_ms: u64,
}

impl Default for BatteryOnlyConfig {
    fn default() -> Self {
        Self {
            confirm_on_delta: 5.0,
            confirm_off_delta: -5.0,
            confirm_on_time_ms: 180_000,
            confirm_off_time_ms: 180_000,
            initial_cooldown_period_ms: 60_000,
            cooling_time_ms: 180_000,
        }
    }
}

/// Tuning for the HeaterOnly variant. The heater thermocouple stands in for
/// the battery sensor, and the ON dwell is computed open-loop from the
/// measured heating rate.
#[derive(Debug, Clone)]
pub struct HeaterOnlyConfig {
    /// Heater-temp rise confirming a successful start (°C, 5..=30).
    pub confirm_on_delta: f64,
    /// Heater-temp drop confirming a successful stop (°C, -30..=-5).
    pub confirm_off_delta: f64,
    /// How long to wait for the rise (ms, 10_000..=600_000).
    pub confirm_on_time_ms: u64,
    /// How long to wait for the drop (ms, 10_000..=600_000).
    pub confirm_off_time_ms: u64,
    /// Base cooldown after a failed start (ms, 10_000..=600_000).
    pub initial_cooldown_period_ms: u64,
    /// Heater-output temperature that forces a shutdown (°C, 30..=60).
    pub heater_temp_limit: f64,
    /// Dwell after a normal stop before re-arming (ms, 60_000..=600_000).
    pub cooling_time_ms: u64,
    /// Measured open-loop heating rate (°C/s, in (0, 1]). There is no
    /// sensible default (it must be measured at the deployment), so the
    /// default of zero deliberately fails validation.
    pub degrees_per_second: f64,
}

impl Default for HeaterOnlyConfig {
    fn default() -> Self {
        Self {
            confirm_on_delta: 10.0,
            confirm_off_delta: -10.0,
            confirm_on_time_ms: 30_000,
            confirm_off_time_ms: 30_000,
            initial_cooldown_period_ms: 60_000,
            heater_temp_limit: 50.0,
            cooling_time_ms: 180_000,
            degrees_per_second: 0.0,
        }
    }
}

/// Tuning for the NoTemps variant: fully open-loop cycling from the
/// outside/ambient temperature alone. Both coefficients are measured at the
/// deployment and have no defaults (zero fails validation).
#[derive(Debug, Clone)]
pub struct NoTempsConfig {
    /// Newton's-law thermal decay constant for the box (1/s, in (0, 1]).
    pub k: f64,
    /// Measured open-loop heating rate (°C/s, in (0, 1) exclusive).
    pub degrees_per_second: f64,
    /// Multiplier stretching the computed heating time (1..=1.25).
    pub safety_tweak: f64,
}

impl Default for NoTempsConfig {
    fn default() -> Self {
        Self {
            k: 0.0,
            degrees_per_second: 0.0,
            safety_tweak: 1.1,
        }
    }
}

/// The whole heater-control configuration tree.
#[derive(Debug, Clone, Default)]
pub struct HeaterControlConfig {
    pub supervisor: SupervisorConfig,
    pub normal: NormalConfig,
    pub battery_only: BatteryOnlyConfig,
    pub heater_only: HeaterOnlyConfig,
    pub no_temps: NoTempsConfig,
}

/// Every constraint the configuration tree violated.
#[derive(Debug, thiserror::Error)]
#[error("invalid heater-control configuration: {}", .problems.join("; "))]
pub struct ConfigErrors {
    pub problems: Vec<String>,
}

impl HeaterControlConfig {
    /// Checks every field range and the cross-field ordering constraints.
    pub fn validate(&self) -> Result<(), ConfigErrors> {
        let mut problems = Vec::new();

        self.supervisor.check(&mut problems);
        self.normal.check(&mut problems);
        self.battery_only.check(&mut problems);
        self.heater_only.check(&mut problems);
        self.no_temps.check(&mut problems);

        // The heater limit must sit above any window ceiling it guards.
        let ceiling = self
            .supervisor
            .production_high_temp
            .max(self.supervisor.dormant_high_temp);
        if self.normal.heater_temp_limit < ceiling {
            problems.push(format!(
                "normal.heater_temp_limit ({}) is below the highest window ceiling ({ceiling})",
                self.normal.heater_temp_limit
            ));
        }
        if self.heater_only.heater_temp_limit < ceiling {
            problems.push(format!(
                "heater_only.heater_temp_limit ({}) is below the highest window ceiling ({ceiling})",
                self.heater_only.heater_temp_limit
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors { problems })
        }
    }
}

impl SupervisorConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_time_ms)
    }

    fn check(&self, problems: &mut Vec<String>) {
        range_u64(problems, "supervisor.tick_time", self.tick_time_ms, 1_000, 15_000);
        range_f64(problems, "supervisor.dormant_low_temp", self.dormant_low_temp, -10.0, 25.0);
        range_f64(problems, "supervisor.dormant_high_temp", self.dormant_high_temp, -10.0, 25.0);
        range_f64(problems, "supervisor.production_low_temp", self.production_low_temp, 0.0, 40.0);
        range_f64(problems, "supervisor.production_high_temp", self.production_high_temp, 0.0, 40.0);

        if self.dormant_low_temp >= self.dormant_high_temp {
            problems.push("supervisor: dormant_low_temp must be below dormant_high_temp".into());
        }
        if self.dormant_low_temp >= self.production_low_temp {
            problems.push("supervisor: dormant_low_temp must be below production_low_temp".into());
        }
        if self.production_low_temp >= self.production_high_temp {
            problems.push("supervisor: production_low_temp must be below production_high_temp".into());
        }
    }
}

impl NormalConfig {
    fn check(&self, problems: &mut Vec<String>) {
        range_f64(problems, "normal.confirm_on_delta", self.confirm_on_delta, 5.0, 30.0);
        range_f64(problems, "normal.confirm_off_delta", self.confirm_off_delta, -30.0, -5.0);
        range_u64(problems, "normal.confirm_on_time", self.confirm_on_time_ms, 10_000, 600_000);
        range_u64(problems, "normal.confirm_off_time", self.confirm_off_time_ms, 10_000, 600_000);
        range_u64(problems, "normal.initial_cooldown_period", self.initial_cooldown_period_ms, 10_000, 600_000);
        range_f64(problems, "normal.heater_temp_limit", self.heater_temp_limit, 30.0, 100.0);
        range_u64(problems, "normal.cooling_time", self.cooling_time_ms, 60_000, 600_000);
    }
}

impl BatteryOnlyConfig {
    fn check(&self, problems: &mut Vec<String>) {
        range_f64(problems, "battery_only.confirm_on_delta", self.confirm_on_delta, 0.1, 30.0);
        range_f64(problems, "battery_only.confirm_off_delta", self.confirm_off_delta, -30.0, -0.1);
        range_u64(problems, "battery_only.confirm_on_time", self.confirm_on_time_ms, 10_000, 600_000);
        range_u64(problems, "battery_only.confirm_off_time", self.confirm_off_time_ms, 10_000, 600_000);
        range_u64(problems, "battery_only.initial_cooldown_period", self.initial_cooldown_period_ms, 10_000, 600_000);
        range_u64(problems, "battery_only.cooling_time", self.cooling_time_ms, 60_000, 600_000);
    }
}

impl HeaterOnlyConfig {
    fn check(&self, problems: &mut Vec<String>) {
        range_f64(problems, "heater_only.confirm_on_delta", self.confirm_on_delta, 5.0, 30.0);
        range_f64(problems, "heater_only.confirm_off_delta", self.confirm_off_delta, -30.0, -5.0);
        range_u64(problems, "heater_only.confirm_on_time", self.confirm_on_time_ms, 10_000, 600_000);
        range_u64(problems, "heater_only.confirm_off_time", self.confirm_off_time_ms, 10_000, 600_000);
        range_u64(problems, "heater_only.initial_cooldown_period", self.initial_cooldown_period_ms, 10_000, 600_000);
        range_f64(problems, "heater_only.heater_temp_limit", self.heater_temp_limit, 30.0, 60.0);
        range_u64(problems, "heater_only.cooling_time", self.cooling_time_ms, 60_000, 600_000);

        if !(self.degrees_per_second > 0.0 && self.degrees_per_second <= 1.0) {
            problems.push(format!(
                "heater_only.degrees_per_second ({}) must be measured and in (0, 1]",
                self.degrees_per_second
            ));
        }
    }
}

impl NoTempsConfig {
    fn check(&self, problems: &mut Vec<String>) {
        if !(self.k > 0.0 && self.k <= 1.0) {
            problems.push(format!("no_temps.k ({}) must be measured and in (0, 1]", self.k));
        }
        if !(self.degrees_per_second > 0.0 && self.degrees_per_second < 1.0) {
            problems.push(format!(
                "no_temps.degrees_per_second ({}) must be measured and in (0, 1)",
                self.degrees_per_second
            ));
        }
        range_f64(problems, "no_temps.safety_tweak", self.safety_tweak, 1.0, 1.25);
    }
}

fn range_f64(problems: &mut Vec<String>, name: &str, value: f64, lo: f64, hi: f64) {
    if !(lo..=hi).contains(&value) {
        problems.push(format!("{name} ({value}) is outside {lo}..={hi}"));
    }
}

fn range_u64(problems: &mut Vec<String>, name: &str, value: u64, lo: u64, hi: u64) {
    if !(lo..=hi).contains(&value) {
        problems.push(format!("{name} ({value}) is outside {lo}..={hi}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A config that passes validation: defaults plus the two measured
    /// coefficients that have none.
    fn measured() -> HeaterControlConfig {
        let mut cfg = HeaterControlConfig::default();
        cfg.heater_only.degrees_per_second = 0.05;
        cfg.no_temps.degrees_per_second = 0.05;
        cfg.no_temps.k = 0.001;
        cfg
    }

    #[test]
    fn measured_defaults_validate() {
        measured().validate().unwrap();
    }

    #[test]
    fn unmeasured_coefficients_are_fatal() {
        let err = HeaterControlConfig::default().validate().unwrap_err();
        assert!(err.problems.iter().any(|p| p.contains("heater_only.degrees_per_second")));
        assert!(err.problems.iter().any(|p| p.contains("no_temps.k")));
        assert!(err.problems.iter().any(|p| p.contains("no_temps.degrees_per_second")));
    }

    #[test]
    fn zero_heating_rate_is_rejected() {
        let mut cfg = measured();
        cfg.heater_only.degrees_per_second = 0.0;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.problems.len(), 1);
        assert!(err.problems[0].contains("heater_only.degrees_per_second"));
    }

    #[test]
    fn all_violations_are_reported_together() {
        let mut cfg = measured();
        cfg.supervisor.tick_time_ms = 100;
        cfg.normal.confirm_on_delta = 2.0;
        cfg.no_temps.safety_tweak = 2.0;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.problems.len(), 3, "got: {:?}", err.problems);
    }

    #[test]
    fn window_ordering_is_enforced() {
        let mut cfg = measured();
        cfg.supervisor.dormant_low_temp = 12.0;
        cfg.supervisor.dormant_high_temp = 10.0;
        let err = cfg.validate().unwrap_err();
        assert!(err
            .problems
            .iter()
            .any(|p| p.contains("dormant_low_temp must be below dormant_high_temp")));
    }

    #[test]
    fn heater_limit_must_clear_the_window_ceiling() {
        let mut cfg = measured();
        cfg.heater_only.heater_temp_limit = 30.0;
        cfg.supervisor.production_high_temp = 35.0;
        let err = cfg.validate().unwrap_err();
        assert!(err
            .problems
            .iter()
            .any(|p| p.contains("heater_only.heater_temp_limit")));
    }
}
