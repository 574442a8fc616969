//! A lumped-parameter thermal model of the shed.
//!
//! Three thermal nodes (the heating element, the shed air, the battery
//! mass) each relaxing toward its neighbor by Newton's law, with the shed
//! air leaking to a fixed outside temperature. Crude, but it produces the
//! behaviors the controllers have to cope with: the element responds in
//! seconds, the air in minutes, the batteries in tens of minutes.

/// Model coefficients. The defaults describe a small insulated shed with a
/// few hundred watts of heater on a cold night.
#[derive(Debug, Clone, Copy)]
pub struct ShedParams {
    /// Outside (weather) temperature, °C.
    pub outside_temp: f64,
    /// Element heating rate at full power, °C per second.
    pub heater_power: f64,
    /// Element ↔ shed-air coupling, fraction per degree per second.
    pub element_coupling: f64,
    /// Shed-air → outside leakage, fraction per degree per second.
    pub interior_loss: f64,
    /// Shed-air ↔ battery-mass coupling, fraction per degree per second.
    pub battery_coupling: f64,
    /// Peak-to-peak reading noise added by the harness, °C. Zero for
    /// deterministic tests.
    pub noise: f64,
}

impl Default for ShedParams {
    fn default() -> Self {
        Self {
            outside_temp: -10.0,
            heater_power: 0.6,
            element_coupling: 0.02,
            interior_loss: 0.005,
            battery_coupling: 0.05,
            noise: 0.0,
        }
    }
}

/// Current model state.
#[derive(Debug, Clone, Copy)]
pub struct ShedModel {
    pub params: ShedParams,
    pub element: f64,
    pub interior: f64,
    pub battery: f64,
    /// When set, the element produces no heat regardless of power: the
    /// no-start and fault-hypothesis scenarios.
    pub broken_heater: bool,
}

impl ShedModel {
    /// Starts the whole shed in equilibrium at `interior` degrees.
    pub fn settled_at(params: ShedParams, interior: f64) -> Self {
        Self {
            params,
            element: interior,
            interior,
            battery: interior,
            broken_heater: false,
        }
    }

    /// Advances the model by `dt` seconds with the heater commanded as
    /// given.
    pub fn step(&mut self, dt: f64, heater_on: bool) {
        let p = self.params;
        let heating = if heater_on && !self.broken_heater {
            p.heater_power * dt
        } else {
            0.0
        };
        let element_to_air = (self.element - self.interior) * p.element_coupling * dt;
        self.element += heating - element_to_air;
        self.interior += element_to_air * 0.5 - (self.interior - p.outside_temp) * p.interior_loss * dt;
        self.battery += (self.interior - self.battery) * p.battery_coupling * dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heating_warms_element_then_air_then_battery() {
        let mut shed = ShedModel::settled_at(ShedParams::default(), 0.0);
        for _ in 0..60 {
            shed.step(1.0, true);
        }
        assert!(shed.element > shed.interior);
        assert!(shed.interior > shed.battery);
        assert!(shed.element > 10.0, "element only reached {}", shed.element);
    }

    #[test]
    fn without_heat_everything_relaxes_toward_outside() {
        let mut shed = ShedModel::settled_at(ShedParams::default(), 10.0);
        for _ in 0..36_000 {
            shed.step(1.0, false);
        }
        assert!(shed.interior < 0.0, "interior still at {}", shed.interior);
    }

    #[test]
    fn broken_heater_produces_no_rise() {
        let mut shed = ShedModel::settled_at(ShedParams::default(), 0.0);
        shed.broken_heater = true;
        for _ in 0..120 {
            shed.step(1.0, true);
        }
        assert!(shed.element < 1.0);
    }
}
