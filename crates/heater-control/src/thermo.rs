//! Open-loop heating and cooling time estimation.
//!
//! Used when no closed-loop sensor exists: the heater runs for a computed
//! duration, then waits out a computed cool-down. The cool-down comes from
//! Newton's law of cooling, `T(t) = T∞ + (T0 − T∞)·e^(−k·t)`, inverted for
//! the time to fall from the top of the window back to the bottom.

/// Seconds to raise the box by `span` degrees at a measured heating rate of
/// `degrees_per_second`. A non-positive span needs no heating at all.
pub fn heating_seconds(span: f64, degrees_per_second: f64) -> f64 {
    if span <= 0.0 {
        return 0.0;
    }
    span / degrees_per_second
}

/// Seconds for the box to cool from `high` down to `low` with the
/// surroundings at `outside`, given the measured decay constant `k`.
///
/// When the surroundings are at or above `low` the box never cools past the
/// window floor, so there is nothing to wait for.
pub fn cooling_seconds(low: f64, high: f64, outside: f64, k: f64) -> f64 {
    if outside >= low {
        return 0.0;
    }
    ((high - outside) / (low - outside)).ln() / k
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;

    #[test]
    fn heating_time_is_span_over_rate() {
        assert!(approx_eq!(f64, heating_seconds(5.0, 0.05), 100.0, epsilon = 1e-9));
    }

    #[test]
    fn non_positive_span_heats_for_zero_seconds() {
        assert_eq!(heating_seconds(0.0, 0.05), 0.0);
        assert_eq!(heating_seconds(-3.0, 0.05), 0.0);
    }

    #[test]
    fn cooling_follows_newtons_law() {
        // From 5 °C down to 0 °C with −10 °C outside and k = 0.001:
        // 1000 · ln(15/10) ≈ 405.47 s.
        let t = cooling_seconds(0.0, 5.0, -10.0, 0.001);
        assert!(approx_eq!(f64, t, 405.465, epsilon = 0.01), "got {t}");
    }

    #[test]
    fn warm_surroundings_need_no_cooling_wait() {
        assert_eq!(cooling_seconds(0.0, 5.0, 0.0, 0.001), 0.0);
        assert_eq!(cooling_seconds(0.0, 5.0, 3.0, 0.001), 0.0);
    }
}
