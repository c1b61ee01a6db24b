//! Moisture and unit conversions.
//!
//! Saturation vapour pressure uses the Tetens form of the Magnus equation
//! (FAO-56 coefficients), valid over liquid water in roughly -40..50 °C.

/// Magnus coefficient `a` in kPa.
const MAGNUS_A_KPA: f64 = 0.6108;

/// Magnus coefficient `b` (dimensionless).
const MAGNUS_B: f64 = 17.27;

/// Magnus coefficient `c` in °C.
const MAGNUS_C: f64 = 237.3;

/// One international knot in km/h.
const KMH_PER_KNOT: f64 = 1.852;

/// Saturation vapour pressure over water in kPa for an air temperature in °C.
#[must_use]
pub fn saturation_vapour_pressure(temperature_c: f64) -> f64 {
    MAGNUS_A_KPA * ((MAGNUS_B * temperature_c) / (temperature_c + MAGNUS_C)).exp()
}

/// Actual vapour pressure in kPa from relative humidity (%) and the
/// saturation vapour pressure (kPa).
#[must_use]
pub fn vapour_pressure(rel_humidity_pct: f64, saturation_kpa: f64) -> f64 {
    rel_humidity_pct / 100.0 * saturation_kpa
}

/// Convert knots to km/h.
#[must_use]
pub fn knots_to_kmh(knots: f64) -> f64 {
    knots * KMH_PER_KNOT
}

/// Convert m/s to km/h.
#[must_use]
pub fn metres_per_second_to_kmh(mps: f64) -> f64 {
    mps * 3.6
}

/// Round to a number of decimal places, halves away from zero.
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_vapour_pressure_25c() {
        let es = saturation_vapour_pressure(25.0);
        assert!((es - 3.17).abs() < 0.005, "es = {es}");
    }

    #[test]
    fn test_vapour_pressure_25c_50pct() {
        let es = saturation_vapour_pressure(25.0);
        let ea = vapour_pressure(50.0, es);
        assert!((ea - 1.58).abs() < 0.005, "ea = {ea}");
    }

    #[test]
    fn test_saturation_at_zero_is_coefficient() {
        assert!((saturation_vapour_pressure(0.0) - MAGNUS_A_KPA).abs() < 1e-12);
    }

    #[test]
    fn test_saturation_below_freezing() {
        // About 0.29 kPa at -10 °C
        let es = saturation_vapour_pressure(-10.0);
        assert!((es - 0.286).abs() < 0.01, "es = {es}");
    }

    #[test]
    fn test_saturation_increases_with_temperature() {
        let mut last = saturation_vapour_pressure(-20.0);
        for t in -19..=45 {
            let es = saturation_vapour_pressure(f64::from(t));
            assert!(es > last);
            last = es;
        }
    }

    #[test]
    fn test_vapour_pressure_bounds() {
        let es = saturation_vapour_pressure(18.0);
        assert!(vapour_pressure(0.0, es).abs() < f64::EPSILON);
        assert!((vapour_pressure(100.0, es) - es).abs() < f64::EPSILON);
    }

    #[test]
    fn test_nan_propagates() {
        assert!(saturation_vapour_pressure(f64::NAN).is_nan());
        assert!(vapour_pressure(f64::NAN, 2.0).is_nan());
    }

    #[test]
    fn test_speed_conversions() {
        assert!((knots_to_kmh(10.0) - 18.52).abs() < 1e-9);
        assert!((metres_per_second_to_kmh(5.0) - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_to() {
        assert!((round_to(1.583_691, 5) - 1.583_69).abs() < 1e-12);
        assert!((round_to(21.123_456, 3) - 21.123).abs() < 1e-12);
        assert!((round_to(18.526, 2) - 18.53).abs() < 1e-9);
        assert!((round_to(-7.345_67, 2) + 7.35).abs() < 1e-12);
    }
}
