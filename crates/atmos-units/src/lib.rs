//! Atmospheric unit conversions.
//!
//! Pure, stateless helpers shared by the GFS decoding pipeline: ISA
//! pressure-altitude, wind vector decomposition, and the small unit
//! remaps the decoder needs. Implemented from scratch without external
//! dependencies.

/// ISA sea-level pressure in millibars.
pub const ISA_SEA_LEVEL_MB: f64 = 1013.25;

/// Feet per meter.
pub const FEET_PER_METER: f64 = 3.28084;

/// ISA temperature lapse rate, kelvin per meter.
const LAPSE_RATE_K_PER_M: f64 = 0.0065;

/// Convert a pressure level in millibars to a pressure altitude in feet
/// using the international standard atmosphere.
///
/// Valid for the troposphere levels the GFS grid carries (1013.25 mb
/// maps to 0 ft, 500 mb to roughly 18 300 ft).
pub fn mb_to_feet(mb: f64) -> f64 {
    let meters = (1.0 - (mb / ISA_SEA_LEVEL_MB).powf(0.190284)) * 44_330.8;
    meters * FEET_PER_METER
}

/// Pascals to inches of mercury.
pub fn pa_to_inhg(pa: f64) -> f64 {
    pa * 0.000_295_299_83
}

/// Meters per second to knots.
pub fn ms_to_knots(ms: f64) -> f64 {
    ms * 3600.0 / 1852.0
}

/// Feet to meters.
pub fn feet_to_meters(ft: f64) -> f64 {
    ft / FEET_PER_METER
}

/// Decompose a (u, v) wind component pair into meteorological polar form.
///
/// Returns `(heading_degrees, speed)`: the heading is the direction the
/// wind blows FROM, in `[0, 360)` with north as 0/360, and the speed is in
/// the units of the input components.
pub fn wind_to_polar(u: f64, v: f64) -> (f64, f64) {
    let speed = u.hypot(v);
    let mut to_deg = u.atan2(v).to_degrees();
    if to_deg < 0.0 {
        to_deg += 360.0;
    }
    // Flip from the "blowing towards" angle to the reporting convention.
    let heading = if to_deg <= 180.0 {
        to_deg + 180.0
    } else {
        to_deg - 180.0
    };
    (heading, speed)
}

/// Reduce an outside-air temperature in kelvin at the given pressure
/// altitude to a mean-sea-level reference, in degrees Celsius, using the
/// ISA lapse rate.
pub fn oat_to_msl_celsius(kelvin: f64, altitude_ft: f64) -> f64 {
    kelvin + LAPSE_RATE_K_PER_M * feet_to_meters(altitude_ft) - 273.15
}

/// Map a cloud-cover percentage to the consumer coverage-code scale 0..=4.
///
/// Linear in the percentage, except any nonzero coverage reports at least
/// code 1 and anything above 89 % clips to the maximum bucket.
pub fn coverage_code(percent: f64) -> u8 {
    let scaled = percent / 100.0 * 4.0;
    if percent > 89.0 {
        4
    } else if percent > 0.0 && scaled < 1.0 {
        1
    } else {
        scaled as u8
    }
}

/// Estimate visibility in meters from relative humidity.
///
/// Extension point for the decoder's disabled RH path; clipped to 40 km.
pub fn rh_to_visibility_m(rh: f64) -> f64 {
    let km = 60.0 * (-2.5 * (rh - 15.0) / 80.0).exp();
    (km * 1000.0).min(40_000.0)
}
