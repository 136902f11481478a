//! Numeric limits applied to commands before they reach the chassis.

/// Largest magnitude accepted for the main and side brush PWM values.
pub const BRUSH_PWM_LIMIT: i32 = 127;

/// Upper bound of the vacuum PWM value (lower bound is zero).
pub const VACUUM_PWM_MAX: i32 = 127;

/// Largest wheel speed the chassis understands, in mm/s.
pub const WHEEL_SPEED_LIMIT: i32 = 500;

/// Restricts `value` to `[lo, hi]`.
///
/// Unlike [`Ord::clamp`] this never panics; if `lo > hi` the lower bound wins.
pub fn clamp<T: PartialOrd>(value: T, lo: T, hi: T) -> T {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}
