// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions, validation and interpolation.
//!
//! A curve maps a temperature (0-100) to a fan speed percentage (0-100).
//! Speeds are linearly interpolated between points and held flat beyond
//! the first and last point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest value on either axis.
pub const MIN_PERCENT: u8 = 0;

/// Highest value on either axis.
pub const MAX_PERCENT: u8 = 100;

/// A curve needs at least this many points to define a response.
pub const MIN_POINTS: usize = 2;

/// Clamp an integer into `0..=100`.
pub fn clamp_percent(value: i64) -> u8 {
    value.clamp(i64::from(MIN_PERCENT), i64::from(MAX_PERCENT)) as u8
}

/// Round and clamp a real value into `0..=100`. NaN maps to 0.
pub fn clamp_percent_f64(value: f64) -> u8 {
    if value.is_nan() {
        return MIN_PERCENT;
    }
    value
        .round()
        .clamp(f64::from(MIN_PERCENT), f64::from(MAX_PERCENT)) as u8
}

// ---------------------------------------------------------------------------
// Points
// ---------------------------------------------------------------------------

/// A single (temperature, speed) point on a fan curve.
///
/// Both coordinates are clamped into `0..=100` on construction, including
/// when deserialized. Points are replaced rather than mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i64, i64)", into = "(u8, u8)")]
pub struct ControlPoint {
    temperature: u8,
    speed: u8,
}

impl ControlPoint {
    pub fn new(temperature: i64, speed: i64) -> Self {
        Self {
            temperature: clamp_percent(temperature),
            speed: clamp_percent(speed),
        }
    }

    pub fn temperature(&self) -> u8 {
        self.temperature
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }
}

impl From<(i64, i64)> for ControlPoint {
    fn from((temperature, speed): (i64, i64)) -> Self {
        Self::new(temperature, speed)
    }
}

impl From<ControlPoint> for (u8, u8) {
    fn from(point: ControlPoint) -> Self {
        (point.temperature, point.speed)
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Why a candidate curve was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("curve must have at least {min} points, got {count}", min = MIN_POINTS)]
    TooFewPoints { count: usize },

    #[error(
        "temperatures must strictly increase: point {index} ({current}) is not above the previous point ({previous})"
    )]
    NonIncreasingTemperature {
        index: usize,
        previous: u8,
        current: u8,
    },

    #[error(
        "speeds must not decrease: point {index} ({current}%) is below the previous point ({previous}%)"
    )]
    DecreasingSpeed {
        index: usize,
        previous: u8,
        current: u8,
    },
}

// ---------------------------------------------------------------------------
// Curve
// ---------------------------------------------------------------------------

/// An ordered list of control points.
///
/// A `Curve` value may be invalid (drafts and candidates are); only curves
/// that pass [`Curve::validate`] ever reach the curve store. Points are kept
/// in the order given and never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve {
    points: Vec<ControlPoint>,
}

impl Curve {
    pub fn new(points: Vec<ControlPoint>) -> Self {
        Self { points }
    }

    /// Build a curve from raw `(temperature, speed)` pairs, clamping each value.
    pub fn from_pairs(pairs: &[(i64, i64)]) -> Self {
        Self::new(pairs.iter().copied().map(ControlPoint::from).collect())
    }

    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ControlPoint> {
        self.points.get(index).copied()
    }

    /// Swap in a new point at `index`, returning the one it replaced.
    pub fn replace(&mut self, index: usize, point: ControlPoint) -> Option<ControlPoint> {
        let slot = self.points.get_mut(index)?;
        Some(std::mem::replace(slot, point))
    }

    /// Check the ordering rules: at least two points, strictly increasing
    /// temperatures and non-decreasing speeds. Reports the first violation.
    pub fn validate(&self) -> Result<(), CurveError> {
        if self.points.len() < MIN_POINTS {
            return Err(CurveError::TooFewPoints {
                count: self.points.len(),
            });
        }
        for (i, pair) in self.points.windows(2).enumerate() {
            let (prev, cur) = (pair[0], pair[1]);
            if cur.temperature <= prev.temperature {
                return Err(CurveError::NonIncreasingTemperature {
                    index: i + 1,
                    previous: prev.temperature,
                    current: cur.temperature,
                });
            }
            if cur.speed < prev.speed {
                return Err(CurveError::DecreasingSpeed {
                    index: i + 1,
                    previous: prev.speed,
                    current: cur.speed,
                });
            }
        }
        Ok(())
    }

    /// Interpolate the fan speed for a given temperature.
    ///
    /// - Below the first point: returns the first point's speed
    /// - Above the last point: returns the last point's speed
    /// - Between two points: linear interpolation, rounded to a whole percent
    pub fn interpolate(&self, temperature: f64) -> u8 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return MIN_PERCENT;
        };
        if temperature <= f64::from(first.temperature) {
            return first.speed;
        }
        if temperature >= f64::from(last.temperature) {
            return last.speed;
        }

        for window in self.points.windows(2) {
            let lo = window[0];
            let hi = window[1];
            let (lo_t, hi_t) = (f64::from(lo.temperature), f64::from(hi.temperature));

            if temperature >= lo_t && temperature <= hi_t {
                let range_t = hi_t - lo_t;
                if range_t <= 0.0 {
                    return lo.speed;
                }
                let frac = (temperature - lo_t) / range_t;
                let speed = f64::from(lo.speed) + frac * (f64::from(hi.speed) - f64::from(lo.speed));
                return clamp_percent_f64(speed);
            }
        }

        last.speed
    }
}

/// Points of the stock curve: gentle below 50, reaching full speed at 100.
pub const DEFAULT_CURVE_POINTS: [(i64, i64); 12] = [
    (0, 10),
    (11, 15),
    (23, 21),
    (34, 27),
    (45, 34),
    (55, 41),
    (65, 50),
    (74, 59),
    (81, 68),
    (88, 78),
    (94, 88),
    (100, 100),
];

/// The curve used when no curve file can be loaded.
pub fn default_curve() -> Curve {
    Curve::from_pairs(&DEFAULT_CURVE_POINTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn three_point() -> Curve {
        Curve::from_pairs(&[(0, 10), (50, 50), (100, 100)])
    }

    #[test]
    fn test_interpolation_midpoint() {
        assert_eq!(three_point().interpolate(25.0), 30);
    }

    #[test]
    fn test_interpolation_below_range() {
        assert_eq!(three_point().interpolate(-10.0), 10);
    }

    #[test]
    fn test_interpolation_above_range() {
        assert_eq!(three_point().interpolate(150.0), 100);
    }

    #[test]
    fn test_interpolation_exact_point() {
        assert_eq!(three_point().interpolate(50.0), 50);
    }

    #[test]
    fn test_interpolation_flat_curve() {
        let curve = Curve::from_pairs(&[(0, 20), (100, 20)]);
        for t in [0.0, 37.0, 99.5, 100.0] {
            assert_eq!(curve.interpolate(t), 20);
        }
    }

    #[test]
    fn test_point_clamps_coordinates() {
        let p = ControlPoint::new(-4, 250);
        assert_eq!(p.temperature(), 0);
        assert_eq!(p.speed(), 100);
    }

    #[test]
    fn test_validation_too_few_points() {
        let curve = Curve::from_pairs(&[(50, 50)]);
        assert_eq!(curve.validate(), Err(CurveError::TooFewPoints { count: 1 }));
    }

    #[test]
    fn test_validation_equal_temperatures() {
        let curve = Curve::from_pairs(&[(10, 10), (10, 50)]);
        assert_eq!(
            curve.validate(),
            Err(CurveError::NonIncreasingTemperature {
                index: 1,
                previous: 10,
                current: 10,
            })
        );
    }

    #[test]
    fn test_validation_decreasing_speed() {
        let curve = Curve::from_pairs(&[(10, 40), (30, 60), (60, 50)]);
        assert_eq!(
            curve.validate(),
            Err(CurveError::DecreasingSpeed {
                index: 2,
                previous: 60,
                current: 50,
            })
        );
    }

    #[test]
    fn test_validation_keeps_given_order() {
        let curve = Curve::from_pairs(&[(60, 10), (30, 20)]);
        assert!(matches!(
            curve.validate(),
            Err(CurveError::NonIncreasingTemperature { index: 1, .. })
        ));
    }

    #[test]
    fn test_default_curve_is_valid() {
        assert!(default_curve().validate().is_ok());
    }

    #[test]
    fn test_replace_point() {
        let mut curve = three_point();
        let old = curve.replace(1, ControlPoint::new(40, 45));
        assert_eq!(old, Some(ControlPoint::new(50, 50)));
        assert_eq!(curve.get(1), Some(ControlPoint::new(40, 45)));
        assert_eq!(curve.replace(9, ControlPoint::new(1, 1)), None);
    }

    fn arb_valid_curve() -> impl Strategy<Value = Curve> {
        (2usize..12).prop_flat_map(|n| {
            (
                proptest::sample::subsequence((0i64..=100).collect::<Vec<_>>(), n),
                prop::collection::vec(0i64..=100, n),
            )
                .prop_map(|(temps, mut speeds)| {
                    speeds.sort_unstable();
                    Curve::new(
                        temps
                            .into_iter()
                            .zip(speeds)
                            .map(ControlPoint::from)
                            .collect(),
                    )
                })
        })
    }

    proptest! {
        #[test]
        fn accepted_curves_are_monotonic(
            pairs in prop::collection::vec((-20i64..130, -20i64..130), 0..10)
        ) {
            let curve = Curve::from_pairs(&pairs);
            if curve.validate().is_ok() {
                for w in curve.points().windows(2) {
                    prop_assert!(w[1].temperature() > w[0].temperature());
                    prop_assert!(w[1].speed() >= w[0].speed());
                }
            }
        }

        #[test]
        fn interpolation_stays_within_curve(curve in arb_valid_curve(), t in -50.0f64..150.0) {
            prop_assert!(curve.validate().is_ok());
            let lo = curve.points()[0].speed();
            let hi = curve.points()[curve.len() - 1].speed();
            let speed = curve.interpolate(t);
            prop_assert!(speed >= lo && speed <= hi);
        }

        #[test]
        fn interpolation_is_non_decreasing(curve in arb_valid_curve(), a in 0.0f64..100.0, b in 0.0f64..100.0) {
            let (cold, hot) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(curve.interpolate(cold) <= curve.interpolate(hot));
        }
    }
}
