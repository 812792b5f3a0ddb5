//! Bounded physical sensor with a random-walk update

use rand::Rng;
use std::collections::VecDeque;

/// Number of past readings retained per sensor
const HISTORY_CAPACITY: usize = 100;

/// A simulated sensor holding one bounded physical reading
///
/// Each passive tick moves the value by a small random walk limited by the
/// sensor's configured volatility.
#[derive(Debug, Clone)]
pub struct Sensor {
    value: f64,
    min: f64,
    max: f64,
    variation: f64,
    name: String,
    history: VecDeque<f64>,
}

impl Sensor {
    pub fn new(initial: f64, min: f64, max: f64, variation: f64, name: impl Into<String>) -> Self {
        Self {
            value: initial.clamp(min, max),
            min,
            max,
            variation,
            name: name.into(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Advance the sensor by one random-walk step
    pub fn update(&mut self, rng: &mut impl Rng) {
        let delta = (rng.gen::<f64>() - 0.5) * self.variation;
        self.value = (self.value + delta).clamp(self.min, self.max);
        self.record();
    }

    /// Current reading
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Overwrite the reading, clamped to the sensor's bounds
    pub fn set(&mut self, value: f64) {
        self.value = value.clamp(self.min, self.max);
    }

    /// Shift the reading by `delta`, clamped to the sensor's bounds
    pub fn nudge(&mut self, delta: f64) {
        self.set(self.value + delta);
    }

    /// Min-max normalized reading in [0, 1]
    pub fn normalized(&self) -> f64 {
        let range = self.max - self.min;
        if range <= f64::EPSILON {
            return 0.0;
        }
        (self.value - self.min) / range
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recent readings, oldest first
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    fn record(&mut self) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(self.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_update_stays_in_bounds() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut sensor = Sensor::new(50.0, 0.0, 100.0, 10.0, "test");

        for _ in 0..1000 {
            sensor.update(&mut rng);
            assert!(sensor.get() >= 0.0 && sensor.get() <= 100.0);
        }
    }

    #[test]
    fn test_zero_variation_is_constant() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut sensor = Sensor::new(22.0, 18.0, 28.0, 0.0, "target");

        for _ in 0..100 {
            sensor.update(&mut rng);
        }
        assert_eq!(sensor.get(), 22.0);
    }

    #[test]
    fn test_set_clamps() {
        let mut sensor = Sensor::new(30.0, 0.0, 100.0, 5.0, "fan");
        sensor.set(150.0);
        assert_eq!(sensor.get(), 100.0);
        sensor.set(-10.0);
        assert_eq!(sensor.get(), 0.0);
    }

    #[test]
    fn test_normalized_range() {
        let sensor = Sensor::new(25.0, 15.0, 30.0, 1.0, "ambient");
        assert!((sensor.normalized() - (10.0 / 15.0)).abs() < 1e-12);
    }

    #[test]
    fn test_history_bounded() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut sensor = Sensor::new(50.0, 0.0, 100.0, 1.0, "test");

        for _ in 0..250 {
            sensor.update(&mut rng);
        }
        assert_eq!(sensor.history().count(), 100);
    }
}
