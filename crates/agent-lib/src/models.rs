//! Core data models for the cooling agent

use serde::{Deserialize, Serialize};

/// Control actions available to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    CoolIncrementSmall,
    CoolDecrementSmall,
    FanIncrementSmall,
    CoolIncrementLarge,
    CoolDecrementLarge,
    FanIncrementLarge,
    Maintain,
    ThermalStorageCharge,
    ThermalStorageDischarge,
}

/// Physical effect of one action, before workload scaling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionEffect {
    /// Setpoint temperature delta in degrees Celsius
    pub temp: f64,
    /// Fan speed delta in percentage points
    pub fan: f64,
    /// Energy draw delta in kW
    pub energy: f64,
}

impl Action {
    /// All actions in index order
    pub const ALL: [Action; 9] = [
        Action::CoolIncrementSmall,
        Action::CoolDecrementSmall,
        Action::FanIncrementSmall,
        Action::CoolIncrementLarge,
        Action::CoolDecrementLarge,
        Action::FanIncrementLarge,
        Action::Maintain,
        Action::ThermalStorageCharge,
        Action::ThermalStorageDischarge,
    ];

    /// Number of actions in the enumerated set
    pub const COUNT: usize = Self::ALL.len();

    /// Index of this action in the estimator's output vector
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|a| *a == self).unwrap_or(0)
    }

    /// Action for a given output index
    pub fn from_index(index: usize) -> Option<Action> {
        Self::ALL.get(index).copied()
    }

    /// Base physical deltas for this action
    pub fn effect(self) -> ActionEffect {
        match self {
            Action::CoolIncrementSmall => ActionEffect { temp: -0.2, fan: 5.0, energy: 2.0 },
            Action::CoolDecrementSmall => ActionEffect { temp: 0.2, fan: -5.0, energy: -2.0 },
            Action::FanIncrementSmall => ActionEffect { temp: -0.1, fan: 10.0, energy: 3.0 },
            Action::CoolIncrementLarge => ActionEffect { temp: -0.5, fan: 10.0, energy: 6.0 },
            Action::CoolDecrementLarge => ActionEffect { temp: 0.5, fan: -10.0, energy: -6.0 },
            Action::FanIncrementLarge => ActionEffect { temp: -0.2, fan: 20.0, energy: 5.0 },
            Action::Maintain => ActionEffect { temp: 0.0, fan: 0.0, energy: 0.0 },
            Action::ThermalStorageCharge => ActionEffect { temp: 0.5, fan: 0.0, energy: 5.0 },
            Action::ThermalStorageDischarge => ActionEffect { temp: -0.5, fan: 0.0, energy: -3.0 },
        }
    }

    /// Relative physical magnitude, used for the flat per-action penalty
    pub fn magnitude(self) -> f64 {
        match self {
            Action::CoolIncrementSmall
            | Action::CoolDecrementSmall
            | Action::FanIncrementSmall => 0.5,
            Action::CoolIncrementLarge
            | Action::CoolDecrementLarge
            | Action::FanIncrementLarge => 1.0,
            Action::Maintain => 0.1,
            Action::ThermalStorageCharge | Action::ThermalStorageDischarge => 0.8,
        }
    }

    /// True for the dedicated fan-boost actions
    pub fn is_fan_boost(self) -> bool {
        matches!(self, Action::FanIncrementSmall | Action::FanIncrementLarge)
    }

    /// Stable display name
    pub fn name(self) -> &'static str {
        match self {
            Action::CoolIncrementSmall => "COOL_INCREMENT_SMALL",
            Action::CoolDecrementSmall => "COOL_DECREMENT_SMALL",
            Action::FanIncrementSmall => "FAN_INCREMENT_SMALL",
            Action::CoolIncrementLarge => "COOL_INCREMENT_LARGE",
            Action::CoolDecrementLarge => "COOL_DECREMENT_LARGE",
            Action::FanIncrementLarge => "FAN_INCREMENT_LARGE",
            Action::Maintain => "MAINTAIN",
            Action::ThermalStorageCharge => "THERMAL_STORAGE_CHARGE",
            Action::ThermalStorageDischarge => "THERMAL_STORAGE_DISCHARGE",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed layout of the normalized state vector
///
/// Order: eight core metrics, one entry per rack temperature, then
/// thermal-storage level and efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLayout {
    pub rack_count: usize,
}

impl StateLayout {
    pub const ENERGY: usize = 0;
    pub const WORKLOAD: usize = 1;
    pub const AMBIENT_TEMP: usize = 2;
    pub const HUMIDITY: usize = 3;
    pub const TARGET_TEMP: usize = 4;
    pub const FAN_SPEED: usize = 5;
    pub const AIRFLOW: usize = 6;
    pub const PUE: usize = 7;

    /// First rack-temperature index
    pub const RACKS: usize = 8;

    pub fn new(rack_count: usize) -> Self {
        Self { rack_count }
    }

    /// Total state vector length
    pub fn len(&self) -> usize {
        Self::RACKS + self.rack_count + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Index range of the rack temperatures
    pub fn rack_range(&self) -> std::ops::Range<usize> {
        Self::RACKS..Self::RACKS + self.rack_count
    }

    pub fn storage_level(&self) -> usize {
        Self::RACKS + self.rack_count
    }

    pub fn storage_efficiency(&self) -> usize {
        Self::RACKS + self.rack_count + 1
    }

    /// Documented bounds for a normalized entry at `index`
    ///
    /// Rack temperatures can run hotter than ambient, so their normalized
    /// range extends past 1.0.
    pub fn bounds(&self, index: usize) -> (f64, f64) {
        if self.rack_range().contains(&index) {
            (0.0, 1.5)
        } else {
            (0.0, 1.0)
        }
    }
}

/// One stored transition
///
/// State vectors are owned copies; the replay memory holds the only
/// reference once a transition is inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub state: Vec<f64>,
    pub action: Action,
    pub reward: f64,
    pub next_state: Vec<f64>,
    pub done: bool,
}

/// Outside weather conditions from the external feed
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutsideConditions {
    pub temperature_c: f64,
    pub humidity_pct: f64,
}

impl Default for OutsideConditions {
    fn default() -> Self {
        Self {
            temperature_c: 15.0,
            humidity_pct: 50.0,
        }
    }
}

/// Flat status record emitted after every tick and action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub timestamp: i64,
    pub energy_kw: f64,
    pub workload: f64,
    pub ambient_temp_c: f64,
    pub humidity_pct: f64,
    pub target_temp_c: f64,
    pub fan_speed_pct: f64,
    pub airflow_m3h: f64,
    pub pue: f64,
    pub failure_risk: f64,
    pub rack_temperatures_c: Vec<f64>,
    pub thermal_storage_kwh: f64,
    pub outside_temperature_c: f64,
    pub outside_humidity_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

/// Per-step training log record, flushed to disk on shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingLogEntry {
    pub step: u64,
    pub action: Action,
    pub reward: f64,
    pub loss: Option<f64>,
    pub epsilon: f64,
    pub risk: f64,
    pub energy_kw: f64,
    pub avg_rack_temp_c: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_index_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_index(action.index()), Some(action));
        }
        assert_eq!(Action::from_index(Action::COUNT), None);
    }

    #[test]
    fn test_state_layout_length() {
        let layout = StateLayout::new(10);
        assert_eq!(layout.len(), 20);
        assert_eq!(layout.storage_level(), 18);
        assert_eq!(layout.storage_efficiency(), 19);
        assert_eq!(layout.rack_range(), 8..18);
    }

    #[test]
    fn test_maintain_is_neutral() {
        let effect = Action::Maintain.effect();
        assert_eq!(effect.temp, 0.0);
        assert_eq!(effect.fan, 0.0);
        assert_eq!(effect.energy, 0.0);
    }

    #[test]
    fn test_action_serde_names() {
        let json = serde_json::to_string(&Action::ThermalStorageDischarge).unwrap();
        assert_eq!(json, "\"THERMAL_STORAGE_DISCHARGE\"");
    }
}
