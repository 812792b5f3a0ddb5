//! Data-center thermal/energy simulation
//!
//! Owns the ground-truth physical state (sensors, rack temperatures,
//! thermal storage) and applies the effect of one action per tick. Failure
//! risk is a weighted composite amplified by consecutive time spent above
//! the danger threshold.

use super::actions::{self, ActionGuard};
use super::sensor::Sensor;
use crate::models::{Action, OutsideConditions, StateLayout, StatusUpdate};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Number of server racks
    pub rack_count: usize,
    /// Thermal storage capacity in kWh
    pub storage_capacity_kwh: f64,
    /// Maximum charge per action in kWh
    pub storage_charge_rate_kwh: f64,
    /// Maximum discharge per action in kWh
    pub storage_discharge_rate_kwh: f64,
    /// Round-trip storage efficiency
    pub storage_efficiency: f64,
    /// Initial storage level in kWh
    pub storage_initial_kwh: f64,
    /// Energy price outside peak conditions, per kWh
    pub base_energy_price: f64,
    /// Energy price when outside temperature is extreme, per kWh
    pub peak_energy_price: f64,
    /// Rack temperature above which the risk composite starts penalizing
    pub safe_rack_temp_c: f64,
    /// Risk level above which consecutive-step amplification kicks in
    pub danger_risk_threshold: f64,
    /// Amplification per consecutive danger step
    pub danger_escalation: f64,
    /// Risk level at which the emergency override replaces the agent
    pub emergency_risk_threshold: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            rack_count: 10,
            storage_capacity_kwh: 1000.0,
            storage_charge_rate_kwh: 50.0,
            storage_discharge_rate_kwh: 100.0,
            storage_efficiency: 0.85,
            storage_initial_kwh: 300.0,
            base_energy_price: 0.08,
            peak_energy_price: 0.20,
            safe_rack_temp_c: 25.0,
            danger_risk_threshold: 0.6,
            danger_escalation: 0.05,
            emergency_risk_threshold: 0.9,
            seed: None,
        }
    }
}

/// Thermal storage bank state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalStorage {
    pub capacity_kwh: f64,
    pub current_kwh: f64,
    pub charge_rate_kwh: f64,
    pub discharge_rate_kwh: f64,
    pub efficiency: f64,
}

impl ThermalStorage {
    /// Charge by up to one charge-rate unit; returns the amount drawn
    pub fn charge(&mut self) -> f64 {
        let headroom = self.capacity_kwh - self.current_kwh;
        let amount = headroom.min(self.charge_rate_kwh).max(0.0);
        self.current_kwh += amount * self.efficiency;
        amount
    }

    /// Discharge by up to one discharge-rate unit; returns the amount released
    pub fn discharge(&mut self) -> f64 {
        let amount = self.current_kwh.min(self.discharge_rate_kwh).max(0.0);
        self.current_kwh -= amount;
        amount
    }

    /// Fill level in [0, 1]
    pub fn level(&self) -> f64 {
        if self.capacity_kwh <= f64::EPSILON {
            return 0.0;
        }
        self.current_kwh / self.capacity_kwh
    }
}

/// Outcome of `execute_action`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedAction {
    /// Action the caller requested
    pub requested: Action,
    /// Action actually applied after the safety override
    pub applied: Action,
    /// True when the emergency policy replaced the request
    pub overridden: bool,
}

/// Ground-truth data-center state advanced one tick at a time
pub struct Environment {
    config: EnvironmentConfig,
    energy: Sensor,
    workload: Sensor,
    ambient_temperature: Sensor,
    humidity: Sensor,
    target_temperature: Sensor,
    fan_speed: Sensor,
    airflow: Sensor,
    pue: Sensor,
    rack_temperatures: Vec<Sensor>,
    storage: ThermalStorage,
    failure_risk: f64,
    danger_steps: u32,
    fan_stress: f64,
    outside: OutsideConditions,
    energy_price: f64,
    rng: SmallRng,
}

impl Environment {
    pub fn new(config: EnvironmentConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let rack_temperatures = (0..config.rack_count)
            .map(|i| Sensor::new(22.0, 15.0, 35.0, 0.5, format!("rack_{}_temp", i + 1)))
            .collect();

        let storage = ThermalStorage {
            capacity_kwh: config.storage_capacity_kwh,
            current_kwh: config.storage_initial_kwh.min(config.storage_capacity_kwh),
            charge_rate_kwh: config.storage_charge_rate_kwh,
            discharge_rate_kwh: config.storage_discharge_rate_kwh,
            efficiency: config.storage_efficiency,
        };

        let base_price = config.base_energy_price;

        let mut env = Self {
            config,
            energy: Sensor::new(20.0, 0.0, 200.0, 5.0, "energy"),
            workload: Sensor::new(0.5, 0.0, 1.0, 0.1, "workload"),
            ambient_temperature: Sensor::new(25.0, 15.0, 30.0, 1.0, "ambient_temp"),
            humidity: Sensor::new(50.0, 10.0, 90.0, 5.0, "humidity"),
            target_temperature: Sensor::new(22.0, 18.0, 28.0, 0.0, "target_temp"),
            fan_speed: Sensor::new(30.0, 0.0, 100.0, 5.0, "fan_speed"),
            airflow: Sensor::new(300.0, 100.0, 500.0, 20.0, "airflow"),
            pue: Sensor::new(1.5, 1.0, 3.0, 0.05, "pue"),
            rack_temperatures,
            storage,
            failure_risk: 0.0,
            danger_steps: 0,
            fan_stress: 0.0,
            outside: OutsideConditions::default(),
            energy_price: base_price,
            rng,
        };
        env.update_failure_risk();
        env
    }

    /// State vector layout for this environment
    pub fn layout(&self) -> StateLayout {
        StateLayout::new(self.config.rack_count)
    }

    /// Advance all sensors by one passive tick
    ///
    /// Rack temperatures track workload with per-rack hotspot factors, and
    /// PUE follows energy draw.
    pub fn tick(&mut self) {
        self.energy.update(&mut self.rng);
        self.workload.update(&mut self.rng);
        self.ambient_temperature.update(&mut self.rng);
        self.humidity.update(&mut self.rng);
        self.fan_speed.update(&mut self.rng);
        self.airflow.update(&mut self.rng);

        let workload = self.workload.get();
        for (i, rack) in self.rack_temperatures.iter_mut().enumerate() {
            rack.nudge((workload - 0.5) * 0.2 * (1.0 + (i % 3) as f64 / 10.0));
            rack.update(&mut self.rng);
        }

        self.pue.set(1.2 + (self.energy.get() / 200.0) * 0.8);
        self.pue.update(&mut self.rng);

        self.update_failure_risk();
        debug!(
            risk = self.failure_risk,
            energy_kw = self.energy.get(),
            "Environment tick"
        );
    }

    /// Apply one action, subject to the emergency override
    pub fn execute_action(&mut self, requested: Action) -> AppliedAction {
        let guard = self.guard();
        let (applied, overridden) = if self.failure_risk > self.config.emergency_risk_threshold {
            (actions::emergency_action(&guard), true)
        } else {
            (requested, false)
        };

        let effect = applied.effect();
        // Energy deltas scale with IT power draw: a loaded hall swings harder
        let energy_delta = effect.energy * (0.5 + self.workload.get());

        match applied {
            Action::ThermalStorageCharge => {
                self.storage.charge();
                self.energy.nudge(energy_delta);
            }
            Action::ThermalStorageDischarge => {
                self.storage.discharge();
                self.energy.nudge(energy_delta);
            }
            _ => {
                self.target_temperature.nudge(effect.temp * 0.3);
                self.fan_speed.nudge(effect.fan);
                self.energy.nudge(energy_delta);
            }
        }

        let ambient_effect = match applied {
            Action::CoolIncrementSmall | Action::CoolIncrementLarge => effect.temp * 0.8,
            Action::FanIncrementSmall | Action::FanIncrementLarge => effect.temp * 0.3,
            Action::ThermalStorageDischarge => effect.temp * 0.6,
            _ => 0.0,
        };

        let old_ambient = self.ambient_temperature.get();
        self.ambient_temperature.nudge(ambient_effect);
        let ambient_change = self.ambient_temperature.get() - old_ambient;

        // Racks follow ambient with inertia, plus workload heat and hotspots
        let workload = self.workload.get();
        for (i, rack) in self.rack_temperatures.iter_mut().enumerate() {
            let hotspot = 1.0 + (i % 3) as f64 * 0.1;
            let change = (ambient_change * 0.7 + (workload - 0.5) * 0.1) * hotspot;
            rack.nudge(change);
            rack.nudge((self.rng.gen::<f64>() - 0.5) * 0.2);
        }

        self.airflow.set(self.fan_speed.get() * 5.0);
        self.update_failure_risk();

        AppliedAction {
            requested,
            applied,
            overridden,
        }
    }

    /// Recompute the failure-risk composite
    ///
    /// Penalties: super-linear rack overheat, cross-rack gradient, humidity
    /// under heat, instantaneous and cumulative fan stress, workload excess.
    /// The composite is amplified the longer it stays above the danger
    /// threshold, then clamped to [0, 1].
    fn update_failure_risk(&mut self) {
        let max_rack = self.max_rack_temp();
        let min_rack = self.min_rack_temp();
        let fan = self.fan_speed.get();
        let humidity = self.humidity.get();
        let workload = self.workload.get();

        // Cumulative fan wear: builds above 80%, decays below
        if fan > 80.0 {
            self.fan_stress = (self.fan_stress + (fan - 80.0) / 20.0 * 0.02).min(0.3);
        } else {
            self.fan_stress *= 0.95;
        }

        let overheat = (max_rack - self.config.safe_rack_temp_c).max(0.0);
        let temp_penalty = (overheat * 0.1).powf(1.5);
        // Gradients under 2 degrees are normal circulation noise
        let gradient_penalty = (max_rack - min_rack - 2.0).max(0.0) * 0.05;
        let humidity_penalty = if max_rack > self.config.safe_rack_temp_c {
            (humidity - 60.0).max(0.0) * 0.01
        } else {
            0.0
        };
        let fan_penalty = (fan - 80.0).max(0.0) * 0.005 + self.fan_stress;
        let workload_penalty = (workload - 0.6).max(0.0);

        let base =
            temp_penalty + gradient_penalty + humidity_penalty + fan_penalty + workload_penalty;

        if base > self.config.danger_risk_threshold {
            self.danger_steps = self.danger_steps.saturating_add(1);
        } else {
            self.danger_steps = 0;
        }

        let amplification = 1.0 + self.danger_steps as f64 * self.config.danger_escalation;
        self.failure_risk = (base * amplification).clamp(0.0, 1.0);
    }

    /// Project all sensors into the fixed-order normalized state vector
    pub fn normalized_state(&self) -> Vec<f64> {
        let mut state = Vec::with_capacity(self.layout().len());
        state.push(self.energy.normalized());
        state.push(self.workload.normalized());
        state.push((self.ambient_temperature.get() - 15.0) / 15.0);
        state.push((self.humidity.get() - 10.0) / 80.0);
        state.push((self.target_temperature.get() - 18.0) / 10.0);
        state.push(self.fan_speed.normalized());
        state.push((self.airflow.get() - 100.0) / 400.0);
        state.push((self.pue.get() - 1.0) / 2.0);
        for rack in &self.rack_temperatures {
            state.push((rack.get() - 15.0) / 15.0);
        }
        state.push(self.storage.level());
        state.push(self.storage.efficiency);
        state
    }

    /// Feasibility inputs for the validity filter
    pub fn guard(&self) -> ActionGuard {
        ActionGuard {
            fan_speed_pct: self.fan_speed.get(),
            storage_level_kwh: self.storage.current_kwh,
            storage_capacity_kwh: self.storage.capacity_kwh,
            charge_rate_kw: self.storage.charge_rate_kwh,
            discharge_rate_kw: self.storage.discharge_rate_kwh,
        }
    }

    /// Currently feasible actions
    pub fn valid_actions(&self) -> Vec<Action> {
        actions::valid_actions(&self.guard())
    }

    /// Fold in outside conditions and re-derive the energy price
    ///
    /// Extreme outside temperatures push the grid to the peak tariff.
    pub fn apply_conditions(&mut self, conditions: OutsideConditions) {
        self.outside = conditions;
        self.energy_price = if conditions.temperature_c < 5.0 || conditions.temperature_c > 25.0 {
            self.config.peak_energy_price
        } else {
            self.config.base_energy_price
        };
        debug!(
            outside_temp_c = conditions.temperature_c,
            energy_price = self.energy_price,
            "Outside conditions updated"
        );
    }

    /// Operator override for the cooling setpoint
    pub fn set_target_temperature(&mut self, value: f64) {
        self.target_temperature.set(value);
    }

    /// Operator override for the workload level
    pub fn set_workload(&mut self, value: f64) {
        self.workload.set(value);
    }

    /// Flat status record for the outbound boundary
    pub fn status(&self, action: Option<Action>) -> StatusUpdate {
        StatusUpdate {
            timestamp: chrono::Utc::now().timestamp(),
            energy_kw: self.energy.get(),
            workload: self.workload.get(),
            ambient_temp_c: self.ambient_temperature.get(),
            humidity_pct: self.humidity.get(),
            target_temp_c: self.target_temperature.get(),
            fan_speed_pct: self.fan_speed.get(),
            airflow_m3h: self.airflow.get(),
            pue: self.pue.get(),
            failure_risk: self.failure_risk,
            rack_temperatures_c: self.rack_temperatures.iter().map(|r| r.get()).collect(),
            thermal_storage_kwh: self.storage.current_kwh,
            outside_temperature_c: self.outside.temperature_c,
            outside_humidity_pct: self.outside.humidity_pct,
            action,
        }
    }

    pub fn failure_risk(&self) -> f64 {
        self.failure_risk
    }

    /// Price factor used by the reward: 1 at zero cost, 2 at the peak tariff
    pub fn energy_price_factor(&self) -> f64 {
        1.0 + self.energy_price / 0.20
    }

    pub fn energy_price(&self) -> f64 {
        self.energy_price
    }

    pub fn storage(&self) -> &ThermalStorage {
        &self.storage
    }

    pub fn outside(&self) -> OutsideConditions {
        self.outside
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn energy_kw(&self) -> f64 {
        self.energy.get()
    }

    pub fn ambient_temp_c(&self) -> f64 {
        self.ambient_temperature.get()
    }

    pub fn fan_speed_pct(&self) -> f64 {
        self.fan_speed.get()
    }

    pub fn avg_rack_temp_c(&self) -> f64 {
        let sum: f64 = self.rack_temperatures.iter().map(|r| r.get()).sum();
        sum / self.rack_temperatures.len().max(1) as f64
    }

    pub fn max_rack_temp(&self) -> f64 {
        self.rack_temperatures
            .iter()
            .map(|r| r.get())
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn min_rack_temp(&self) -> f64 {
        self.rack_temperatures
            .iter()
            .map(|r| r.get())
            .fold(f64::INFINITY, f64::min)
    }

    /// Force a rack temperature, for tests and fault injection
    #[doc(hidden)]
    pub fn set_rack_temp(&mut self, index: usize, value: f64) {
        if let Some(rack) = self.rack_temperatures.get_mut(index) {
            rack.set(value);
        }
        self.update_failure_risk();
    }
}
