//! Reward computation
//!
//! The reward is a weighted sum over a fixed enumerated set of terms, each
//! a pure function of the observed transition. Weights come in two tiers: a
//! declared base weight per term, and a contextual multiplier that sharpens
//! safety incentives while rack temperatures run hot.

use crate::models::{Action, StateLayout};
use serde::{Deserialize, Serialize};
use tracing::info;

/// How often the running per-term averages are logged, in steps
const SUMMARY_INTERVAL: u64 = 100;

/// The enumerated reward terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardTerm {
    EnergyCost,
    TemperatureControl,
    RackSafety,
    TempUniformity,
    PueEfficiency,
    FanWear,
    StorageValue,
    WorkloadBalance,
    FailurePenalty,
    RiskEscalation,
    ActionPenalty,
    StorageBonus,
}

impl RewardTerm {
    pub const ALL: [RewardTerm; 12] = [
        RewardTerm::EnergyCost,
        RewardTerm::TemperatureControl,
        RewardTerm::RackSafety,
        RewardTerm::TempUniformity,
        RewardTerm::PueEfficiency,
        RewardTerm::FanWear,
        RewardTerm::StorageValue,
        RewardTerm::WorkloadBalance,
        RewardTerm::FailurePenalty,
        RewardTerm::RiskEscalation,
        RewardTerm::ActionPenalty,
        RewardTerm::StorageBonus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RewardTerm::EnergyCost => "energy_cost",
            RewardTerm::TemperatureControl => "temperature_control",
            RewardTerm::RackSafety => "rack_safety",
            RewardTerm::TempUniformity => "temp_uniformity",
            RewardTerm::PueEfficiency => "pue_efficiency",
            RewardTerm::FanWear => "fan_wear",
            RewardTerm::StorageValue => "storage_value",
            RewardTerm::WorkloadBalance => "workload_balance",
            RewardTerm::FailurePenalty => "failure_penalty",
            RewardTerm::RiskEscalation => "risk_escalation",
            RewardTerm::ActionPenalty => "action_penalty",
            RewardTerm::StorageBonus => "storage_bonus",
        }
    }
}

/// Normalized quantities a reward term may depend on
///
/// Extracted once per transition from the sanitized new state, so the term
/// functions stay pure and statically checkable.
#[derive(Debug, Clone, Copy)]
pub struct RewardInput {
    pub energy: f64,
    pub workload: f64,
    pub ambient_temp: f64,
    pub target_temp: f64,
    pub fan_speed: f64,
    pub pue: f64,
    pub storage_level: f64,
    pub max_rack: f64,
    pub min_rack: f64,
    pub old_risk: f64,
    pub new_risk: f64,
    pub energy_price_factor: f64,
    pub action: Action,
}

impl RewardInput {
    pub fn from_transition(
        layout: &StateLayout,
        new_state: &[f64],
        action: Action,
        old_risk: f64,
        new_risk: f64,
        energy_price_factor: f64,
    ) -> Self {
        let get = |idx: usize| new_state.get(idx).copied().unwrap_or(0.0);
        let racks = &new_state[layout.rack_range().start.min(new_state.len())
            ..layout.rack_range().end.min(new_state.len())];
        let max_rack = racks.iter().copied().fold(0.0_f64, f64::max);
        let min_rack = racks.iter().copied().fold(f64::INFINITY, f64::min);

        Self {
            energy: get(StateLayout::ENERGY),
            workload: get(StateLayout::WORKLOAD),
            ambient_temp: get(StateLayout::AMBIENT_TEMP),
            target_temp: get(StateLayout::TARGET_TEMP),
            fan_speed: get(StateLayout::FAN_SPEED),
            pue: get(StateLayout::PUE),
            storage_level: get(layout.storage_level()),
            max_rack,
            min_rack: if min_rack.is_finite() { min_rack } else { 0.0 },
            old_risk,
            new_risk,
            energy_price_factor,
            action,
        }
    }

    fn rack_gradient(&self) -> f64 {
        (self.max_rack - self.min_rack).max(0.0)
    }
}

/// Evaluate one term; pure in its input
pub fn evaluate(term: RewardTerm, input: &RewardInput) -> f64 {
    match term {
        RewardTerm::EnergyCost => {
            -(input.energy * input.energy_price_factor).powf(1.5).min(3.0)
        }
        RewardTerm::TemperatureControl => {
            let tracking = (input.ambient_temp - input.target_temp).abs() * 0.7
                + (input.max_rack - 0.5).abs() * 0.3;
            -(tracking * (1.0 + input.workload)).min(1.0)
        }
        RewardTerm::RackSafety => -((input.max_rack - 0.55).max(0.0).powi(3)).min(3.0),
        RewardTerm::TempUniformity => -(input.rack_gradient() * 3.0).min(1.0),
        RewardTerm::PueEfficiency => -(input.pue - 0.25).abs().min(1.0),
        RewardTerm::FanWear => -input.fan_speed.powi(3).min(1.5),
        RewardTerm::StorageValue => {
            if input.storage_level > 0.8 && input.energy_price_factor > 1.5 {
                0.2
            } else if input.storage_level < 0.2 && input.max_rack > 0.5 {
                -0.2
            } else {
                0.0
            }
        }
        RewardTerm::WorkloadBalance => -(input.workload - 0.5).abs().min(1.0),
        RewardTerm::FailurePenalty => -((input.new_risk - 0.6).max(0.0).powi(2)).min(5.0) * 3.0,
        RewardTerm::RiskEscalation => {
            // Punishes increasing risk, not just high risk
            if input.new_risk > input.old_risk && input.new_risk > 0.5 {
                -((input.new_risk - input.old_risk) * 5.0).min(1.0)
            } else {
                0.0
            }
        }
        RewardTerm::ActionPenalty => -0.02 * input.action.magnitude(),
        RewardTerm::StorageBonus => match input.action {
            Action::ThermalStorageDischarge if input.max_rack > 0.7 => {
                0.5 * (1.0 - input.storage_level)
            }
            Action::ThermalStorageCharge if input.energy_price_factor < 1.2 => {
                0.3 * input.storage_level
            }
            _ => 0.0,
        },
    }
}

/// Declared base weight per reward term
///
/// These are tuning parameters, not a contract; defaults track the values
/// the simulation was calibrated with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardWeights {
    pub energy_cost: f64,
    pub temperature_control: f64,
    pub rack_safety: f64,
    pub temp_uniformity: f64,
    pub pue_efficiency: f64,
    pub fan_wear: f64,
    pub storage_value: f64,
    pub workload_balance: f64,
    pub failure_penalty: f64,
    pub risk_escalation: f64,
    pub action_penalty: f64,
    pub storage_bonus: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            energy_cost: 1.0,
            temperature_control: 1.5,
            rack_safety: 2.0,
            temp_uniformity: 0.8,
            pue_efficiency: 0.7,
            fan_wear: 0.5,
            storage_value: 0.7,
            workload_balance: 0.5,
            failure_penalty: 3.5,
            risk_escalation: 2.0,
            action_penalty: 1.0,
            storage_bonus: 1.0,
        }
    }
}

impl RewardWeights {
    pub fn base(&self, term: RewardTerm) -> f64 {
        match term {
            RewardTerm::EnergyCost => self.energy_cost,
            RewardTerm::TemperatureControl => self.temperature_control,
            RewardTerm::RackSafety => self.rack_safety,
            RewardTerm::TempUniformity => self.temp_uniformity,
            RewardTerm::PueEfficiency => self.pue_efficiency,
            RewardTerm::FanWear => self.fan_wear,
            RewardTerm::StorageValue => self.storage_value,
            RewardTerm::WorkloadBalance => self.workload_balance,
            RewardTerm::FailurePenalty => self.failure_penalty,
            RewardTerm::RiskEscalation => self.risk_escalation,
            RewardTerm::ActionPenalty => self.action_penalty,
            RewardTerm::StorageBonus => self.storage_bonus,
        }
    }

    /// Contextual multiplier applied on top of the base weight
    ///
    /// Temperature tracking doubles and rack safety triples once the
    /// hottest rack crosses its respective fraction of the normalized range.
    pub fn contextual_multiplier(term: RewardTerm, input: &RewardInput) -> f64 {
        match term {
            RewardTerm::TemperatureControl if input.max_rack > 0.67 => 2.0,
            RewardTerm::RackSafety if input.max_rack > 0.7 => 3.0,
            _ => 1.0,
        }
    }

    /// Effective weight for a term under the current context
    pub fn effective(&self, term: RewardTerm, input: &RewardInput) -> f64 {
        self.base(term) * Self::contextual_multiplier(term, input)
    }
}

/// Running per-term statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RewardStat {
    pub sum: f64,
    pub count: u64,
}

/// Named per-term statistics, as persisted in checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardTermStat {
    pub term: String,
    pub sum: f64,
    pub count: u64,
}

/// Accumulates weighted term contributions and logs periodic summaries
#[derive(Debug, Clone, Default)]
pub struct RewardTracker {
    stats: [RewardStat; RewardTerm::ALL.len()],
}

impl RewardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the total reward for a transition and fold the weighted
    /// contributions into the running statistics
    pub fn total(&mut self, weights: &RewardWeights, input: &RewardInput) -> f64 {
        let mut total = 0.0;
        for (i, term) in RewardTerm::ALL.into_iter().enumerate() {
            let contribution = evaluate(term, input) * weights.effective(term, input);
            self.stats[i].sum += contribution;
            self.stats[i].count += 1;
            total += contribution;
        }
        total
    }

    /// Log the running averages every `SUMMARY_INTERVAL` steps
    pub fn maybe_log(&self, step: u64) {
        if step == 0 || step % SUMMARY_INTERVAL != 0 {
            return;
        }
        for (i, term) in RewardTerm::ALL.into_iter().enumerate() {
            let stat = self.stats[i];
            if stat.count > 0 {
                info!(
                    term = term.name(),
                    average = stat.sum / stat.count as f64,
                    samples = stat.count,
                    "Reward component average"
                );
            }
        }
    }

    /// Snapshot for checkpoint metadata
    pub fn snapshot(&self) -> Vec<RewardTermStat> {
        RewardTerm::ALL
            .into_iter()
            .enumerate()
            .map(|(i, term)| RewardTermStat {
                term: term.name().to_string(),
                sum: self.stats[i].sum,
                count: self.stats[i].count,
            })
            .collect()
    }
}
