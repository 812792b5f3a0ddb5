//! Action validity rules and the emergency override policy
//!
//! The validity filter is independent of the learned policy: it is applied
//! before both exploration and exploitation so the agent can never emit a
//! physically infeasible action.

use crate::models::Action;

/// Physical quantities an action's feasibility depends on
#[derive(Debug, Clone, Copy)]
pub struct ActionGuard {
    pub fan_speed_pct: f64,
    pub storage_level_kwh: f64,
    pub storage_capacity_kwh: f64,
    pub charge_rate_kw: f64,
    pub discharge_rate_kw: f64,
}

/// Whether `action` is physically feasible right now
///
/// Discharge requires at least one discharge-rate unit stored; charge
/// requires at least one charge-rate unit of spare capacity; fan-boost
/// actions require fan speed below 100%. Exactly one unit is feasible.
pub fn is_valid(action: Action, guard: &ActionGuard) -> bool {
    match action {
        Action::ThermalStorageDischarge => guard.storage_level_kwh >= guard.discharge_rate_kw,
        Action::ThermalStorageCharge => {
            guard.storage_capacity_kwh - guard.storage_level_kwh >= guard.charge_rate_kw
        }
        a if a.is_fan_boost() => guard.fan_speed_pct < 100.0,
        _ => true,
    }
}

/// All currently feasible actions, in index order
pub fn valid_actions(guard: &ActionGuard) -> Vec<Action> {
    Action::ALL
        .iter()
        .copied()
        .filter(|a| is_valid(*a, guard))
        .collect()
}

/// Hand-coded escape valve applied when failure risk is critical
///
/// Prefers maximal cooling, then thermal-storage discharge, then maximal
/// fan, falling back to maintain if nothing else is feasible.
pub fn emergency_action(guard: &ActionGuard) -> Action {
    const PRIORITY: [Action; 3] = [
        Action::CoolIncrementLarge,
        Action::ThermalStorageDischarge,
        Action::FanIncrementLarge,
    ];

    PRIORITY
        .into_iter()
        .find(|a| is_valid(*a, guard))
        .unwrap_or(Action::Maintain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> ActionGuard {
        ActionGuard {
            fan_speed_pct: 30.0,
            storage_level_kwh: 300.0,
            storage_capacity_kwh: 1000.0,
            charge_rate_kw: 50.0,
            discharge_rate_kw: 100.0,
        }
    }

    #[test]
    fn test_discharge_requires_one_unit() {
        let mut g = guard();
        g.storage_level_kwh = 99.9;
        assert!(!is_valid(Action::ThermalStorageDischarge, &g));

        // Exactly one discharge-rate unit is valid
        g.storage_level_kwh = 100.0;
        assert!(is_valid(Action::ThermalStorageDischarge, &g));
    }

    #[test]
    fn test_charge_requires_headroom() {
        let mut g = guard();
        g.storage_level_kwh = 960.0;
        assert!(!is_valid(Action::ThermalStorageCharge, &g));

        g.storage_level_kwh = 950.0;
        assert!(is_valid(Action::ThermalStorageCharge, &g));
    }

    #[test]
    fn test_fan_boost_blocked_at_full_speed() {
        let mut g = guard();
        g.fan_speed_pct = 100.0;
        assert!(!is_valid(Action::FanIncrementSmall, &g));
        assert!(!is_valid(Action::FanIncrementLarge, &g));
        // Cooling and maintain remain available
        assert!(is_valid(Action::CoolIncrementLarge, &g));
        assert!(is_valid(Action::Maintain, &g));
    }

    #[test]
    fn test_valid_actions_always_nonempty() {
        let g = ActionGuard {
            fan_speed_pct: 100.0,
            storage_level_kwh: 0.0,
            storage_capacity_kwh: 0.0,
            charge_rate_kw: 50.0,
            discharge_rate_kw: 100.0,
        };
        let valid = valid_actions(&g);
        assert!(valid.contains(&Action::Maintain));
        assert!(!valid.contains(&Action::ThermalStorageDischarge));
        assert!(!valid.contains(&Action::ThermalStorageCharge));
    }

    #[test]
    fn test_emergency_prefers_cooling() {
        assert_eq!(emergency_action(&guard()), Action::CoolIncrementLarge);
    }
}
