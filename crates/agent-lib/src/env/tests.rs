//! Environment simulation tests

use super::*;
use crate::models::{Action, OutsideConditions, StateLayout};

fn test_config() -> EnvironmentConfig {
    EnvironmentConfig {
        seed: Some(42),
        ..Default::default()
    }
}

#[test]
fn test_initial_state_matches_layout() {
    let env = Environment::new(test_config());
    let layout = env.layout();

    let state = env.normalized_state();
    assert_eq!(state.len(), layout.len());
    assert_eq!(state.len(), 20);
    assert!(state.iter().all(|v| v.is_finite()));
}

#[test]
fn test_cool_increment_large_scenario() {
    // Fresh environment: ambient 25, target 22, racks 22, fan 30, risk 0
    let mut env = Environment::new(test_config());
    assert_eq!(env.failure_risk(), 0.0);

    let ambient_before = env.ambient_temp_c();
    let fan_before = env.fan_speed_pct();
    let energy_before = env.energy_kw();

    let outcome = env.execute_action(Action::CoolIncrementLarge);

    assert!(!outcome.overridden);
    assert_eq!(outcome.applied, Action::CoolIncrementLarge);
    assert!(env.ambient_temp_c() < ambient_before);
    let fan_delta = Action::CoolIncrementLarge.effect().fan;
    assert!((env.fan_speed_pct() - (fan_before + fan_delta).clamp(0.0, 100.0)).abs() < 1e-9);
    assert!(env.energy_kw() > energy_before);
    assert_eq!(env.failure_risk(), 0.0);
}

#[test]
fn test_emergency_override_replaces_request() {
    let mut env = Environment::new(test_config());
    for i in 0..10 {
        env.set_rack_temp(i, 35.0);
    }
    assert!(env.failure_risk() > 0.9);

    let outcome = env.execute_action(Action::CoolDecrementLarge);
    assert!(outcome.overridden);
    assert_eq!(outcome.requested, Action::CoolDecrementLarge);
    assert_eq!(outcome.applied, Action::CoolIncrementLarge);
}

#[test]
fn test_failure_risk_monotone_in_rack_temp() {
    let mut env = Environment::new(test_config());
    let mut last_risk = 0.0;

    for temp in [26.0, 28.0, 30.0, 32.0, 34.0] {
        env.set_rack_temp(0, temp);
        let risk = env.failure_risk();
        assert!(
            risk >= last_risk,
            "risk {} dropped below {} at {}C",
            risk,
            last_risk,
            temp
        );
        last_risk = risk;
    }
    assert!(last_risk > 0.0);
}

#[test]
fn test_sustained_danger_amplifies_risk() {
    let mut env = Environment::new(test_config());

    env.set_rack_temp(0, 30.0);
    let first = env.failure_risk();
    assert!(first > 0.6 && first < 1.0);

    // Holding the same temperature accumulates danger steps
    for _ in 0..5 {
        env.set_rack_temp(0, 30.0);
    }
    assert!(env.failure_risk() > first);
}

#[test]
fn test_storage_discharge_bounded() {
    let mut env = Environment::new(test_config());
    let before = env.storage().current_kwh;

    env.execute_action(Action::ThermalStorageDischarge);
    let after = env.storage().current_kwh;
    assert!((before - after - env.storage().discharge_rate_kwh).abs() < 1e-9);

    // Draining repeatedly never goes negative
    for _ in 0..20 {
        env.execute_action(Action::ThermalStorageDischarge);
    }
    assert!(env.storage().current_kwh >= 0.0);
}

#[test]
fn test_storage_charge_bounded_by_capacity() {
    let mut env = Environment::new(test_config());

    for _ in 0..100 {
        env.execute_action(Action::ThermalStorageCharge);
    }
    assert!(env.storage().current_kwh <= env.storage().capacity_kwh);
}

#[test]
fn test_fan_speed_clamped_at_full() {
    let mut env = Environment::new(test_config());

    for _ in 0..20 {
        env.execute_action(Action::FanIncrementLarge);
    }
    assert!(env.fan_speed_pct() <= 100.0);
    // The validity filter stops offering fan boosts at the limit
    if env.fan_speed_pct() >= 100.0 {
        assert!(!env.valid_actions().contains(&Action::FanIncrementLarge));
    }
}

#[test]
fn test_peak_price_on_extreme_outside_temp() {
    let mut env = Environment::new(test_config());
    let config = env.config().clone();

    env.apply_conditions(OutsideConditions {
        temperature_c: 30.0,
        humidity_pct: 40.0,
    });
    assert_eq!(env.energy_price(), config.peak_energy_price);

    env.apply_conditions(OutsideConditions {
        temperature_c: 2.0,
        humidity_pct: 40.0,
    });
    assert_eq!(env.energy_price(), config.peak_energy_price);

    env.apply_conditions(OutsideConditions {
        temperature_c: 15.0,
        humidity_pct: 40.0,
    });
    assert_eq!(env.energy_price(), config.base_energy_price);
}

#[test]
fn test_operator_overrides_are_clamped() {
    let mut env = Environment::new(test_config());

    env.set_target_temperature(50.0);
    let state = env.normalized_state();
    // Target sensor is bounded to 18-28C
    assert!(state[StateLayout::TARGET_TEMP] <= 1.0);

    env.set_workload(2.0);
    let state = env.normalized_state();
    assert!(state[StateLayout::WORKLOAD] <= 1.0);
}

#[test]
fn test_tick_keeps_state_finite() {
    let mut env = Environment::new(test_config());

    for _ in 0..500 {
        env.tick();
        let state = env.normalized_state();
        assert!(state.iter().all(|v| v.is_finite()));
        assert!((0.0..=1.0).contains(&env.failure_risk()));
    }
}

#[test]
fn test_status_reflects_sensors() {
    let mut env = Environment::new(test_config());
    let outcome = env.execute_action(Action::Maintain);

    let status = env.status(Some(outcome.applied));
    assert_eq!(status.action, Some(Action::Maintain));
    assert_eq!(status.rack_temperatures_c.len(), 10);
    assert!((status.ambient_temp_c - env.ambient_temp_c()).abs() < 1e-12);
    assert!((status.failure_risk - env.failure_risk()).abs() < 1e-12);
}
