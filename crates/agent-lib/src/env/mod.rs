//! Data-center cooling environment simulation
//!
//! This module owns the physical side of the control problem: sensors with
//! bounded random walks, per-rack temperatures, thermal storage, the
//! failure-risk composite, and the emergency override that can replace a
//! requested action when risk turns critical.

mod actions;
mod sensor;
mod simulator;

#[cfg(test)]
mod tests;

pub use actions::{emergency_action, is_valid, valid_actions, ActionGuard};
pub use sensor::Sensor;
pub use simulator::{AppliedAction, Environment, EnvironmentConfig, ThermalStorage};
