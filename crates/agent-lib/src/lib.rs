//! Core library for the data-center cooling control agent
//!
//! This crate provides:
//! - Thermal/energy environment simulation with safety overrides
//! - Online state normalization and prioritized experience replay
//! - A trainable value-estimator pair with noisy-layer exploration
//! - The double-DQN training/control loop
//! - Checkpoint persistence, health checks and observability

pub mod checkpoint;
pub mod control;
pub mod env;
pub mod health;
pub mod learner;
pub mod models;
pub mod observability;
pub mod transport;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
