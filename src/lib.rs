//! Onboard telemetry fusion and distribution gateway for a mobile robot.
//!
//! Hardware packets flow through [`sensor_fusion`] into the per-record
//! [`state::SharedState`]; [`gateway::Gateway`] owns the supervised producers
//! and the reconnecting clients, and [`dashboard`] exposes the HTTP and
//! WebSocket surface.

pub mod broadcast;
pub mod cleanup;
pub mod clients;
pub mod command;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod filters;
pub mod gateway;
pub mod health_monitor;
pub mod live_status;
pub mod peripherals;
pub mod restart_manager;
pub mod sensor_fusion;
pub mod sensors;
pub mod session;
pub mod state;
pub mod types;

pub use error::{GatewayError, Result};
