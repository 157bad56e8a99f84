//! Traffic Service Configuration
//!
//! Store layout, congestion thresholds, ingestion tuning and HTTP settings,
//! loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `TRAFFIC_CONFIG` environment variable (path to TOML file)
//! 2. `traffic_config.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! The loaded config is passed by value to the components that need it.
//! There is no process-wide config singleton.

mod traffic_config;
pub mod defaults;
pub mod validation;

pub use traffic_config::*;
