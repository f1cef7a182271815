//! # EV Load Balancer
//!
//! Keeps an EV charger inside a household power budget. Each poll cycle reads
//! the house and charger sensors, decides a phase count and current limit for
//! the selected charging mode, and applies the decision to the charger outputs
//! with a confirmed, ordered actuation protocol.
//!
//! ## Architecture
//!
//! - `balancer`: decision engine (modes, power budget, phase and current targets)
//! - `coordinator`: polling cycle, actuation protocol and snapshot publication
//! - `services`: operator actions (mode selection, manual charging request)
//! - `host`: traits for reading sensors, commanding outputs and watching changes
//! - `store`: in-memory entity registry implementing the host traits
//! - `config`: YAML configuration with validation
//! - `logging`: structured logging and tracing
//! - `web`: HTTP status, event stream and entity ingestion

pub mod balancer;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod logging;
pub mod services;
pub mod store;
#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used types
pub use balancer::{ChargingMode, LoadBalancer};
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{BalancerError, Result};
