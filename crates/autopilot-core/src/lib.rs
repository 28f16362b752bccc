pub mod config;
pub mod error;
pub mod io;
pub mod manifest;
pub mod market;
pub mod orchestrator;
pub mod policy;
pub mod store;
pub mod telemetry;
pub mod types;

pub use error::{AutopilotError, Result};
pub use orchestrator::{Autopilot, Collaborators};
