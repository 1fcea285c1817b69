pub mod browser;
pub mod core;
pub mod delivery;
pub mod matcher;
pub mod notify;
pub mod orchestrator;
pub mod rate;
pub mod search;
pub mod session;
pub mod verify;

// --- Primary core exports ---
pub use core::config;
pub use core::config::{load_pilot_config, PilotConfig};
pub use core::types;
pub use core::types::*;

pub use delivery::composer;
pub use matcher::{blacklist, salary, JobMatcher};
pub use orchestrator::Orchestrator;
pub use rate::quota;
pub use rate::RateController;
