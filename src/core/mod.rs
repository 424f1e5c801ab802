pub mod coerce;
pub mod config;
pub mod credentials;
pub mod directive;
pub mod message;
pub mod orchestrator;
pub mod prompt;
