pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod types;

// Ports for the fetch layer and their infrastructure adapters
pub mod app;
pub mod infra;
