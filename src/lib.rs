pub mod configuration;
pub mod observability;
pub mod runner;
