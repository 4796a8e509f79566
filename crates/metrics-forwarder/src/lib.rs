pub mod api;
pub mod app;
pub mod config;
pub mod delivery;
pub mod logging;
pub mod metrics;
