pub mod broadcast;
pub mod config;
pub mod control;
pub mod hub;
pub mod mqtt;
pub mod telemetry;
