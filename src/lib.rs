pub mod agent;
pub mod cadence;
pub mod constants;
pub mod engine;
pub mod error;
pub mod food;
pub mod grid;
pub mod host;
pub mod hub;
pub mod mirror;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod snake;
pub mod types;
