pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod hexagram;
pub mod host;
pub mod logging;
pub mod state;
pub mod tables;
