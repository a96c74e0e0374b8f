pub mod api;
pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod data;
pub mod export;
pub mod logging;
pub mod secrets;
pub mod sync;
pub mod trigger;
pub mod utils;
