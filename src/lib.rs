pub mod app;
pub mod config;
pub mod download;
pub mod error;
pub mod plugins;
pub mod prompt;
pub mod reporter;
pub mod utils;
