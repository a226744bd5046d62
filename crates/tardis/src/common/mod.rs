pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod setup;
