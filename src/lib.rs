//! Pathwatcher - shared, rename-aware file watching.

pub mod config;
pub mod display;
pub mod watcher;
