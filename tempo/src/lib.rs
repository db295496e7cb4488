//! Pomodoro session engine with persisted, restart-safe state.

pub mod config;
pub mod engine;
pub mod history;
pub mod ipc;
pub mod mock;
pub mod notify;
pub mod persistence;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod store;
