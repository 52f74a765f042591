pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod service;
pub mod signals;
pub mod state_machine;
pub mod template;
