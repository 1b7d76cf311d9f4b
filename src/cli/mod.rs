//! Command-line interface components
//!
//! This module contains CLI-specific code for the job aggregator: argument
//! parsing and the command handlers that drive the engine.

pub mod args;
pub mod commands;

pub use args::{
    BatchArgs, Cli, Commands, ConfigAction, ConfigArgs, GlobalArgs, QueueArgs, SearchArgs,
};
pub use commands::{
    build_engine, handle_batch, handle_config, handle_queue, handle_schedule, handle_search,
    handle_stats, handle_warm,
};
