//! Command-line interface components
//!
//! Argument parsing and the handlers behind each subcommand.

pub mod args;
pub mod commands;

pub use args::{
    CacheAction, CacheArgs, Cli, Commands, GlobalArgs, InitArgs, ServeArgs, TasksAction, TasksArgs,
};
pub use commands::{handle_cache, handle_init, handle_serve, handle_tasks, runtime_config};
