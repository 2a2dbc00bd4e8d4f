//! msh - a small POSIX-style shell with job control.

pub mod command;
pub mod config;
pub mod error;
pub mod history;
pub mod jobs;
pub mod launcher;
pub mod prompt;
pub mod shell;
pub mod signal_handler;

pub use error::{Result, ShellError};
pub use shell::{Flow, Shell};
