use std::path::PathBuf;

use clap::Parser;

use crate::history::History;

pub const DEFAULT_MAX_JOBS: u32 = 16;
pub const DEFAULT_MAX_LINE: u32 = 1024;
pub const DEFAULT_MAX_HISTORY: u32 = 10;

/// msh - a small shell with job control
#[derive(Debug, Parser)]
#[command(name = "msh", version)]
pub struct Args {
    /// Maximum number of lines kept in history
    #[arg(
        short = 's',
        long,
        default_value_t = DEFAULT_MAX_HISTORY,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_history: u32,

    /// Maximum number of jobs tracked at once
    #[arg(
        short = 'j',
        long,
        default_value_t = DEFAULT_MAX_JOBS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_jobs: u32,

    /// Maximum length of a command line
    #[arg(
        short = 'l',
        long,
        default_value_t = DEFAULT_MAX_LINE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_line: u32,

    /// File the history is loaded from and saved to
    #[arg(long, value_name = "PATH")]
    pub history_file: Option<PathBuf>,

    /// Do not print a prompt
    #[arg(long)]
    pub no_prompt: bool,
}

impl Args {
    pub fn limits(&self) -> Limits {
        Limits {
            max_jobs: self.max_jobs as usize,
            max_line: self.max_line as usize,
            max_history: self.max_history as usize,
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_file.clone().unwrap_or_else(History::default_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_jobs: usize,
    pub max_line: usize,
    pub max_history: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_jobs: DEFAULT_MAX_JOBS as usize,
            max_line: DEFAULT_MAX_LINE as usize,
            max_history: DEFAULT_MAX_HISTORY as usize,
        }
    }
}
