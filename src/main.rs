use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use msh::config::Args;
use msh::history::History;
use msh::signal_handler::{self, SignalLayer};
use msh::Shell;

fn main() -> ExitCode {
    // respects RUST_LOG; silent otherwise
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let limits = args.limits();

    if let Err(e) = signal_handler::install_handlers() {
        eprintln!("msh: {}", e);
        return ExitCode::FAILURE;
    }

    let history = match History::load(args.history_path(), limits.max_history) {
        Ok(history) => history,
        Err(e) => {
            eprintln!("msh: {}", e);
            History::new(limits.max_history)
        }
    };

    let mut shell = Shell::new(limits, history, SignalLayer::process())
        .with_prompt(!args.no_prompt);
    shell.run(io::stdin().lock());

    if let Err(e) = shell.shutdown() {
        eprintln!("msh: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
