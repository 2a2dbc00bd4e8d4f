use std::fmt;
use std::io::{self, BufRead};

use colored::Colorize;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::command::{process_group, split_args, Builtin, Tokenizer};
use crate::config::Limits;
use crate::error::{Result, ShellError};
use crate::history::History;
use crate::jobs::{JobState, JobTable};
use crate::launcher;
use crate::prompt::Prompt;
use crate::signal_handler::{SigchldGuard, SignalLayer};

/// How deep `!N` may replay a line that itself replays history.
const MAX_REPLAY_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

pub struct Shell {
    jobs: JobTable,
    history: History,
    signals: SignalLayer,
    limits: Limits,
    prompt: Prompt,
}

impl Shell {
    pub fn new(limits: Limits, history: History, signals: SignalLayer) -> Self {
        Self {
            jobs: JobTable::new(limits.max_jobs),
            history,
            signals,
            limits,
            prompt: Prompt::new(true),
        }
    }

    pub fn with_prompt(mut self, enabled: bool) -> Self {
        self.prompt = Prompt::new(enabled);
        self
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn signals(&self) -> SignalLayer {
        self.signals
    }

    /// Applies pending child notifications to the job table.
    pub fn refresh(&mut self) -> Result<()> {
        self.signals.drain(&mut self.jobs)
    }

    /// Runs every job on `line` in order.
    ///
    /// Only an aborted spawn comes back as an error; everything else is
    /// reported here and evaluation moves on to the next job.
    pub fn evaluate(&mut self, line: &str) -> Result<Flow> {
        self.evaluate_at_depth(line, 0)
    }

    fn evaluate_at_depth(&mut self, line: &str, depth: usize) -> Result<Flow> {
        if line.len() > self.limits.max_line {
            report(ShellError::LineTooLong {
                limit: self.limits.max_line,
            });
            return Ok(Flow::Continue);
        }

        for (text, separator) in Tokenizer::new(line) {
            let args = split_args(text);
            if args.is_empty() {
                continue;
            }
            if args.contains(&"exit") {
                return Ok(Flow::Terminate);
            }

            self.refresh()?;
            if self.jobs.is_full() {
                report(ShellError::JobTableFull);
                continue;
            }

            let builtin = match Builtin::classify(&args, &self.jobs, &self.history) {
                Ok(builtin) => builtin,
                Err(e) => {
                    self.history.append(text);
                    report(e);
                    continue;
                }
            };
            if !matches!(builtin, Some(Builtin::ReplayHistory { .. })) {
                self.history.append(text);
            }

            match builtin {
                Some(builtin) => {
                    if self.run_builtin(builtin, depth)? == Flow::Terminate {
                        return Ok(Flow::Terminate);
                    }
                }
                None => {
                    let state = separator.job_state();
                    match launcher::launch(&mut self.jobs, &self.signals, text, &args, state) {
                        Ok(pid) => debug!(%pid, "launched"),
                        Err(e) if e.aborts_line() => return Err(e),
                        Err(e) => report(e),
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn run_builtin(&mut self, builtin: Builtin, depth: usize) -> Result<Flow> {
        match builtin {
            Builtin::ListJobs => {
                for job in self.jobs.iter() {
                    println!("{}", job);
                }
            }
            Builtin::ShowHistory => self.history.list(),
            Builtin::ReplayHistory { line, .. } => {
                println!("{}", line);
                if depth >= MAX_REPLAY_DEPTH {
                    report(ShellError::ReplayTooDeep);
                    return Ok(Flow::Continue);
                }
                return self.evaluate_at_depth(&line, depth + 1);
            }
            Builtin::SetBackground(pid) => {
                let _guard = SigchldGuard::block()?;
                self.jobs.set_state(pid, JobState::Background);
                resume(pid);
            }
            Builtin::SetForeground(pid) => {
                let guard = SigchldGuard::block()?;
                self.jobs.set_state(pid, JobState::Foreground);
                self.signals.set_foreground(pid);
                resume(pid);
                self.signals.wait_foreground(&guard, &mut self.jobs)?;
            }
            Builtin::SendSignal { signal, pid } => {
                if let Err(e) = signal::kill(process_group(pid), signal.signal()) {
                    eprintln!("kill: ({}) - {}", pid, e.desc());
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Reads lines until end of input or an `exit`.
    pub fn run<R: BufRead>(&mut self, mut input: R) {
        loop {
            if let Err(e) = self.refresh() {
                warn!("could not refresh jobs: {}", e);
            }
            self.prompt.display();

            let mut buf = String::new();
            match input.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = buf.strip_suffix('\n').unwrap_or(&buf);
                    if line.is_empty() {
                        continue;
                    }
                    if !keep_reading(self.evaluate(line)) {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    report(e);
                    break;
                }
            }
        }
    }

    /// Waits for every background job to finish, then saves history.
    pub fn shutdown(mut self) -> Result<()> {
        self.signals.reap_background(&mut self.jobs)?;
        self.history.save()
    }
}

/// Whether the session reads another line after `outcome`. A failed line is
/// reported and the session carries on.
fn keep_reading(outcome: Result<Flow>) -> bool {
    match outcome {
        Ok(flow) => flow == Flow::Continue,
        Err(e) => {
            report(e);
            true
        }
    }
}

fn resume(pid: Pid) {
    if let Err(e) = signal::kill(process_group(pid), Signal::SIGCONT) {
        warn!(%pid, "failed to continue job: {}", e);
    }
}

fn report(error: impl fmt::Display) {
    eprintln!("{} {}", "error:".red().bold(), error);
}
