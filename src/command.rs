use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::{Result, ShellError};
use crate::history::History;
use crate::jobs::{JobState, JobTable};

/// What ended a job on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Sequential,
    Background,
    None,
}

impl Separator {
    pub fn job_state(self) -> JobState {
        match self {
            Separator::Background => JobState::Background,
            Separator::Sequential | Separator::None => JobState::Foreground,
        }
    }
}

/// Cursor over the jobs of one command line.
///
/// Each item is the trimmed job text and the separator that terminated it.
/// Runs of separators collapse and whitespace-only jobs are skipped.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(line: &'a str) -> Self {
        Tokenizer { rest: line }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = (&'a str, Separator);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.rest.trim().is_empty() {
                self.rest = "";
                return None;
            }

            let (job, separator) = match self.rest.find(['&', ';']) {
                Some(at) => {
                    let separator = if self.rest.as_bytes()[at] == b'&' {
                        Separator::Background
                    } else {
                        Separator::Sequential
                    };
                    let job = &self.rest[..at];
                    self.rest = self.rest[at + 1..].trim_start_matches(['&', ';']);
                    (job, separator)
                }
                None => {
                    let job = self.rest;
                    self.rest = "";
                    (job, Separator::None)
                }
            };

            let job = job.trim();
            if !job.is_empty() {
                return Some((job, separator));
            }
        }
    }
}

/// Splits one job into arguments on runs of spaces and tabs.
/// An empty result means there is no command to run.
pub fn split_args(job: &str) -> Vec<&str> {
    job.split([' ', '\t', '\n'])
        .filter(|arg| !arg.is_empty())
        .collect()
}

/// Signals the `kill` builtin accepts, by their conventional numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Interrupt,
    Kill,
    Continue,
    Stop,
}

impl KillSignal {
    pub fn from_number(number: &str) -> Option<Self> {
        match number.parse::<u32>().ok()? {
            2 => Some(KillSignal::Interrupt),
            9 => Some(KillSignal::Kill),
            18 => Some(KillSignal::Continue),
            19 => Some(KillSignal::Stop),
            _ => None,
        }
    }

    pub fn signal(self) -> Signal {
        match self {
            KillSignal::Interrupt => Signal::SIGINT,
            KillSignal::Kill => Signal::SIGKILL,
            KillSignal::Continue => Signal::SIGCONT,
            KillSignal::Stop => Signal::SIGSTOP,
        }
    }
}

/// The negated pid, which addresses the whole process group led by `pid`.
pub fn process_group(pid: Pid) -> Pid {
    Pid::from_raw(-pid.as_raw())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    ListJobs,
    ShowHistory,
    ReplayHistory { index: usize, line: String },
    SetBackground(Pid),
    SetForeground(Pid),
    SendSignal { signal: KillSignal, pid: Pid },
}

impl Builtin {
    /// Classifies a parsed job. `Ok(None)` means it should be spawned as an
    /// external program; an unresolvable `!N`, `bg` or `fg` target falls
    /// through to that case.
    pub fn classify(args: &[&str], jobs: &JobTable, history: &History) -> Result<Option<Self>> {
        let builtin = match args {
            ["jobs"] => Some(Builtin::ListJobs),
            ["history"] => Some(Builtin::ShowHistory),
            [event] if event.starts_with('!') => replay_target(&event[1..], history),
            [verb @ ("bg" | "fg"), target] => resolve_target(target, jobs).map(|pid| {
                if *verb == "bg" {
                    Builtin::SetBackground(pid)
                } else {
                    Builtin::SetForeground(pid)
                }
            }),
            ["kill", number, pid] => {
                let signal = KillSignal::from_number(number)
                    .ok_or(ShellError::InvalidSignal)?;
                let pid = pid
                    .parse::<i32>()
                    .ok()
                    .filter(|raw| *raw > 0)
                    .ok_or_else(|| ShellError::InvalidPid(pid.to_string()))?;
                Some(Builtin::SendSignal {
                    signal,
                    pid: Pid::from_raw(pid),
                })
            }
            _ => None,
        };
        Ok(builtin)
    }
}

fn replay_target(digits: &str, history: &History) -> Option<Builtin> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse::<usize>().ok()?;
    history.get(index).map(|line| Builtin::ReplayHistory {
        index,
        line: line.to_string(),
    })
}

fn resolve_target(target: &str, jobs: &JobTable) -> Option<Pid> {
    match target.strip_prefix('%') {
        Some(job_id) => jobs.find_pid(job_id.parse().ok()?),
        None => {
            let pid = Pid::from_raw(target.parse().ok()?);
            jobs.find_job_id(pid).map(|_| pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(line: &str) -> Vec<(&str, Separator)> {
        Tokenizer::new(line).collect()
    }

    #[test]
    fn splits_on_each_separator_kind() {
        assert_eq!(
            tokens("a; b & c"),
            vec![
                ("a", Separator::Sequential),
                ("b", Separator::Background),
                ("c", Separator::None),
            ]
        );
    }

    #[test]
    fn collapses_consecutive_separators() {
        assert_eq!(
            tokens("a;;&b"),
            vec![("a", Separator::Sequential), ("b", Separator::None)]
        );
    }

    #[test]
    fn trailing_separator_and_whitespace_yield_no_extra_job() {
        assert_eq!(
            tokens("/bin/sleep 5 &   "),
            vec![("/bin/sleep 5", Separator::Background)]
        );
        assert_eq!(
            tokens("a ; ; b"),
            vec![("a", Separator::Sequential), ("b", Separator::None)]
        );
        assert!(tokens("").is_empty());
        assert!(tokens("  \t ").is_empty());
        assert!(tokens(";&;").is_empty());
    }

    #[test]
    fn separators_map_to_launch_states() {
        assert_eq!(Separator::Background.job_state(), JobState::Background);
        assert_eq!(Separator::Sequential.job_state(), JobState::Foreground);
        assert_eq!(Separator::None.job_state(), JobState::Foreground);
    }

    #[test]
    fn argument_splitting() {
        assert_eq!(split_args("ls  -l\t/tmp"), vec!["ls", "-l", "/tmp"]);
        assert!(split_args("").is_empty());
        assert!(split_args(" \t ").is_empty());
    }

    fn table_with(pid: i32) -> JobTable {
        let mut jobs = JobTable::new(4);
        jobs.insert(Pid::from_raw(pid), JobState::Suspended, "/bin/sleep 100");
        jobs
    }

    #[test]
    fn simple_builtins() {
        let jobs = JobTable::new(1);
        let history = History::new(1);
        assert_eq!(
            Builtin::classify(&["jobs"], &jobs, &history).unwrap(),
            Some(Builtin::ListJobs)
        );
        assert_eq!(
            Builtin::classify(&["history"], &jobs, &history).unwrap(),
            Some(Builtin::ShowHistory)
        );
        // extra arguments make them ordinary programs
        assert_eq!(
            Builtin::classify(&["jobs", "-l"], &jobs, &history).unwrap(),
            None
        );
        assert_eq!(
            Builtin::classify(&["/bin/ls"], &jobs, &history).unwrap(),
            None
        );
    }

    #[test]
    fn history_replay_resolves_or_falls_through() {
        let jobs = JobTable::new(1);
        let mut history = History::new(3);
        history.append("/bin/echo hi");

        assert_eq!(
            Builtin::classify(&["!1"], &jobs, &history).unwrap(),
            Some(Builtin::ReplayHistory {
                index: 1,
                line: "/bin/echo hi".to_string(),
            })
        );
        assert_eq!(Builtin::classify(&["!2"], &jobs, &history).unwrap(), None);
        assert_eq!(Builtin::classify(&["!x"], &jobs, &history).unwrap(), None);
        assert_eq!(Builtin::classify(&["!"], &jobs, &history).unwrap(), None);
    }

    #[test]
    fn bg_fg_by_job_id_and_pid() {
        let jobs = table_with(4321);
        let history = History::new(1);
        let pid = Pid::from_raw(4321);

        assert_eq!(
            Builtin::classify(&["bg", "%1"], &jobs, &history).unwrap(),
            Some(Builtin::SetBackground(pid))
        );
        assert_eq!(
            Builtin::classify(&["fg", "4321"], &jobs, &history).unwrap(),
            Some(Builtin::SetForeground(pid))
        );
    }

    #[test]
    fn unresolvable_bg_fg_targets_are_not_builtins() {
        let jobs = table_with(4321);
        let history = History::new(1);
        assert_eq!(
            Builtin::classify(&["bg", "%2"], &jobs, &history).unwrap(),
            None
        );
        assert_eq!(
            Builtin::classify(&["fg", "999"], &jobs, &history).unwrap(),
            None
        );
        assert_eq!(
            Builtin::classify(&["fg", "%abc"], &jobs, &history).unwrap(),
            None
        );
        assert_eq!(Builtin::classify(&["fg"], &jobs, &history).unwrap(), None);
    }

    #[test]
    fn kill_accepts_only_known_signals() {
        let jobs = JobTable::new(1);
        let history = History::new(1);

        assert!(matches!(
            Builtin::classify(&["kill", "7", "1234"], &jobs, &history),
            Err(ShellError::InvalidSignal)
        ));
        assert!(matches!(
            Builtin::classify(&["kill", "nine", "1234"], &jobs, &history),
            Err(ShellError::InvalidSignal)
        ));

        let args = ["kill", "9", "1234"];
        assert_eq!(
            Builtin::classify(&args, &jobs, &history).unwrap(),
            Some(Builtin::SendSignal {
                signal: KillSignal::Kill,
                pid: Pid::from_raw(1234),
            })
        );
        assert_eq!(process_group(Pid::from_raw(1234)), Pid::from_raw(-1234));
    }

    #[test]
    fn kill_rejects_non_positive_pids() {
        let jobs = JobTable::new(1);
        let history = History::new(1);
        assert!(matches!(
            Builtin::classify(&["kill", "9", "0"], &jobs, &history),
            Err(ShellError::InvalidPid(_))
        ));
        assert!(matches!(
            Builtin::classify(&["kill", "9", "abc"], &jobs, &history),
            Err(ShellError::InvalidPid(_))
        ));
    }

    #[test]
    fn kill_signal_numbers() {
        let known = [
            ("2", Signal::SIGINT),
            ("9", Signal::SIGKILL),
            ("18", Signal::SIGCONT),
            ("19", Signal::SIGSTOP),
        ];
        for (number, signal) in known {
            let parsed = KillSignal::from_number(number).map(KillSignal::signal);
            assert_eq!(parsed, Some(signal));
        }
        assert_eq!(KillSignal::from_number("15"), None);
    }
}
