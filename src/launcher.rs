use std::ffi::CString;
use std::io;

use nix::sys::signal::{self, SigmaskHow, Signal};
use nix::unistd::{self, ForkResult, Pid};
use tracing::debug;

use crate::error::{Result, ShellError};
use crate::jobs::{JobState, JobTable};
use crate::signal_handler::{SigchldGuard, SignalLayer};

/// Spawns `args` in a new process group and registers it as a job.
///
/// SIGCHLD stays blocked from before the fork until the job is in the table,
/// so its first status change is always applied to a registered job. A
/// foreground launch returns once the job has stopped or terminated.
pub fn launch(
    jobs: &mut JobTable,
    signals: &SignalLayer,
    command_line: &str,
    args: &[&str],
    state: JobState,
) -> Result<Pid> {
    // everything the child needs is built before forking
    let argv = args
        .iter()
        .copied()
        .map(c_string)
        .collect::<Result<Vec<_>>>()?;
    let Some(program) = argv.first() else {
        return Err(ShellError::NoCommand);
    };
    let exec_failure = format!("msh: {}: ", args[0]);

    let guard = SigchldGuard::block()?;

    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => {
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(guard.previous()), None);
            let _ = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0));
            let err = match unistd::execvp(program, &argv) {
                Err(e) => e,
                Ok(never) => match never {},
            };
            let _ = unistd::write(io::stderr(), exec_failure.as_bytes());
            let _ = unistd::write(io::stderr(), err.desc().as_bytes());
            let _ = unistd::write(io::stderr(), b"\n");
            unsafe { libc::_exit(1) }
        }
        Ok(ForkResult::Parent { child }) => {
            // also set from this side so a signal sent right after we return finds the group
            let _ = unistd::setpgid(child, child);

            if !jobs.insert(child, state, command_line) {
                // untracked children would never be waited for
                let _ = signal::killpg(child, Signal::SIGKILL);
                return Err(ShellError::JobTableFull);
            }
            debug!(pid = %child, ?state, command_line, "job registered");

            if state == JobState::Background {
                if let Some(job_id) = jobs.find_job_id(child) {
                    println!("[{}] {}", job_id, child);
                }
            } else {
                signals.set_foreground(child);
                signals.wait_foreground(&guard, jobs)?;
            }
            Ok(child)
        }
        Err(e) => Err(ShellError::Spawn(e)),
    }
}

fn c_string(arg: &str) -> Result<CString> {
    CString::new(arg)
        .map_err(|_| ShellError::NulInArgument(arg.to_string()))
}
