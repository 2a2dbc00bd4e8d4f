//! Asynchronous half of job control.
//!
//! The handlers installed here never allocate and never touch the job table.
//! SIGCHLD reaps changed children into a fixed-size notification ring and
//! clears the foreground cell; the main loop drains the ring with SIGCHLD
//! blocked and applies each notification to the [`JobTable`].
//!
//! The ring has exactly one producer (the SIGCHLD handler, which the kernel
//! never nests with itself) and one consumer (the main loop). The shell is
//! single-threaded, so the two never run at the same time on different CPUs.

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::error::{Result, ShellError};
use crate::jobs::{JobState, JobTable};

const RING_CAPACITY: usize = 64;

/// A child status change, as reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    Stopped(Pid),
    Terminated(Pid),
    Continued(Pid),
}

impl ChildEvent {
    pub fn from_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Stopped(pid, _) => Some(ChildEvent::Stopped(pid)),
            WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _) => {
                Some(ChildEvent::Terminated(pid))
            }
            WaitStatus::Continued(pid) => Some(ChildEvent::Continued(pid)),
            _ => None,
        }
    }

    pub fn pid(self) -> Pid {
        match self {
            ChildEvent::Stopped(pid) | ChildEvent::Terminated(pid) | ChildEvent::Continued(pid) => {
                pid
            }
        }
    }

    fn encode(self) -> u64 {
        let kind = match self {
            ChildEvent::Stopped(_) => 1,
            ChildEvent::Terminated(_) => 2,
            ChildEvent::Continued(_) => 3,
        };
        ((self.pid().as_raw() as u32 as u64) << 8) | kind
    }

    fn decode(word: u64) -> Option<Self> {
        let pid = Pid::from_raw((word >> 8) as u32 as i32);
        match word & 0xff {
            1 => Some(ChildEvent::Stopped(pid)),
            2 => Some(ChildEvent::Terminated(pid)),
            3 => Some(ChildEvent::Continued(pid)),
            _ => None,
        }
    }
}

/// Pre-allocated single-producer/single-consumer queue of child events.
struct NotificationRing {
    slots: [AtomicU64; RING_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl NotificationRing {
    const fn new() -> Self {
        NotificationRing {
            slots: [const { AtomicU64::new(0) }; RING_CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(self.head.load(Ordering::Acquire)) >= RING_CAPACITY
    }

    fn push(&self, event: ChildEvent) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        self.slots[tail % RING_CAPACITY].store(event.encode(), Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    fn pop(&self) -> Option<ChildEvent> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let word = self.slots[head % RING_CAPACITY].load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        ChildEvent::decode(word)
    }
}

/// State shared between the handlers and the main loop.
pub struct Mailbox {
    foreground: AtomicI32,
    ring: NotificationRing,
}

impl Mailbox {
    pub const fn new() -> Self {
        Mailbox {
            foreground: AtomicI32::new(0),
            ring: NotificationRing::new(),
        }
    }

    fn foreground(&self) -> Option<Pid> {
        match self.foreground.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    fn clear_foreground_if(&self, pid: Pid) {
        let _ = self.foreground.compare_exchange(
            pid.as_raw(),
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Reaps every changed child without blocking. Stops early when the ring
    /// fills; the remaining children stay waitable for the main loop.
    fn reap(&self) {
        while !self.ring.is_full() {
            let status = match wait::waitpid(
                Pid::from_raw(-1),
                Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED),
            ) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(status) => status,
            };
            if let Some(event) = ChildEvent::from_status(status) {
                if let ChildEvent::Stopped(pid) | ChildEvent::Terminated(pid) = event {
                    self.clear_foreground_if(pid);
                }
                self.ring.push(event);
            }
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

static MAILBOX: Mailbox = Mailbox::new();

extern "C" fn sigchld_handler(_: libc::c_int) {
    let saved = Errno::last_raw();
    MAILBOX.reap();
    Errno::set_raw(saved);
}

extern "C" fn sigint_handler(_: libc::c_int) {
    let saved = Errno::last_raw();
    match MAILBOX.foreground() {
        Some(pid) => {
            let _ = signal::killpg(pid, Signal::SIGINT);
        }
        None => {
            // nobody to forward to: let the interrupt take the shell's own group down
            let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            let _ = unsafe { signal::sigaction(Signal::SIGINT, &default) };
            let _ = signal::killpg(unistd::getpgrp(), Signal::SIGINT);
        }
    }
    Errno::set_raw(saved);
}

extern "C" fn sigtstp_handler(_: libc::c_int) {
    let saved = Errno::last_raw();
    match MAILBOX.foreground() {
        Some(pid) => {
            let _ = signal::killpg(pid, Signal::SIGTSTP);
        }
        None => {
            let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            let _ = unsafe { signal::sigaction(Signal::SIGTSTP, &default) };
            let _ = signal::killpg(unistd::getpgrp(), Signal::SIGTSTP);

            // the pending stop lands as soon as it is unblocked; we resume here after SIGCONT
            let mut tstp = SigSet::empty();
            tstp.add(Signal::SIGTSTP);
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&tstp), None);

            let _ = unsafe { signal::sigaction(Signal::SIGTSTP, &handler_action(sigtstp_handler)) };
        }
    }
    Errno::set_raw(saved);
}

fn handler_action(handler: extern "C" fn(libc::c_int)) -> SigAction {
    SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    )
}

/// Installs the SIGINT, SIGTSTP and SIGCHLD handlers for the whole process.
pub fn install_handlers() -> Result<()> {
    let handlers: [(Signal, &'static str, extern "C" fn(libc::c_int)); 3] = [
        (Signal::SIGINT, "SIGINT", sigint_handler),
        (Signal::SIGTSTP, "SIGTSTP", sigtstp_handler),
        (Signal::SIGCHLD, "SIGCHLD", sigchld_handler),
    ];

    for (sig, name, handler) in handlers {
        unsafe { signal::sigaction(sig, &handler_action(handler)) }
            .map_err(|source| ShellError::HandlerInstall {
                signal: name,
                source,
            })?;
    }
    Ok(())
}

/// Blocks SIGCHLD for the calling thread until dropped.
pub struct SigchldGuard {
    previous: SigSet,
}

impl SigchldGuard {
    pub fn block() -> Result<Self> {
        let mut chld = SigSet::empty();
        chld.add(Signal::SIGCHLD);
        let mut previous = SigSet::empty();
        signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&chld), Some(&mut previous))
            .map_err(ShellError::Mask)?;
        Ok(SigchldGuard { previous })
    }

    /// The mask that was in effect before blocking.
    pub fn previous(&self) -> &SigSet {
        &self.previous
    }
}

impl Drop for SigchldGuard {
    fn drop(&mut self) {
        if let Err(e) = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None)
        {
            warn!("failed to restore signal mask: {}", e);
        }
    }
}

/// The main loop's view of the mailbox.
#[derive(Clone, Copy)]
pub struct SignalLayer {
    mailbox: &'static Mailbox,
}

impl SignalLayer {
    /// The layer fed by the process-wide handlers.
    pub fn process() -> Self {
        SignalLayer { mailbox: &MAILBOX }
    }

    /// A layer over a private mailbox that no handler writes to.
    pub fn with_mailbox(mailbox: &'static Mailbox) -> Self {
        SignalLayer { mailbox }
    }

    pub fn foreground(&self) -> Option<Pid> {
        self.mailbox.foreground()
    }

    /// Marks `pid` as the job the main loop is waiting on.
    pub fn set_foreground(&self, pid: Pid) {
        self.mailbox.foreground.store(pid.as_raw(), Ordering::SeqCst);
    }

    pub fn clear_foreground(&self) {
        self.mailbox.foreground.store(0, Ordering::SeqCst);
    }

    /// Applies queued notifications to the table, then reaps any changed
    /// children the handler left behind.
    pub fn drain(&self, jobs: &mut JobTable) -> Result<()> {
        let _guard = SigchldGuard::block()?;
        self.drain_masked(jobs);
        Ok(())
    }

    fn drain_masked(&self, jobs: &mut JobTable) {
        while let Some(event) = self.mailbox.ring.pop() {
            self.apply(event, jobs);
        }
        loop {
            match wait::waitpid(
                Pid::from_raw(-1),
                Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED),
            ) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(status) => {
                    if let Some(event) = ChildEvent::from_status(status) {
                        self.apply(event, jobs);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("waitpid failed while draining: {}", e);
                    break;
                }
            }
        }
    }

    /// One step of the job state machine.
    ///
    /// A continued job only leaves `Suspended`, and becomes `Background`: the
    /// `fg` and `bg` builtins set the state they want before resuming a job,
    /// so a resume never claims the foreground on its own.
    pub fn apply(&self, event: ChildEvent, jobs: &mut JobTable) {
        debug!(?event, "child status changed");
        match event {
            ChildEvent::Stopped(pid) => {
                jobs.set_state(pid, JobState::Suspended);
                self.mailbox.clear_foreground_if(pid);
            }
            ChildEvent::Terminated(pid) => {
                jobs.remove(pid);
                self.mailbox.clear_foreground_if(pid);
            }
            ChildEvent::Continued(pid) => {
                if jobs.get(pid).map(|job| job.state) == Some(JobState::Suspended) {
                    jobs.set_state(pid, JobState::Background);
                }
            }
        }
    }

    /// Blocks until no job is left running in the background. Stopped jobs
    /// count as settled so a suspended job cannot hang shutdown.
    pub fn reap_background(&self, jobs: &mut JobTable) -> Result<()> {
        let _guard = SigchldGuard::block()?;
        self.drain_masked(jobs);
        while jobs.has_any_background() {
            match wait::waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WUNTRACED)) {
                Ok(status) => {
                    if let Some(event) = ChildEvent::from_status(status) {
                        self.apply(event, jobs);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("stopped waiting for background jobs: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Sleeps until the foreground cell is cleared. The caller must hold a
    /// [`SigchldGuard`]; SIGCHLD is only let through inside `sigsuspend`, so
    /// no notification slips in between the check and the sleep.
    pub fn wait_foreground(&self, guard: &SigchldGuard, jobs: &mut JobTable) -> Result<()> {
        let mut open = *guard.previous();
        open.remove(Signal::SIGCHLD);
        loop {
            self.drain_masked(jobs);
            let Some(pid) = self.foreground() else {
                return Ok(());
            };
            // a foreground job that vanished without a notification can never clear the cell
            if jobs.get(pid).is_none() {
                self.clear_foreground();
                return Ok(());
            }
            let mask: &libc::sigset_t = open.as_ref();
            let rc = unsafe { libc::sigsuspend(mask) };
            match Errno::result(rc) {
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(ShellError::Mask(e)),
            }
        }
    }
}
