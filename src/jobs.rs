use std::fmt;

use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    Foreground,
    Background,
    Suspended,
    #[default]
    Undefined,
}

impl JobState {
    /// Label used by the `jobs` listing.
    pub fn label(self) -> &'static str {
        match self {
            JobState::Suspended => "Stopped",
            _ => "RUNNING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: usize,
    pub pid: Pid,
    pub state: JobState,
    pub command_line: String,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {}",
            self.job_id,
            self.pid,
            self.state.label(),
            self.command_line
        )
    }
}

/// Fixed-capacity job slots. A job's id is its slot index + 1, so a freed
/// slot hands the same id to its next occupant.
#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Job>>,
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        JobTable {
            slots: vec![None; capacity],
        }
    }

    /// Registers a job in the first empty slot. Returns false when full.
    pub fn insert(&mut self, pid: Pid, state: JobState, command_line: &str) -> bool {
        let Some((index, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
        else {
            return false;
        };

        *slot = Some(Job {
            job_id: index + 1,
            pid,
            state,
            command_line: command_line.to_string(),
        });
        true
    }

    pub fn remove(&mut self, pid: Pid) -> bool {
        match self.slot_mut(pid) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Job> {
        self.iter().find(|job| job.pid == pid)
    }

    pub fn find_job_id(&self, pid: Pid) -> Option<usize> {
        self.get(pid).map(|job| job.job_id)
    }

    pub fn find_pid(&self, job_id: usize) -> Option<Pid> {
        self.iter().find(|job| job.job_id == job_id).map(|job| job.pid)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn has_any_background(&self) -> bool {
        self.iter().any(|job| job.state == JobState::Background)
    }

    pub fn set_state(&mut self, pid: Pid, state: JobState) {
        if let Some(Some(job)) = self.slot_mut(pid) {
            job.state = state;
        }
    }

    /// Occupied slots in job-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }

    fn slot_mut(&mut self, pid: Pid) -> Option<&mut Option<Job>> {
        self.slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(job) if job.pid == pid))
    }
}
