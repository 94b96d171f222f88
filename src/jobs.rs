use std::fmt;

use crate::error::JobError;
use crate::job_control::{self, Pid};

/// The lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Foreground,
    Background,
    Stopped,
    Terminated,
}

impl JobStatus {
    /// Word used by the `jobs` listing.
    pub fn state_word(self) -> &'static str {
        match self {
            JobStatus::Stopped => "stopped",
            JobStatus::Background => "running",
            JobStatus::Foreground => "continued",
            JobStatus::Terminated => "done",
        }
    }
}

/// One pipeline invocation: one process group, one pid per stage.
#[derive(Debug)]
pub struct Job {
    pub id: usize,
    pub pgid: Pid,
    pub name: String,
    pub status: JobStatus,
    /// One slot per stage in launch order; `None` once that process is reaped.
    members: Vec<Option<Pid>>,
    /// Completion has been announced to the user.
    notified: bool,
}

impl Job {
    /// Member slots in launch order; reaped members are `None`.
    #[cfg(test)]
    pub fn members(&self) -> &[Option<Pid>] {
        &self.members
    }

    /// Pids of the members that have not been reaped yet, in launch order.
    pub fn live_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.members.iter().flatten().copied()
    }

    pub fn has_member(&self, pid: Pid) -> bool {
        self.members.contains(&Some(pid))
    }

    /// Record that `pid` was reaped. Returns false if it is not a live member.
    pub fn mark_terminated(&mut self, pid: Pid) -> bool {
        match self.members.iter_mut().find(|slot| **slot == Some(pid)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Every member has been reaped by the relay.
    pub fn all_reaped(&self) -> bool {
        self.members.iter().all(Option::is_none)
    }

    /// Every member is gone, by probing rather than trusting the reap
    /// bookkeeping. An unreaped zombie still counts as alive.
    pub fn is_complete(&self) -> bool {
        self.live_pids().all(|pid| !job_control::process_exists(pid))
    }

    pub fn is_notified(&self) -> bool {
        self.notified
    }

    pub fn mark_notified(&mut self) {
        self.notified = true;
    }
}

/// User-visible status lines.
pub enum Notice<'a> {
    Suspended(&'a Job),
    Continued(&'a Job),
    Done(&'a Job),
    Launched(&'a Job),
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Suspended(job) => write!(f, "\n[{}] + suspended {}", job.id, job.name),
            Notice::Continued(job) => write!(f, "[{}] + continued {}", job.id, job.name),
            Notice::Done(job) => write!(f, "[{}] + done {}", job.id, job.name),
            Notice::Launched(job) => {
                write!(f, "[{}]", job.id)?;
                for pid in job.live_pids() {
                    write!(f, " {pid}")?;
                }
                Ok(())
            }
        }
    }
}

/// Bounded registry of in-flight jobs, kept compact in insertion order.
pub struct JobTable {
    jobs: Vec<Job>,
    capacity: usize,
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Register a new job under the smallest job id not currently in use.
    pub fn create(
        &mut self,
        pids: &[Pid],
        pgid: Pid,
        name: &str,
        status: JobStatus,
    ) -> Result<usize, JobError> {
        if self.jobs.len() >= self.capacity {
            return Err(JobError::TableFull(self.capacity));
        }

        let id = (0..)
            .find(|candidate| self.jobs.iter().all(|job| job.id != *candidate))
            .unwrap_or(self.jobs.len());

        self.jobs.push(Job {
            id,
            pgid,
            name: name.to_string(),
            status,
            members: pids.iter().copied().map(Some).collect(),
            notified: false,
        });
        tracing::debug!(job = id, pgid, ?status, "job created");
        Ok(id)
    }

    pub fn find_by_id(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    pub fn find_by_group(&self, pgid: Pid) -> Option<&Job> {
        self.jobs.iter().find(|job| job.pgid == pgid)
    }

    pub fn find_by_member_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.has_member(pid))
    }

    /// The job currently holding the terminal, if any.
    pub fn foreground(&self) -> Option<&Job> {
        self.jobs
            .iter()
            .find(|job| job.status == JobStatus::Foreground)
    }

    pub fn remove(&mut self, id: usize) -> Option<Job> {
        let index = self.jobs.iter().position(|job| job.id == id)?;
        tracing::debug!(job = id, "job removed");
        Some(self.jobs.remove(index))
    }

    /// Jobs that are not `Terminated`, in ascending job id order.
    pub fn active(&self) -> Vec<&Job> {
        let mut list: Vec<&Job> = self
            .jobs
            .iter()
            .filter(|job| job.status != JobStatus::Terminated)
            .collect();
        list.sort_by_key(|job| job.id);
        list
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<usize> {
        self.jobs.iter().map(|job| job.id).collect()
    }
}
