//! Foreground/background controller: terminal handoff, the foreground wait,
//! and the job transitions requested by built-ins.

use std::io::Write;

use crate::error::{JobError, KillError, LaunchError, SignalError};
use crate::job_control::{self, Pid, Terminal};
use crate::jobs::{JobStatus, JobTable, Notice};
use crate::launcher;
use crate::parser::Pipeline;
use crate::signals::{self, RELAY_SIGNALS, SignalMask, WAKE_SIGNALS};

/// What a `kill` request is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Job(usize),
    Pid(Pid),
}

impl Target {
    /// `%N` names job N; a bare positive number is a process id.
    pub fn parse(token: &str) -> Result<Self, JobError> {
        let invalid = || JobError::InvalidTarget(token.to_string());
        match token.strip_prefix('%') {
            Some(id) => id.parse::<usize>().map(Target::Job).map_err(|_| invalid()),
            None => match token.parse::<Pid>() {
                Ok(pid) if pid > 0 => Ok(Target::Pid(pid)),
                _ => Err(invalid()),
            },
        }
    }
}

/// Owns the job table and arbitrates the terminal between the shell and jobs.
pub struct Controller {
    table: JobTable,
    terminal: Terminal,
}

impl Controller {
    pub fn new(capacity: usize, terminal: Terminal) -> Self {
        Self {
            table: JobTable::new(capacity),
            terminal,
        }
    }

    #[cfg(test)]
    pub fn table(&self) -> &JobTable {
        &self.table
    }

    /// Launch a pipeline, register it as a job, then wait for it or report it.
    pub fn run(&mut self, pipeline: &Pipeline, out: &mut dyn Write) -> Result<(), LaunchError> {
        let id = {
            // Relay signals stay held until the job is registered, so no
            // status change or terminal interrupt sees a half-made job.
            let _held = SignalMask::block(&RELAY_SIGNALS)
                .inspect_err(|err| tracing::error!(%err, "cannot block relay signals"))
                .ok();
            let launched = launcher::launch(pipeline)?;
            let status = if pipeline.background {
                JobStatus::Background
            } else {
                JobStatus::Foreground
            };
            match self.register(&launched.pids, launched.pgid, &pipeline.display_name(), status) {
                Ok(id) if pipeline.background => id,
                Ok(id) => {
                    // Interrupts still held in the mask go to the new job.
                    signals::set_foreground_group(launched.pgid);
                    id
                }
                Err(err) => {
                    launcher::abort_group(launched.pgid);
                    tracing::warn!(%err, "job registration failed");
                    return Err(LaunchError::TableFull(self.table.len()));
                }
            }
        };

        let result = if pipeline.background {
            self.background(id, false, out)
        } else {
            self.foreground(id, false, out)
        };
        if let Err(err) = result {
            tracing::error!(job = id, %err, "freshly registered job vanished");
        }
        Ok(())
    }

    /// Create a job record for already-running processes.
    pub fn register(
        &mut self,
        pids: &[Pid],
        pgid: Pid,
        name: &str,
        status: JobStatus,
    ) -> Result<usize, JobError> {
        if status == JobStatus::Foreground {
            if let Some(current) = self.table.foreground() {
                tracing::warn!(job = current.id, "another job already holds the foreground");
            }
        }
        self.table.create(pids, pgid, name, status)
    }

    /// Give job `id` the terminal and block until it stops or completes.
    pub fn foreground(
        &mut self,
        id: usize,
        resume_if_stopped: bool,
        out: &mut dyn Write,
    ) -> Result<(), JobError> {
        let pgid = self.table.find_by_id(id).ok_or(JobError::NotFound(id))?.pgid;
        if let Some(previous) = signals::foreground_group().filter(|&p| p != pgid) {
            let stale = self.table.find_by_group(previous).map(|job| job.id);
            tracing::warn!(previous, ?stale, pgid, "foreground group still published");
        }

        if let Err(err) = self.terminal.give_to(pgid) {
            tracing::warn!(pgid, %err, "failed to hand terminal to job");
        }

        let job = self.table.find_by_id_mut(id).ok_or(JobError::NotFound(id))?;
        let was_stopped = job.status == JobStatus::Stopped;
        job.status = JobStatus::Foreground;
        signals::set_foreground_group(pgid);

        if resume_if_stopped && was_stopped {
            if let Err(err) = job_control::signal_group(pgid, libc::SIGCONT) {
                eprintln!("pssh: kill (SIGCONT): {err}");
            }
        }

        self.wait_for_job(id, out);
        Ok(())
    }

    /// Block until job `id` is no longer a running foreground job, then take
    /// the terminal back.
    fn wait_for_job(&mut self, id: usize, out: &mut dyn Write) {
        // sigprocmask only fails for an invalid `how`; if it somehow does,
        // fall back to waking on a short timer.
        let mask = SignalMask::block(&WAKE_SIGNALS)
            .inspect_err(|err| tracing::error!(%err, "cannot block wake signals"))
            .ok();

        loop {
            signals::dispatch(&mut self.table, &self.terminal, out);

            let Some(job) = self.table.find_by_id(id) else {
                break;
            };
            if job.status != JobStatus::Foreground {
                break;
            }
            if job.is_complete() {
                self.table.remove(id);
                break;
            }

            match &mask {
                Some(mask) => mask.suspend(),
                None => std::thread::sleep(std::time::Duration::from_millis(20)),
            }
        }

        signals::clear_foreground_group();
        if let Err(err) = self.terminal.reclaim() {
            tracing::warn!(%err, "failed to reclaim terminal");
        }
    }

    /// Move job `id` to the background without blocking.
    pub fn background(
        &mut self,
        id: usize,
        resume_if_stopped: bool,
        out: &mut dyn Write,
    ) -> Result<(), JobError> {
        let job = self.table.find_by_id_mut(id).ok_or(JobError::NotFound(id))?;

        if resume_if_stopped {
            if job.status == JobStatus::Stopped {
                job.status = JobStatus::Background;
                if let Err(err) = job_control::signal_group(job.pgid, libc::SIGCONT) {
                    eprintln!("pssh: kill (SIGCONT): {err}");
                }
                let _ = writeln!(out, "{}", Notice::Continued(job));
            }
        } else {
            job.status = JobStatus::Background;
            let _ = writeln!(out, "{}", Notice::Launched(job));
        }
        let _ = out.flush();
        Ok(())
    }

    /// `fg`: resume job `id` in the foreground.
    pub fn foreground_job(&mut self, id: usize, out: &mut dyn Write) -> Result<(), JobError> {
        let job = self.table.find_by_id(id).ok_or(JobError::NotFound(id))?;
        let _ = writeln!(out, "{}", job.name);
        let _ = out.flush();
        self.foreground(id, true, out)
    }

    /// `bg`: resume job `id` in the background.
    pub fn background_job(&mut self, id: usize, out: &mut dyn Write) -> Result<(), JobError> {
        self.background(id, true, out)
    }

    /// Snapshot of every active job as `(id, status, name)`.
    pub fn list_active_jobs(&self) -> Vec<(usize, JobStatus, String)> {
        self.table
            .active()
            .into_iter()
            .map(|job| (job.id, job.status, job.name.clone()))
            .collect()
    }

    /// `jobs`: one line per active job, ascending by id.
    pub fn report_active_jobs(&mut self, out: &mut dyn Write) {
        signals::dispatch(&mut self.table, &self.terminal, out);
        for (id, status, name) in self.list_active_jobs() {
            let _ = writeln!(out, "[{id}] + {} {name}", status.state_word());
        }
        let _ = out.flush();
    }

    /// Send `signal` to a whole job's process group or to a single process.
    pub fn deliver_signal(&self, target: Target, signal: libc::c_int) -> Result<(), KillError> {
        let result = match target {
            Target::Job(id) => {
                let job = self.table.find_by_id(id).ok_or(JobError::NotFound(id))?;
                job_control::signal_group(job.pgid, signal)
            }
            Target::Pid(pid) => job_control::signal_pid(pid, signal),
        };
        result.map_err(|source| {
            let target = match target {
                Target::Job(id) => format!("%{id}"),
                Target::Pid(pid) => pid.to_string(),
            };
            KillError::Delivery(SignalError { target, source })
        })?;
        tracing::debug!(?target, signal, "signal delivered");
        Ok(())
    }

    /// `kill`: resolve a `%N` / pid token and deliver `signal` to it.
    pub fn signal_job_or_pid(&self, token: &str, signal: libc::c_int) -> Result<(), KillError> {
        let target = Target::parse(token)?;
        self.deliver_signal(target, signal)
    }

    /// Apply any child status changes the relay has flagged.
    pub fn dispatch_pending(&mut self, out: &mut dyn Write) {
        if signals::child_pending() {
            signals::dispatch(&mut self.table, &self.terminal, out);
        }
    }

    /// Once per prompt: drop background jobs that have fully terminated,
    /// announcing any completion not already announced. Returns how many
    /// jobs were removed.
    pub fn sweep_completed(&mut self, out: &mut dyn Write) -> usize {
        signals::dispatch(&mut self.table, &self.terminal, out);

        let finished: Vec<usize> = self
            .table
            .active()
            .into_iter()
            .filter(|job| job.status != JobStatus::Foreground && job.is_complete())
            .map(|job| job.id)
            .collect();

        for &id in &finished {
            if let Some(job) = self.table.find_by_id_mut(id) {
                if !job.is_notified() {
                    let _ = writeln!(out, "{}", Notice::Done(job));
                    job.mark_notified();
                }
                job.status = JobStatus::Terminated;
            }
            self.table.remove(id);
        }
        let _ = out.flush();
        finished.len()
    }

    /// On shell exit: hang up every remaining job, waking stopped ones so
    /// they can act on it.
    pub fn hangup_all(&mut self) {
        for job in self.table.active() {
            let _ = job_control::signal_group(job.pgid, libc::SIGHUP);
            if job.status == JobStatus::Stopped {
                let _ = job_control::signal_group(job.pgid, libc::SIGCONT);
            }
        }
    }
}
