//! Process-group and controlling-terminal primitives.

use std::io;
use std::mem;
use std::ptr;

pub type Pid = libc::pid_t;

/// Run a libc call returning `0`/`-1` until it stops failing with `EINTR`.
fn retry_eintr(mut call: impl FnMut() -> libc::c_int) -> io::Result<()> {
    loop {
        if call() == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn require_group(pgid: Pid) -> io::Result<()> {
    if pgid > 0 {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a process group: {pgid}"),
        ))
    }
}

/// Put `pid` into process group `pgid`. Both parent and child call this, so
/// losing the race to an already-exec'd or already-reaped child is fine.
pub(crate) fn set_process_group(pid: Pid, pgid: Pid) -> io::Result<()> {
    match retry_eintr(|| unsafe { libc::setpgid(pid, pgid) }) {
        Err(err) if matches!(err.raw_os_error(), Some(libc::EACCES | libc::ESRCH)) => Ok(()),
        other => other,
    }
}

pub(crate) fn shell_pgid() -> Pid {
    unsafe { libc::getpgrp() }
}

/// Probe whether `pid` still names a process (zombies included).
pub(crate) fn process_exists(pid: Pid) -> bool {
    pid > 0
        && match signal_pid(pid, 0) {
            Ok(()) => true,
            Err(err) => err.raw_os_error() != Some(libc::ESRCH),
        }
}

/// Send `signal` to every process in group `pgid`.
pub(crate) fn signal_group(pgid: Pid, signal: libc::c_int) -> io::Result<()> {
    require_group(pgid)?;
    signal_pid(-pgid, signal)
}

/// Send `signal` to a single process (or a group, for negative ids).
pub(crate) fn signal_pid(pid: Pid, signal: libc::c_int) -> io::Result<()> {
    retry_eintr(|| unsafe { libc::kill(pid, signal) })
}

/// Controls which process group owns the terminal on stdin.
///
/// Inert when stdin is not a terminal, so pipelines driven from a pipe or a
/// test harness skip every handoff.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Terminal {
    fd: Option<libc::c_int>,
    shell_pgid: Pid,
}

impl Terminal {
    pub(crate) fn new(interactive: bool) -> Self {
        let on_tty = interactive && unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        Terminal {
            fd: on_tty.then_some(libc::STDIN_FILENO),
            shell_pgid: shell_pgid(),
        }
    }

    pub(crate) fn is_interactive(&self) -> bool {
        self.fd.is_some()
    }

    /// Make the shell a process-group leader and take the terminal.
    ///
    /// Stops itself with SIGTTIN until it is in the foreground, so a shell
    /// started as a background job does not steal the terminal.
    pub(crate) fn claim(&mut self) -> io::Result<()> {
        let Some(fd) = self.fd else {
            return Ok(());
        };

        loop {
            let group = shell_pgid();
            let owner = unsafe { libc::tcgetpgrp(fd) };
            if owner < 0 || owner == group {
                break;
            }
            signal_group(group, libc::SIGTTIN)?;
        }

        let pid = unsafe { libc::getpid() };
        match set_process_group(pid, pid) {
            // A session leader already leads its own group.
            Err(err) if err.raw_os_error() != Some(libc::EPERM) => return Err(err),
            _ => {}
        }
        self.shell_pgid = shell_pgid();
        hand_terminal(fd, self.shell_pgid)
    }

    /// Hand the terminal to `pgid`.
    pub(crate) fn give_to(&self, pgid: Pid) -> io::Result<()> {
        self.fd.map_or(Ok(()), |fd| hand_terminal(fd, pgid))
    }

    /// Take the terminal back for the shell.
    pub(crate) fn reclaim(&self) -> io::Result<()> {
        self.give_to(self.shell_pgid)
    }
}

/// SIGTTOU ignored for as long as this lives.
///
/// `tcsetpgrp` from a background group raises SIGTTOU, which would stop the
/// shell while it takes the terminal back.
struct TtouBlocker {
    previous: libc::sigaction,
}

impl TtouBlocker {
    fn new() -> io::Result<Self> {
        unsafe {
            let mut ignore: libc::sigaction = mem::zeroed();
            ignore.sa_sigaction = libc::SIG_IGN;
            libc::sigemptyset(&mut ignore.sa_mask);
            let mut previous: libc::sigaction = mem::zeroed();
            if libc::sigaction(libc::SIGTTOU, &ignore, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(TtouBlocker { previous })
        }
    }
}

impl Drop for TtouBlocker {
    fn drop(&mut self) {
        unsafe {
            libc::sigaction(libc::SIGTTOU, &self.previous, ptr::null_mut());
        }
    }
}

fn hand_terminal(fd: libc::c_int, pgid: Pid) -> io::Result<()> {
    require_group(pgid)?;
    let _ttou = TtouBlocker::new()?;
    retry_eintr(|| unsafe { libc::tcsetpgrp(fd, pgid) })?;
    tracing::debug!(pgid, "terminal handed off");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> Pid {
        std::process::id() as Pid
    }

    #[test]
    fn liveness_probe() {
        assert!(process_exists(me()));
        assert!(!process_exists(0));
        assert!(!process_exists(-5));
    }

    #[test]
    fn group_ids_must_be_positive() {
        for pgid in [0, -1] {
            let err = signal_group(pgid, libc::SIGCONT).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn null_signal_to_self_succeeds() {
        assert!(signal_pid(me(), 0).is_ok());
    }

    #[test]
    fn retry_stops_on_success_and_real_errors() {
        let mut calls = 0;
        assert!(retry_eintr(|| {
            calls += 1;
            0
        })
        .is_ok());
        assert_eq!(calls, 1);

        let err = retry_eintr(|| unsafe { libc::kill(i32::MAX - 7, 0) }).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }

    #[test]
    fn non_interactive_terminal_is_inert() {
        let mut terminal = Terminal::new(false);
        assert!(!terminal.is_interactive());
        assert!(terminal.claim().is_ok());
        assert!(terminal.give_to(12345).is_ok());
        assert!(terminal.reclaim().is_ok());
    }
}
