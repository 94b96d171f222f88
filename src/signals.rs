//! Signal relay: asynchronous handlers and the event dispatch they feed.
//!
//! Handlers only touch single words: an atomic "child state changed" flag and
//! an atomic copy of the foreground process group. Reaping, job status
//! transitions, notices and terminal reclaim all happen in [`dispatch`], which
//! runs in normal control flow from the foreground wait loop, the per-prompt
//! sweep and the line editor's idle hook.

use std::io::{self, Write};
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::job_control::{Pid, Terminal};
use crate::jobs::{JobStatus, JobTable, Notice};
use crate::status::ChildEvent;

/// Raised to interrupt a blocking wait; carries no payload.
pub const SYNC_SIGNAL: libc::c_int = libc::SIGUSR1;

/// Held while a job is being launched and registered.
pub(crate) const RELAY_SIGNALS: [libc::c_int; 4] =
    [libc::SIGCHLD, libc::SIGINT, libc::SIGTSTP, SYNC_SIGNAL];

/// Held by the foreground wait between status checks.
pub(crate) const WAKE_SIGNALS: [libc::c_int; 2] = [libc::SIGCHLD, SYNC_SIGNAL];

static CHILD_PENDING: AtomicBool = AtomicBool::new(false);
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);

/// Publish the process group that terminal interrupts should be forwarded to.
pub(crate) fn set_foreground_group(pgid: Pid) {
    FOREGROUND_PGID.store(pgid, Ordering::SeqCst);
}

pub(crate) fn clear_foreground_group() {
    FOREGROUND_PGID.store(0, Ordering::SeqCst);
}

pub(crate) fn foreground_group() -> Option<Pid> {
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    (pgid > 0).then_some(pgid)
}

/// A child changed state since the last dispatch.
pub(crate) fn child_pending() -> bool {
    CHILD_PENDING.load(Ordering::SeqCst)
}

// ── Handlers ──

extern "C" fn on_child(_signal: libc::c_int) {
    CHILD_PENDING.store(true, Ordering::SeqCst);
}

/// SIGINT / SIGTSTP: forward to the foreground job, or wake the shell itself.
extern "C" fn on_terminal_request(signal: libc::c_int) {
    let _errno = ErrnoGuard::save();
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    unsafe {
        if pgid > 0 {
            libc::kill(-pgid, signal);
        } else {
            libc::write(libc::STDOUT_FILENO, b"\n".as_ptr().cast(), 1);
            libc::raise(SYNC_SIGNAL);
        }
    }
}

extern "C" fn on_sync(_signal: libc::c_int) {}

/// Saves errno on entry to a handler and restores it on exit.
struct ErrnoGuard(Option<libc::c_int>);

impl ErrnoGuard {
    fn save() -> Self {
        Self(errno_location().map(|loc| unsafe { *loc }))
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        if let (Some(saved), Some(loc)) = (self.0, errno_location()) {
            unsafe { *loc = saved };
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn errno_location() -> Option<*mut libc::c_int> {
    Some(unsafe { libc::__errno_location() })
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno_location() -> Option<*mut libc::c_int> {
    Some(unsafe { libc::__error() })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
fn errno_location() -> Option<*mut libc::c_int> {
    None
}

// ── Installation ──

fn set_disposition(signal: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn handler_address(handler: extern "C" fn(libc::c_int)) -> libc::sighandler_t {
    handler as usize as libc::sighandler_t
}

/// Install the relay's handlers and ignore the job-control signals the shell
/// itself must never act on.
pub fn install() -> io::Result<()> {
    set_disposition(libc::SIGCHLD, handler_address(on_child))?;
    set_disposition(libc::SIGTSTP, handler_address(on_terminal_request))?;
    set_disposition(libc::SIGINT, handler_address(on_terminal_request))?;
    set_disposition(SYNC_SIGNAL, handler_address(on_sync))?;

    for signal in [libc::SIGTTIN, libc::SIGTTOU, libc::SIGQUIT] {
        set_disposition(signal, libc::SIG_IGN)?;
    }
    tracing::debug!("signal relay installed");
    Ok(())
}

/// Runs in a freshly forked child before exec: every catchable signal back to
/// its default action and nothing blocked. Only async-signal-safe calls.
pub(crate) fn reset_for_child() -> io::Result<()> {
    for signal in 1..32 {
        if signal == libc::SIGKILL || signal == libc::SIGSTOP {
            continue;
        }
        // Numbers the platform does not define fail with EINVAL; skip them.
        let _ = set_disposition(signal, libc::SIG_DFL);
    }

    unsafe {
        let mut empty = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(empty.as_mut_ptr());
        if libc::sigprocmask(libc::SIG_SETMASK, empty.as_ptr(), ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Blocks a set of signals until dropped.
pub(crate) struct SignalMask {
    previous: libc::sigset_t,
}

impl SignalMask {
    pub(crate) fn block(signals: &[libc::c_int]) -> io::Result<Self> {
        unsafe {
            let mut set = MaybeUninit::<libc::sigset_t>::uninit();
            libc::sigemptyset(set.as_mut_ptr());
            for &signal in signals {
                libc::sigaddset(set.as_mut_ptr(), signal);
            }

            let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
            if libc::sigprocmask(libc::SIG_BLOCK, set.as_ptr(), previous.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                previous: previous.assume_init(),
            })
        }
    }

    /// Atomically restore the pre-block mask and sleep until a handler has
    /// run. Wakes may be spurious; callers re-check their condition.
    pub(crate) fn suspend(&self) {
        unsafe {
            libc::sigsuspend(&self.previous);
        }
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}

// ── Dispatch ──

/// What a single reaped status change did to the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Suspended { job: usize, was_foreground: bool },
    Continued { job: usize },
    MemberExited { job: usize },
    ForegroundDone { job: usize },
    BackgroundDone { job: usize },
}

impl Transition {
    /// The shell must take the terminal back.
    fn releases_terminal(self) -> bool {
        matches!(
            self,
            Transition::Suspended {
                was_foreground: true,
                ..
            } | Transition::ForegroundDone { .. }
        )
    }
}

/// Apply one child status change to the table, writing any notice to `out`.
pub(crate) fn apply_event(
    table: &mut JobTable,
    pid: Pid,
    event: ChildEvent,
    out: &mut dyn Write,
) -> Option<Transition> {
    let job = table.find_by_member_mut(pid)?;
    let id = job.id;

    match event {
        ChildEvent::Stopped(_) => match job.status {
            JobStatus::Foreground | JobStatus::Background => {
                let was_foreground = job.status == JobStatus::Foreground;
                job.status = JobStatus::Stopped;
                let _ = writeln!(out, "{}", Notice::Suspended(job));
                Some(Transition::Suspended {
                    job: id,
                    was_foreground,
                })
            }
            _ => None,
        },
        ChildEvent::Continued => {
            if job.status != JobStatus::Stopped {
                return None;
            }
            job.status = JobStatus::Background;
            let _ = writeln!(out, "{}", Notice::Continued(job));
            Some(Transition::Continued { job: id })
        }
        event if event.is_termination() => {
            job.mark_terminated(pid);
            if !job.all_reaped() {
                return Some(Transition::MemberExited { job: id });
            }

            let previous = job.status;
            job.status = JobStatus::Terminated;
            let transition = match previous {
                JobStatus::Foreground => Transition::ForegroundDone { job: id },
                _ => {
                    if !job.is_notified() {
                        let _ = writeln!(out, "{}", Notice::Done(job));
                        job.mark_notified();
                    }
                    Transition::BackgroundDone { job: id }
                }
            };
            table.remove(id);
            Some(transition)
        }
        _ => None,
    }
}

/// Reap every pending child status change and apply it.
pub(crate) fn dispatch(table: &mut JobTable, terminal: &Terminal, out: &mut dyn Write) {
    CHILD_PENDING.store(false, Ordering::SeqCst);

    let flags = libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED;
    loop {
        let mut raw_status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut raw_status, flags) };
        if pid == 0 {
            break;
        }
        if pid < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            // ECHILD: nothing left to reap.
            break;
        }

        let Some(event) = ChildEvent::from_wait_status(raw_status) else {
            continue;
        };
        tracing::debug!(pid, ?event, code = ?event.exit_code(), "child status change");

        let Some(transition) = apply_event(table, pid, event, out) else {
            continue;
        };
        tracing::debug!(?transition, "job transition");
        if transition.releases_terminal() {
            clear_foreground_group();
            if let Err(err) = terminal.reclaim() {
                tracing::warn!(%err, "failed to reclaim terminal");
            }
        }
    }
    let _ = out.flush();
}
