/// A child status change reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    Stopped(i32),
    Continued,
    Exited(i32),
    Signaled(i32),
}

impl ChildEvent {
    /// Decode a raw wait status. Returns `None` for statuses that carry no
    /// job-control meaning (e.g. ptrace events).
    pub fn from_wait_status(raw_status: libc::c_int) -> Option<Self> {
        if libc::WIFSTOPPED(raw_status) {
            return Some(ChildEvent::Stopped(libc::WSTOPSIG(raw_status)));
        }
        if libc::WIFCONTINUED(raw_status) {
            return Some(ChildEvent::Continued);
        }
        if libc::WIFEXITED(raw_status) {
            return Some(ChildEvent::Exited(libc::WEXITSTATUS(raw_status)));
        }
        if libc::WIFSIGNALED(raw_status) {
            return Some(ChildEvent::Signaled(libc::WTERMSIG(raw_status)));
        }
        None
    }

    /// The process no longer exists once this event has been reaped.
    pub fn is_termination(self) -> bool {
        matches!(self, ChildEvent::Exited(_) | ChildEvent::Signaled(_))
    }

    /// Shell-style exit code: `128 + N` for a process killed by signal N.
    pub fn exit_code(self) -> Option<i32> {
        match self {
            ChildEvent::Exited(code) => Some(code),
            ChildEvent::Signaled(signal) => Some(128 + signal),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Linux encoding: exit code in bits 8..16, term signal in the low 7 bits,
    // 0x7f in the low byte for stopped, 0xffff for continued.
    #[test]
    fn decodes_exit_status() {
        assert_eq!(ChildEvent::from_wait_status(3 << 8), Some(ChildEvent::Exited(3)));
        assert_eq!(ChildEvent::Exited(3).exit_code(), Some(3));
    }

    #[test]
    fn decodes_signal_termination() {
        let event = ChildEvent::from_wait_status(libc::SIGKILL);
        assert_eq!(event, Some(ChildEvent::Signaled(libc::SIGKILL)));
        assert_eq!(event.and_then(ChildEvent::exit_code), Some(128 + libc::SIGKILL));
        assert!(event.is_some_and(ChildEvent::is_termination));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn decodes_stop_and_continue() {
        let stopped = (libc::SIGTSTP << 8) | 0x7f;
        assert_eq!(
            ChildEvent::from_wait_status(stopped),
            Some(ChildEvent::Stopped(libc::SIGTSTP))
        );
        assert_eq!(ChildEvent::from_wait_status(0xffff), Some(ChildEvent::Continued));
        assert!(!ChildEvent::Continued.is_termination());
    }
}
