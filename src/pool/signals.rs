//! Termination analysis for reaped worker processes.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Why a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// SIGKILL, the dispatcher's normal teardown.
    Killed,
    /// The worker exited on its own (it saw its channel close before the kill landed).
    Exited(i32),
    /// Killed by some other signal.
    Signaled(Signal),
    StillAlive,
    Unknown,
}

impl TerminationReason {
    /// Whether this is one of the two outcomes teardown can produce.
    pub fn is_teardown(&self) -> bool {
        matches!(self, Self::Killed | Self::Exited(_))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Killed => f.write_str("killed by dispatcher (SIGKILL)"),
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(sig) => write!(f, "killed by {}", sig.as_str()),
            Self::StillAlive => f.write_str("still running"),
            Self::Unknown => f.write_str("no status"),
        }
    }
}

/// Classify the status `waitpid` returned for a worker.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, Signal::SIGKILL, _) => TerminationReason::Killed,
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_sigkill_is_teardown() {
        let status = WaitStatus::Signaled(Pid::from_raw(100), Signal::SIGKILL, false);
        let reason = analyze_wait_status(status);
        assert_eq!(reason, TerminationReason::Killed);
        assert!(reason.is_teardown());
    }

    #[test]
    fn test_exit_is_teardown() {
        let reason = analyze_wait_status(WaitStatus::Exited(Pid::from_raw(100), 1));
        assert_eq!(reason, TerminationReason::Exited(1));
        assert!(reason.is_teardown());
    }

    #[test]
    fn test_segfault_is_not_teardown() {
        let status = WaitStatus::Signaled(Pid::from_raw(100), Signal::SIGSEGV, true);
        let reason = analyze_wait_status(status);
        assert_eq!(reason, TerminationReason::Signaled(Signal::SIGSEGV));
        assert!(!reason.is_teardown());
        assert!(reason.to_string().contains("SIGSEGV"));
    }

    #[test]
    fn test_still_alive() {
        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            TerminationReason::StillAlive
        );
    }
}
