//! Decide whether the process behind an element still exists.

/// A liveness probe for writer processes.
///
/// Elements of processes for which this returns `false` are garbage and removed by the next
/// collecting read.
pub trait Liveness {
    fn is_alive(&self, process_id: u32) -> bool;
}

/// Probe the operating system with a null signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsLiveness;

impl Liveness for OsLiveness {
    fn is_alive(&self, process_id: u32) -> bool {
        // Zero and negative values address process groups, never a single writer.
        let Some(pid) = libc::pid_t::try_from(process_id).ok().filter(|&pid| pid > 0) else {
            return false;
        };

        // Safety: signal 0 performs only the existence and permission checks.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }

        // The process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

impl<F> Liveness for F
where
    F: Fn(u32) -> bool,
{
    fn is_alive(&self, process_id: u32) -> bool {
        self(process_id)
    }
}
