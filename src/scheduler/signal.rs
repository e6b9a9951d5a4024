/*
 * Signals
 *
 * A process has a 64-bit pending-signal bitmask (`Process::pending_signals`).
 * `raise` sets a bit; `check_pending` polls and clears the lowest-numbered
 * one. There's no handler-frame machinery - nothing switches a thread's
 * stack to run a handler - delivery is "the next syscall entry/exit
 * observes the bit", matching the no_std reality of this kernel (no
 * sigaltstack, no trampoline back from a handler).
 *
 * A signal whose disposition isn't `Ignored` additionally interrupts a
 * cancellable wait (mutex/semaphore/event/pipe) on the process's main
 * thread, the same path process termination uses (`SyncError::Cancelled` /
 * `PipeError::Cancelled`), so a blocked thread gets a chance to notice the
 * pending bit instead of sleeping through it.
 */

use super::process::ProcessId;
use super::with_scheduler_mut;

/// Signal disposition. Only `Ignored` changes `raise`'s behavior; there's
/// no installable handler, so `Default` and `Ignored` are the only two
/// states a signal number can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignored,
}

/// Highest signal number supported (bit index into the 64-bit mask).
pub const MAX_SIGNUM: u8 = 63;

/// Set `signum`'s pending bit on `pid`. No-op if `pid` doesn't exist or
/// `signum` is out of range.
///
/// If the signal isn't `Ignored`, also interrupts a cancellable wait
/// (mutex/semaphore/event/pipe) on the process's main thread - the first
/// thread it was created with - the same way process termination does,
/// so a blocked thread gets a chance to notice the pending bit.
pub fn raise(pid: ProcessId, signum: u8) {
    if signum > MAX_SIGNUM {
        return;
    }

    let (ignored, main_thread) = with_scheduler_mut(|s| match s.processes.get_mut(&pid) {
        Some(p) => {
            p.pending_signals |= 1u64 << signum;
            let ignored = p.ignored_signals & (1u64 << signum) != 0;
            (ignored, p.threads.first().copied())
        }
        None => (true, None),
    });

    if ignored {
        return;
    }

    if let Some(tid) = main_thread {
        super::mark_cancelled(tid);
        super::sync::cancel_thread_waits(tid);
        super::pipe::cancel_thread_waits(tid);
    }
}

/// Set `signum`'s disposition for `pid`. No-op if `pid` doesn't exist or
/// `signum` is out of range.
pub fn set_disposition(pid: ProcessId, signum: u8, disposition: Disposition) {
    if signum > MAX_SIGNUM {
        return;
    }
    with_scheduler_mut(|s| {
        if let Some(p) = s.processes.get_mut(&pid) {
            match disposition {
                Disposition::Ignored => p.ignored_signals |= 1u64 << signum,
                Disposition::Default => p.ignored_signals &= !(1u64 << signum),
            }
        }
    });
}

/// Poll and clear the lowest-numbered pending signal, if any.
pub fn check_pending(pid: ProcessId) -> Option<u8> {
    with_scheduler_mut(|s| {
        let p = s.processes.get_mut(&pid)?;
        if p.pending_signals == 0 {
            return None;
        }
        let signum = p.pending_signals.trailing_zeros() as u8;
        p.pending_signals &= !(1u64 << signum);
        Some(signum)
    })
}

/// True if `pid` has any pending signal, without clearing it.
pub fn has_pending(pid: ProcessId) -> bool {
    with_scheduler_mut(|s| s.processes.get(&pid).map(|p| p.pending_signals != 0).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    #[test]
    fn lowest_numbered_bit_wins() {
        let mask: u64 = (1 << 5) | (1 << 2) | (1 << 9);
        assert_eq!(mask.trailing_zeros(), 2);
    }
}
