/*
 * Synchronization Primitives - Semaphore, Mutex, Event
 *
 * Kernel-level wait objects, built the same way `io_wait` builds I/O wait
 * channels: a global registry of FIFO wait queues, blocking through
 * `block_current_thread()`/`wake_thread()`, with every blocking call
 * re-checking its condition on wake since wake-ups aren't edge-triggered.
 *
 * The mutex additionally implements priority inheritance: while a higher-
 * priority thread is queued on a mutex, the owner's effective priority is
 * bumped to match so it can't be starved off the CPU by unrelated threads
 * of intermediate priority. `Thread::priority_override` (see `thread.rs`)
 * carries this; `unlock` reverts it.
 *
 * Note on direction: this codebase's `Priority` is "bigger is more urgent"
 * (see `types::Priority`), the reverse of the numerically-smaller-is-more-
 * urgent convention used by classic priority-inheritance writeups. Inherit
 * by taking the max of the two priorities, not the min.
 */

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex as SpinMutex;

use super::{
    ThreadId, current_thread_id, block_current_thread, wake_thread, with_scheduler_mut,
    take_cancelled,
    types::{BlockReason, Priority},
    error::SyncError,
};

fn next_id(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::SeqCst)
}

fn thread_priority_of(tid: ThreadId) -> Priority {
    with_scheduler_mut(|s| {
        s.threads
            .iter()
            .find(|t| t.id == tid)
            .and_then(|t| {
                t.priority_override.or_else(|| {
                    s.processes.get(&t.process_id).map(|p| p.process_type.priority())
                })
            })
    })
    .unwrap_or(Priority::NORMAL)
}

fn set_thread_priority_override(tid: ThreadId, priority: Option<Priority>) {
    with_scheduler_mut(|s| {
        if let Some(t) = s.threads.iter_mut().find(|t| t.id == tid) {
            t.priority_override = priority;
        }
    });
}

/// Bump `tid`'s priority to `priority` if that's higher than what it has,
/// then, if `tid` is itself queued as a waiter on some other mutex, bump
/// that mutex's owner too. Stops at the first thread already at or above
/// `priority`, or when the chain cycles back on a thread already visited.
fn propagate_priority(tid: ThreadId, priority: Priority) {
    let mut visited = Vec::new();
    let mut current = tid;
    loop {
        if priority <= thread_priority_of(current) {
            return;
        }
        set_thread_priority_override(current, Some(priority));
        visited.push(current);

        let next_owner = {
            let regs = MUTEXES.lock();
            regs.values()
                .find(|m| m.waiters.contains(&current))
                .and_then(|m| m.owner)
        };

        match next_owner {
            Some(owner) if !visited.contains(&owner) => current = owner,
            _ => return,
        }
    }
}

/// Block the current thread on a FIFO wait list, then restart the caller's
/// loop once woken - wake-ups are level, not edge, triggered.
fn park_on(waiters: &mut Vec<ThreadId>) {
    waiters.push(current_thread_id());
}

// ================================================================================================
// SEMAPHORE
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaphoreId(pub u32);

struct SemaphoreState {
    count: i64,
    max: i64,
    waiters: Vec<ThreadId>,
}

static SEMAPHORES: SpinMutex<BTreeMap<u32, SemaphoreState>> = SpinMutex::new(BTreeMap::new());
static NEXT_SEM_ID: AtomicU32 = AtomicU32::new(1);

pub fn semaphore_create(initial: i64, max: i64) -> SemaphoreId {
    let id = next_id(&NEXT_SEM_ID);
    SEMAPHORES.lock().insert(id, SemaphoreState { count: initial, max, waiters: Vec::new() });
    SemaphoreId(id)
}

pub fn semaphore_destroy(id: SemaphoreId) {
    let waiters = {
        let mut regs = SEMAPHORES.lock();
        regs.remove(&id.0).map(|s| s.waiters).unwrap_or_default()
    };
    for tid in waiters {
        wake_thread(tid);
    }
}

/// Decrement the count, blocking FIFO while it's zero.
pub fn semaphore_wait(id: SemaphoreId) -> Result<(), SyncError> {
    loop {
        {
            let mut regs = SEMAPHORES.lock();
            let sem = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
            if sem.count > 0 {
                sem.count -= 1;
                return Ok(());
            }
            park_on(&mut sem.waiters);
        }
        block_current_thread(BlockReason::WaitingForSemaphore { sem_id: id.0 as usize });
        super::yield_now();
        if take_cancelled(current_thread_id()) {
            return Err(SyncError::Cancelled);
        }
        // Woken: re-check the count, since a second waiter may have
        // drained it between our wake-up and our next lock acquisition.
    }
}

/// Wake the head waiter if any, otherwise increment (capped at `max`).
pub fn semaphore_signal(id: SemaphoreId) -> Result<(), SyncError> {
    let mut regs = SEMAPHORES.lock();
    let sem = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
    if !sem.waiters.is_empty() {
        let tid = sem.waiters.remove(0);
        drop(regs);
        wake_thread(tid);
        return Ok(());
    }
    if sem.count >= sem.max {
        return Err(SyncError::OverflowsMax);
    }
    sem.count += 1;
    Ok(())
}

// ================================================================================================
// MUTEX
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexId(pub u32);

struct MutexState {
    owner: Option<ThreadId>,
    /// Owner's priority before the current inheritance chain started, so
    /// `unlock` can restore it exactly.
    owner_original_priority: Option<Priority>,
    waiters: Vec<ThreadId>,
}

static MUTEXES: SpinMutex<BTreeMap<u32, MutexState>> = SpinMutex::new(BTreeMap::new());
static NEXT_MUTEX_ID: AtomicU32 = AtomicU32::new(1);

pub fn mutex_create() -> MutexId {
    let id = next_id(&NEXT_MUTEX_ID);
    MUTEXES.lock().insert(id, MutexState { owner: None, owner_original_priority: None, waiters: Vec::new() });
    MutexId(id)
}

pub fn mutex_destroy(id: MutexId) {
    let waiters = {
        let mut regs = MUTEXES.lock();
        regs.remove(&id.0).map(|m| m.waiters).unwrap_or_default()
    };
    for tid in waiters {
        wake_thread(tid);
    }
}

pub fn mutex_lock(id: MutexId) -> Result<(), SyncError> {
    // `waited` distinguishes "I was just handed ownership by unlock() after
    // parking" (owner == current, return Ok) from "I already hold this
    // mutex and called lock() again without unlocking" (owner == current on
    // the very first check, never having parked - that's Recursive).
    let mut waited = false;
    loop {
        let (current, inherit_to) = {
            let mut regs = MUTEXES.lock();
            let m = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
            let current = current_thread_id();

            match m.owner {
                None => {
                    m.owner = Some(current);
                    m.owner_original_priority = None;
                    return Ok(());
                }
                Some(owner) if owner == current && waited => return Ok(()),
                Some(owner) if owner == current => return Err(SyncError::Recursive),
                Some(owner) => {
                    park_on(&mut m.waiters);
                    if m.owner_original_priority.is_none() {
                        m.owner_original_priority = Some(thread_priority_of(owner));
                    }
                    (current, owner)
                }
            }
        };
        waited = true;

        // Priority inheritance, walked transitively: bump the owner to at
        // least our priority, then if that owner is itself queued on
        // another mutex, bump its owner too, and so on up the chain.
        let ours = thread_priority_of(current);
        propagate_priority(inherit_to, ours);

        block_current_thread(BlockReason::WaitingForLock { lock_id: id.0 as usize });
        super::yield_now();
        if take_cancelled(current) {
            return Err(SyncError::Cancelled);
        }
        // Woken: retry. Either we were handed ownership directly by
        // mutex_unlock (in which case the fast path above returns Ok), or
        // we raced and must wait again.
    }
}

pub fn mutex_try_lock(id: MutexId) -> Result<(), SyncError> {
    let mut regs = MUTEXES.lock();
    let m = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
    let current = current_thread_id();
    match m.owner {
        None => {
            m.owner = Some(current);
            m.owner_original_priority = None;
            Ok(())
        }
        Some(owner) if owner == current => Err(SyncError::Recursive),
        Some(_) => Err(SyncError::WouldBlock),
    }
}

pub fn mutex_unlock(id: MutexId) -> Result<(), SyncError> {
    let (prev_owner, restore_priority, next_owner) = {
        let mut regs = MUTEXES.lock();
        let m = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
        let current = current_thread_id();

        if m.owner != Some(current) {
            return Err(SyncError::NotOwner);
        }

        let restore = m.owner_original_priority.take();
        if m.waiters.is_empty() {
            m.owner = None;
            (current, restore, None)
        } else {
            let next = m.waiters.remove(0);
            m.owner = Some(next);
            m.owner_original_priority = None;
            (current, restore, Some(next))
        }
    };

    // Revert the outgoing owner's inherited priority.
    set_thread_priority_override(prev_owner, restore_priority);

    if let Some(next) = next_owner {
        wake_thread(next);
    }
    Ok(())
}

// ================================================================================================
// EVENT (manual-reset)
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u32);

struct EventState {
    signalled: bool,
    waiters: Vec<ThreadId>,
}

static EVENTS: SpinMutex<BTreeMap<u32, EventState>> = SpinMutex::new(BTreeMap::new());
static NEXT_EVENT_ID: AtomicU32 = AtomicU32::new(1);

pub fn event_create() -> EventId {
    let id = next_id(&NEXT_EVENT_ID);
    EVENTS.lock().insert(id, EventState { signalled: false, waiters: Vec::new() });
    EventId(id)
}

pub fn event_destroy(id: EventId) {
    let waiters = {
        let mut regs = EVENTS.lock();
        regs.remove(&id.0).map(|e| e.waiters).unwrap_or_default()
    };
    for tid in waiters {
        wake_thread(tid);
    }
}

pub fn event_set(id: EventId) -> Result<(), SyncError> {
    let waiters = {
        let mut regs = EVENTS.lock();
        let e = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
        e.signalled = true;
        core::mem::take(&mut e.waiters)
    };
    for tid in waiters {
        wake_thread(tid);
    }
    Ok(())
}

pub fn event_reset(id: EventId) -> Result<(), SyncError> {
    let mut regs = EVENTS.lock();
    let e = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
    e.signalled = false;
    Ok(())
}

pub fn event_wait(id: EventId) -> Result<(), SyncError> {
    loop {
        {
            let mut regs = EVENTS.lock();
            let e = regs.get_mut(&id.0).ok_or(SyncError::NotFound)?;
            if e.signalled {
                return Ok(());
            }
            park_on(&mut e.waiters);
        }
        block_current_thread(BlockReason::WaitingForEvent { event_id: id.0 as usize });
        super::yield_now();
        if take_cancelled(current_thread_id()) {
            return Err(SyncError::Cancelled);
        }
    }
}

/// Forcibly remove `tid` from every semaphore/mutex/event wait list it
/// might be parked on and wake it. Used by process termination
/// (`ProcessManager::terminate`) and signal delivery (`signal::raise`) to
/// interrupt a blocked thread; pairs with `mark_cancelled`, which the
/// caller sets first so the woken thread's retry loop observes `Cancelled`
/// instead of looping back into the wait.
pub fn cancel_thread_waits(tid: ThreadId) {
    let mut woke = false;

    let mut sems = SEMAPHORES.lock();
    for sem in sems.values_mut() {
        let before = sem.waiters.len();
        sem.waiters.retain(|&t| t != tid);
        woke |= sem.waiters.len() != before;
    }
    drop(sems);

    let mut mutexes = MUTEXES.lock();
    for m in mutexes.values_mut() {
        let before = m.waiters.len();
        m.waiters.retain(|&t| t != tid);
        woke |= m.waiters.len() != before;
    }
    drop(mutexes);

    let mut events = EVENTS.lock();
    for e in events.values_mut() {
        let before = e.waiters.len();
        e.waiters.retain(|&t| t != tid);
        woke |= e.waiters.len() != before;
    }
    drop(events);

    if woke {
        wake_thread(tid);
    }
}

#[cfg(test)]
mod tests {
    // The primitives above all route through the live scheduler singleton
    // (`with_scheduler_mut`, `block_current_thread`) and so need a running
    // kernel to exercise end-to-end; see `src/tests/` for the in-kernel
    // integration coverage (pipe rendezvous, priority inheritance chains).
    // What's host-testable in isolation is the pure bookkeeping, covered
    // here without touching the scheduler singleton.

    #[test]
    fn priority_is_max_not_min() {
        use super::super::types::Priority;
        let h = Priority(1000);
        let l = Priority(10);
        assert_eq!(core::cmp::max(h, l), h, "higher numeric value must win inheritance");
    }
}
