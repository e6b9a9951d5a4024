/*
 * Scheduler - Policy/Mechanism Split
 *
 * This module implements preemptive multitasking for the Kestrel kernel with a
 * clean separation between mechanism (how threads are switched) and policy
 * (which thread runs next):
 *
 * - `scheduler` (Scheduler struct): owns thread/process storage, stacks, and
 *   PID/TID allocation. Has no opinion about scheduling order.
 * - `sched_core` (SchedulerCore): the stable mechanism layer. Translates
 *   kernel operations (thread created, blocked, woke, exited, ...) into
 *   `SchedEvent`s for the active policy, and executes the policy's
 *   `DispatchDecision` by tracking per-CPU current-thread/timeslice state.
 * - `traits::Scheduler`: the swappable policy interface (`policies/`
 *   contains Cooperative, RoundRobin, Priority, Mlfq, FairShare, Realtime).
 * - `context::SchedContext`: the `KernelSchedCtx` implementation a policy
 *   uses to query/modify kernel state without touching it directly.
 *
 * Ready-queue membership is owned entirely by the active policy: the
 * mechanism layer never pushes/pops a queue itself, it only raises events
 * and asks `pick_next()` who should run.
 *
 * THREAD LIFECYCLE:
 * =================
 *
 *   New -> Ready -> Running -> Ready (preempted) -> ...
 *                      |
 *                      +--> Blocked (I/O, IPC, sleep, lock) --> Ready
 *                      |
 *                      +--> Terminated (reaped by the next context switch)
 *
 * CONTEXT SWITCHING:
 * ==================
 *
 * Both the 100Hz timer interrupt (IRQ0) and voluntary `yield_now()` (INT
 * 0x81) funnel into the same naked-asm trampolines, which save/restore a
 * full `InterruptContext` and call `schedule_from_interrupt()` to decide
 * what runs next. This keeps preemptive and voluntary switches identical
 * from the mechanism's point of view.
 */

use alloc::string::String;

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

pub mod error;
pub mod events;
pub mod io_wait;
pub mod ipc;
pub mod pipe;
pub mod process;
pub mod sched_core;
pub mod scheduler;
pub mod scheduler_manager;
pub mod context;
pub mod policies;
pub mod signal;
pub mod state;
pub mod sync;
pub mod thread;
pub mod traits;
pub mod types;

pub use context::SchedContext;
pub use error::{LifecycleError, PipeError, SyncError};
pub use events::SchedEvent;
pub use io_wait::{wait_for_io, wake_io_waiters, IoChannel};
pub use policies::RoundRobinPolicy;
pub use process::{Process, ProcessId, ProcessManager, ProcessState};
pub use sched_core::SchedulerCore;
pub use scheduler::{InterruptContext, InterruptFrame, MAX_THREADS, THREAD_STACK_SIZE};
pub use scheduler_manager::SchedulerManager;
pub use state::{can_transition, LifecycleState, SuspendState};
pub use thread::{Thread, ThreadId, ThreadManager, ThreadState};
pub use traits::{KernelSchedCtx, Scheduler};
pub use types::{BlockReason, CpuId, DispatchDecision, Priority, SchedClass, TimeSliceTicks};

/// Shared-memory regions live in their own top-level module (they aren't
/// scheduler state), but callers that reach IPC through `scheduler::ipc::*`
/// historically also expect `scheduler::shmem::*` - keep that path working.
pub mod shmem {
    pub use crate::shmem::*;
}

/// Marker trait for subsystems with a one-shot, order-sensitive boot
/// initialization step. Kept deliberately minimal - this is organizational,
/// not a generic "service" abstraction.
pub trait KernelComponent {
    fn init();
}

/// Classifies a process for scheduling priority and boot-time eligibility.
///
/// `Critical` processes are the only ones that run during `SchedulerMode::Boot`;
/// everything else waits until every critical process has signaled ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// Boot-critical service (must run before normal mode starts).
    Critical,
    /// Long-lived kernel service, not boot-critical.
    System,
    /// Ordinary userspace process.
    User,
    /// Real-time process; scheduled at `Priority::REALTIME_BASE` or above.
    RealTime,
}

impl ProcessType {
    /// Default scheduling priority for processes of this type.
    ///
    /// Policies may still adjust an individual thread's effective priority
    /// (aging, priority inheritance, ...); this is only the starting point.
    pub fn priority(&self) -> Priority {
        match self {
            ProcessType::Critical => Priority::CRITICAL,
            ProcessType::System => Priority::SYSTEM,
            ProcessType::User => Priority::NORMAL,
            ProcessType::RealTime => Priority::REALTIME_BASE,
        }
    }
}

/// Tracks whether a process has finished its own startup sequence.
///
/// Only meaningful for `ProcessType::Critical` processes: the scheduler
/// transitions `Boot -> Normal` once every critical process reaches `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessInitState {
    Initializing,
    Ready,
}

/// Scheduler-wide boot/normal mode.
///
/// During `Boot`, only critical processes are eligible to run (policies
/// check `KernelSchedCtx::current_mode()` via `is_critical_process()`).
/// `Normal` lifts that restriction permanently - there is no mode after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Boot { critical_count: u32, ready_count: u32 },
    Normal,
}

/// Global scheduler instance (thread/process storage, PID/TID allocation).
static SCHEDULER: Mutex<Option<scheduler::Scheduler>> = Mutex::new(None);

/// Mechanism layer: active policy + per-CPU dispatch state.
static SCHEDULER_CORE: Mutex<Option<SchedulerCore>> = Mutex::new(None);

/// Current running thread ID (atomic for IRQ safety).
static CURRENT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

/// Set once `SchedulerManager::enable()` has run.
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

/// When true, timer interrupts update accounting but do not switch threads.
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// Run `f` with shared access to the scheduler's thread/process storage.
///
/// # Panics
/// Panics if called before `SchedulerManager::init()`.
pub(crate) fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&scheduler::Scheduler) -> R,
{
    let guard = SCHEDULER.lock();
    f(guard.as_ref().expect("Scheduler not initialized"))
}

/// Run `f` with exclusive access to the scheduler's thread/process storage.
///
/// # Panics
/// Panics if called before `SchedulerManager::init()`.
pub(crate) fn with_scheduler_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler) -> R,
{
    let mut guard = SCHEDULER.lock();
    f(guard.as_mut().expect("Scheduler not initialized"))
}

/// Run `f` with exclusive access to both the scheduler and the mechanism
/// layer at once - needed for any operation that changes thread/process
/// state and must also notify the active policy (create, block, wake, exit).
///
/// Always locks `SCHEDULER` before `SCHEDULER_CORE`; every call site in this
/// module follows that order to avoid a lock-ordering deadlock.
///
/// # Panics
/// Panics if called before `SchedulerManager::init()`.
pub(crate) fn with_scheduler_and_core<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler, &mut SchedulerCore) -> R,
{
    let mut sched_guard = SCHEDULER.lock();
    let mut core_guard = SCHEDULER_CORE.lock();
    let scheduler = sched_guard.as_mut().expect("Scheduler not initialized");
    let core = core_guard.as_mut().expect("SchedulerCore not initialized");
    f(scheduler, core)
}

/// Look up a thread's name, mostly for logging.
pub(crate) fn get_thread_name(tid: ThreadId) -> Option<String> {
    with_scheduler(|s| s.threads.iter().find(|t| t.id == tid).map(|t| t.name.clone()))
}

/// Built-in idle thread: halts the CPU until the next interrupt.
///
/// The scheduler always has something to run because this thread (ID 0's
/// successor, spawned by `SchedulerManager::enable()`) is never blocked
/// or terminated.
fn idle_thread_main() {
    log::info!("Idle thread starting...");

    let mut idle_counter = 0u64;
    loop {
        if idle_counter % 10000 == 0 {
            log::debug!("Idle thread tick: {}", idle_counter);
        }
        idle_counter = idle_counter.wrapping_add(1);

        x86_64::instructions::hlt();
    }
}

// ================================================================================================
// FREE-FUNCTION FACADE
//
// Most call sites outside this module reach the scheduler through these
// free functions rather than through SchedulerManager/ThreadManager/
// ProcessManager directly - kept for call sites (syscalls, drivers, tests)
// that predate the manager split and for brevity at simple call sites.
// ================================================================================================

/// Voluntarily yield the CPU to the next ready thread (INT 0x81).
pub fn yield_now() {
    SchedulerManager::yield_now();
}

/// Sleep the current thread for `ms` milliseconds without busy-waiting.
pub fn sleep_ms(ms: u64) {
    SchedulerManager::sleep_ms(ms);
}

/// Returns true once `SchedulerManager::enable()` has run.
pub fn is_scheduler_enabled() -> bool {
    SchedulerManager::is_enabled()
}

/// ID of the currently executing thread (0 = idle/boot thread).
pub fn current_thread_id() -> ThreadId {
    ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst))
}

/// Mark the current thread Blocked and notify the policy with `reason`.
/// See `SchedulerManager::block_current` for the full contract.
pub fn block_current_thread(reason: BlockReason) {
    SchedulerManager::block_current(reason);
}

/// Wake a blocked thread and notify the policy. IRQ-safe.
pub fn wake_thread(thread_id: ThreadId) {
    SchedulerManager::wake(thread_id);
}

/// Flag `tid` as cancelled without waking it. Paired with `wake_thread` (or
/// a direct wake from whatever wait list it was swept off) by process
/// termination and signal delivery; the thread's own blocking retry loop
/// consumes the flag via `take_cancelled` on its next wake and returns
/// `Cancelled` instead of re-checking its wait condition.
pub fn mark_cancelled(tid: ThreadId) {
    with_scheduler_mut(|s| {
        if let Some(t) = s.threads.iter_mut().find(|t| t.id == tid) {
            t.cancelled = true;
        }
    });
}

/// Read and clear `tid`'s cancelled flag. Returns `false` if the thread
/// doesn't exist or was never marked.
pub fn take_cancelled(tid: ThreadId) -> bool {
    with_scheduler_mut(|s| {
        s.threads
            .iter_mut()
            .find(|t| t.id == tid)
            .map(|t| core::mem::take(&mut t.cancelled))
            .unwrap_or(false)
    })
}

/// Suspend a thread: nest a nested-suspend count on top of its current
/// state, moving it to `Suspended` on the first (non-nested) call. A
/// thread that's already `Suspended` just bumps the nesting depth.
///
/// Per §4.4, only `Ready`/`Running`/`Waiting`/`Blocked`/`Suspended` threads
/// may be suspended; `New`, `Zombie`, and `Terminated` reject with
/// `InvalidTransition`.
pub fn suspend_thread(tid: ThreadId) -> Result<(), LifecycleError> {
    with_scheduler_and_core(|scheduler, core| {
        let was_runnable = {
            let thread = scheduler.get_thread_mut(tid).ok_or(LifecycleError::NotFound)?;
            let was_runnable = matches!(thread.state, ThreadState::Ready | ThreadState::Running);

            if thread.state != ThreadState::Suspended
                && !can_transition(thread.state, ThreadState::Suspended)
            {
                return Err(LifecycleError::InvalidTransition);
            }

            thread.suspend.push(thread.state);
            thread.state = ThreadState::Suspended;
            was_runnable
        };

        if was_runnable {
            let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
            core.thread_blocked(&mut ctx, tid, BlockReason::Other);
        }
        Ok(())
    })
}

/// Resume a previously suspended thread: pop one level of suspend nesting.
/// Only once the nesting fully unwinds does the thread actually leave
/// `Suspended`, restored to whatever state it was suspended from.
/// Resuming a thread with no outstanding suspend returns `InvalidTransition`.
pub fn resume_thread(tid: ThreadId) -> Result<(), LifecycleError> {
    with_scheduler_and_core(|scheduler, core| {
        let restored = {
            let thread = scheduler.get_thread_mut(tid).ok_or(LifecycleError::NotFound)?;
            if thread.state != ThreadState::Suspended {
                return Err(LifecycleError::InvalidTransition);
            }
            let restored = thread.suspend.pop()?;
            if let Some(state) = restored {
                thread.state = state;
            }
            restored
        };

        if let Some(state) = restored {
            if matches!(state, ThreadState::Ready | ThreadState::Running) {
                let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
                core.thread_woke(&mut ctx, tid, BlockReason::Other);
            }
        }
        Ok(())
    })
}

/// Spawn a thread in the default kernel process (PID 0).
pub fn spawn_thread(entry_point: fn(), name: &str) -> ThreadId {
    ThreadManager::spawn(entry_point, name)
}

/// Spawn a thread within a specific process.
pub fn spawn_thread_in_process(entry_point: fn(), name: &str, process_id: ProcessId) -> ThreadId {
    ThreadManager::spawn_in_process(entry_point, name, process_id)
}

/// Terminate the current thread with exit code 0.
///
/// Most callers don't care about a specific exit status; use
/// `ThreadManager::exit(code)` directly when they do.
pub fn exit_thread() -> ! {
    ThreadManager::exit(0)
}

/// Initialize stdin/stdout/stderr for the process owning `thread_id`.
pub fn init_std_streams(thread_id: ThreadId) {
    ThreadManager::init_std_streams(thread_id);
}

/// Per-thread CPU usage snapshot, as reported by `get_thread_stats()`.
#[derive(Debug, Clone)]
pub struct ThreadStats {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub cpu_time_ms: u64,
    pub cpu_percent: u64,
}

/// Snapshot CPU usage for every thread currently in the system.
pub fn get_thread_stats() -> alloc::vec::Vec<ThreadStats> {
    ThreadManager::stats()
}

/// Process ID owning the currently running thread, or `None` during
/// early boot before any process-scoped thread has been scheduled.
pub fn current_process_id() -> Option<ProcessId> {
    ProcessManager::current_id()
}

/// Run `f` with read-only access to the current thread's owning process.
pub fn with_current_process<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Process) -> R,
{
    ProcessManager::with_current(f)
}

/// Run `f` with mutable access to the current thread's owning process.
pub fn with_current_process_mut<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut Process) -> R,
{
    ProcessManager::with_current_mut(f)
}

/// Run `f` with mutable access to a specific process.
pub fn with_process_mut<F, R>(process_id: ProcessId, f: F) -> Option<R>
where
    F: FnOnce(&mut Process) -> R,
{
    ProcessManager::with_mut(process_id, f)
}

/// Create a new kernel process (Ring 0, kernel address space).
pub fn spawn_kernel_process(name: &str, process_type: ProcessType) -> ProcessId {
    ProcessManager::spawn_kernel(name, process_type)
}

// ================================================================================================
// INTERRUPT-DRIVEN CONTEXT SWITCHING
// ================================================================================================

/// Software interrupt handler for voluntary yielding (INT 0x81).
///
/// Identical to the timer handler except it's triggered by software, so
/// there's no PIC EOI to send.
#[unsafe(naked)]
pub unsafe extern "C" fn yield_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",

        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        "iretq",

        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Preemptive timer interrupt handler (IRQ0, 100Hz).
///
/// Saves a full `InterruptContext` on the current thread's stack, calls
/// `schedule_from_interrupt()` to pick the next thread, switches RSP to
/// that thread's saved context, sends PIC EOI, and returns via `iretq`.
#[unsafe(naked)]
pub unsafe extern "C" fn preemptive_timer_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",

        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        "push rax",
        "mov al, 0x20",
        "out 0x20, al",
        "pop rax",

        "iretq",

        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Pick and switch to the next thread from interrupt context.
///
/// Called with a pointer to the interrupted thread's `InterruptContext`
/// still sitting on its stack. Saves that context into the `Thread`,
/// notifies the policy (tick-driven sleep wakeups, yield), asks
/// `SchedulerCore::reschedule()` who runs next, and returns a pointer to
/// that thread's saved context for the asm trampoline to switch into.
///
/// Runs with interrupts disabled and must not block.
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_interrupt(
    current_ctx_ptr: *const InterruptContext,
) -> *const InterruptContext {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }

    if PREEMPTION_DISABLED.load(Ordering::SeqCst) {
        crate::utils::timer::on_timer_interrupt();
        return current_ctx_ptr;
    }

    crate::utils::timer::on_timer_interrupt();

    let mut sched_guard = SCHEDULER.lock();
    let mut core_guard = SCHEDULER_CORE.lock();
    let (scheduler, core) = match (sched_guard.as_mut(), core_guard.as_mut()) {
        (Some(s), Some(c)) => (s, c),
        _ => return current_ctx_ptr,
    };

    let current_id = ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst));
    let current_time = crate::utils::timer::uptime_ms();

    // Save the interrupted thread's context and CPU-time accounting, and
    // drop it back to Ready unless something else already moved it to
    // Blocked/Terminated before triggering this switch.
    if current_id.0 != 0 {
        if let Some(thread) = scheduler.get_thread_mut(current_id) {
            unsafe {
                thread.interrupt_context = *current_ctx_ptr;
            }
            if thread.last_scheduled_time > 0 {
                let elapsed = current_time.saturating_sub(thread.last_scheduled_time);
                thread.cpu_time_ms = thread.cpu_time_ms.saturating_add(elapsed);
            }
            if thread.state == ThreadState::Running {
                thread.state = ThreadState::Ready;
            }
        }
    }

    // Per-tick sleep expiry scan: the policy owns ready-queue membership,
    // so every thread woken here needs its own ThreadWoke notification.
    for tid in scheduler.wake_expired_sleepers() {
        let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
        core.thread_woke(&mut ctx, tid, BlockReason::Sleeping { until_tick: current_time });
    }

    if current_id.0 != 0 {
        let still_ready = scheduler
            .get_thread_mut(current_id)
            .map(|t| t.state == ThreadState::Ready)
            .unwrap_or(false);
        if still_ready {
            let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
            core.thread_yielded(&mut ctx, current_id);
        }
    }

    let next_id = {
        let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
        match core.reschedule(&mut ctx, CpuId::BSP) {
            Some(id) => id,
            None => return current_ctx_ptr,
        }
    };

    // Reap anything the last switch left Terminated. IRQ context: never log.
    scheduler.cleanup_terminated_threads(next_id, false);

    if next_id == current_id {
        if let Some(thread) = scheduler.get_thread_mut(next_id) {
            thread.state = ThreadState::Running;
            thread.last_scheduled_time = current_time;
        }
        return current_ctx_ptr;
    }

    let next_ctx_ptr = match scheduler.get_thread_mut(next_id) {
        Some(thread) => {
            thread.state = ThreadState::Running;
            thread.last_scheduled_time = current_time;
            &thread.interrupt_context as *const InterruptContext
        }
        None => return current_ctx_ptr,
    };

    CURRENT_THREAD_ID.store(next_id.0, Ordering::SeqCst);
    next_ctx_ptr
}
