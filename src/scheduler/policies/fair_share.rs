/*
 * Fair-Share Scheduling Policy
 *
 * Implements stride scheduling: each thread is assigned a stride inversely
 * proportional to its priority (weight), and a running "pass" counter.
 * pick_next always serves the runnable thread with the lowest pass, then
 * advances its pass by its stride. This gives threads CPU time proportional
 * to their weight over any sufficiently long window, instead of round-robin's
 * equal split regardless of priority.
 */

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, Priority, TimeSliceTicks},
};

/// Large fixed numerator so integer stride division keeps useful precision
/// even for low-weight threads.
const STRIDE_NUMERATOR: u64 = 1_000_000;

struct Ticket {
    stride: u64,
    pass: u64,
}

pub struct FairSharePolicy {
    runnable: BTreeMap<ThreadId, Ticket>,
    mode: SchedulerMode,
}

impl FairSharePolicy {
    pub fn new() -> Self {
        Self { runnable: BTreeMap::new(), mode: SchedulerMode::Boot { critical_count: 0, ready_count: 0 } }
    }

    fn stride_for(priority: Priority) -> u64 {
        let weight = priority.0.max(1) as u64;
        STRIDE_NUMERATOR / weight
    }

    fn insert(&mut self, tid: ThreadId, priority: Priority) {
        let min_pass = self.runnable.values().map(|t| t.pass).min().unwrap_or(0);
        self.runnable.insert(tid, Ticket { stride: Self::stride_for(priority), pass: min_pass });
    }
}

impl Scheduler for FairSharePolicy {
    fn on_event(&mut self, ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, priority } => self.insert(tid, priority),
            SchedEvent::ThreadWoke { tid, .. } => {
                if !self.runnable.contains_key(&tid) {
                    let priority = ctx.thread_priority(tid).unwrap_or(Priority::NORMAL);
                    self.insert(tid, priority);
                }
            }
            SchedEvent::ThreadBlocked { tid, .. } | SchedEvent::ThreadExited { tid, .. } => {
                self.runnable.remove(&tid);
            }
            SchedEvent::ModeChanged { new_mode, .. } => self.mode = new_mode,
            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });

        let mut candidates: Vec<(ThreadId, u64)> =
            self.runnable.iter().map(|(&tid, t)| (tid, t.pass)).collect();
        candidates.sort_by_key(|&(_, pass)| pass);

        for (tid, _) in candidates {
            if boot {
                let critical = ctx
                    .thread_process(tid)
                    .map(|pid| ctx.is_critical_process(pid))
                    .unwrap_or(false);
                if !critical {
                    continue;
                }
            }

            if ctx.is_runnable(tid) {
                if let Some(ticket) = self.runnable.get_mut(&tid) {
                    ticket.pass += ticket.stride;
                }
                return DispatchDecision::run_thread(tid, TimeSliceTicks::DEFAULT);
            }
        }

        DispatchDecision::idle()
    }

    fn on_switched(&mut self, _ctx: &mut dyn KernelSchedCtx, _cpu: CpuId, _prev: Option<ThreadId>, _next: Option<ThreadId>) {}

    fn name(&self) -> &'static str {
        "Fair-Share"
    }
}

impl Default for FairSharePolicy {
    fn default() -> Self {
        Self::new()
    }
}
