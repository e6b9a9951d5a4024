/*
 * Cooperative Scheduling Policy
 *
 * A thread keeps the CPU until it voluntarily yields, blocks, or exits -
 * there is no timeslice-driven preemption. `pick_next` never returns a
 * thread other than the head of the ready queue, and `on_event` never
 * rotates the queue on `Tick`.
 */

use alloc::collections::VecDeque;

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, TimeSliceTicks},
};

pub struct CooperativePolicy {
    ready_queue: VecDeque<ThreadId>,
    mode: SchedulerMode,
}

impl CooperativePolicy {
    pub fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
            mode: SchedulerMode::Boot { critical_count: 0, ready_count: 0 },
        }
    }
}

impl Scheduler for CooperativePolicy {
    fn on_event(&mut self, _ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, .. } => self.ready_queue.push_back(tid),
            SchedEvent::ThreadWoke { tid, .. } | SchedEvent::ThreadYielded { tid } => {
                if !self.ready_queue.contains(&tid) {
                    self.ready_queue.push_back(tid);
                }
            }
            SchedEvent::ThreadBlocked { tid, .. } | SchedEvent::ThreadExited { tid, .. } => {
                self.ready_queue.retain(|&id| id != tid);
            }
            SchedEvent::ModeChanged { new_mode, .. } => self.mode = new_mode,
            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });
        let mut attempts = 0;
        let max_attempts = self.ready_queue.len();

        while attempts < max_attempts {
            let Some(tid) = self.ready_queue.pop_front() else { break };
            attempts += 1;

            if boot {
                let critical = ctx
                    .thread_process(tid)
                    .map(|pid| ctx.is_critical_process(pid))
                    .unwrap_or(false);
                if !critical {
                    self.ready_queue.push_back(tid);
                    continue;
                }
            }

            if ctx.is_runnable(tid) {
                self.ready_queue.push_front(tid);
                // No timeslice ceiling - cooperative threads run until they
                // yield, so hand out the longest slice the mechanism offers.
                return DispatchDecision::run_thread(tid, TimeSliceTicks::LONG);
            }
        }

        DispatchDecision::idle()
    }

    fn on_switched(&mut self, _ctx: &mut dyn KernelSchedCtx, _cpu: CpuId, _prev: Option<ThreadId>, _next: Option<ThreadId>) {}

    fn name(&self) -> &'static str {
        "Cooperative"
    }
}

impl Default for CooperativePolicy {
    fn default() -> Self {
        Self::new()
    }
}
