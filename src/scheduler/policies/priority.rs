/*
 * Strict-Priority Scheduling Policy
 *
 * Threads are kept in per-priority-band FIFO queues. `pick_next` always
 * serves the highest non-empty band first. To avoid starving low-priority
 * threads under sustained high-priority load, a thread's effective
 * priority is aged upward for every tick it spends waiting and reset to
 * its base priority once it runs.
 */

use alloc::collections::{BTreeMap, VecDeque};

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, Priority, TimeSliceTicks},
};

/// How much effective priority increases per tick spent waiting.
const AGING_STEP: i32 = 1;

/// Ceiling effective priority cannot age past - stays below REALTIME_BASE
/// so an aged batch thread never outranks an actual real-time thread.
const AGING_CEILING: i32 = Priority::REALTIME_BASE.0 - 1;

pub struct PriorityPolicy {
    bands: BTreeMap<i32, VecDeque<ThreadId>>,
    effective: BTreeMap<ThreadId, i32>,
    base: BTreeMap<ThreadId, i32>,
    mode: SchedulerMode,
}

impl PriorityPolicy {
    pub fn new() -> Self {
        Self {
            bands: BTreeMap::new(),
            effective: BTreeMap::new(),
            base: BTreeMap::new(),
            mode: SchedulerMode::Boot { critical_count: 0, ready_count: 0 },
        }
    }

    fn enqueue(&mut self, tid: ThreadId, priority: i32) {
        self.base.insert(tid, priority);
        self.effective.insert(tid, priority);
        self.bands.entry(priority).or_insert_with(VecDeque::new).push_back(tid);
    }

    fn remove(&mut self, tid: ThreadId) {
        for queue in self.bands.values_mut() {
            queue.retain(|&id| id != tid);
        }
        self.bands.retain(|_, q| !q.is_empty());
        self.effective.remove(&tid);
        self.base.remove(&tid);
    }
}

impl Scheduler for PriorityPolicy {
    fn on_event(&mut self, ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, priority } => self.enqueue(tid, priority.0),
            SchedEvent::ThreadWoke { tid, .. } => {
                let priority = ctx.thread_priority(tid).unwrap_or(Priority::NORMAL).0;
                if !self.base.contains_key(&tid) {
                    self.enqueue(tid, priority);
                }
            }
            SchedEvent::ThreadYielded { tid } => {
                if let Some(&band) = self.base.get(&tid) {
                    self.bands.entry(band).or_insert_with(VecDeque::new).push_back(tid);
                }
            }
            SchedEvent::ThreadBlocked { tid, .. } | SchedEvent::ThreadExited { tid, .. } => {
                self.remove(tid);
            }
            SchedEvent::Tick { .. } => {
                // Age every thread still waiting in a band below its base
                // priority's neighbors - promote it to the next band up.
                let mut promotions = alloc::vec::Vec::new();
                for (&band, queue) in self.bands.iter() {
                    for &tid in queue.iter() {
                        let eff = self.effective.entry(tid).or_insert(band);
                        if *eff < AGING_CEILING {
                            *eff += AGING_STEP;
                            promotions.push((tid, band, *eff));
                        }
                    }
                }
                for (tid, old_band, new_eff) in promotions {
                    if let Some(q) = self.bands.get_mut(&old_band) {
                        q.retain(|&id| id != tid);
                    }
                    self.bands.entry(new_eff).or_insert_with(VecDeque::new).push_back(tid);
                }
                self.bands.retain(|_, q| !q.is_empty());
            }
            SchedEvent::ModeChanged { new_mode, .. } => self.mode = new_mode,
            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });

        let band_keys: alloc::vec::Vec<i32> = self.bands.keys().copied().rev().collect();
        for band in band_keys {
            let Some(queue) = self.bands.get_mut(&band) else { continue };
            let attempts = queue.len();
            for _ in 0..attempts {
                let Some(tid) = queue.pop_front() else { break };

                if boot {
                    let critical = ctx
                        .thread_process(tid)
                        .map(|pid| ctx.is_critical_process(pid))
                        .unwrap_or(false);
                    if !critical {
                        queue.push_back(tid);
                        continue;
                    }
                }

                if ctx.is_runnable(tid) {
                    // Reset effective priority to base on dispatch - the
                    // thread got its turn, aging no longer owed.
                    if let Some(&base) = self.base.get(&tid) {
                        self.effective.insert(tid, base);
                    }
                    queue.push_back(tid);
                    return DispatchDecision::run_thread(tid, TimeSliceTicks::DEFAULT);
                }
            }
        }

        self.bands.retain(|_, q| !q.is_empty());
        DispatchDecision::idle()
    }

    fn on_switched(&mut self, _ctx: &mut dyn KernelSchedCtx, _cpu: CpuId, _prev: Option<ThreadId>, _next: Option<ThreadId>) {}

    fn name(&self) -> &'static str {
        "Priority"
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::new()
    }
}
