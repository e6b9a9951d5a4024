/*
 * Multi-Level Feedback Queue Scheduling Policy
 *
 * A fixed number of queues, each with its own timeslice: queue 0 is
 * shortest/highest priority, the last queue is longest/lowest. A thread
 * that uses its whole timeslice without blocking is demoted one level;
 * a thread that blocks before its slice expires keeps its level. A
 * periodic priority boost moves every thread back to queue 0 to bound
 * starvation of threads stuck behind long-running CPU hogs.
 */

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, TimeSliceTicks},
};

const NUM_LEVELS: usize = 4;
const LEVEL_TIMESLICE: [TimeSliceTicks; NUM_LEVELS] = [
    TimeSliceTicks::SHORT,
    TimeSliceTicks::DEFAULT,
    TimeSliceTicks(20),
    TimeSliceTicks::LONG,
];

/// Ticks between priority boosts (reset every thread to level 0).
const BOOST_INTERVAL_TICKS: u64 = 500;

pub struct MlfqPolicy {
    levels: [VecDeque<ThreadId>; NUM_LEVELS],
    thread_level: alloc::collections::BTreeMap<ThreadId, usize>,
    used_full_slice: alloc::collections::BTreeMap<ThreadId, bool>,
    ticks_since_boost: u64,
    mode: SchedulerMode,
}

impl MlfqPolicy {
    pub fn new() -> Self {
        Self {
            levels: Default::default(),
            thread_level: alloc::collections::BTreeMap::new(),
            used_full_slice: alloc::collections::BTreeMap::new(),
            ticks_since_boost: 0,
            mode: SchedulerMode::Boot { critical_count: 0, ready_count: 0 },
        }
    }

    fn enqueue(&mut self, tid: ThreadId, level: usize) {
        let level = level.min(NUM_LEVELS - 1);
        self.thread_level.insert(tid, level);
        self.levels[level].push_back(tid);
    }

    fn remove(&mut self, tid: ThreadId) {
        for q in self.levels.iter_mut() {
            q.retain(|&id| id != tid);
        }
        self.thread_level.remove(&tid);
        self.used_full_slice.remove(&tid);
    }

    fn boost_all(&mut self) {
        let mut all: Vec<ThreadId> = Vec::new();
        for q in self.levels.iter_mut() {
            all.extend(q.drain(..));
        }
        for tid in all {
            self.thread_level.insert(tid, 0);
            self.levels[0].push_back(tid);
        }
        self.ticks_since_boost = 0;
        log::debug!("[MLFQ] priority boost - all threads reset to level 0");
    }
}

impl Scheduler for MlfqPolicy {
    fn on_event(&mut self, _ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, .. } => self.enqueue(tid, 0),
            SchedEvent::ThreadWoke { tid, .. } => {
                let level = self.thread_level.get(&tid).copied().unwrap_or(0);
                self.levels[level.min(NUM_LEVELS - 1)].push_back(tid);
                self.thread_level.insert(tid, level);
            }
            SchedEvent::ThreadYielded { tid } => {
                // Voluntary yield before slice expiry: stay at current level.
                let level = self.thread_level.get(&tid).copied().unwrap_or(0);
                self.levels[level].push_back(tid);
            }
            SchedEvent::ThreadBlocked { tid, .. } => {
                // Blocking before the slice expired does not count as
                // "used the full slice" - the thread keeps its level when
                // it wakes back up via ThreadWoke.
                self.used_full_slice.insert(tid, false);
            }
            SchedEvent::ThreadExited { tid, .. } => self.remove(tid),
            SchedEvent::Tick { .. } => {
                self.ticks_since_boost += 1;
                if self.ticks_since_boost >= BOOST_INTERVAL_TICKS {
                    self.boost_all();
                }
            }
            SchedEvent::ModeChanged { new_mode, .. } => self.mode = new_mode,
            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });

        for level in 0..NUM_LEVELS {
            let attempts = self.levels[level].len();
            for _ in 0..attempts {
                let Some(tid) = self.levels[level].pop_front() else { break };

                if boot {
                    let critical = ctx
                        .thread_process(tid)
                        .map(|pid| ctx.is_critical_process(pid))
                        .unwrap_or(false);
                    if !critical {
                        self.levels[level].push_back(tid);
                        continue;
                    }
                }

                if ctx.is_runnable(tid) {
                    // Demote for next time unless something (ThreadBlocked)
                    // already recorded that this dispatch didn't run to
                    // completion of its slice.
                    let demote_to = (level + 1).min(NUM_LEVELS - 1);
                    self.thread_level.insert(tid, demote_to);
                    self.levels[demote_to].push_back(tid);
                    return DispatchDecision::run_thread(tid, LEVEL_TIMESLICE[level]);
                }
            }
        }

        DispatchDecision::idle()
    }

    fn on_switched(&mut self, _ctx: &mut dyn KernelSchedCtx, _cpu: CpuId, _prev: Option<ThreadId>, _next: Option<ThreadId>) {}

    fn name(&self) -> &'static str {
        "MLFQ"
    }
}

impl Default for MlfqPolicy {
    fn default() -> Self {
        Self::new()
    }
}
