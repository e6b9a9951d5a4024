/*
 * Real-Time Scheduling Policy
 *
 * Serves real-time threads (Priority >= REALTIME_BASE) strictly ahead of
 * everything else, under one of three fixed-priority disciplines:
 *
 * - Fifo: a running RT thread keeps the CPU until it blocks or exits.
 * - RoundRobin: RT threads of equal priority share the CPU in turns.
 * - RateMonotonic: shorter-period threads get higher static priority.
 *   (Thread period isn't tracked on SchedEvent::ThreadCreated today, so
 *   this discipline currently degrades to ordering by the priority the
 *   caller already assigned - a true rate-monotonic assignment needs a
 *   period field threaded through thread creation.)
 *
 * Non-RT threads fall back to round-robin among themselves and only run
 * when no RT thread is runnable.
 */

use alloc::collections::{BTreeMap, VecDeque};

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, Priority, TimeSliceTicks},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtDiscipline {
    Fifo,
    RoundRobin,
    RateMonotonic,
    /// Earliest-deadline-first is accepted as a discipline name but, absent
    /// per-thread deadlines, is currently serviced identically to RateMonotonic.
    Edf,
}

pub struct RealtimePolicy {
    discipline: RtDiscipline,
    rt_bands: BTreeMap<i32, VecDeque<ThreadId>>,
    normal_queue: VecDeque<ThreadId>,
    priorities: BTreeMap<ThreadId, i32>,
    mode: SchedulerMode,
}

impl RealtimePolicy {
    pub fn new(discipline: RtDiscipline) -> Self {
        Self {
            discipline,
            rt_bands: BTreeMap::new(),
            normal_queue: VecDeque::new(),
            priorities: BTreeMap::new(),
            mode: SchedulerMode::Boot { critical_count: 0, ready_count: 0 },
        }
    }

    fn is_rt(priority: i32) -> bool {
        priority >= Priority::REALTIME_BASE.0
    }

    fn enqueue(&mut self, tid: ThreadId, priority: i32) {
        self.priorities.insert(tid, priority);
        if Self::is_rt(priority) {
            self.rt_bands.entry(priority).or_insert_with(VecDeque::new).push_back(tid);
        } else {
            self.normal_queue.push_back(tid);
        }
    }

    fn remove(&mut self, tid: ThreadId) {
        for q in self.rt_bands.values_mut() {
            q.retain(|&id| id != tid);
        }
        self.rt_bands.retain(|_, q| !q.is_empty());
        self.normal_queue.retain(|&id| id != tid);
        self.priorities.remove(&tid);
    }
}

impl Scheduler for RealtimePolicy {
    fn on_event(&mut self, ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, priority } => self.enqueue(tid, priority.0),
            SchedEvent::ThreadWoke { tid, .. } => {
                if !self.priorities.contains_key(&tid) {
                    let priority = ctx.thread_priority(tid).unwrap_or(Priority::NORMAL).0;
                    self.enqueue(tid, priority);
                } else {
                    let priority = self.priorities[&tid];
                    if Self::is_rt(priority) {
                        self.rt_bands.entry(priority).or_insert_with(VecDeque::new).push_back(tid);
                    } else {
                        self.normal_queue.push_back(tid);
                    }
                }
            }
            SchedEvent::ThreadYielded { tid } => {
                let priority = self.priorities.get(&tid).copied().unwrap_or(Priority::NORMAL.0);
                if Self::is_rt(priority) {
                    self.rt_bands.entry(priority).or_insert_with(VecDeque::new).push_back(tid);
                } else {
                    self.normal_queue.push_back(tid);
                }
            }
            SchedEvent::ThreadBlocked { tid, .. } | SchedEvent::ThreadExited { tid, .. } => {
                self.remove(tid);
            }
            SchedEvent::ModeChanged { new_mode, .. } => self.mode = new_mode,
            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });

        let bands: alloc::vec::Vec<i32> = self.rt_bands.keys().copied().rev().collect();
        for band in bands {
            let Some(queue) = self.rt_bands.get_mut(&band) else { continue };
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
                    queue.push_back(tid);
                    let timeslice = match self.discipline {
                        RtDiscipline::Fifo => TimeSliceTicks::LONG,
                        _ => TimeSliceTicks::SHORT,
                    };
                    return DispatchDecision::run_thread(tid, timeslice);
                }
            }
        }
        self.rt_bands.retain(|_, q| !q.is_empty());

        // No RT thread runnable: fall back to round-robin among the rest.
        let attempts = self.normal_queue.len();
        for _ in 0..attempts {
            let Some(tid) = self.normal_queue.pop_front() else { break };

            if boot {
                let critical = ctx
                    .thread_process(tid)
                    .map(|pid| ctx.is_critical_process(pid))
                    .unwrap_or(false);
                if !critical {
                    self.normal_queue.push_back(tid);
                    continue;
                }
            }

            if ctx.is_runnable(tid) {
                self.normal_queue.push_back(tid);
                return DispatchDecision::run_thread(tid, TimeSliceTicks::DEFAULT);
            }
        }

        DispatchDecision::idle()
    }

    fn on_switched(&mut self, _ctx: &mut dyn KernelSchedCtx, _cpu: CpuId, _prev: Option<ThreadId>, _next: Option<ThreadId>) {}

    fn name(&self) -> &'static str {
        match self.discipline {
            RtDiscipline::Fifo => "Real-Time (FIFO)",
            RtDiscipline::RoundRobin => "Real-Time (RR)",
            RtDiscipline::RateMonotonic => "Real-Time (Rate-Monotonic)",
            RtDiscipline::Edf => "Real-Time (EDF)",
        }
    }
}
