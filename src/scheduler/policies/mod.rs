/*
 * Scheduling Policies Module
 *
 * This module contains different scheduling policy implementations.
 * Each policy implements the Scheduler trait and can be plugged into
 * the SchedulerCore at boot time.
 *
 * Available policies:
 * - Cooperative: run-to-completion, no timeslice preemption
 * - RoundRobin: simple preemptive round-robin (boot-time default)
 * - Priority: strict priority bands with aging against starvation
 * - Mlfq: multi-level feedback queue with periodic boost
 * - FairShare: stride scheduling, CPU share proportional to priority
 * - Realtime: fixed-priority RT threads (FIFO/RR/rate-monotonic/EDF) over a
 *   round-robin fallback for everything else
 */

pub mod cooperative;
pub mod round_robin;
pub mod priority;
pub mod mlfq;
pub mod fair_share;
pub mod realtime;

pub use cooperative::CooperativePolicy;
pub use round_robin::RoundRobinPolicy;
pub use priority::PriorityPolicy;
pub use mlfq::MlfqPolicy;
pub use fair_share::FairSharePolicy;
pub use realtime::{RealtimePolicy, RtDiscipline};
