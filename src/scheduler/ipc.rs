/*
 * Scheduler-facing view of the port IPC system.
 *
 * The implementation lives in `crate::ipc::port` since it's a general
 * kernel service rather than scheduler-internal state; this module just
 * re-exports it so call sites that reach IPC through `scheduler::ipc::*`
 * (vfs, tests) keep working unchanged.
 */

pub use crate::ipc::port::*;
