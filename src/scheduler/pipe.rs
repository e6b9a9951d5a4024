/*
 * Pipes - Bounded Circular-Buffer IPC
 *
 * A pipe is a fixed-size byte ring with two FIFO wait lists, one per end.
 * Built on the same registry-plus-wait-queue shape as `sync` and
 * `io_wait`: a global table keyed by id, each entry guarded by a single
 * spinlock, blocking done via `block_current_thread()`/`wake_thread()`.
 *
 * `read`/`write` re-check the buffer after waking rather than assuming the
 * wake-up means their specific request can now complete - another reader
 * or writer may have gotten there first.
 */

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex as SpinMutex;

use super::{ThreadId, current_thread_id, block_current_thread, wake_thread, take_cancelled};
use super::types::BlockReason;
use super::error::PipeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipeId(pub u32);

struct PipeState {
    buf: Vec<u8>,
    capacity: usize,
    read_pos: usize,
    count: usize,
    readers_waiting: Vec<ThreadId>,
    writers_waiting: Vec<ThreadId>,
    destroyed: bool,
}

impl PipeState {
    fn new(capacity: usize) -> Self {
        Self {
            buf: alloc::vec![0u8; capacity],
            capacity,
            read_pos: 0,
            count: 0,
            readers_waiting: Vec::new(),
            writers_waiting: Vec::new(),
            destroyed: false,
        }
    }

    fn write_pos(&self) -> usize {
        (self.read_pos + self.count) % self.capacity
    }
}

static PIPES: SpinMutex<BTreeMap<u32, PipeState>> = SpinMutex::new(BTreeMap::new());
static NEXT_PIPE_ID: AtomicU32 = AtomicU32::new(1);

pub fn pipe_create(capacity: usize) -> PipeId {
    let id = NEXT_PIPE_ID.fetch_add(1, Ordering::SeqCst);
    PIPES.lock().insert(id, PipeState::new(capacity.max(1)));
    PipeId(id)
}

/// Tear the pipe down, waking every waiter with `Cancelled`.
///
/// Waiters learn about the cancellation by re-checking the registry on
/// wake and finding their pipe id gone; callers of `read`/`write` that are
/// currently parked get `Err(Cancelled)` from that re-check.
pub fn pipe_destroy(id: PipeId) {
    let (readers, writers) = {
        let mut pipes = PIPES.lock();
        match pipes.get_mut(&id.0) {
            Some(p) => {
                p.destroyed = true;
                (core::mem::take(&mut p.readers_waiting), core::mem::take(&mut p.writers_waiting))
            }
            None => return,
        }
    };
    for tid in readers.into_iter().chain(writers) {
        wake_thread(tid);
    }
    PIPES.lock().remove(&id.0);
}

/// Read up to `buf.len()` bytes. Blocks FIFO on `readers_waiting` while the
/// pipe is empty unless `blocking` is false, in which case it returns 0 on
/// an empty pipe. Returns the number of bytes actually read.
pub fn pipe_read(id: PipeId, buf: &mut [u8], blocking: bool) -> Result<usize, PipeError> {
    loop {
        {
            let mut pipes = PIPES.lock();
            let p = pipes.get_mut(&id.0).ok_or(PipeError::NotFound)?;

            if p.count > 0 {
                let n = buf.len().min(p.count);
                for i in 0..n {
                    buf[i] = p.buf[(p.read_pos + i) % p.capacity];
                }
                p.read_pos = (p.read_pos + n) % p.capacity;
                p.count -= n;

                if let Some(writer) = p.writers_waiting.first().copied() {
                    p.writers_waiting.remove(0);
                    drop(pipes);
                    wake_thread(writer);
                }
                return Ok(n);
            }

            if !blocking {
                return Ok(0);
            }

            p.readers_waiting.push(current_thread_id());
        }

        block_current_thread(BlockReason::PipeEmpty { pipe_id: id.0 as usize });
        super::yield_now();

        if !PIPES.lock().contains_key(&id.0) || take_cancelled(current_thread_id()) {
            return Err(PipeError::Cancelled);
        }
    }
}

/// Write up to `buf.len()` bytes. Blocks FIFO on `writers_waiting` while the
/// pipe is full unless `blocking` is false, in which case it writes what
/// fits (possibly 0) and returns immediately. Writing 0 bytes is a no-op.
pub fn pipe_write(id: PipeId, buf: &[u8], blocking: bool) -> Result<usize, PipeError> {
    if buf.is_empty() {
        return Ok(0);
    }

    let mut written = 0;
    while written < buf.len() {
        let wrote_this_round = {
            let mut pipes = PIPES.lock();
            let p = pipes.get_mut(&id.0).ok_or(PipeError::NotFound)?;

            let free = p.capacity - p.count;
            if free == 0 {
                if !blocking {
                    return Ok(written);
                }
                p.writers_waiting.push(current_thread_id());
                None
            } else {
                let n = (buf.len() - written).min(free);
                let start = p.write_pos();
                for i in 0..n {
                    p.buf[(start + i) % p.capacity] = buf[written + i];
                }
                p.count += n;

                if let Some(reader) = p.readers_waiting.first().copied() {
                    p.readers_waiting.remove(0);
                    drop(pipes);
                    wake_thread(reader);
                }
                Some(n)
            }
        };

        match wrote_this_round {
            Some(n) => written += n,
            None => {
                block_current_thread(BlockReason::PipeFull { pipe_id: id.0 as usize });
                super::yield_now();
                if !PIPES.lock().contains_key(&id.0) || take_cancelled(current_thread_id()) {
                    return Err(PipeError::Cancelled);
                }
                if !blocking {
                    return Ok(written);
                }
            }
        }
    }
    Ok(written)
}

/// Forcibly remove `tid` from every pipe's reader/writer wait list it
/// might be parked on and wake it. See `sync::cancel_thread_waits` for the
/// shared `mark_cancelled` contract this pairs with.
pub fn cancel_thread_waits(tid: ThreadId) {
    let mut woke = false;
    let mut pipes = PIPES.lock();
    for p in pipes.values_mut() {
        let before_r = p.readers_waiting.len();
        p.readers_waiting.retain(|&t| t != tid);
        woke |= p.readers_waiting.len() != before_r;

        let before_w = p.writers_waiting.len();
        p.writers_waiting.retain(|&t| t != tid);
        woke |= p.writers_waiting.len() != before_w;
    }
    drop(pipes);

    if woke {
        wake_thread(tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pos_wraps() {
        let mut p = PipeState::new(4);
        p.read_pos = 2;
        p.count = 3;
        assert_eq!(p.write_pos(), 1);
    }

    #[test]
    fn new_pipe_is_empty_and_sized() {
        let p = PipeState::new(10);
        assert_eq!(p.capacity, 10);
        assert_eq!(p.count, 0);
        assert_eq!(p.write_pos(), 0);
    }
}
