/*
 * Memory-Mapped Files
 *
 * Maps a range of an open file into a process's address space, backed by
 * freshly allocated physical frames - the same allocate/fill/map/rollback
 * shape as `shmem`, but each mapping belongs to exactly one process instead
 * of fanning out across several.
 *
 * `SHARED` and `PRIVATE` only differ on write-back: `sync`/`unmap` write a
 * `SHARED` mapping's pages back to the file; a `PRIVATE` mapping's writes
 * are local to the process and simply discarded when its frames are freed.
 */

use crate::error::{ErrorKind, KernelError};
use crate::io::device::{Device, Errno, SEEK_SET};
use crate::memory::paging;
use crate::memory::types::{PageTableFlags, PhysAddr, VirtAddr};
use crate::memory::{phys, physmap, PhysFrame};
use crate::scheduler::process::ProcessId;
use crate::scheduler::ProcessManager;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

bitflags! {
    /// Mapping request flags, passed by the caller of `map`.
    pub struct MmapFlags: u32 {
        const READ    = 0b0_0001;
        const WRITE   = 0b0_0010;
        const SHARED  = 0b0_0100;
        const PRIVATE = 0b0_1000;
        const FIXED   = 0b1_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappingId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    InvalidSize,
    InvalidFlags,
    BadFile,
    OutOfMemory,
    NotFound,
    NotOwner,
}

impl core::fmt::Display for MmapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MmapError::InvalidSize => write!(f, "invalid mapping size"),
            MmapError::InvalidFlags => write!(f, "invalid mapping flags"),
            MmapError::BadFile => write!(f, "file not readable for mapping"),
            MmapError::OutOfMemory => write!(f, "out of memory"),
            MmapError::NotFound => write!(f, "no such mapping"),
            MmapError::NotOwner => write!(f, "not owner of mapping"),
        }
    }
}

impl KernelError for MmapError {
    fn kind(&self) -> ErrorKind {
        match self {
            MmapError::InvalidSize | MmapError::InvalidFlags => ErrorKind::InvalidArgument,
            MmapError::BadFile => ErrorKind::InvalidArgument,
            MmapError::OutOfMemory => ErrorKind::OutOfMemory,
            MmapError::NotFound => ErrorKind::NotFound,
            MmapError::NotOwner => ErrorKind::NotOwner,
        }
    }
}

/// Start of the monotonically-advancing region handed out when the caller
/// doesn't supply (or doesn't require) a specific address. Sits above the
/// heap's maximum (see `address_space`'s layout) and below the stack.
const MMAP_REGION_BASE: u64 = 0x5000_0000;
const MMAP_REGION_END: u64 = 0x7ff0_0000;

struct Mapping {
    owner: ProcessId,
    file: Arc<dyn Device>,
    file_offset: u64,
    vaddr: u64,
    frames: Vec<PhysFrame>,
    shared: bool,
}

static MAPPINGS: Mutex<BTreeMap<usize, Mapping>> = Mutex::new(BTreeMap::new());
static NEXT_MAPPING_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_AUTO_VADDR: AtomicU64 = AtomicU64::new(MMAP_REGION_BASE);

fn reserve_vaddr(page_count: usize, desired: Option<u64>, fixed: bool) -> Result<u64, MmapError> {
    let span = (page_count as u64) * 4096;
    if let Some(addr) = desired {
        if fixed {
            return Ok(addr & !0xfff);
        }
    }
    let base = NEXT_AUTO_VADDR.fetch_add(span, Ordering::SeqCst);
    if base + span > MMAP_REGION_END {
        return Err(MmapError::OutOfMemory);
    }
    Ok(base)
}

/// Fill `frames` with `file`'s bytes starting at `offset`. Short files leave
/// the remainder of the last frame zeroed.
fn fill_frames_from_file(file: &Arc<dyn Device>, offset: u64, frames: &[PhysFrame]) -> Result<(), Errno> {
    let _ = file.seek(offset as i64, SEEK_SET)?;
    for frame in frames {
        let ptr = unsafe { physmap::phys_ptr::<u8>(PhysAddr::new(frame.start_address())) };
        let page = unsafe { core::slice::from_raw_parts_mut(ptr, 4096) };

        let mut filled = 0;
        while filled < page.len() {
            let n = file.read(&mut page[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        for b in &mut page[filled..] {
            *b = 0;
        }
    }
    Ok(())
}

/// Write a mapping's frames back out to its file, starting at its recorded
/// file offset. Used by both `sync` and `unmap` (for `SHARED` mappings).
fn writeback(mapping: &Mapping) -> Result<(), Errno> {
    let _ = mapping.file.seek(mapping.file_offset as i64, SEEK_SET)?;
    for frame in &mapping.frames {
        let ptr = unsafe { physmap::phys_ptr::<u8>(PhysAddr::new(frame.start_address())) };
        let page = unsafe { core::slice::from_raw_parts(ptr, 4096) };
        let mut written = 0;
        while written < page.len() {
            let n = mapping.file.write(&page[written..])?;
            if n == 0 {
                break;
            }
            written += n;
        }
    }
    Ok(())
}

/// Map `size` bytes of `fd` (starting at `offset`) into `process_id`'s
/// address space. Rolls back every frame it allocated if any step fails
/// partway through.
pub fn map(
    process_id: ProcessId,
    fd: i32,
    offset: u64,
    size: usize,
    flags: MmapFlags,
    desired_vaddr: Option<u64>,
) -> Result<(MappingId, u64), MmapError> {
    if size == 0 {
        return Err(MmapError::InvalidSize);
    }
    let shared = flags.contains(MmapFlags::SHARED);
    let private = flags.contains(MmapFlags::PRIVATE);
    if shared == private {
        // Exactly one of SHARED/PRIVATE must be requested.
        return Err(MmapError::InvalidFlags);
    }

    let file = ProcessManager::with_mut(process_id, |p| p.fd_table.get(fd).ok())
        .flatten()
        .ok_or(MmapError::BadFile)?;

    let page_count = (size + 4095) / 4096;
    let vaddr = reserve_vaddr(page_count, desired_vaddr, flags.contains(MmapFlags::FIXED))?;

    let mut frames = Vec::with_capacity(page_count);
    for _ in 0..page_count {
        match phys::alloc_frame() {
            Some(frame) => frames.push(frame),
            None => {
                for f in frames {
                    phys::free_frame(f);
                }
                return Err(MmapError::OutOfMemory);
            }
        }
    }

    if fill_frames_from_file(&file, offset, &frames).is_err() {
        for f in frames {
            phys::free_frame(f);
        }
        return Err(MmapError::BadFile);
    }

    let mut page_flags = PageTableFlags::PRESENT;
    if flags.contains(MmapFlags::WRITE) {
        page_flags |= PageTableFlags::WRITABLE;
    }
    if private {
        page_flags |= PageTableFlags::USER_ACCESSIBLE;
    }

    let mapped = ProcessManager::with_mut(process_id, |process| {
        let root = process.address_space.page_table_root;
        for (i, frame) in frames.iter().enumerate() {
            let virt = VirtAddr::new(vaddr + (i as u64) * 4096);
            let phys = PhysAddr::new(frame.start_address());
            if let Err(e) = paging::map_4k(root, virt, phys, page_flags) {
                log::error!("mmap: failed to map page {} of {}: {}", i, page_count, e);
                for j in 0..i {
                    let v = VirtAddr::new(vaddr + (j as u64) * 4096);
                    let _ = paging::unmap_4k(root, v);
                }
                return false;
            }
        }
        true
    });

    if mapped != Some(true) {
        for f in frames {
            phys::free_frame(f);
        }
        return Err(MmapError::OutOfMemory);
    }

    let id = MappingId(NEXT_MAPPING_ID.fetch_add(1, Ordering::SeqCst));
    MAPPINGS.lock().insert(
        id.0,
        Mapping {
            owner: process_id,
            file,
            file_offset: offset,
            vaddr,
            frames,
            shared,
        },
    );

    Ok((id, vaddr))
}

/// Write a `SHARED` mapping's dirty pages back to its file. A no-op for
/// `PRIVATE` mappings, whose writes never leave the process.
pub fn sync(id: MappingId, process_id: ProcessId) -> Result<(), MmapError> {
    let mappings = MAPPINGS.lock();
    let mapping = mappings.get(&id.0).ok_or(MmapError::NotFound)?;
    if mapping.owner != process_id {
        return Err(MmapError::NotOwner);
    }
    if mapping.shared {
        writeback(mapping).map_err(|_| MmapError::BadFile)?;
    }
    Ok(())
}

/// Tear a mapping down: unmap it from the owning process, sync it first if
/// `SHARED`, then return its frames to the allocator.
pub fn unmap(id: MappingId, process_id: ProcessId) -> Result<(), MmapError> {
    let mapping = {
        let mut mappings = MAPPINGS.lock();
        let mapping = mappings.get(&id.0).ok_or(MmapError::NotFound)?;
        if mapping.owner != process_id {
            return Err(MmapError::NotOwner);
        }
        mappings.remove(&id.0).unwrap()
    };

    if mapping.shared {
        let _ = writeback(&mapping);
    }

    ProcessManager::with_mut(process_id, |process| {
        let root = process.address_space.page_table_root;
        for i in 0..mapping.frames.len() {
            let v = VirtAddr::new(mapping.vaddr + (i as u64) * 4096);
            let _ = paging::unmap_4k(root, v);
        }
    });

    for frame in mapping.frames {
        phys::free_frame(frame);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_vaddr_advances_and_bounds_checks() {
        NEXT_AUTO_VADDR.store(MMAP_REGION_BASE, Ordering::SeqCst);

        let a = reserve_vaddr(2, None, false).unwrap();
        let b = reserve_vaddr(1, None, false).unwrap();
        assert_eq!(a, MMAP_REGION_BASE);
        assert_eq!(b, MMAP_REGION_BASE + 2 * 4096);

        NEXT_AUTO_VADDR.store(MMAP_REGION_END - 4096, Ordering::SeqCst);
        assert_eq!(reserve_vaddr(2, None, false), Err(MmapError::OutOfMemory));
    }

    #[test]
    fn fixed_request_bypasses_the_auto_region() {
        NEXT_AUTO_VADDR.store(MMAP_REGION_BASE, Ordering::SeqCst);
        let v = reserve_vaddr(1, Some(0x1234_5678), true).unwrap();
        assert_eq!(v, 0x1234_5000);
    }
}
