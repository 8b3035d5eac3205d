// kernel/src/memory/pmap.rs
//
// Physical memory: frame storage plus the frame descriptor table.
//
// Each frame has a reference count equal to the number of user mappings
// (and page-directory / page-table uses) pointing at it.  A frame returns
// to the free list only when that count drops to zero.  Frame 0 is
// reserved so a null physical address never names a real page.

use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use x86_64::{
    PhysAddr,
    structures::paging::{FrameAllocator, FrameDeallocator, PageTable, PhysFrame, Size4KiB},
};

use super::layout::PGSIZE;

const FRAME_BYTES: usize = PGSIZE as usize;

// ============================================================================
// Frame storage
// ============================================================================

#[repr(C, align(4096))]
#[derive(Clone)]
struct RawFrame([u8; FRAME_BYTES]);

/// Bounds-checked view of the machine's physical memory.
pub struct PhysMemory {
    frames: Vec<RawFrame>,
}

impl PhysMemory {
    pub fn new(nframes: usize) -> Self {
        Self {
            frames: vec![RawFrame([0; FRAME_BYTES]); nframes],
        }
    }

    pub fn nframes(&self) -> usize {
        self.frames.len()
    }

    pub fn size(&self) -> u64 {
        self.frames.len() as u64 * PGSIZE
    }

    /// Frame number of `frame`; an address outside memory is a kernel bug.
    pub fn index(&self, frame: PhysFrame) -> usize {
        let idx = (frame.start_address().as_u64() / PGSIZE) as usize;
        if idx >= self.frames.len() {
            crate::kernel_panic!(
                "frame index called with invalid pa {:#x}",
                frame.start_address().as_u64()
            );
        }
        idx
    }

    pub fn frame(&self, idx: usize) -> PhysFrame {
        if idx >= self.frames.len() {
            crate::kernel_panic!("frame number {} out of range", idx);
        }
        PhysFrame::containing_address(PhysAddr::new(idx as u64 * PGSIZE))
    }

    pub fn bytes(&self, frame: PhysFrame) -> &[u8; FRAME_BYTES] {
        &self.frames[self.index(frame)].0
    }

    pub fn bytes_mut(&mut self, frame: PhysFrame) -> &mut [u8; FRAME_BYTES] {
        let idx = self.index(frame);
        &mut self.frames[idx].0
    }

    pub fn table(&self, frame: PhysFrame) -> &PageTable {
        let raw = &self.frames[self.index(frame)];
        // SAFETY: RawFrame and PageTable are both 4096 bytes, 4096-aligned,
        // and every bit pattern is a valid PageTable.
        unsafe { &*(raw as *const RawFrame as *const PageTable) }
    }

    pub fn table_mut(&mut self, frame: PhysFrame) -> &mut PageTable {
        let idx = self.index(frame);
        let raw = &mut self.frames[idx];
        // SAFETY: as in `table`
        unsafe { &mut *(raw as *mut RawFrame as *mut PageTable) }
    }

    /// Read within a single frame starting at `pa`.
    pub fn read(&self, pa: PhysAddr, buf: &mut [u8]) {
        let frame = PhysFrame::containing_address(pa);
        let off = (pa.as_u64() % PGSIZE) as usize;
        buf.copy_from_slice(&self.bytes(frame)[off..off + buf.len()]);
    }

    /// Write within a single frame starting at `pa`.
    pub fn write(&mut self, pa: PhysAddr, data: &[u8]) {
        let frame = PhysFrame::containing_address(pa);
        let off = (pa.as_u64() % PGSIZE) as usize;
        self.bytes_mut(frame)[off..off + data.len()].copy_from_slice(data);
    }
}

// ============================================================================
// Frame descriptor table
// ============================================================================

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        const ZERO = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PageInfo {
    refs: u32,
    free: bool,
}

pub struct Pmap {
    mem: PhysMemory,
    pages: Vec<PageInfo>,
    free_list: Vec<PhysFrame>,
}

impl Pmap {
    pub fn new(nframes: usize) -> Self {
        let mem = PhysMemory::new(nframes);
        let mut pages = vec![PageInfo::default(); nframes];
        let mut free_list = Vec::with_capacity(nframes);

        // Low frames are handed out first.
        for idx in (1..nframes).rev() {
            pages[idx].free = true;
            free_list.push(mem.frame(idx));
        }
        // frame 0 stays in use forever
        pages[0].refs = 1;

        Self {
            mem,
            pages,
            free_list,
        }
    }

    pub fn mem(&self) -> &PhysMemory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut PhysMemory {
        &mut self.mem
    }

    /// Take a frame off the free list.  Its refcount stays 0 until a
    /// mapping (or page-table use) increments it.
    pub fn page_alloc(&mut self, flags: AllocFlags) -> Option<PhysFrame> {
        let frame = self.free_list.pop()?;
        let idx = self.mem.index(frame);
        self.pages[idx].free = false;
        if flags.contains(AllocFlags::ZERO) {
            self.mem.bytes_mut(frame).fill(0);
        }
        Some(frame)
    }

    /// Return a frame whose refcount is already zero.
    pub fn page_free(&mut self, frame: PhysFrame) {
        let idx = self.mem.index(frame);
        let info = &mut self.pages[idx];
        if info.refs != 0 {
            crate::kernel_panic!(
                "page_free: frame {:#x} still has {} references",
                frame.start_address().as_u64(),
                info.refs
            );
        }
        if info.free {
            crate::kernel_panic!("page_free: double free of {:#x}", frame.start_address().as_u64());
        }
        info.free = true;
        self.free_list.push(frame);
    }

    pub fn incref(&mut self, frame: PhysFrame) {
        let idx = self.mem.index(frame);
        self.pages[idx].refs += 1;
    }

    /// Drop one reference, freeing the frame when none remain.
    pub fn page_decref(&mut self, frame: PhysFrame) {
        let idx = self.mem.index(frame);
        let info = &mut self.pages[idx];
        if info.refs == 0 {
            crate::kernel_panic!("page_decref: frame {:#x} has no references", frame.start_address().as_u64());
        }
        info.refs -= 1;
        if info.refs == 0 {
            self.page_free(frame);
        }
    }

    pub fn refcount(&self, frame: PhysFrame) -> u32 {
        self.pages[self.mem.index(frame)].refs
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

unsafe impl FrameAllocator<Size4KiB> for Pmap {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        self.page_alloc(AllocFlags::ZERO)
    }
}

impl FrameDeallocator<Size4KiB> for Pmap {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        self.page_free(frame);
    }
}
