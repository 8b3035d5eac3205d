// kernel/src/memory/address_space.rs
//
// AddressSpaceManager: every environment's two-level page table lives in
// simulated physical memory; this type owns that memory (through `Pmap`),
// the kernel's own root table, and the per-core MMU state (cr3 + TLB).
//
// Refcount rules:
//   - a root or page-table frame holds one reference while in use
//   - every present user PTE holds one reference on its frame
//   - the kernel half is shared by copy and never released by a space

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use x86_64::{
    PhysAddr, VirtAddr,
    structures::paging::{PageTableFlags, PhysFrame, page_table::PageTableEntry},
};

use super::elf::{ExecutableImage, ImageError};
use super::layout::{
    ADDRESS_SPACE_TOP, NPDENTRIES, NPTENTRIES, PGSIZE, ULIM, USTACKTOP, UTOP, UVPT, pdx, pgaddr, ptx,
    round_down, round_up,
};
use super::paging::{FaultCode, Perm};
use super::pmap::{AllocFlags, Pmap};
use crate::error::{KResult, KernError};

/// Handle to one page-table hierarchy (its root frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpace {
    root: PhysFrame,
}

impl AddressSpace {
    pub fn root(&self) -> PhysFrame {
        self.root
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Clone, Copy)]
struct TlbEntry {
    frame: PhysFrame,
    perm: Perm,
}

struct Mmu {
    cr3: PhysFrame,
    tlb: BTreeMap<u64, TlbEntry>,
}

pub struct AddressSpaceManager {
    pmap: Pmap,
    kern: AddressSpace,
    mmus: Vec<Mmu>,
}

#[inline]
fn entry_frame(entry: &PageTableEntry) -> PhysFrame {
    PhysFrame::containing_address(entry.addr())
}

#[inline]
fn present(entry: &PageTableEntry) -> bool {
    entry.flags().contains(PageTableFlags::PRESENT)
}

impl AddressSpaceManager {
    /// `kern_root` must already hold one reference.  Every core starts
    /// on the kernel space.
    pub fn new(pmap: Pmap, kern_root: PhysFrame, ncpu: usize) -> Self {
        let mmus = (0..ncpu)
            .map(|_| Mmu {
                cr3: kern_root,
                tlb: BTreeMap::new(),
            })
            .collect();
        Self {
            pmap,
            kern: AddressSpace { root: kern_root },
            mmus,
        }
    }

    pub fn pmap(&self) -> &Pmap {
        &self.pmap
    }

    pub fn pmap_mut(&mut self) -> &mut Pmap {
        &mut self.pmap
    }

    pub fn kernel_space(&self) -> AddressSpace {
        self.kern
    }

    // ====================================================================
    // SPACE LIFECYCLE
    // ====================================================================

    /// Fresh root: kernel half copied from the kernel root, UVPT maps the
    /// root itself read-only for user code.
    pub fn new_space(&mut self) -> KResult<AddressSpace> {
        let root = self.pmap.page_alloc(AllocFlags::ZERO).ok_or(KernError::NoMem)?;
        self.pmap.incref(root);

        let kern = self.pmap.mem().table(self.kern.root).clone();
        let table = self.pmap.mem_mut().table_mut(root);
        for i in pdx(UTOP)..NPDENTRIES {
            table[i] = kern[i].clone();
        }
        table[pdx(UVPT)].set_frame(root, PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE);

        Ok(AddressSpace { root })
    }

    /// Release every user page, every page table below UTOP, and the root.
    /// Cores still running on this space are moved to the kernel space.
    pub fn teardown(&mut self, space: AddressSpace) {
        let kern = self.kern;
        for cpu in 0..self.mmus.len() {
            if self.mmus[cpu].cr3 == space.root {
                self.activate(cpu, kern);
            }
        }

        for pdeno in 0..pdx(UTOP) {
            let pde = self.pmap.mem().table(space.root)[pdeno].clone();
            if !present(&pde) {
                continue;
            }
            let pt = entry_frame(&pde);
            for pteno in 0..NPTENTRIES {
                if present(&self.pmap.mem().table(pt)[pteno]) {
                    self.remove(space, VirtAddr::new(pgaddr(pdeno, pteno, 0)));
                }
            }
            self.pmap.mem_mut().table_mut(space.root)[pdeno].set_unused();
            self.pmap.page_decref(pt);
        }
        self.pmap.page_decref(space.root);
    }

    // ====================================================================
    // PAGE TABLE WALK
    // ====================================================================

    /// (page-table frame, index) of the entry for `va`, if its table exists.
    fn walk(&self, space: AddressSpace, va: u64) -> Option<(PhysFrame, usize)> {
        let pde = &self.pmap.mem().table(space.root)[pdx(va)];
        present(pde).then(|| (entry_frame(pde), ptx(va)))
    }

    fn walk_create(&mut self, space: AddressSpace, va: u64) -> KResult<(PhysFrame, usize)> {
        if let Some(slot) = self.walk(space, va) {
            return Ok(slot);
        }
        let pt = self.pmap.page_alloc(AllocFlags::ZERO).ok_or(KernError::NoMem)?;
        self.pmap.incref(pt);
        self.pmap.mem_mut().table_mut(space.root)[pdx(va)].set_frame(
            pt,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
        );
        Ok((pt, ptx(va)))
    }

    /// Translation as the MMU sees it: hardware bits are the AND of the
    /// root and table entries, software bits come from the table entry.
    fn effective(&self, space: AddressSpace, va: u64) -> Option<(PhysFrame, Perm)> {
        let mem = self.pmap.mem();
        let pde = &mem.table(space.root)[pdx(va)];
        if !present(pde) {
            return None;
        }
        let pte = &mem.table(entry_frame(pde))[ptx(va)];
        if !present(pte) {
            return None;
        }
        let hw = Perm::PRESENT | Perm::WRITABLE | Perm::USER;
        let leaf = Perm::from_flags(pte.flags());
        let perm = (leaf - hw) | (leaf & Perm::from_flags(pde.flags()) & hw);
        Some((entry_frame(pte), perm))
    }

    // ====================================================================
    // INSERT / REMOVE / LOOKUP
    // ====================================================================

    /// Map `frame` at `va`, replacing whatever was there.
    pub fn insert(&mut self, space: AddressSpace, frame: PhysFrame, va: VirtAddr, perm: Perm) -> KResult<()> {
        let va = va.as_u64();
        let (pt, idx) = self.walk_create(space, va)?;

        // Take the new reference before dropping the old one: re-inserting
        // the same frame at the same address must not free it.
        self.pmap.incref(frame);
        if present(&self.pmap.mem().table(pt)[idx]) {
            self.remove(space, VirtAddr::new(va));
        }
        self.pmap.mem_mut().table_mut(pt)[idx].set_frame(frame, (perm | Perm::PRESENT).flags());
        self.tlb_invalidate(space, va);
        Ok(())
    }

    /// Frame and permission mapped at `va`.
    pub fn lookup(&self, space: AddressSpace, va: VirtAddr) -> Option<(PhysFrame, Perm)> {
        let (pt, idx) = self.walk(space, va.as_u64())?;
        let entry = &self.pmap.mem().table(pt)[idx];
        present(entry).then(|| (entry_frame(entry), Perm::from_flags(entry.flags())))
    }

    /// Unmap `va`.  Silently does nothing if nothing is mapped.
    pub fn remove(&mut self, space: AddressSpace, va: VirtAddr) {
        let va = va.as_u64();
        let Some((pt, idx)) = self.walk(space, va) else {
            return;
        };
        let entry = &mut self.pmap.mem_mut().table_mut(pt)[idx];
        if !present(entry) {
            return;
        }
        let frame = entry_frame(entry);
        entry.set_unused();
        self.pmap.page_decref(frame);
        self.tlb_invalidate(space, va);
    }

    /// Map [pa, pa + size) at [va, va + size) without refcounting.
    /// Only for the static kernel mapping built at boot.
    pub fn boot_map_region(&mut self, space: AddressSpace, va: u64, size: u64, pa: u64, perm: Perm) {
        for off in (0..size).step_by(PGSIZE as usize) {
            let (pt, idx) = match self.walk_create(space, va + off) {
                Ok(slot) => slot,
                Err(_) => crate::kernel_panic!("boot_map_region: out of memory at {:#x}", va + off),
            };
            let frame = PhysFrame::containing_address(PhysAddr::new(pa + off));
            self.pmap.mem_mut().table_mut(pt)[idx].set_frame(frame, (perm | Perm::PRESENT).flags());
        }
    }

    // ====================================================================
    // PRIVILEGED SETUP PATHS
    // ====================================================================

    /// Back [va, va + len) with fresh user-writable pages.  Frame
    /// exhaustion here is fatal.
    pub fn region_alloc(&mut self, space: AddressSpace, va: VirtAddr, len: u64, zero: bool) {
        let start = round_down(va.as_u64(), PGSIZE);
        let end = round_up(va.as_u64() + len, PGSIZE);
        let flags = if zero { AllocFlags::ZERO } else { AllocFlags::empty() };

        for page in (start..end).step_by(PGSIZE as usize) {
            let Some(frame) = self.pmap.page_alloc(flags) else {
                crate::kernel_panic!("region_alloc: out of memory at {:#x}", page);
            };
            if self
                .insert(space, frame, VirtAddr::new(page), Perm::USER | Perm::WRITABLE)
                .is_err()
            {
                crate::kernel_panic!("region_alloc: no page table for {:#x}", page);
            }
        }
    }

    /// Load every LOAD segment of `image`, map the initial stack page, and
    /// return the entry point.
    pub fn load_image(&mut self, space: AddressSpace, image: &dyn ExecutableImage) -> Result<u64, ImageError> {
        let data = image.data();
        let segments = image.load_segments();

        for seg in &segments {
            if seg.va.checked_add(seg.mem_size).map_or(true, |end| end > UTOP) {
                return Err(ImageError::SegmentOutsideUser { va: seg.va });
            }
            if seg.file_size > seg.mem_size {
                return Err(ImageError::FileLargerThanMemory { va: seg.va });
            }
            if seg.offset.checked_add(seg.file_size).map_or(true, |end| end > data.len() as u64) {
                return Err(ImageError::SegmentOutsideFile { va: seg.va });
            }
        }

        for seg in &segments {
            self.region_alloc(space, VirtAddr::new(seg.va), seg.mem_size, true);
            let bytes = &data[seg.offset as usize..(seg.offset + seg.file_size) as usize];
            if let Err(bad) = self.copy_to_user(space, seg.va, bytes) {
                crate::kernel_panic!("load_image: segment page {:#x} vanished", bad);
            }
        }

        self.region_alloc(space, VirtAddr::new(USTACKTOP - PGSIZE), PGSIZE, true);
        Ok(image.entry_point())
    }

    // ====================================================================
    // USER MEMORY ACCESS FROM THE KERNEL
    // ====================================================================

    /// Is [va, va + len) below ULIM and mapped with at least `perm`?
    /// On failure returns the first offending address.
    pub fn user_mem_check(&self, space: AddressSpace, va: u64, len: u64, perm: Perm) -> Result<(), u64> {
        let need = perm | Perm::PRESENT;
        let Some(end) = va.checked_add(len) else {
            return Err(va.max(ULIM));
        };

        let mut page = round_down(va, PGSIZE);
        while page < end {
            let addr = page.max(va);
            if page >= ULIM {
                return Err(addr);
            }
            match self.effective(space, page) {
                Some((_, p)) if p.contains(need) => {}
                _ => return Err(addr),
            }
            page += PGSIZE;
        }
        Ok(())
    }

    /// Copy out of `space`.  The range must have been validated; an
    /// unmapped page is reported as its address.
    pub fn copy_from_user(&self, space: AddressSpace, va: u64, buf: &mut [u8]) -> Result<(), u64> {
        let mut done = 0usize;
        while done < buf.len() {
            let cur = va + done as u64;
            let off = cur % PGSIZE;
            let n = ((PGSIZE - off) as usize).min(buf.len() - done);
            let (frame, _) = self.lookup(space, VirtAddr::new(round_down(cur, PGSIZE))).ok_or(cur)?;
            self.pmap.mem().read(frame.start_address() + off, &mut buf[done..done + n]);
            done += n;
        }
        Ok(())
    }

    pub fn copy_to_user(&mut self, space: AddressSpace, va: u64, data: &[u8]) -> Result<(), u64> {
        let mut done = 0usize;
        while done < data.len() {
            let cur = va + done as u64;
            let off = cur % PGSIZE;
            let n = ((PGSIZE - off) as usize).min(data.len() - done);
            let (frame, _) = self.lookup(space, VirtAddr::new(round_down(cur, PGSIZE))).ok_or(cur)?;
            self.pmap.mem_mut().write(frame.start_address() + off, &data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    // ====================================================================
    // MMU
    // ====================================================================

    /// Load cr3.  Switching spaces flushes the core's TLB.
    pub fn activate(&mut self, cpu: usize, space: AddressSpace) {
        let mmu = &mut self.mmus[cpu];
        if mmu.cr3 != space.root {
            mmu.cr3 = space.root;
            mmu.tlb.clear();
        }
    }

    pub fn active(&self, cpu: usize) -> AddressSpace {
        AddressSpace { root: self.mmus[cpu].cr3 }
    }

    /// Drop the cached translation of `va` on every core running `space`.
    fn tlb_invalidate(&mut self, space: AddressSpace, va: u64) {
        let vpn = va / PGSIZE;
        for mmu in self.mmus.iter_mut().filter(|m| m.cr3 == space.root) {
            mmu.tlb.remove(&vpn);
        }
    }

    /// User-mode translation on `cpu`'s active space.
    pub fn translate(&mut self, cpu: usize, va: u64, access: Access) -> Result<PhysAddr, FaultCode> {
        let mut code = FaultCode::USER;
        if access == Access::Write {
            code |= FaultCode::WRITE;
        }
        if va >= ADDRESS_SPACE_TOP {
            return Err(code);
        }

        let vpn = va / PGSIZE;
        let cached = self.mmus[cpu].tlb.get(&vpn).copied();
        let entry = match cached {
            Some(entry) => entry,
            None => {
                let space = self.active(cpu);
                let (frame, perm) = self.effective(space, va).ok_or(code)?;
                let entry = TlbEntry { frame, perm };
                self.mmus[cpu].tlb.insert(vpn, entry);
                entry
            }
        };

        if !entry.perm.contains(Perm::USER)
            || (access == Access::Write && !entry.perm.contains(Perm::WRITABLE))
        {
            return Err(code | FaultCode::PROTECTION);
        }
        Ok(entry.frame.start_address() + va % PGSIZE)
    }

    pub fn read_phys(&self, pa: PhysAddr, buf: &mut [u8]) {
        self.pmap.mem().read(pa, buf);
    }

    pub fn write_phys(&mut self, pa: PhysAddr, data: &[u8]) {
        self.pmap.mem_mut().write(pa, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::elf::{ElfBuilder, SegmentFlags};
    use crate::memory::layout::{KERNBASE, UTEXT, uvpd_entry, uvpt_entry};
    use x86_64::structures::paging::FrameAllocator;

    const NFRAMES: usize = 256;

    fn manager(ncpu: usize) -> AddressSpaceManager {
        let mut pmap = Pmap::new(NFRAMES);
        let root = pmap.allocate_frame().unwrap();
        pmap.incref(root);
        let mut vm = AddressSpaceManager::new(pmap, root, ncpu);
        let kern = vm.kernel_space();
        vm.boot_map_region(kern, KERNBASE, NFRAMES as u64 * PGSIZE, 0, Perm::WRITABLE);
        vm
    }

    fn page(vm: &mut AddressSpaceManager) -> PhysFrame {
        vm.pmap_mut().page_alloc(AllocFlags::ZERO).unwrap()
    }

    #[test]
    fn new_space_shares_kernel_half_and_self_maps() {
        let mut vm = manager(1);
        let space = vm.new_space().unwrap();
        let kern = vm.kernel_space();
        let mem = vm.pmap().mem();
        for i in pdx(KERNBASE)..512 {
            assert_eq!(mem.table(space.root())[i].addr(), mem.table(kern.root())[i].addr());
        }
        let uvpt = &mem.table(space.root())[pdx(UVPT)];
        assert_eq!(uvpt.addr(), space.root().start_address());
        assert!(!uvpt.flags().contains(PageTableFlags::WRITABLE));
        assert_eq!(vm.pmap().refcount(space.root()), 1);
    }

    #[test]
    fn insert_lookup_remove_track_refcounts() {
        let mut vm = manager(1);
        let space = vm.new_space().unwrap();
        let frame = page(&mut vm);
        let va = VirtAddr::new(UTEXT);

        vm.insert(space, frame, va, Perm::USER | Perm::WRITABLE).unwrap();
        assert_eq!(vm.pmap().refcount(frame), 1);
        let (got, perm) = vm.lookup(space, va).unwrap();
        assert_eq!(got, frame);
        assert!(perm.contains(Perm::PRESENT | Perm::USER | Perm::WRITABLE));

        // same frame, same address, new permission: still one reference
        vm.insert(space, frame, va, Perm::USER).unwrap();
        assert_eq!(vm.pmap().refcount(frame), 1);
        assert!(!vm.lookup(space, va).unwrap().1.contains(Perm::WRITABLE));

        // replacing with another frame releases the first
        let free_before = vm.pmap().free_count();
        let other = page(&mut vm);
        vm.insert(space, other, va, Perm::USER).unwrap();
        assert_eq!(vm.pmap().refcount(frame), 0);
        assert_eq!(vm.pmap().free_count(), free_before);

        vm.remove(space, va);
        assert!(vm.lookup(space, va).is_none());
        assert_eq!(vm.pmap().refcount(other), 0);
        vm.remove(space, va);
    }

    #[test]
    fn region_alloc_zeroes_whole_range() {
        let mut vm = manager(1);
        let space = vm.new_space().unwrap();
        // dirty a frame and give it back so region_alloc will reuse it
        let dirty = page(&mut vm);
        vm.pmap_mut().mem_mut().bytes_mut(dirty).fill(0x5a);
        vm.pmap_mut().page_free(dirty);

        vm.region_alloc(space, VirtAddr::new(UTEXT + 0x800), 0x1900, true);
        let mut buf = vec![0xffu8; 0x3000];
        vm.copy_from_user(space, UTEXT, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert!(vm.lookup(space, VirtAddr::new(UTEXT + 0x3000)).is_none());
    }

    #[test]
    fn load_image_copies_file_bytes_and_zero_fills() {
        let mut vm = manager(1);
        let space = vm.new_space().unwrap();
        let bytes = ElfBuilder::new(UTEXT + 4)
            .segment(UTEXT, &[1, 2, 3, 4, 5], 0x10, SegmentFlags::READ | SegmentFlags::EXECUTE)
            .segment(UTEXT + 0x1000, &[9; 8], 0x1800, SegmentFlags::READ | SegmentFlags::WRITE)
            .build();
        let image = bytes.parse().unwrap();

        let entry = vm.load_image(space, &image).unwrap();
        assert_eq!(entry, UTEXT + 4);

        let mut text = [0xffu8; 8];
        vm.copy_from_user(space, UTEXT, &mut text).unwrap();
        assert_eq!(text, [1, 2, 3, 4, 5, 0, 0, 0]);

        let mut bss = [0xffu8; 16];
        vm.copy_from_user(space, UTEXT + 0x1000 + 4, &mut bss).unwrap();
        assert_eq!(&bss[..4], &[9; 4]);
        assert!(bss[4..].iter().all(|&b| b == 0));
        assert!(vm.lookup(space, VirtAddr::new(UTEXT + 0x2000)).is_some());
        assert!(vm.lookup(space, VirtAddr::new(USTACKTOP - PGSIZE)).is_some());
    }

    #[test]
    fn load_image_rejects_segments_above_utop() {
        let mut vm = manager(1);
        let space = vm.new_space().unwrap();
        let bytes = ElfBuilder::new(0)
            .segment(UTOP - 0x1000, &[0; 4], 0x2000, SegmentFlags::READ)
            .build();
        let image = bytes.parse().unwrap();
        assert_eq!(
            vm.load_image(space, &image),
            Err(ImageError::SegmentOutsideUser { va: UTOP - 0x1000 })
        );
    }

    #[test]
    fn user_mem_check_reports_first_bad_address() {
        let mut vm = manager(1);
        let space = vm.new_space().unwrap();
        let ro = page(&mut vm);
        vm.insert(space, ro, VirtAddr::new(UTEXT), Perm::USER).unwrap();

        assert_eq!(vm.user_mem_check(space, UTEXT + 8, 16, Perm::USER), Ok(()));
        assert_eq!(vm.user_mem_check(space, UTEXT + 8, 16, Perm::WRITABLE), Err(UTEXT + 8));
        assert_eq!(vm.user_mem_check(space, UTEXT + 0xff0, 0x20, Perm::USER), Err(UTEXT + 0x1000));
        assert_eq!(vm.user_mem_check(space, KERNBASE, 1, Perm::empty()), Err(KERNBASE));
        assert_eq!(vm.user_mem_check(space, u64::MAX - 1, 4, Perm::USER), Err(u64::MAX - 1));
        // the self-map window is readable where tables exist, never writable
        assert_eq!(vm.user_mem_check(space, uvpd_entry(UTEXT), 8, Perm::USER), Ok(()));
        assert_eq!(vm.user_mem_check(space, uvpt_entry(UTEXT), 8, Perm::USER), Ok(()));
        assert!(vm.user_mem_check(space, uvpt_entry(UTEXT), 8, Perm::WRITABLE).is_err());
        // no page table covers address zero, so its UVPT page is absent
        assert_eq!(vm.user_mem_check(space, UVPT, 8, Perm::USER), Err(UVPT));
    }

    #[test]
    fn teardown_releases_every_frame() {
        let mut vm = manager(1);
        let baseline = vm.pmap().free_count();
        let space = vm.new_space().unwrap();
        vm.region_alloc(space, VirtAddr::new(UTEXT), 3 * PGSIZE, true);
        vm.region_alloc(space, VirtAddr::new(USTACKTOP - PGSIZE), PGSIZE, true);

        // a page shared with a second space survives the first teardown
        let other = vm.new_space().unwrap();
        let (shared, _) = vm.lookup(space, VirtAddr::new(UTEXT)).unwrap();
        vm.insert(other, shared, VirtAddr::new(UTEXT), Perm::USER).unwrap();
        assert_eq!(vm.pmap().refcount(shared), 2);

        vm.activate(0, space);
        vm.teardown(space);
        assert_eq!(vm.pmap().refcount(shared), 1);
        assert_eq!(vm.active(0), vm.kernel_space());

        vm.teardown(other);
        assert_eq!(vm.pmap().free_count(), baseline);
    }

    #[test]
    fn mmu_faults_and_tlb_invalidation() {
        let mut vm = manager(2);
        let space = vm.new_space().unwrap();
        let frame = page(&mut vm);
        vm.insert(space, frame, VirtAddr::new(UTEXT), Perm::USER | Perm::WRITABLE).unwrap();
        vm.activate(0, space);
        vm.activate(1, space);

        let pa = vm.translate(0, UTEXT + 0x10, Access::Write).unwrap();
        assert_eq!(pa, frame.start_address() + 0x10u64);
        vm.translate(1, UTEXT, Access::Read).unwrap();

        // downgrade to read-only: both cores must see it immediately
        vm.insert(space, frame, VirtAddr::new(UTEXT), Perm::USER | Perm::COW).unwrap();
        for cpu in 0..2 {
            assert_eq!(
                vm.translate(cpu, UTEXT, Access::Write),
                Err(FaultCode::USER | FaultCode::WRITE | FaultCode::PROTECTION)
            );
        }

        assert_eq!(vm.translate(0, UTEXT + 0x10_0000, Access::Read), Err(FaultCode::USER));
        assert_eq!(
            vm.translate(0, KERNBASE, Access::Read),
            Err(FaultCode::USER | FaultCode::PROTECTION)
        );
    }

    #[test]
    fn self_map_exposes_page_table_entries() {
        let mut vm = manager(1);
        let space = vm.new_space().unwrap();
        let frame = page(&mut vm);
        vm.insert(space, frame, VirtAddr::new(UTEXT), Perm::USER | Perm::COW).unwrap();
        vm.activate(0, space);

        let pa = vm.translate(0, crate::memory::layout::uvpt_entry(UTEXT), Access::Read).unwrap();
        let mut raw = [0u8; 8];
        vm.read_phys(pa, &mut raw);
        let pte = u64::from_le_bytes(raw);
        assert_eq!(pte & !0xfff, frame.start_address().as_u64());
        assert_eq!(pte & 0x805, 0x805);

        let pa = vm.translate(0, crate::memory::layout::uvpd_entry(UTEXT), Access::Read).unwrap();
        vm.read_phys(pa, &mut raw);
        assert_ne!(u64::from_le_bytes(raw) & 1, 0);
        assert!(vm.translate(0, UVPT, Access::Write).is_err());
    }
}
