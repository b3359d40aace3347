// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Host-backed guest address space
//!
//! Reserves a 4 GiB contiguous host region and file-maps PS1 physical
//! regions at every mirrored virtual offset. Because all KUSEG/KSEG0/KSEG1
//! views of a region map the *same* offset of one shared memory file, a
//! write through any view is instantly visible through the others with no
//! emulator intervention; the bus dereferences `base + guest_addr` directly
//! ("fastmem") for RAM-class accesses.
//!
//! Bookkeeping invariant: the free list and the reserved list partition the
//! 4 GiB reservation; mapped views always lie inside reserved ranges.
//! Adjacent free ranges coalesce on release; every split and merge is
//! page-aligned.

use crate::core::error::{EmulatorError, Result};

/// Total span of the emulated address space
pub const GUEST_ADDRESS_SPACE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Page protection for a mapped view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageProtection {
    Read,
    Write,
    ReadWrite,
}

/// A half-open guest range `[base, base + extent)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestRange {
    pub base: u64,
    pub extent: u64,
}

impl GuestRange {
    fn end(&self) -> u64 {
        self.base + self.extent
    }

    fn contains(&self, base: u64, extent: u64) -> bool {
        self.base <= base && base + extent <= self.end()
    }
}

/// OS-level backing for the reservation: one per host platform
///
/// Implementations own a shared memory file of
/// [`region::sizes::EFFECTIVE_MEMORY`](super::region::sizes) bytes plus a
/// 4 GiB inaccessible reservation, and can replace any page-aligned window
/// of the reservation with a file view (and back again).
pub trait HostMirror {
    /// Base of the 4 GiB reservation
    fn base(&self) -> *mut u8;

    /// Host page granularity
    fn page_size(&self) -> u64;

    /// Size of the shared memory file backing mapped views
    fn file_size(&self) -> u64;

    /// Replace `[offset, offset+size)` of the reservation with a view of
    /// the memory file at `file_offset`
    fn map_view(
        &mut self,
        offset: u64,
        size: u64,
        file_offset: u64,
        prot: PageProtection,
    ) -> Result<*mut u8>;

    /// Revert `[offset, offset+size)` to inaccessible reserved pages
    fn unmap_view(&mut self, offset: u64, size: u64) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct MappedView {
    range: GuestRange,
    host_ptr: *mut u8,
}

/// Free/reserved/mapped bookkeeping over a [`HostMirror`]
pub struct AddressSpace<M: HostMirror> {
    mirror: M,
    free_regions: Vec<GuestRange>,
    reserved_regions: Vec<GuestRange>,
    mapped_views: Vec<MappedView>,
}

impl<M: HostMirror> AddressSpace<M> {
    pub fn new(mirror: M) -> Self {
        Self {
            mirror,
            free_regions: vec![GuestRange {
                base: 0,
                extent: GUEST_ADDRESS_SPACE_SIZE,
            }],
            reserved_regions: Vec::new(),
            mapped_views: Vec::new(),
        }
    }

    /// Base pointer of the guest address space
    #[inline(always)]
    pub fn base(&self) -> *mut u8 {
        self.mirror.base()
    }

    /// Translate a guest offset to a host pointer (`base + offset`)
    #[inline(always)]
    pub fn guest_to_host(&self, offset: u64) -> *mut u8 {
        // Reservation is 4 GiB so any u32-derived offset stays in bounds
        unsafe { self.mirror.base().add(offset as usize) }
    }

    pub fn page_size(&self) -> u64 {
        self.mirror.page_size()
    }

    pub fn free_regions(&self) -> &[GuestRange] {
        &self.free_regions
    }

    fn check_aligned(&self, base: u64, extent: u64) -> Result<()> {
        let page = self.mirror.page_size();
        if base % page != 0 || extent % page != 0 || extent == 0 {
            return Err(EmulatorError::MapperError(format!(
                "range 0x{base:x}+0x{extent:x} is not page aligned"
            )));
        }
        Ok(())
    }

    /// Remove `[base, base+extent)` from the free list, splitting the
    /// containing free range left/right as needed, and mark it reserved
    pub fn reserve(&mut self, base: u64, extent: u64) -> Result<()> {
        self.check_aligned(base, extent)?;

        let idx = self
            .free_regions
            .iter()
            .position(|r| r.contains(base, extent))
            .ok_or_else(|| {
                EmulatorError::MapperError(format!(
                    "reserve 0x{base:x}+0x{extent:x}: not inside a free range"
                ))
            })?;

        let old = self.free_regions.swap_remove(idx);

        if base > old.base {
            self.free_regions.push(GuestRange {
                base: old.base,
                extent: base - old.base,
            });
        }
        if base + extent < old.end() {
            self.free_regions.push(GuestRange {
                base: base + extent,
                extent: old.end() - (base + extent),
            });
        }

        self.reserved_regions.push(GuestRange { base, extent });
        Ok(())
    }

    /// Replace a reservation with an OS-level view of the memory file
    ///
    /// Mapping the same base twice returns the previously mapped pointer.
    pub fn map(
        &mut self,
        base: u64,
        extent: u64,
        file_offset: u64,
        prot: PageProtection,
    ) -> Result<*mut u8> {
        self.check_aligned(base, extent)?;

        if base + extent > GUEST_ADDRESS_SPACE_SIZE {
            return Err(EmulatorError::MapperError(format!(
                "map 0x{base:x}+0x{extent:x}: outside the reservation"
            )));
        }
        if file_offset + extent > self.mirror.file_size() {
            return Err(EmulatorError::MapperError(format!(
                "map 0x{base:x}: file offset 0x{file_offset:x} outside the memory file"
            )));
        }
        if !self.reserved_regions.iter().any(|r| r.contains(base, extent)) {
            return Err(EmulatorError::MapperError(format!(
                "map 0x{base:x}+0x{extent:x}: range has not been reserved"
            )));
        }

        if let Some(view) = self.mapped_views.iter().find(|v| v.range.base == base) {
            return Ok(view.host_ptr);
        }

        let ptr = self.mirror.map_view(base, extent, file_offset, prot)?;
        self.mapped_views.push(MappedView {
            range: GuestRange { base, extent },
            host_ptr: ptr,
        });
        Ok(ptr)
    }

    /// Revert a mapped view (looked up by host pointer) to a reservation
    pub fn unmap(&mut self, host_ptr: *mut u8) -> Result<()> {
        let idx = self
            .mapped_views
            .iter()
            .position(|v| v.host_ptr == host_ptr)
            .ok_or_else(|| {
                EmulatorError::MapperError(format!("unmap {host_ptr:p}: not a mapped view"))
            })?;

        let view = self.mapped_views.swap_remove(idx);
        self.mirror.unmap_view(view.range.base, view.range.extent)
    }

    /// Merge an unmapped reservation starting at `base` back into the free
    /// list, coalescing with adjacent free neighbors
    pub fn release(&mut self, base: u64) -> Result<()> {
        let idx = self
            .reserved_regions
            .iter()
            .position(|r| r.base == base)
            .ok_or_else(|| {
                EmulatorError::MapperError(format!("release 0x{base:x}: not reserved"))
            })?;

        let range = self.reserved_regions[idx];
        if self
            .mapped_views
            .iter()
            .any(|v| v.range.base < range.end() && range.base < v.range.end())
        {
            return Err(EmulatorError::MapperError(format!(
                "release 0x{base:x}: range still holds mapped views"
            )));
        }

        self.reserved_regions.swap_remove(idx);

        // Insert and coalesce
        self.free_regions.push(range);
        self.free_regions.sort_by_key(|r| r.base);
        let mut merged: Vec<GuestRange> = Vec::with_capacity(self.free_regions.len());
        for r in self.free_regions.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == r.base => last.extent += r.extent,
                _ => merged.push(r),
            }
        }
        self.free_regions = merged;
        Ok(())
    }

    /// Unmap every view inside `[base, base+extent)` (used when a RAM-size
    /// change tears down the old mirror set)
    pub fn unmap_range(&mut self, base: u64, extent: u64) -> Result<()> {
        let ptrs: Vec<*mut u8> = self
            .mapped_views
            .iter()
            .filter(|v| v.range.base >= base && v.range.end() <= base + extent)
            .map(|v| v.host_ptr)
            .collect();
        for ptr in ptrs {
            self.unmap(ptr)?;
        }
        Ok(())
    }
}

/// POSIX back-end: `shm` object + `mmap` placeholder reservation
///
/// The Win32 original uses `VirtualAlloc2` placeholders with
/// `MapViewOfFile3`; the equivalent here is a `PROT_NONE` anonymous
/// reservation whose windows get replaced by `MAP_FIXED | MAP_SHARED` file
/// views (and restored with fresh `PROT_NONE` fixed mappings).
#[cfg(unix)]
pub struct PosixMirror {
    base: *mut u8,
    fd: std::os::unix::io::RawFd,
    file_size: u64,
    page_size: u64,
}

#[cfg(unix)]
impl PosixMirror {
    pub fn new(file_size: u64) -> Result<Self> {
        use std::sync::atomic::{AtomicU32, Ordering};

        static SHM_COUNTER: AtomicU32 = AtomicU32::new(0);

        let name = format!(
            "/psxcore-{}-{}\0",
            std::process::id(),
            SHM_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        // SAFETY: name is a valid NUL-terminated C string; the object is
        // unlinked immediately so it cannot leak past this process.
        let fd = unsafe {
            let fd = libc::shm_open(
                name.as_ptr() as *const libc::c_char,
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                0o600,
            );
            if fd < 0 {
                return Err(EmulatorError::MapperError(
                    "shm_open failed for the guest memory file".into(),
                ));
            }
            libc::shm_unlink(name.as_ptr() as *const libc::c_char);
            if libc::ftruncate(fd, file_size as libc::off_t) != 0 {
                libc::close(fd);
                return Err(EmulatorError::MapperError(
                    "ftruncate failed for the guest memory file".into(),
                ));
            }
            fd
        };

        // SAFETY: anonymous PROT_NONE reservation; never touched until a
        // window is replaced by a file view.
        let base = unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                GUEST_ADDRESS_SPACE_SIZE as libc::size_t,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                libc::close(fd);
                return Err(EmulatorError::MapperError(
                    "4 GiB guest reservation failed".into(),
                ));
            }
            ptr as *mut u8
        };

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;

        Ok(Self {
            base,
            fd,
            file_size,
            page_size,
        })
    }
}

#[cfg(unix)]
impl HostMirror for PosixMirror {
    fn base(&self) -> *mut u8 {
        self.base
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn map_view(
        &mut self,
        offset: u64,
        size: u64,
        file_offset: u64,
        prot: PageProtection,
    ) -> Result<*mut u8> {
        let os_prot = match prot {
            PageProtection::Read => libc::PROT_READ,
            PageProtection::Write => libc::PROT_WRITE,
            PageProtection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };

        // SAFETY: target window lies inside our own reservation; MAP_FIXED
        // replaces exactly [offset, offset+size) with the file view.
        let ptr = unsafe {
            libc::mmap(
                self.base.add(offset as usize) as *mut libc::c_void,
                size as libc::size_t,
                os_prot,
                libc::MAP_SHARED | libc::MAP_FIXED,
                self.fd,
                file_offset as libc::off_t,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(EmulatorError::MapperError(format!(
                "mapping view at 0x{offset:x} (file 0x{file_offset:x}) failed"
            )));
        }
        Ok(ptr as *mut u8)
    }

    fn unmap_view(&mut self, offset: u64, size: u64) -> Result<()> {
        // SAFETY: restores the window to an inert reservation.
        let ptr = unsafe {
            libc::mmap(
                self.base.add(offset as usize) as *mut libc::c_void,
                size as libc::size_t,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(EmulatorError::MapperError(format!(
                "unmapping view at 0x{offset:x} failed"
            )));
        }
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for PosixMirror {
    fn drop(&mut self) {
        // SAFETY: tearing down exactly what new() created.
        unsafe {
            libc::munmap(
                self.base as *mut libc::c_void,
                GUEST_ADDRESS_SPACE_SIZE as libc::size_t,
            );
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::region;
    use proptest::prelude::*;

    fn space() -> AddressSpace<PosixMirror> {
        AddressSpace::new(PosixMirror::new(region::sizes::EFFECTIVE_MEMORY).unwrap())
    }

    fn total_free(space: &AddressSpace<PosixMirror>) -> u64 {
        space.free_regions().iter().map(|r| r.extent).sum()
    }

    #[test]
    fn test_reserve_release_roundtrip() {
        let mut space = space();
        let before: Vec<_> = space.free_regions().to_vec();

        space.reserve(0x20_0000, 0x10_0000).unwrap();
        assert_eq!(
            total_free(&space),
            GUEST_ADDRESS_SPACE_SIZE - 0x10_0000
        );

        space.release(0x20_0000).unwrap();
        let mut after: Vec<_> = space.free_regions().to_vec();
        after.sort_by_key(|r| r.base);
        assert_eq!(after, before);
    }

    #[test]
    fn test_reserve_misaligned_fails() {
        let mut space = space();
        assert!(space.reserve(0x1001, 0x1000).is_err());
        assert!(space.reserve(0x1000, 0x1001).is_err());
    }

    #[test]
    fn test_reserve_twice_fails() {
        let mut space = space();
        space.reserve(0, 0x1000).unwrap();
        assert!(space.reserve(0, 0x1000).is_err());
    }

    #[test]
    fn test_map_requires_reservation() {
        let mut space = space();
        assert!(space.map(0, 0x1000, 0, PageProtection::ReadWrite).is_err());
    }

    #[test]
    fn test_map_same_base_returns_same_pointer() {
        let mut space = space();
        space.reserve(0, 0x1000).unwrap();
        let a = space.map(0, 0x1000, 0, PageProtection::ReadWrite).unwrap();
        let b = space.map(0, 0x1000, 0, PageProtection::ReadWrite).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_release_with_mapped_view_fails() {
        let mut space = space();
        space.reserve(0, 0x1000).unwrap();
        let ptr = space.map(0, 0x1000, 0, PageProtection::ReadWrite).unwrap();
        assert!(space.release(0).is_err());
        space.unmap(ptr).unwrap();
        space.release(0).unwrap();
    }

    #[test]
    fn test_mirror_views_share_backing() {
        // Two views of the same file offset observe each other's writes
        let mut space = space();
        space.reserve(0, 0x1000).unwrap();
        space.reserve(0x8000_0000, 0x1000).unwrap();

        let lo = space.map(0, 0x1000, 0, PageProtection::ReadWrite).unwrap();
        let hi = space
            .map(0x8000_0000, 0x1000, 0, PageProtection::ReadWrite)
            .unwrap();

        unsafe {
            lo.add(0x123).write(0xAB);
            assert_eq!(hi.add(0x123).read(), 0xAB);
            hi.add(0x456).write(0xCD);
            assert_eq!(lo.add(0x456).read(), 0xCD);
        }
    }

    proptest! {
        #[test]
        fn prop_free_and_reserved_partition_the_space(
            ops in prop::collection::vec((0u64..1024, 1u64..64), 1..20)
        ) {
            let mut space = space();
            let page = space.page_size();
            let mut reserved: Vec<u64> = Vec::new();

            for (page_base, page_count) in ops {
                let base = page_base * page;
                let extent = page_count * page;
                if space.reserve(base, extent).is_ok() {
                    reserved.push(base);
                }

                let free: u64 = space.free_regions().iter().map(|r| r.extent).sum();
                let taken: u64 = space.reserved_regions.iter().map(|r| r.extent).sum();
                prop_assert_eq!(free + taken, GUEST_ADDRESS_SPACE_SIZE);
            }

            // Releasing everything restores one coalesced free range
            for base in reserved {
                space.release(base).unwrap();
            }
            prop_assert_eq!(space.free_regions().len(), 1);
            prop_assert_eq!(space.free_regions()[0].extent, GUEST_ADDRESS_SPACE_SIZE);
        }
    }
}
