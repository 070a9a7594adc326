use crate::util::{likely::*, math::roundup};
use libc::*;
use std::ptr::{self, NonNull};

const HUGE_PAGE_SIZE: usize = 1 << 21;
const PAGE_SIZE: usize = 1 << 12;
const CACHELINE_SIZE: usize = 64;

enum AllocType {
    Mmap,
    Malloc,
}

/// A piece of page- or cacheline-aligned host memory that is unmapped or
/// freed on drop.
pub(crate) struct HostAlloc {
    ptr: NonNull<u8>,
    len: usize,
    alloc_type: AllocType,
}

unsafe impl Send for HostAlloc {}
unsafe impl Sync for HostAlloc {}

impl HostAlloc {
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable length, which may be larger than requested.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for HostAlloc {
    fn drop(&mut self) {
        // SAFETY: FFI; the pointer came from the matching allocation call.
        unsafe {
            match self.alloc_type {
                AllocType::Mmap => {
                    if munmap(self.ptr.as_ptr() as *mut c_void, self.len) != 0 {
                        log::error!("munmap of {} bytes at {:p} failed", self.len, self.ptr);
                    }
                }
                AllocType::Malloc => free(self.ptr.as_ptr() as *mut c_void),
            }
        };
    }
}

#[inline]
fn alloc_mmap(len: usize, flags: i32) -> *mut u8 {
    // SAFETY: FFI.
    let ret = unsafe {
        mmap(
            ptr::null_mut(),
            len,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS | flags,
            -1,
            0,
        ) as *mut u8
    };

    if ret != MAP_FAILED as _ {
        ret
    } else {
        ptr::null_mut()
    }
}

#[inline]
fn alloc_memalign(len: usize, align: usize) -> *mut u8 {
    let mut ptr = ptr::null_mut();
    // SAFETY: FFI.
    let ret = unsafe { posix_memalign(&mut ptr, align, len) };
    if likely(ret == 0) {
        ptr as _
    } else {
        ptr::null_mut()
    }
}

/// Allocate zeroed-or-garbage host memory of at least `len` bytes.
///
/// Large requests try huge pages first, then normal pages; small requests are
/// served by `posix_memalign` aligned to a cacheline.
/// Return `None` if every strategy fails or the rounded length overflows.
pub(crate) fn alloc_raw(len: usize) -> Option<HostAlloc> {
    let len = len.max(1);

    if len >= HUGE_PAGE_SIZE {
        // 1. Try to allocate huge page.
        let huge_len = roundup(len, HUGE_PAGE_SIZE)?;
        if let Some(ptr) = NonNull::new(alloc_mmap(huge_len, MAP_HUGETLB)) {
            return Some(HostAlloc {
                ptr,
                len: huge_len,
                alloc_type: AllocType::Mmap,
            });
        }

        log::debug!(
            "failed to mmap {}MB hugepages, trying normal pages",
            huge_len >> 20
        );

        // 2. Try to allocate normal page.
        let page_len = roundup(len, PAGE_SIZE)?;
        if let Some(ptr) = NonNull::new(alloc_mmap(page_len, 0)) {
            return Some(HostAlloc {
                ptr,
                len: page_len,
                alloc_type: AllocType::Mmap,
            });
        }

        log::warn!(
            "failed to mmap {}MB normal pages, trying posix_memalign",
            page_len >> 20
        );
    }

    // 3. Try to posix_memalign.
    let len = roundup(len, CACHELINE_SIZE)?;
    let ptr = NonNull::new(alloc_memalign(len, CACHELINE_SIZE))?;
    Some(HostAlloc {
        ptr,
        len,
        alloc_type: AllocType::Malloc,
    })
}
