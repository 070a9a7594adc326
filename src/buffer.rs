//! Device buffers.
//!
//! Every buffer is an owned value tagged with the pool it was drawn from and
//! returns itself to that pool on drop.

use std::ptr::NonNull;
use std::sync::Arc;
use std::{fmt, slice};

use crate::error::{Error, Result};
use crate::transport::{DeviceMemory, PoolKind};
use crate::type_alias::*;
use crate::util::likely::*;

/// An allocated, DMA-mapped device buffer.
pub(crate) struct DeviceBuffer {
    ptr: NonNull<u8>,
    len: usize,
    kind: PoolKind,
    pool: Arc<dyn DeviceMemory>,
}

// SAFETY: the buffer exclusively owns its memory region.
unsafe impl Send for DeviceBuffer {}
unsafe impl Sync for DeviceBuffer {}

impl DeviceBuffer {
    /// Allocate `len` bytes from `kind` and map them for the device.
    pub fn alloc(
        pool: Arc<dyn DeviceMemory>,
        kind: PoolKind,
        len: usize,
        dev: DeviceId,
    ) -> Result<Self> {
        let ptr = pool.alloc(kind, len, dev).ok_or_else(|| {
            Error::AllocationFailure(format!("{:?} buffer of {} bytes", kind, len))
        })?;
        let buf = Self {
            ptr,
            len,
            kind,
            pool,
        };

        // On failure `buf` is dropped and the memory goes back to its pool.
        buf.pool.dma_map(kind, ptr, dev).map_err(|e| {
            Error::AllocationFailure(format!("dma map of {:?} buffer: {}", kind, e))
        })?;

        log::trace!(
            "dev {}: allocated {:?} buffer {:#x} ({} bytes)",
            dev,
            kind,
            buf.addr(),
            len
        );
        Ok(buf)
    }

    #[inline(always)]
    pub fn addr(&self) -> DevAddr {
        self.ptr.as_ptr() as DevAddr
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn kind(&self) -> PoolKind {
        self.kind
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `pool.alloc` with the same kind and is freed once.
        if let Err(e) = unsafe { self.pool.free(self.kind, self.ptr) } {
            log::error!(
                "failed to free {:?} buffer {:#x}: {}",
                self.kind,
                self.addr(),
                e
            );
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A long-lived fast-path send buffer with a fixed capacity.
#[derive(Debug)]
pub(crate) struct RegisteredBuffer(DeviceBuffer);

impl RegisteredBuffer {
    pub fn alloc(
        pool: Arc<dyn DeviceMemory>,
        kind: PoolKind,
        capacity: usize,
        dev: DeviceId,
    ) -> Result<Self> {
        DeviceBuffer::alloc(pool, kind, capacity, dev).map(Self)
    }

    #[inline(always)]
    pub fn addr(&self) -> DevAddr {
        self.0.addr()
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.0.len()
    }

    /// Check that a transfer of `len` bytes fits.
    #[inline]
    pub fn check_fits(&self, len: usize) -> Result<()> {
        if unlikely(len > self.capacity()) {
            return Err(Error::OutOfRange {
                requested: len,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// View the first `len` bytes for in-place filling.
    ///
    /// # Panics
    ///
    /// Panic if `len` exceeds the capacity.
    pub fn as_mut_slice(&mut self, len: usize) -> &mut [u8] {
        assert!(len <= self.capacity());
        // SAFETY: in bounds, exclusively borrowed through `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.0.as_ptr(), len) }
    }
}

/// A received fast-path buffer.
///
/// Clones share the same memory, which goes back to its pool when the last
/// clone is dropped.
#[derive(Clone)]
pub struct RecvBuffer {
    buf: Arc<DeviceBuffer>,
    len: usize,
}

impl RecvBuffer {
    /// Wrap a freshly received buffer; `len` is clamped to the capacity.
    pub(crate) fn new(buf: DeviceBuffer, len: usize) -> Self {
        if unlikely(len > buf.len()) {
            log::warn!(
                "transfer reported {} bytes into a {}-byte {:?} buffer, clamping",
                len,
                buf.len(),
                buf.kind()
            );
        }
        let len = len.min(buf.len());
        Self {
            buf: Arc::new(buf),
            len,
        }
    }

    /// Number of bytes transferred.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size, at least [`len`](Self::len).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Device address of the buffer.
    #[inline]
    pub fn addr(&self) -> DevAddr {
        self.buf.addr()
    }

    /// The transferred bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the transfer completed before construction and nobody writes afterwards.
        unsafe { slice::from_raw_parts(self.buf.as_ptr(), self.len) }
    }
}

impl AsRef<[u8]> for RecvBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for RecvBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvBuffer")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::Fabric;

    #[test]
    fn last_clone_frees() {
        let drv = Fabric::new().driver();
        let pool: Arc<dyn DeviceMemory> = Arc::new(drv.clone());

        let buf = DeviceBuffer::alloc(pool, PoolKind::RxData, 16, 0).unwrap();
        let a = RecvBuffer::new(buf, 64);
        assert_eq!(a.len(), 16);
        assert_eq!(drv.live().buffers, 1);

        let b = a.clone();
        drop(a);
        assert_eq!(drv.live().buffers, 1);
        drop(b);
        assert_eq!(drv.live().buffers, 0);
    }

    #[test]
    fn registered_capacity_is_enforced() {
        let drv = Fabric::new().driver();
        let mut buf = RegisteredBuffer::alloc(Arc::new(drv), PoolKind::TxData, 8, 0).unwrap();
        assert!(buf.check_fits(8).is_ok());
        assert_eq!(
            buf.check_fits(9),
            Err(Error::OutOfRange {
                requested: 9,
                capacity: 8
            })
        );
        buf.as_mut_slice(8).copy_from_slice(b"12345678");
    }
}
