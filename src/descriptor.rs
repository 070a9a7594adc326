use std::fmt;

use bitvec::{field::BitField, prelude as bv};
use paste::paste;

use crate::error::{Error, Result};
use crate::type_alias::*;

macro_rules! impl_accessor {
    ($field:ident, $field_ty:ty, $lsb:expr, $msb:expr, $setter:tt, $getter:tt) => {
        #[inline(always)]
        pub fn $setter(&mut self, val: $field_ty) {
            self.bits[$lsb..=$msb].store_le::<$field_ty>(val);
        }

        #[inline(always)]
        pub fn $getter(&self) -> $field_ty {
            self.bits[$lsb..=$msb].load_le::<$field_ty>()
        }
    };

    ($field:ident, $field_ty:ty, $lsb:expr, $msb:expr) => {
        paste! {
            impl_accessor!(
                $field,
                $field_ty,
                $lsb,
                $msb,
                [< set_ $field >],
                $field
            );
        }
    };
}

/// The single byte a fast-path receiver sends back once the transfer landed.
pub const COMPLETION_SENTINEL: u8 = 0xFE;

/// Buffer descriptor exchanged during the fast-path handshake, 32 bytes.
///
/// Addresses and lengths are always 64-bit so that 32-bit and 64-bit peers
/// agree on the layout.
///
/// # Layout
///
/// | Lsb | Msb |    Name    |
/// | --: | --: | ---------- |
/// |   0 |  63 | data_addr  |
/// |  64 | 127 | ctrl_addr  |
/// | 128 | 191 | data_len   |
/// | 192 | 255 | ctrl_len   |
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BufferDescriptor {
    bits: bv::BitArr!(for 256, in u8, bv::Lsb0),
}

impl BufferDescriptor {
    /// Size of the descriptor on the wire.
    pub const SIZE: usize = 32;

    impl_accessor!(data_addr, DevAddr, 0, 63);
    impl_accessor!(ctrl_addr, DevAddr, 64, 127);
    impl_accessor!(data_len, u64, 128, 191);
    impl_accessor!(ctrl_len, u64, 192, 255);

    pub fn new(data_addr: DevAddr, ctrl_addr: DevAddr, data_len: u64, ctrl_len: u64) -> Self {
        let mut this = Self::default();
        this.set_data_addr(data_addr);
        this.set_ctrl_addr(ctrl_addr);
        this.set_data_len(data_len);
        this.set_ctrl_len(ctrl_len);
        this
    }

    /// View the descriptor as wire bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    /// Parse a descriptor from wire bytes.
    /// Return `None` if the length is not exactly [`Self::SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; Self::SIZE] = bytes.try_into().ok()?;
        Some(Self {
            bits: bv::BitArray::new(raw),
        })
    }
}

impl fmt::Debug for BufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("data_addr", &format_args!("{:#x}", self.data_addr()))
            .field("ctrl_addr", &format_args!("{:#x}", self.ctrl_addr()))
            .field("data_len", &self.data_len())
            .field("ctrl_len", &self.ctrl_len())
            .finish()
    }
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            bits: bv::BitArray::new([0u8; Self::SIZE]),
        }
    }
}

/// Decode a descriptor received on a companion session.
fn decode(bytes: &[u8], what: &str) -> Result<BufferDescriptor> {
    BufferDescriptor::from_bytes(bytes).ok_or_else(|| {
        Error::CommFailure(format!(
            "{} has length {}, expected {}",
            what,
            bytes.len(),
            BufferDescriptor::SIZE
        ))
    })
}

/// Sender's announcement: its registered source buffers and the lengths it
/// is about to transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct BufferOffer(BufferDescriptor);

impl BufferOffer {
    pub fn new(src_data: DevAddr, src_ctrl: DevAddr, data_len: usize, ctrl_len: usize) -> Self {
        Self(BufferDescriptor::new(
            src_data,
            src_ctrl,
            data_len as u64,
            ctrl_len as u64,
        ))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes, "buffer offer").map(Self)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[inline]
    pub fn data_len(&self) -> usize {
        self.0.data_len() as usize
    }

    #[inline]
    pub fn ctrl_len(&self) -> usize {
        self.0.ctrl_len() as usize
    }
}

/// Receiver's reply: where the one-sided transfer must land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct BufferGrant(BufferDescriptor);

impl BufferGrant {
    pub fn new(dst_data: DevAddr, dst_ctrl: DevAddr, data_len: usize, ctrl_len: usize) -> Self {
        Self(BufferDescriptor::new(
            dst_data,
            dst_ctrl,
            data_len as u64,
            ctrl_len as u64,
        ))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes, "buffer grant").map(Self)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[inline]
    pub fn dst_data(&self) -> DevAddr {
        self.0.data_addr()
    }

    #[inline]
    pub fn dst_ctrl(&self) -> DevAddr {
        self.0.ctrl_addr()
    }

    /// Data length the receiver accepted, echoed from the offer.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.0.data_len() as usize
    }

    #[inline]
    pub fn ctrl_len(&self) -> usize {
        self.0.ctrl_len() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn descriptor_layout() {
        assert_eq!(mem::size_of::<BufferDescriptor>(), BufferDescriptor::SIZE);
        assert_eq!(BufferDescriptor::default().as_bytes(), &[0u8; 32][..]);
    }

    #[test]
    fn descriptor_is_little_endian_u64s() {
        let desc = BufferDescriptor::new(0x1122_3344_5566_7788, 0xAB, 4096, 4);
        let bytes = desc.as_bytes();

        assert_eq!(&bytes[0..8], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0xABu64.to_le_bytes());
        assert_eq!(&bytes[16..24], &4096u64.to_le_bytes());
        assert_eq!(&bytes[24..32], &4u64.to_le_bytes());
    }

    #[test]
    fn wrong_size_is_a_protocol_error() {
        assert!(BufferDescriptor::from_bytes(&[0u8; 31]).is_none());
        assert!(matches!(
            BufferGrant::decode(&[0u8; 33]),
            Err(Error::CommFailure(_))
        ));

        let offer = BufferOffer::new(0x1000, 0x2000, 100, 7);
        let parsed = BufferOffer::decode(offer.as_bytes()).unwrap();
        assert_eq!(parsed.data_len(), 100);
        assert_eq!(parsed.ctrl_len(), 7);
    }
}
