//! The driver seam: device memory, session messaging and one-sided transfer.
//!
//! Everything in this module is a thin contract over the vendor driver. The
//! rest of the crate only talks to these traits, so the rendezvous protocol
//! can be exercised against the in-process [`loopback`] driver.

pub mod loopback;

use std::fmt;
use std::ptr::NonNull;

use crate::error::DrvResult;
use crate::type_alias::*;

/// Device memory pool a buffer is drawn from.
///
/// A buffer must be returned to the same pool it was allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Registered fast-path send data.
    TxData,

    /// Registered fast-path send control.
    TxCtrl,

    /// Per-transfer receive data.
    RxData,

    /// Per-transfer receive control.
    RxCtrl,
}

/// Device allocator.
///
/// This trait is object-safe: buffers keep an `Arc<dyn DeviceMemory>` so that
/// they can free themselves on drop.
pub trait DeviceMemory: Send + Sync + 'static {
    /// Allocate at least `len` bytes from the given pool.
    /// Return `None` if the pool is exhausted.
    fn alloc(&self, kind: PoolKind, len: usize, dev: DeviceId) -> Option<NonNull<u8>>;

    /// Return memory to its pool.
    ///
    /// # Safety
    ///
    /// - `ptr` must have been returned by [`alloc`](Self::alloc) with the same `kind`.
    /// - `ptr` must not be used after it is freed, nor freed more than once.
    unsafe fn free(&self, kind: PoolKind, ptr: NonNull<u8>) -> DrvResult<()>;

    /// Map an allocated buffer for DMA by the device.
    fn dma_map(&self, kind: PoolKind, ptr: NonNull<u8>, dev: DeviceId) -> DrvResult<()>;
}

/// Driver-level description of a one-sided transfer.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FastSendMsg {
    pub src_data: DevAddr,
    pub dst_data: DevAddr,
    pub src_ctrl: DevAddr,
    pub dst_ctrl: DevAddr,
    pub data_len: u32,
    pub ctrl_len: u32,
}

impl fmt::Debug for FastSendMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastSendMsg")
            .field("src_data", &format_args!("{:#x}", self.src_data))
            .field("dst_data", &format_args!("{:#x}", self.dst_data))
            .field("src_ctrl", &format_args!("{:#x}", self.src_ctrl))
            .field("dst_ctrl", &format_args!("{:#x}", self.dst_ctrl))
            .field("data_len", &self.data_len)
            .field("ctrl_len", &self.ctrl_len)
            .finish()
    }
}

/// What the receive side of a one-sided transfer observed.
/// Lengths are authoritative and may differ from the announced ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FastRecvMsg {
    pub data_addr: DevAddr,
    pub ctrl_addr: DevAddr,
    pub data_len: u32,
    pub ctrl_len: u32,
}

/// Session-oriented messaging primitive.
///
/// All calls are blocking unless `flags` says otherwise. Errors are reported
/// as [`DrvError`](crate::DrvError)s and translated by the caller.
pub trait Driver: Send + Sync + 'static {
    /// Listening resource of the server role.
    type Server: Send;

    /// Connecting resource of the client role.
    type Client: Send;

    /// Opaque session identifier.
    type Session: Copy + Eq + fmt::Debug + Send + Sync;

    /// Reusable message header.
    type MsgHeader: Send;

    /// Create a server on the given device. Does not block.
    fn server_create(&self, dev: DeviceId) -> DrvResult<Self::Server>;

    /// Destroy a server.
    fn server_destroy(&self, server: Self::Server) -> DrvResult<()>;

    /// Create a client able to hold up to `max_sessions` sessions. Does not block.
    fn client_create(&self, max_sessions: u32) -> DrvResult<Self::Client>;

    /// Destroy a client.
    fn client_destroy(&self, client: Self::Client) -> DrvResult<()>;

    /// Block until a client connects.
    fn accept(&self, server: &Self::Server) -> DrvResult<Self::Session>;

    /// Connect to the server on the given device.
    fn connect(&self, dev: DeviceId, client: &Self::Client) -> DrvResult<Self::Session>;

    /// Bind the session to the calling process.
    fn set_session_reference(&self, session: Self::Session) -> DrvResult<()>;

    /// Close a session.
    fn session_close(&self, session: Self::Session) -> DrvResult<()>;

    /// Allocate a message header for the given session.
    fn alloc_msg(&self, session: Self::Session) -> DrvResult<Self::MsgHeader>;

    /// Free a message header.
    fn free_msg(&self, msg: Self::MsgHeader) -> DrvResult<()>;

    /// Reset a header so it can carry a new message.
    fn reuse_msg(&self, msg: &mut Self::MsgHeader) -> DrvResult<()>;

    /// Attach a payload buffer to the header.
    fn add_msg_buffer(&self, msg: &mut Self::MsgHeader, data: &[u8]) -> DrvResult<()>;

    /// Send the message described by the header.
    fn send(&self, session: Self::Session, msg: &Self::MsgHeader, flags: DrvFlags)
        -> DrvResult<()>;

    /// Receive a message into the header.
    /// Return the number of buffers in the received message.
    fn recv(
        &self,
        session: Self::Session,
        msg: &mut Self::MsgHeader,
        flags: DrvFlags,
    ) -> DrvResult<usize>;

    /// Return the `idx`-th buffer of a received message.
    fn msg_buffer<'m>(&self, msg: &'m Self::MsgHeader, idx: usize) -> DrvResult<&'m [u8]>;
}

/// One-sided transfer primitive. It carries no delivery notification of its
/// own; the sender learns nothing about completion from it.
pub trait OneSidedTransfer: Driver {
    /// Write the source buffers into the destination buffers of the peer.
    ///
    /// # Safety
    ///
    /// - `[src_data, src_data + data_len)` and `[src_ctrl, src_ctrl + ctrl_len)`
    ///   must be valid for reads for the whole call.
    /// - The destinations must have been granted by the peer for this transfer.
    unsafe fn fast_send(
        &self,
        session: Self::Session,
        msg: &FastSendMsg,
        flags: DrvFlags,
    ) -> DrvResult<()>;

    /// Block until a one-sided transfer into this side completes.
    fn fast_recv(&self, session: Self::Session, flags: DrvFlags) -> DrvResult<FastRecvMsg>;
}

/// Everything an [`Endpoint`](crate::Endpoint) needs from the driver.
pub trait HdcDriver: Driver + OneSidedTransfer + DeviceMemory {}

impl<T: Driver + OneSidedTransfer + DeviceMemory> HdcDriver for T {}
