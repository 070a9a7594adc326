//! In-process loopback driver.
//!
//! A [`Fabric`] plays the role of the physical channel: servers listen on it
//! by device ID, clients connect through it, and every buffer allocated by any
//! driver handle lives in one shared address table so that one-sided transfers
//! can resolve peer addresses. Host and device sides of a test simply use two
//! [`LoopbackDriver`] handles obtained from the same fabric.
//!
//! Each driver handle keeps its own resource accounting, which is what tests
//! use to assert that rollback and teardown release everything.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;

use super::*;
use crate::error::{DrvError, DrvResult};
use crate::util::{host_alloc::*, likely::*};

/// Error code returned by an injected accept/connect failure.
pub const INJECTED_FAILURE: i32 = -2;

const ERR_ADDR_IN_USE: i32 = -98;
const ERR_TOO_MANY_SESSIONS: i32 = -24;

/// Resources currently held through one driver handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveResources {
    pub servers: usize,
    pub clients: usize,
    pub sessions: usize,
    pub headers: usize,
    pub buffers: usize,
}

impl LiveResources {
    /// Return `true` if nothing is held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Default)]
struct Counters {
    servers: AtomicUsize,
    clients: AtomicUsize,
    sessions: AtomicUsize,
    headers: AtomicUsize,
    buffers: AtomicUsize,
    messages_sent: AtomicUsize,
    transfers: AtomicUsize,
}

impl Counters {
    fn live(&self) -> LiveResources {
        LiveResources {
            servers: self.servers.load(Ordering::SeqCst),
            clients: self.clients.load(Ordering::SeqCst),
            sessions: self.sessions.load(Ordering::SeqCst),
            headers: self.headers.load(Ordering::SeqCst),
            buffers: self.buffers.load(Ordering::SeqCst),
        }
    }
}

/// One-shot failure injection for accept/connect.
#[derive(Default)]
struct Faults {
    accepts: AtomicU64,
    connects: AtomicU64,
    fail_accept_at: Mutex<Option<u64>>,
    fail_connect_at: Mutex<Option<u64>>,
}

impl Faults {
    fn arm(calls: &AtomicU64, at: &Mutex<Option<u64>>, nth: u64) {
        *at.lock() = Some(calls.load(Ordering::SeqCst) + nth);
    }

    fn hit(calls: &AtomicU64, at: &Mutex<Option<u64>>) -> bool {
        let this_call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut at = at.lock();
        if *at == Some(this_call) {
            *at = None;
            true
        } else {
            false
        }
    }
}

/// One end of a session.
struct SessionEnd {
    /// Messages to the peer.
    tx: Sender<Vec<u8>>,
    /// Messages from the peer.
    rx: Receiver<Vec<u8>>,
    /// Transfer notifications to the peer.
    fast_tx: Sender<FastRecvMsg>,
    /// Transfer notifications from the peer.
    fast_rx: Receiver<FastRecvMsg>,
}

/// An allocated device buffer.
struct Region {
    mem: HostAlloc,
    kind: PoolKind,
}

/// A listening server.
struct Listener {
    server_id: u64,
    tx: Sender<u64>,
}

struct FabricInner {
    listeners: DashMap<DeviceId, Listener, RandomState>,
    ends: DashMap<u64, SessionEnd, RandomState>,
    regions: DashMap<usize, Region, RandomState>,
    next_id: AtomicU64,
}

impl FabricInner {
    #[inline]
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// The shared in-process medium that loopback drivers talk through.
#[derive(Clone)]
pub struct Fabric(Arc<FabricInner>);

impl Fabric {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self(Arc::new(FabricInner {
            listeners: DashMap::with_hasher(RandomState::new()),
            ends: DashMap::with_hasher(RandomState::new()),
            regions: DashMap::with_capacity_and_hasher(64, RandomState::new()),
            next_id: AtomicU64::new(1),
        }))
    }

    /// Create a new driver handle with its own resource accounting.
    pub fn driver(&self) -> LoopbackDriver {
        LoopbackDriver {
            fabric: self.0.clone(),
            counters: Arc::new(Counters::default()),
            faults: Arc::new(Faults::default()),
            snapshots: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

/// Loopback driver handle. Clones share accounting.
#[derive(Clone)]
pub struct LoopbackDriver {
    fabric: Arc<FabricInner>,
    counters: Arc<Counters>,
    faults: Arc<Faults>,
    snapshots: Arc<Mutex<Vec<LiveResources>>>,
}

/// Loopback server resource.
pub struct LoopbackServer {
    dev: DeviceId,
    id: u64,
    incoming: Receiver<u64>,
}

/// Loopback client resource.
pub struct LoopbackClient {
    max_sessions: u32,
    connected: AtomicU32,
}

/// Loopback session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopbackSession(u64);

/// Loopback message header.
pub struct LoopbackMsg {
    payload: Vec<u8>,
    received: Option<Vec<u8>>,
}

impl LoopbackDriver {
    /// Resources currently held through this handle.
    pub fn live(&self) -> LiveResources {
        self.counters.live()
    }

    /// Number of messages successfully sent through this handle.
    pub fn messages_sent(&self) -> usize {
        self.counters.messages_sent.load(Ordering::SeqCst)
    }

    /// Number of one-sided transfers issued through this handle.
    pub fn transfers(&self) -> usize {
        self.counters.transfers.load(Ordering::SeqCst)
    }

    /// Live resources observed each time a server or client was created.
    pub fn establish_snapshots(&self) -> Vec<LiveResources> {
        self.snapshots.lock().clone()
    }

    /// Make the `nth` accept call from now on fail, without consuming a pending connection.
    pub fn fail_nth_accept(&self, nth: u64) {
        Faults::arm(&self.faults.accepts, &self.faults.fail_accept_at, nth);
    }

    /// Make the `nth` connect call from now on fail.
    pub fn fail_nth_connect(&self, nth: u64) {
        Faults::arm(&self.faults.connects, &self.faults.fail_connect_at, nth);
    }

    fn snapshot(&self) {
        let live = self.live();
        self.snapshots.lock().push(live);
    }

    fn with_end<R>(&self, session: LoopbackSession, f: impl FnOnce(&SessionEnd) -> R) -> DrvResult<R> {
        let end = self
            .fabric
            .ends
            .get(&session.0)
            .ok_or(DrvError::InvalidHandle)?;
        Ok(f(&end))
    }

    /// Copy `len` bytes into a receive region.
    ///
    /// # Safety
    ///
    /// `[src, src + len)` must be valid for reads.
    unsafe fn copy_into_region(&self, src: DevAddr, dst: DevAddr, len: usize) -> DrvResult<()> {
        // Hold the region for the duration of the copy so it cannot be freed underneath.
        let region = self
            .fabric
            .regions
            .get(&(dst as usize))
            .ok_or(DrvError::InvalidHandle)?;
        if unlikely(!matches!(region.kind, PoolKind::RxData | PoolKind::RxCtrl))
            || unlikely(region.mem.len() < len)
        {
            return Err(DrvError::InvalidHandle);
        }
        ptr::copy_nonoverlapping(src as *const u8, region.mem.as_ptr(), len);
        Ok(())
    }
}

impl Driver for LoopbackDriver {
    type Server = LoopbackServer;
    type Client = LoopbackClient;
    type Session = LoopbackSession;
    type MsgHeader = LoopbackMsg;

    fn server_create(&self, dev: DeviceId) -> DrvResult<LoopbackServer> {
        self.snapshot();

        let id = self.fabric.next_id();
        let (tx, incoming) = channel::unbounded();
        match self.fabric.listeners.entry(dev) {
            Entry::Occupied(_) => return Err(DrvError::Code(ERR_ADDR_IN_USE)),
            Entry::Vacant(v) => {
                v.insert(Listener { server_id: id, tx });
            }
        }
        self.counters.servers.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackServer { dev, id, incoming })
    }

    fn server_destroy(&self, server: LoopbackServer) -> DrvResult<()> {
        self.fabric
            .listeners
            .remove_if(&server.dev, |_, l| l.server_id == server.id);

        // Connections that were never accepted are refused.
        while let Ok(end) = server.incoming.try_recv() {
            self.fabric.ends.remove(&end);
        }
        self.counters.servers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn client_create(&self, max_sessions: u32) -> DrvResult<LoopbackClient> {
        self.snapshot();
        self.counters.clients.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackClient {
            max_sessions,
            connected: AtomicU32::new(0),
        })
    }

    fn client_destroy(&self, _client: LoopbackClient) -> DrvResult<()> {
        self.counters.clients.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn accept(&self, server: &LoopbackServer) -> DrvResult<LoopbackSession> {
        if unlikely(Faults::hit(
            &self.faults.accepts,
            &self.faults.fail_accept_at,
        )) {
            return Err(DrvError::Code(INJECTED_FAILURE));
        }

        let end = server
            .incoming
            .recv()
            .map_err(|_| DrvError::InvalidHandle)?;
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackSession(end))
    }

    fn connect(&self, dev: DeviceId, client: &LoopbackClient) -> DrvResult<LoopbackSession> {
        if unlikely(Faults::hit(
            &self.faults.connects,
            &self.faults.fail_connect_at,
        )) {
            return Err(DrvError::Code(INJECTED_FAILURE));
        }
        if client.connected.load(Ordering::SeqCst) >= client.max_sessions {
            return Err(DrvError::Code(ERR_TOO_MANY_SESSIONS));
        }

        let listener = self.fabric.listeners.get(&dev).ok_or(DrvError::NoPeer)?;

        let (cli_tx, svr_rx) = channel::unbounded();
        let (svr_tx, cli_rx) = channel::unbounded();
        let (cli_fast_tx, svr_fast_rx) = channel::unbounded();
        let (svr_fast_tx, cli_fast_rx) = channel::unbounded();

        let cli_id = self.fabric.next_id();
        let svr_id = self.fabric.next_id();
        self.fabric.ends.insert(
            cli_id,
            SessionEnd {
                tx: cli_tx,
                rx: cli_rx,
                fast_tx: cli_fast_tx,
                fast_rx: cli_fast_rx,
            },
        );
        self.fabric.ends.insert(
            svr_id,
            SessionEnd {
                tx: svr_tx,
                rx: svr_rx,
                fast_tx: svr_fast_tx,
                fast_rx: svr_fast_rx,
            },
        );

        if listener.tx.send(svr_id).is_err() {
            self.fabric.ends.remove(&cli_id);
            self.fabric.ends.remove(&svr_id);
            return Err(DrvError::NoPeer);
        }
        drop(listener);

        client.connected.fetch_add(1, Ordering::SeqCst);
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackSession(cli_id))
    }

    fn set_session_reference(&self, session: LoopbackSession) -> DrvResult<()> {
        self.with_end(session, |_| ())
    }

    fn session_close(&self, session: LoopbackSession) -> DrvResult<()> {
        self.fabric
            .ends
            .remove(&session.0)
            .ok_or(DrvError::InvalidHandle)?;
        self.counters.sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn alloc_msg(&self, session: LoopbackSession) -> DrvResult<LoopbackMsg> {
        self.with_end(session, |_| ())?;
        self.counters.headers.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackMsg {
            payload: Vec::new(),
            received: None,
        })
    }

    fn free_msg(&self, _msg: LoopbackMsg) -> DrvResult<()> {
        self.counters.headers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn reuse_msg(&self, msg: &mut LoopbackMsg) -> DrvResult<()> {
        msg.payload.clear();
        msg.received = None;
        Ok(())
    }

    fn add_msg_buffer(&self, msg: &mut LoopbackMsg, data: &[u8]) -> DrvResult<()> {
        msg.payload.clear();
        msg.payload.extend_from_slice(data);
        Ok(())
    }

    fn send(&self, session: LoopbackSession, msg: &LoopbackMsg, _flags: DrvFlags) -> DrvResult<()> {
        let tx = self.with_end(session, |end| end.tx.clone())?;
        tx.send(msg.payload.clone())
            .map_err(|_| DrvError::SocketClosed)?;
        self.counters.messages_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn recv(
        &self,
        session: LoopbackSession,
        msg: &mut LoopbackMsg,
        _flags: DrvFlags,
    ) -> DrvResult<usize> {
        // Never block while holding the map entry.
        let rx = self.with_end(session, |end| end.rx.clone())?;
        let payload = rx.recv().map_err(|_| DrvError::SocketClosed)?;
        msg.received = Some(payload);
        Ok(1)
    }

    fn msg_buffer<'m>(&self, msg: &'m LoopbackMsg, idx: usize) -> DrvResult<&'m [u8]> {
        if idx != 0 {
            return Err(DrvError::InvalidHandle);
        }
        msg.received.as_deref().ok_or(DrvError::InvalidHandle)
    }
}

impl OneSidedTransfer for LoopbackDriver {
    unsafe fn fast_send(
        &self,
        session: LoopbackSession,
        msg: &FastSendMsg,
        _flags: DrvFlags,
    ) -> DrvResult<()> {
        let fast_tx = self.with_end(session, |end| end.fast_tx.clone())?;

        self.copy_into_region(msg.src_data, msg.dst_data, msg.data_len as usize)?;
        if msg.ctrl_len > 0 {
            self.copy_into_region(msg.src_ctrl, msg.dst_ctrl, msg.ctrl_len as usize)?;
        }

        fast_tx
            .send(FastRecvMsg {
                data_addr: msg.dst_data,
                ctrl_addr: msg.dst_ctrl,
                data_len: msg.data_len,
                ctrl_len: msg.ctrl_len,
            })
            .map_err(|_| DrvError::SocketClosed)?;
        self.counters.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fast_recv(&self, session: LoopbackSession, _flags: DrvFlags) -> DrvResult<FastRecvMsg> {
        let fast_rx = self.with_end(session, |end| end.fast_rx.clone())?;
        fast_rx.recv().map_err(|_| DrvError::SocketClosed)
    }
}

impl DeviceMemory for LoopbackDriver {
    fn alloc(&self, kind: PoolKind, len: usize, _dev: DeviceId) -> Option<NonNull<u8>> {
        let mem = alloc_raw(len)?;
        let ptr = NonNull::new(mem.as_ptr())?;
        self.fabric
            .regions
            .insert(ptr.as_ptr() as usize, Region { mem, kind });
        self.counters.buffers.fetch_add(1, Ordering::SeqCst);
        Some(ptr)
    }

    unsafe fn free(&self, kind: PoolKind, ptr: NonNull<u8>) -> DrvResult<()> {
        self.fabric
            .regions
            .remove_if(&(ptr.as_ptr() as usize), |_, r| r.kind == kind)
            .ok_or(DrvError::InvalidHandle)?;
        self.counters.buffers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn dma_map(&self, kind: PoolKind, ptr: NonNull<u8>, _dev: DeviceId) -> DrvResult<()> {
        match self.fabric.regions.get(&(ptr.as_ptr() as usize)) {
            Some(r) if r.kind == kind => Ok(()),
            _ => Err(DrvError::InvalidHandle),
        }
    }
}
