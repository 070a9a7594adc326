//! Channel endpoints.
//!
//! An [`Endpoint`] owns a device ID and at most one role: a server accepts
//! sessions, a client connects them. Establishment is all-or-nothing: the
//! requested number of sessions either all come up (including their fast-path
//! companions when fast mode is on), or everything acquired during the
//! attempt is released before the next one.

mod fast;
mod normal;
mod retry;

use std::sync::Arc;
use std::{fmt, mem, thread};

use parking_lot::Mutex;

pub use self::fast::*;
pub use self::normal::*;
pub use self::retry::*;
use crate::buffer::RegisteredBuffer;
use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::session::*;
use crate::transport::*;
use crate::type_alias::*;

/// Default capacity of the registered fast-path data buffer.
pub const DEFAULT_FAST_DATA_BUF_CAP: usize = 10 * 1024 * 1024;

/// Default capacity of the registered fast-path control buffer.
pub const DEFAULT_FAST_CTRL_BUF_CAP: usize = 128;

/// Default number of driver sessions a client reserves per requested session.
pub const DEFAULT_CLIENT_SESSION_MULTIPLIER: u32 = 3;

/// Role of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Server,
    Client,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Server => f.write_str("server"),
            RoleKind::Client => f.write_str("client"),
        }
    }
}

/// Capacities of the registered fast-path send buffers of each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastBufferCaps {
    pub data: usize,
    pub ctrl: usize,
}

impl Default for FastBufferCaps {
    fn default() -> Self {
        Self {
            data: DEFAULT_FAST_DATA_BUF_CAP,
            ctrl: DEFAULT_FAST_CTRL_BUF_CAP,
        }
    }
}

/// The role resource currently held.
enum Role<D: Driver> {
    Idle,
    Server(D::Server),
    Client(D::Client),
}

impl<D: Driver> Role<D> {
    fn kind(&self) -> Option<RoleKind> {
        match self {
            Role::Idle => None,
            Role::Server(_) => Some(RoleKind::Server),
            Role::Client(_) => Some(RoleKind::Client),
        }
    }
}

/// A host-device channel endpoint.
///
/// All operations block. Different sessions may be driven from different
/// threads concurrently; operations on the same session are serialized.
pub struct Endpoint<D: HdcDriver> {
    /// The driver.
    driver: Arc<D>,

    /// Device this endpoint talks to.
    dev: DeviceId,

    /// Whether established sessions get fast-path resources.
    fast_mode: bool,

    /// Client sessions reserved per requested session.
    client_session_multiplier: u32,

    /// Retry behavior of establishment.
    retry: RetryPolicy,

    /// Held role resource. Locked for the whole establishment.
    role: Mutex<Role<D>>,

    /// Establishment progress.
    state: Mutex<EstablishState>,

    /// Established sessions.
    registry: Registry<D>,
}

impl<D: HdcDriver> Endpoint<D> {
    /// Create an idle endpoint for the given device.
    pub fn new(driver: Arc<D>, dev: DeviceId, fast_mode: bool) -> Self {
        Self {
            driver,
            dev,
            fast_mode,
            client_session_multiplier: DEFAULT_CLIENT_SESSION_MULTIPLIER,
            retry: RetryPolicy::forever(),
            role: Mutex::new(Role::Idle),
            state: Mutex::new(EstablishState::Idle),
            registry: Registry::new(),
        }
    }

    /// Create an idle endpoint from a configuration.
    pub fn with_config(driver: Arc<D>, config: &EndpointConfig) -> Self {
        let mut this = Self::new(driver, config.device_id, config.fast_mode);
        this.client_session_multiplier = config.client_session_multiplier.max(1);
        this.retry = config.retry_policy();
        this
    }

    /// Replace the retry policy of subsequent establishments.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry = policy;
    }

    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    #[inline]
    pub fn device_id(&self) -> DeviceId {
        self.dev
    }

    #[inline]
    pub fn fast_mode(&self) -> bool {
        self.fast_mode
    }

    /// Return the role currently held, if any.
    pub fn role(&self) -> Option<RoleKind> {
        self.role.lock().kind()
    }

    #[inline]
    pub fn state(&self) -> EstablishState {
        *self.state.lock()
    }

    /// Return the driver.
    #[inline]
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Handles of all established sessions.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.registry.handles()
    }

    /// Accept `count` sessions as a server.
    pub fn create_as_server(
        &self,
        count: usize,
        caps: FastBufferCaps,
    ) -> Result<Vec<SessionHandle>> {
        self.establish(RoleKind::Server, count, caps)
    }

    /// Connect `count` sessions as a client.
    pub fn create_as_client(
        &self,
        count: usize,
        caps: FastBufferCaps,
    ) -> Result<Vec<SessionHandle>> {
        self.establish(RoleKind::Client, count, caps)
    }

    /// Accept a single session as a server.
    pub fn create_server_session(&self, caps: FastBufferCaps) -> Result<SessionHandle> {
        self.establish_one(RoleKind::Server, caps)
    }

    /// Connect a single session as a client.
    pub fn create_client_session(&self, caps: FastBufferCaps) -> Result<SessionHandle> {
        self.establish_one(RoleKind::Client, caps)
    }

    /// Close the companions and the primary session of `session`.
    ///
    /// Registered buffers and message headers stay with the record until
    /// [`teardown`](Self::teardown).
    pub fn close(&self, session: SessionHandle) -> Result<()> {
        let record = self.registry.get(session)?;
        record.lock().close();
        log::debug!("dev {}: closed {:?}", self.dev, session);
        Ok(())
    }

    /// Release every session and the role resource. Idempotent.
    pub fn teardown(&self) {
        let sessions = self.registry.len();
        self.registry.drain_release();
        let mut role = self.role.lock();
        let had_role = role.kind();
        self.release_role(&mut role);
        *self.state.lock() = EstablishState::Idle;

        if let Some(kind) = had_role {
            log::info!(
                "dev {}: {} torn down ({} sessions)",
                self.dev,
                kind,
                sessions
            );
        }
    }
}

// Establishment.
impl<D: HdcDriver> Endpoint<D> {
    fn establish_one(&self, kind: RoleKind, caps: FastBufferCaps) -> Result<SessionHandle> {
        let mut handles = self.establish(kind, 1, caps)?;
        handles
            .pop()
            .ok_or_else(|| Error::CommFailure("establishment produced no session".to_owned()))
    }

    fn establish(
        &self,
        kind: RoleKind,
        count: usize,
        caps: FastBufferCaps,
    ) -> Result<Vec<SessionHandle>> {
        if count == 0 {
            return Err(Error::InvalidArgument(
                "session count must be positive".to_owned(),
            ));
        }

        let mut role = self.role.lock();
        if let Some(existing) = role.kind() {
            return Err(Error::InvalidArgument(format!(
                "dev {}: endpoint already has a {} role",
                self.dev, existing
            )));
        }

        let start = quanta::Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            *self.state.lock() = EstablishState::AwaitingPeer { attempt };

            if let Err(e) = self.create_role(&mut role, kind, count) {
                log::error!("dev {}: failed to create {}: {}", self.dev, kind, e);
                *self.state.lock() = EstablishState::Failed;
                return Err(e);
            }

            let e = match self.prepare_batch(&role, kind, count, caps) {
                Ok(records) => {
                    let handles: Vec<_> = records
                        .into_iter()
                        .map(|r| self.registry.insert(r))
                        .collect();
                    *self.state.lock() = EstablishState::Established {
                        sessions: handles.len(),
                    };
                    log::info!(
                        "dev {}: {} established {} session(s) in {:?} ({} attempt(s))",
                        self.dev,
                        kind,
                        handles.len(),
                        quanta::Instant::now().duration_since(start),
                        attempt
                    );
                    return Ok(handles);
                }
                Err(e) => e,
            };

            // The batch is already dropped; only the role is left.
            self.release_role(&mut role);
            match e {
                Error::ConnectionFailure(_) => {
                    log::debug!("dev {}: attempt {} found no peer: {}", self.dev, attempt, e)
                }
                _ => log::warn!("dev {}: attempt {} failed: {}", self.dev, attempt, e),
            }

            if !self.retry.should_retry(attempt) {
                log::error!(
                    "dev {}: {} giving up after {} attempt(s): {}",
                    self.dev,
                    kind,
                    attempt,
                    e
                );
                *self.state.lock() = EstablishState::Failed;
                return Err(e);
            }
            if !self.retry.backoff.is_zero() {
                thread::sleep(self.retry.backoff);
            }
        }
    }

    fn create_role(&self, role: &mut Role<D>, kind: RoleKind, count: usize) -> Result<()> {
        *role = match kind {
            RoleKind::Server => {
                let server = self
                    .driver
                    .server_create(self.dev)
                    .map_err(|e| Error::comm("server create", e))?;
                Role::Server(server)
            }
            RoleKind::Client => {
                let max_sessions = u32::try_from(count)
                    .unwrap_or(u32::MAX)
                    .saturating_mul(self.client_session_multiplier);
                let client = self
                    .driver
                    .client_create(max_sessions)
                    .map_err(|e| Error::comm("client create", e))?;
                Role::Client(client)
            }
        };
        log::debug!("dev {}: {} resource created", self.dev, kind);
        Ok(())
    }

    fn release_role(&self, role: &mut Role<D>) {
        let ret = match mem::replace(role, Role::Idle) {
            Role::Idle => return,
            Role::Server(server) => self.driver.server_destroy(server),
            Role::Client(client) => self.driver.client_destroy(client),
        };
        if let Err(e) = ret {
            log::warn!("dev {}: failed to destroy role resource: {}", self.dev, e);
        }
    }

    /// Bring up every slot; on error every record built so far is dropped.
    fn prepare_batch(
        &self,
        role: &Role<D>,
        kind: RoleKind,
        count: usize,
        caps: FastBufferCaps,
    ) -> Result<Vec<SessionRecord<D>>> {
        let mut records = Vec::with_capacity(count);
        for slot in 0..count {
            let mut record = self.prepare_normal_mode(role, kind)?;
            if self.fast_mode {
                self.prepare_fast_mode(role, &mut record, caps)?;
            }
            log::debug!("dev {}: slot {}/{} ready", self.dev, slot + 1, count);
            records.push(record);
        }
        Ok(records)
    }

    /// Accept or connect one session.
    fn open_session(&self, role: &Role<D>) -> Result<D::Session> {
        match role {
            Role::Server(server) => self.driver.accept(server).map_err(Error::ConnectionFailure),
            Role::Client(client) => self
                .driver
                .connect(self.dev, client)
                .map_err(Error::ConnectionFailure),
            Role::Idle => Err(Error::InvalidArgument("endpoint has no role".to_owned())),
        }
    }

    fn prepare_normal_mode(&self, role: &Role<D>, kind: RoleKind) -> Result<SessionRecord<D>> {
        // Only a failed primary connect waits before the attempt is rolled back.
        let session = self.open_session(role).map_err(|e| {
            if matches!(role, Role::Client(_)) {
                thread::sleep(self.retry.connect_retry_interval);
            }
            e
        })?;
        let data_session = SessionRes::new(self.driver.clone(), session);
        self.driver
            .set_session_reference(session)
            .map_err(|e| Error::comm("set session reference", e))?;

        let mut record = SessionRecord::new(self.dev, kind, data_session);
        record.send_msg = Some(MsgRes::alloc(self.driver.clone(), session)?);
        record.recv_msg = Some(MsgRes::alloc(self.driver.clone(), session)?);
        log::trace!("dev {}: primary session {:?} up", self.dev, session);
        Ok(record)
    }

    fn prepare_fast_mode(
        &self,
        role: &Role<D>,
        record: &mut SessionRecord<D>,
        caps: FastBufferCaps,
    ) -> Result<()> {
        let pool: Arc<dyn DeviceMemory> = self.driver.clone();
        record.fast_data = Some(RegisteredBuffer::alloc(
            pool.clone(),
            PoolKind::TxData,
            caps.data,
            self.dev,
        )?);
        record.fast_ctrl = Some(RegisteredBuffer::alloc(
            pool,
            PoolKind::TxCtrl,
            caps.ctrl,
            self.dev,
        )?);

        let s2c = self.open_session(role)?;
        record.server_to_client = Some(ControlLink::open(&self.driver, s2c)?);
        let c2s = self.open_session(role)?;
        record.client_to_server = Some(ControlLink::open(&self.driver, c2s)?);
        Ok(())
    }
}

impl<D: HdcDriver> Drop for Endpoint<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
