//! Per-session resources.
//!
//! Every driver resource is wrapped so that it is released exactly once:
//! explicit releases take the resource out, and whatever is left is released
//! on drop. A record can therefore be torn down at any stage of construction.

mod handle;
mod registry;

use std::sync::Arc;

pub use self::handle::*;
pub(crate) use self::registry::*;
use crate::buffer::{RecvBuffer, RegisteredBuffer};
use crate::endpoint::RoleKind;
use crate::error::{Error, Result};
use crate::transport::Driver;
use crate::type_alias::*;

/// An owned driver session.
pub(crate) struct SessionRes<D: Driver> {
    driver: Arc<D>,
    session: Option<D::Session>,
}

impl<D: Driver> SessionRes<D> {
    pub fn new(driver: Arc<D>, session: D::Session) -> Self {
        Self {
            driver,
            session: Some(session),
        }
    }

    /// Return the session, or an error if it has been closed.
    #[inline]
    pub fn get(&self) -> Result<D::Session> {
        self.session
            .ok_or_else(|| Error::InvalidArgument("session already closed".to_owned()))
    }

    /// Close the session if still open.
    pub fn release(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.driver.session_close(session) {
                log::warn!("failed to close session {:?}: {}", session, e);
            }
        }
    }
}

impl<D: Driver> Drop for SessionRes<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// An owned, reusable message header.
pub(crate) struct MsgRes<D: Driver> {
    driver: Arc<D>,
    msg: Option<D::MsgHeader>,
}

impl<D: Driver> MsgRes<D> {
    /// Allocate a header for `session`.
    pub fn alloc(driver: Arc<D>, session: D::Session) -> Result<Self> {
        let msg = driver.alloc_msg(session).map_err(|e| {
            Error::AllocationFailure(format!("message header for {:?}: {}", session, e))
        })?;
        Ok(Self {
            driver,
            msg: Some(msg),
        })
    }

    #[inline]
    pub fn get_mut(&mut self) -> Result<&mut D::MsgHeader> {
        self.msg
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument("message header already freed".to_owned()))
    }

    /// Free the header if still held.
    pub fn release(&mut self) {
        if let Some(msg) = self.msg.take() {
            if let Err(e) = self.driver.free_msg(msg) {
                log::warn!("failed to free message header: {}", e);
            }
        }
    }
}

impl<D: Driver> Drop for MsgRes<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// A companion session together with its own header.
pub(crate) struct ControlLink<D: Driver> {
    pub session: SessionRes<D>,
    pub msg: MsgRes<D>,
}

impl<D: Driver> ControlLink<D> {
    /// Bind an accepted or connected companion and give it a header.
    pub fn open(driver: &Arc<D>, session: D::Session) -> Result<Self> {
        let session = SessionRes::new(driver.clone(), session);
        let sess = session.get()?;
        driver
            .set_session_reference(sess)
            .map_err(|e| Error::comm("set session reference", e))?;
        let msg = MsgRes::alloc(driver.clone(), sess)?;
        Ok(Self { session, msg })
    }
}

/// Everything associated with one primary session.
pub(crate) struct SessionRecord<D: Driver> {
    /// Device this session belongs to.
    pub dev: DeviceId,

    /// Role of the owning endpoint.
    pub role: RoleKind,

    /// Primary session.
    pub data_session: SessionRes<D>,

    /// Normal-mode send header.
    pub send_msg: Option<MsgRes<D>>,

    /// Normal-mode receive header.
    pub recv_msg: Option<MsgRes<D>>,

    /// Registered fast-path send data buffer.
    pub fast_data: Option<RegisteredBuffer>,

    /// Registered fast-path send control buffer.
    pub fast_ctrl: Option<RegisteredBuffer>,

    /// Companion carrying server-initiated rendezvous.
    pub server_to_client: Option<ControlLink<D>>,

    /// Companion carrying client-initiated rendezvous.
    pub client_to_server: Option<ControlLink<D>>,

    /// Control buffer of the latest data-only fast receive.
    pub recv_ctrl: Option<RecvBuffer>,
}

impl<D: Driver> SessionRecord<D> {
    pub fn new(dev: DeviceId, role: RoleKind, data_session: SessionRes<D>) -> Self {
        Self {
            dev,
            role,
            data_session,
            send_msg: None,
            recv_msg: None,
            fast_data: None,
            fast_ctrl: None,
            server_to_client: None,
            client_to_server: None,
            recv_ctrl: None,
        }
    }

    /// Return `true` if the fast-path resources are in place.
    pub fn has_fast_mode(&self) -> bool {
        self.fast_data.is_some()
            && self.fast_ctrl.is_some()
            && self.server_to_client.is_some()
            && self.client_to_server.is_some()
    }

    /// Companion on which this side initiates rendezvous.
    pub fn outgoing_link(&mut self) -> Option<&mut ControlLink<D>> {
        match self.role {
            RoleKind::Server => self.server_to_client.as_mut(),
            RoleKind::Client => self.client_to_server.as_mut(),
        }
    }

    /// Companion on which the peer initiates rendezvous.
    pub fn incoming_link(&mut self) -> Option<&mut ControlLink<D>> {
        match self.role {
            RoleKind::Server => self.client_to_server.as_mut(),
            RoleKind::Client => self.server_to_client.as_mut(),
        }
    }

    /// Close the companions and the primary session, keeping headers and buffers.
    pub fn close(&mut self) {
        for link in [&mut self.server_to_client, &mut self.client_to_server]
            .into_iter()
            .flatten()
        {
            link.session.release();
        }
        self.data_session.release();
    }

    /// Release everything. Safe to call repeatedly and on partial records.
    pub fn release(&mut self) {
        for msg in [&mut self.send_msg, &mut self.recv_msg]
            .into_iter()
            .flatten()
        {
            msg.release();
        }

        self.fast_data = None;
        self.fast_ctrl = None;
        self.recv_ctrl = None;

        for link in [&mut self.server_to_client, &mut self.client_to_server]
            .into_iter()
            .flatten()
        {
            link.msg.release();
        }
        for link in [&mut self.server_to_client, &mut self.client_to_server]
            .into_iter()
            .flatten()
        {
            link.session.release();
        }

        self.data_session.release();
    }
}

impl<D: Driver> Drop for SessionRecord<D> {
    fn drop(&mut self) {
        self.release();
    }
}
