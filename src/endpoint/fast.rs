//! Fast-path rendezvous.
//!
//! The one-sided transfer primitive has no completion signal of its own, so
//! every transfer is framed by a handshake on a companion session:
//!
//! 1. the sender offers its registered buffers and the lengths;
//! 2. the receiver allocates fresh buffers and grants their addresses;
//! 3. the sender issues the one-sided transfer;
//! 4. the receiver acknowledges with [`COMPLETION_SENTINEL`].
//!
//! Both peers use the same physical companion for one direction: the server
//! initiates on server-to-client, the client on client-to-server.

use super::normal::{normal_recv, normal_send};
use super::*;
use crate::buffer::{DeviceBuffer, RecvBuffer};
use crate::descriptor::*;
use crate::error::DrvError;
use crate::util::likely::*;

/// Minimum size of a receive control buffer.
pub const RECV_CTRL_MIN_LEN: usize = 4;

/// Both buffers of a completed fast receive.
#[derive(Debug, Clone)]
pub struct FastRecv {
    pub data: RecvBuffer,
    pub ctrl: RecvBuffer,
}

impl<D: Driver> ControlLink<D> {
    fn send_bytes(&mut self, driver: &D, bytes: &[u8]) -> Result<()> {
        let session = self.session.get()?;
        normal_send(driver, session, self.msg.get_mut()?, bytes)
    }

    fn recv_bytes(&mut self, driver: &D) -> Result<&[u8]> {
        let session = self.session.get()?;
        normal_recv(driver, session, self.msg.get_mut()?)
    }

    pub fn offer(&mut self, driver: &D, offer: &BufferOffer) -> Result<()> {
        log::trace!("offering {:?}", offer);
        self.send_bytes(driver, offer.as_bytes())
    }

    pub fn await_offer(&mut self, driver: &D) -> Result<BufferOffer> {
        BufferOffer::decode(self.recv_bytes(driver)?)
    }

    pub fn grant(&mut self, driver: &D, grant: &BufferGrant) -> Result<()> {
        log::trace!("granting {:?}", grant);
        self.send_bytes(driver, grant.as_bytes())
    }

    pub fn await_grant(&mut self, driver: &D) -> Result<BufferGrant> {
        BufferGrant::decode(self.recv_bytes(driver)?)
    }

    pub fn complete(&mut self, driver: &D) -> Result<()> {
        self.send_bytes(driver, &[COMPLETION_SENTINEL])
    }

    /// Wait for the receiver's acknowledgment. Anything but the sentinel,
    /// including a failed receive, is a communication failure.
    pub fn await_completion(&mut self, driver: &D) -> Result<()> {
        let bytes = self.recv_bytes(driver).map_err(|e| match e {
            Error::CommFailure(_) => e,
            e => Error::CommFailure(format!("awaiting completion: {}", e)),
        })?;
        if unlikely(bytes != &[COMPLETION_SENTINEL][..]) {
            log::error!("unexpected completion message {:02x?}", bytes);
            return Err(Error::CommFailure(format!(
                "completion message {:02x?} is not the sentinel",
                bytes
            )));
        }
        Ok(())
    }
}

#[cold]
fn no_fast_mode(session: SessionHandle) -> Error {
    Error::InvalidArgument(format!("{:?} has no fast-path resources", session))
}

impl<D: HdcDriver> Endpoint<D> {
    /// Transfer the first `data_len` and `ctrl_len` bytes of the registered
    /// send buffers to the peer, which must be in
    /// [`fast_recv`](Self::fast_recv) or [`fast_recv_with_ctrl`](Self::fast_recv_with_ctrl).
    ///
    /// Returns once the peer has acknowledged the transfer; the registered
    /// buffers may then be refilled.
    pub fn fast_send(&self, session: SessionHandle, data_len: usize, ctrl_len: usize) -> Result<()> {
        if unlikely(data_len == 0) {
            return Err(Error::InvalidArgument(
                "fast send of zero data bytes".to_owned(),
            ));
        }

        let record = self.registry.get(session)?;
        let mut record = record.lock();
        self.fast_send_locked(session, &mut record, data_len, ctrl_len)
    }

    /// Fill the registered send buffers in place, for a following
    /// [`fast_send`](Self::fast_send) of the same lengths.
    pub fn fast_buffers<R>(
        &self,
        session: SessionHandle,
        data_len: usize,
        ctrl_len: usize,
        fill: impl FnOnce(&mut [u8], &mut [u8]) -> R,
    ) -> Result<R> {
        let record = self.registry.get(session)?;
        let mut record = record.lock();
        let record = &mut *record;

        let data = record
            .fast_data
            .as_mut()
            .ok_or_else(|| no_fast_mode(session))?;
        let ctrl = record
            .fast_ctrl
            .as_mut()
            .ok_or_else(|| no_fast_mode(session))?;
        data.check_fits(data_len)?;
        ctrl.check_fits(ctrl_len)?;
        Ok(fill(data.as_mut_slice(data_len), ctrl.as_mut_slice(ctrl_len)))
    }

    /// Copy `data` and `ctrl` into the registered send buffers and send them.
    pub fn fast_send_copy(&self, session: SessionHandle, data: &[u8], ctrl: &[u8]) -> Result<()> {
        if unlikely(data.is_empty()) {
            return Err(Error::InvalidArgument(
                "fast send of zero data bytes".to_owned(),
            ));
        }

        let record = self.registry.get(session)?;
        let mut record = record.lock();
        {
            let record = &mut *record;
            let buf = record
                .fast_data
                .as_mut()
                .ok_or_else(|| no_fast_mode(session))?;
            let ctrl_buf = record
                .fast_ctrl
                .as_mut()
                .ok_or_else(|| no_fast_mode(session))?;
            buf.check_fits(data.len())?;
            ctrl_buf.check_fits(ctrl.len())?;
            buf.as_mut_slice(data.len()).copy_from_slice(data);
            ctrl_buf.as_mut_slice(ctrl.len()).copy_from_slice(ctrl);
        }
        self.fast_send_locked(session, &mut record, data.len(), ctrl.len())
    }

    fn fast_send_locked(
        &self,
        session: SessionHandle,
        record: &mut SessionRecord<D>,
        data_len: usize,
        ctrl_len: usize,
    ) -> Result<()> {
        let (src_data, src_ctrl) = {
            let data = record.fast_data.as_ref().ok_or_else(|| no_fast_mode(session))?;
            let ctrl = record.fast_ctrl.as_ref().ok_or_else(|| no_fast_mode(session))?;
            data.check_fits(data_len)?;
            ctrl.check_fits(ctrl_len)?;
            (data.addr(), ctrl.addr())
        };
        let wire_len = |len: usize| {
            u32::try_from(len).map_err(|_| Error::OutOfRange {
                requested: len,
                capacity: u32::MAX as usize,
            })
        };
        let (wire_data_len, wire_ctrl_len) = (wire_len(data_len)?, wire_len(ctrl_len)?);

        let dev = record.dev;
        let data_session = record.data_session.get()?;
        let link = record.outgoing_link().ok_or_else(|| no_fast_mode(session))?;
        let driver = &*self.driver;

        link.offer(driver, &BufferOffer::new(src_data, src_ctrl, data_len, ctrl_len))?;
        let grant = link.await_grant(driver)?;
        if unlikely(grant.data_len() != data_len || grant.ctrl_len() != ctrl_len) {
            log::warn!(
                "dev {}: {:?} grant echoes {} + {} bytes, offered {} + {}",
                dev,
                session,
                grant.data_len(),
                grant.ctrl_len(),
                data_len,
                ctrl_len
            );
        }

        let msg = FastSendMsg {
            src_data,
            dst_data: grant.dst_data(),
            src_ctrl,
            dst_ctrl: grant.dst_ctrl(),
            data_len: wire_data_len,
            ctrl_len: wire_ctrl_len,
        };
        log::trace!("dev {}: {:?} one-sided {:?}", dev, session, msg);

        // SAFETY: the registered buffers cover the lengths checked above and
        // cannot be touched while the record is locked.
        unsafe { driver.fast_send(data_session, &msg, 0) }
            .map_err(|e| Error::comm("fast send", e))?;

        link.await_completion(driver)?;
        log::debug!(
            "dev {}: {:?} fast sent {} + {} bytes",
            dev,
            session,
            data_len,
            ctrl_len
        );
        Ok(())
    }

    /// Receive one fast-path transfer, returning both data and control
    /// buffers.
    pub fn fast_recv_with_ctrl(&self, session: SessionHandle) -> Result<FastRecv> {
        let record = self.registry.get(session)?;
        let mut record = record.lock();
        self.fast_recv_locked(session, &mut record)
    }

    /// Receive one fast-path transfer, returning the data buffer.
    ///
    /// The control buffer is kept with the session, see
    /// [`recv_ctrl_buffer`](Self::recv_ctrl_buffer).
    pub fn fast_recv(&self, session: SessionHandle) -> Result<RecvBuffer> {
        let record = self.registry.get(session)?;
        let mut record = record.lock();
        let FastRecv { data, ctrl } = self.fast_recv_locked(session, &mut record)?;
        record.recv_ctrl = Some(ctrl);
        Ok(data)
    }

    /// Control buffer of the latest [`fast_recv`](Self::fast_recv) on `session`.
    pub fn recv_ctrl_buffer(&self, session: SessionHandle) -> Result<Option<RecvBuffer>> {
        let record = self.registry.get(session)?;
        let record = record.lock();
        Ok(record.recv_ctrl.clone())
    }

    fn fast_recv_locked(
        &self,
        session: SessionHandle,
        record: &mut SessionRecord<D>,
    ) -> Result<FastRecv> {
        if unlikely(!record.has_fast_mode()) {
            return Err(no_fast_mode(session));
        }

        let dev = record.dev;
        let data_session = record.data_session.get()?;
        let link = record.incoming_link().ok_or_else(|| no_fast_mode(session))?;
        let driver = &*self.driver;

        let offer = link.await_offer(driver)?;
        log::trace!("dev {}: {:?} offered {:?}", dev, session, offer);

        let pool: Arc<dyn DeviceMemory> = self.driver.clone();
        let alloc = |kind: PoolKind, len: usize| {
            DeviceBuffer::alloc(pool.clone(), kind, len, dev).map_err(|e| {
                log::error!("dev {}: {:?} cannot accept transfer: {}", dev, session, e);
                e
            })
        };
        let data = alloc(PoolKind::RxData, offer.data_len())?;
        let ctrl = alloc(PoolKind::RxCtrl, offer.ctrl_len().max(RECV_CTRL_MIN_LEN))?;

        let grant = BufferGrant::new(data.addr(), ctrl.addr(), offer.data_len(), offer.ctrl_len());
        link.grant(driver, &grant)?;

        let done = driver.fast_recv(data_session, 0).map_err(|e| match e {
            DrvError::SocketClosed => Error::ConnectionClosed,
            e => Error::comm("fast recv", e),
        })?;
        let received = FastRecv {
            data: RecvBuffer::new(data, done.data_len as usize),
            ctrl: RecvBuffer::new(ctrl, done.ctrl_len as usize),
        };

        link.complete(driver)?;
        log::debug!(
            "dev {}: {:?} fast received {} + {} bytes",
            dev,
            session,
            received.data.len(),
            received.ctrl.len()
        );
        Ok(received)
    }
}
