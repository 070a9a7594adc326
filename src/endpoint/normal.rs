use super::*;
use crate::error::DrvError;
use crate::util::likely::*;

/// Maximum payload of a normal-mode message.
pub const NORMAL_SEND_MAX_SIZE: usize = 512_000;

/// Send `data` on `session` through a reusable header.
pub(crate) fn normal_send<D: Driver>(
    driver: &D,
    session: D::Session,
    msg: &mut D::MsgHeader,
    data: &[u8],
) -> Result<()> {
    if unlikely(data.len() > NORMAL_SEND_MAX_SIZE) {
        return Err(Error::InvalidArgument(format!(
            "message of {} bytes exceeds the {}-byte limit",
            data.len(),
            NORMAL_SEND_MAX_SIZE
        )));
    }

    driver
        .reuse_msg(msg)
        .map_err(|e| Error::comm("reuse message header", e))?;
    driver
        .add_msg_buffer(msg, data)
        .map_err(|e| Error::comm("add message buffer", e))?;
    driver.send(session, msg, 0).map_err(|e| match e {
        DrvError::SocketClosed => Error::ConnectionClosed,
        e => Error::comm("send", e),
    })?;

    log::trace!("{:?}: sent {} bytes", session, data.len());
    Ok(())
}

/// Block until a message arrives on `session`; return its payload, which
/// lives in the header until the next reuse.
pub(crate) fn normal_recv<'m, D: Driver>(
    driver: &D,
    session: D::Session,
    msg: &'m mut D::MsgHeader,
) -> Result<&'m [u8]> {
    driver
        .reuse_msg(msg)
        .map_err(|e| Error::comm("reuse message header", e))?;
    let nbufs = driver.recv(session, msg, 0).map_err(|e| {
        if e == DrvError::SocketClosed {
            log::debug!("{:?}: closed by peer", session);
        }
        Error::from_recv(e)
    })?;
    if unlikely(nbufs == 0) {
        return Err(Error::CommFailure("received message has no buffer".to_owned()));
    }

    let payload = driver
        .msg_buffer(msg, 0)
        .map_err(|e| Error::comm("message buffer", e))?;
    log::trace!("{:?}: received {} bytes", session, payload.len());
    Ok(payload)
}

impl<D: HdcDriver> Endpoint<D> {
    /// Send at most [`NORMAL_SEND_MAX_SIZE`] bytes on the primary session.
    pub fn send(&self, session: SessionHandle, data: &[u8]) -> Result<()> {
        let record = self.registry.get(session)?;
        let mut record = record.lock();
        let record = &mut *record;

        let sess = record.data_session.get()?;
        let msg = record
            .send_msg
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument(format!("{:?} has no send header", session)))?
            .get_mut()?;
        normal_send(&*self.driver, sess, msg, data)
    }

    /// Block until a message arrives on the primary session.
    pub fn recv(&self, session: SessionHandle) -> Result<Vec<u8>> {
        let record = self.registry.get(session)?;
        let mut record = record.lock();
        let record = &mut *record;

        let sess = record.data_session.get()?;
        let msg = record
            .recv_msg
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument(format!("{:?} has no receive header", session)))?
            .get_mut()?;
        normal_recv(&*self.driver, sess, msg).map(<[u8]>::to_vec)
    }
}
