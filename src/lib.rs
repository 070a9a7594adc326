//! Host-device channel transport.
//!
//! An [`Endpoint`] establishes sessions with a peer on the other side of a
//! host-device channel and moves data over them in one of two ways:
//!
//! - **normal messaging** ([`Endpoint::send`], [`Endpoint::recv`]): copies
//!   up to [`NORMAL_SEND_MAX_SIZE`] bytes through a reusable message header;
//! - **fast path** ([`Endpoint::fast_send`], [`Endpoint::fast_recv`]): a
//!   zero-copy one-sided transfer framed by an offer/grant/acknowledge
//!   handshake on two companion sessions.
//!
//! The device driver lives behind the traits in [`transport`];
//! [`transport::loopback`] provides an in-process implementation.

mod buffer;
mod config;
mod descriptor;
mod endpoint;
mod error;
mod session;
pub mod transport;
pub mod type_alias;
mod util;

#[cfg(test)]
mod tests;

pub use self::buffer::RecvBuffer;
pub use self::config::{EndpointConfig, RetryConfig};
pub use self::descriptor::{BufferDescriptor, COMPLETION_SENTINEL};
pub use self::endpoint::{
    Endpoint, EstablishState, FastBufferCaps, FastRecv, RetryPolicy, RoleKind,
    DEFAULT_CLIENT_SESSION_MULTIPLIER, DEFAULT_CONNECT_RETRY_INTERVAL, DEFAULT_FAST_CTRL_BUF_CAP,
    DEFAULT_FAST_DATA_BUF_CAP, NORMAL_SEND_MAX_SIZE, RECV_CTRL_MIN_LEN,
};
pub use self::error::{DrvError, DrvResult, Error, Result};
pub use self::session::SessionHandle;
