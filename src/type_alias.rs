//! Type aliases used in this library.

/// [`i32`]: Device identifier, as understood by the driver.
pub type DeviceId = i32;

/// [`u32`]: Index of a session record within an endpoint.
pub type SessId = u32;

/// [`u64`]: Device-visible buffer address, fixed-width regardless of the host pointer size.
pub type DevAddr = u64;

/// [`u32`]: Driver send/recv flags. `0` means blocking.
pub type DrvFlags = u32;
