use std::fmt;

use crate::type_alias::*;

/// Handle to an established session of an [`Endpoint`](crate::Endpoint).
///
/// Handles are generational: once the endpoint is torn down, old handles are
/// rejected even if the slot is reused by a later establishment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    /// Slot index in the registry.
    idx: SessId,

    /// Generation of the slot at insertion.
    gen: u32,
}

impl SessionHandle {
    #[inline(always)]
    pub(crate) fn new(idx: SessId, gen: u32) -> Self {
        Self { idx, gen }
    }

    /// Return the session ID, unique among live sessions of an endpoint.
    #[inline(always)]
    pub fn id(&self) -> SessId {
        self.idx
    }

    #[inline(always)]
    pub(crate) fn generation(&self) -> u32 {
        self.gen
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({}v{})", self.idx, self.gen)
    }
}
