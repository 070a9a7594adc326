use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::*;
use crate::error::{Error, Result};
use crate::util::slab::Slab;

pub(crate) type SharedRecord<D> = Arc<Mutex<SessionRecord<D>>>;

/// Per-endpoint session registry.
///
/// Records are shared with the operations driving them; each record has its
/// own lock, so different sessions proceed independently.
pub(crate) struct Registry<D: Driver> {
    slab: RwLock<Slab<SharedRecord<D>>>,
}

impl<D: Driver> Registry<D> {
    pub fn new() -> Self {
        Self {
            slab: RwLock::new(Slab::new()),
        }
    }

    /// Register an established session.
    pub fn insert(&self, record: SessionRecord<D>) -> SessionHandle {
        let (idx, gen) = self.slab.write().insert(Arc::new(Mutex::new(record)));
        SessionHandle::new(idx, gen)
    }

    /// Look up a live record.
    pub fn get(&self, handle: SessionHandle) -> Result<SharedRecord<D>> {
        self.slab
            .read()
            .get(handle.id(), handle.generation())
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown session {:?}", handle)))
    }

    /// Handles of all live records, in ID order.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.slab
            .read()
            .keys()
            .map(|(idx, gen)| SessionHandle::new(idx, gen))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slab.read().len()
    }

    /// Unregister every record and release it, in ID order.
    ///
    /// Waits for operations still holding a record's lock.
    pub fn drain_release(&self) {
        let records = self.slab.write().drain();
        for record in records {
            record.lock().release();
        }
    }
}
