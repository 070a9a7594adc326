pub(crate) mod host_alloc;
pub(crate) mod likely;
pub(crate) mod math;
pub(crate) mod slab;
