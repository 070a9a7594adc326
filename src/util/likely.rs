#[cold]
#[inline(never)]
fn cold_path() {}

/// Branch hint: `b` is expected to be `true`.
#[inline(always)]
pub fn likely(b: bool) -> bool {
    if !b {
        cold_path();
    }
    b
}

/// Branch hint: `b` is expected to be `false`.
#[inline(always)]
pub fn unlikely(b: bool) -> bool {
    if b {
        cold_path();
    }
    b
}
