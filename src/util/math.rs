/// Round `x` up to a multiple of `n`, which must be a power of two.
/// Return `None` if the result does not fit in a `usize`.
#[inline]
pub const fn roundup(x: usize, n: usize) -> Option<usize> {
    assert!(n.is_power_of_two());
    match x.checked_add(n - 1) {
        Some(v) => Some(v & !(n - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundup_overflow() {
        assert_eq!(roundup(0, 64), Some(0));
        assert_eq!(roundup(65, 64), Some(128));
        assert_eq!(roundup(usize::MAX - 8, 64), None);
    }
}
