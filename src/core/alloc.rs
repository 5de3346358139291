//! Purpose: Fallible allocation helpers for buffers owned by a dRPC call.
//! Exports: `try_string`, `try_vec`, `try_buffer`, plus test-only failpoints.
//! Role: Surface allocation failure as `ErrorKind::OutOfMemory` instead of aborting.
//! Invariants: A failed helper holds nothing; earlier allocations unwind through drop.
//! Invariants: Failpoints are thread-local so parallel tests never interfere.
use crate::core::error::Error;
#[cfg(test)]
use crate::core::error::ErrorKind;

pub(crate) fn try_string(value: &str) -> Result<String, Error> {
    check_failpoint()?;
    let mut out = String::new();
    out.try_reserve_exact(value.len())?;
    out.push_str(value);
    Ok(out)
}

pub(crate) fn try_vec<T: Copy>(items: &[T]) -> Result<Vec<T>, Error> {
    check_failpoint()?;
    let mut out = Vec::new();
    out.try_reserve_exact(items.len())?;
    out.extend_from_slice(items);
    Ok(out)
}

/// Empty byte buffer with room for exactly `len` bytes.
pub(crate) fn try_buffer(len: usize) -> Result<Vec<u8>, Error> {
    check_failpoint()?;
    let mut out = Vec::new();
    out.try_reserve_exact(len)?;
    Ok(out)
}

#[cfg(not(test))]
#[inline]
fn check_failpoint() -> Result<(), Error> {
    Ok(())
}

#[cfg(test)]
fn check_failpoint() -> Result<(), Error> {
    failpoint::hit()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_copy_contents() {
        failpoint::fail_nth(None);
        assert_eq!(try_string("abc").expect("string"), "abc");
        assert_eq!(try_vec(&[3u32, 7, 9]).expect("vec"), vec![3, 7, 9]);
        let buf = try_buffer(16).expect("buffer");
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 16);
        assert_eq!(failpoint::seen(), 3);
    }

    #[test]
    fn failpoint_fails_only_the_selected_allocation() {
        failpoint::fail_nth(Some(1));
        assert!(try_string("a").is_ok());
        let err = try_string("b").expect_err("injected");
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert!(try_string("c").is_ok());
        failpoint::fail_nth(None);
    }
}
