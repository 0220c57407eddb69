//! Unwrap helper with good error messages.
//!
//! Replaces `unwrap()` in test helpers and fixtures; `#[track_caller]`
//! points the panic at the test line rather than at the helper.

use std::fmt::Debug;

/// Unwrap a `Result`, panicking with the error on failure.
///
/// # Example
///
/// ```rust
/// use haa_ota_test_helpers::must;
///
/// let version: Result<u32, &str> = Ok(3);
/// assert_eq!(must(version), 3);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`, with a message including the error value.
#[track_caller]
pub fn must<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must: unexpected Err: {e:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_ok() {
        let result: Result<u8, &str> = Ok(7);
        assert_eq!(must(result), 7);
    }

    #[test]
    #[should_panic(expected = "must: unexpected Err: \"flash gone\"")]
    fn test_must_err() {
        let result: Result<u8, &str> = Err("flash gone");
        must(result);
    }
}
