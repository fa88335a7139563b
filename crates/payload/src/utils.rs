//! Small helpers shared by the parse stages.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// ```ignore
/// ensure!(length <= max_bytes, PayloadError::too_large(max_bytes));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Milliseconds since the unix epoch, `0` if the clock is set before it.
pub(crate) fn unix_millis() -> u128 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default()
}
