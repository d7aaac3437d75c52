//! Latency measurement around fallible work.

use std::time::Instant;

/// Run `operation`, log how long it took, and return its result unchanged.
///
/// The elapsed time is logged whether the operation succeeds or fails, so a
/// failure still reports how long it ran before the error propagates.
///
/// # Example
///
/// ```
/// use kinesis_pipe::timed;
///
/// let sum = timed("sum", || Ok::<_, std::io::Error>(2 + 2))?;
/// assert_eq!(sum, 4);
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn timed<T, E, F>(label: &str, operation: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
{
    let started = Instant::now();
    let result = operation();
    let elapsed = started.elapsed();

    match &result {
        Ok(_) => log::trace!("{label} took {elapsed:?}"),
        Err(_) => log::debug!("{label} failed after {elapsed:?}"),
    }

    result
}
