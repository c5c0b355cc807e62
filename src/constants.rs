/// Number of bits in a guest page offset.
pub(crate) const PAGE_SHIFT: u32 = 12;

/// Default delay before the worker re-runs an unconverged balloon.
pub(crate) const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// Default store node holding the requested reservation in bytes.
pub(crate) const DEFAULT_TARGET_KEY: &str = "memory/target";

/// Default name of the reconciliation worker thread.
pub(crate) const DEFAULT_WORKER_NAME: &str = "balloon";

/// Size of the buffer a control write is copied into, including the terminator.
pub(crate) const MAX_CONTROL_WRITE: usize = 64;

/// Converts a page count into kilobytes.
#[allow(clippy::arithmetic_side_effects)]
pub(crate) const fn pages_to_kb(pages: u64) -> u64 {
    pages << (PAGE_SHIFT - 10)
}
