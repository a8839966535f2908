//! Typed errors for the core. The core never panics on malformed input and
//! never retries; every failure is a concrete, returned value.

use thiserror::Error;

/// Failure modes of [`crate::usl::fit_usl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FitError {
    /// Fewer than 3 usable samples were supplied.
    #[error("insufficient samples for USL fit: got {got}, need at least 3")]
    InsufficientSamples { got: usize },
}
