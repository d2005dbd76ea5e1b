//! Unified error handling for glinewatch.
//!
//! Engine errors are values the caller inspects; nothing in the core panics
//! on malformed protocol input. Parse errors live next to the parser in
//! [`crate::parser`], config errors next to the loader in [`crate::config`].

use thiserror::Error;

/// Errors produced by the gline store and prefix index.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The host portion of a mask or a lookup argument is neither a bare
    /// address nor a parseable CIDR network.
    #[error("invalid address or CIDR: {0}")]
    InvalidAddress(String),

    /// A gline mask without a `user@host` split cannot be keyed.
    #[error("gline mask has no host part: {0}")]
    BadMask(String),

    /// A brand-new mask arrived without an explicit active flag or reason.
    /// The parser and the reconciler have fallen out of agreement about
    /// their contract; the single event is rejected, the process lives on.
    #[error("integrity violation: new gline {mask} is missing an active flag or reason")]
    IntegrityViolation { mask: String },
}

impl EngineError {
    /// Static error code for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::BadMask(_) => "bad_mask",
            Self::IntegrityViolation { .. } => "integrity_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            EngineError::InvalidAddress("x".into()).error_code(),
            "invalid_address"
        );
        assert_eq!(EngineError::BadMask("x".into()).error_code(), "bad_mask");
        assert_eq!(
            EngineError::IntegrityViolation { mask: "*@1.2.3.4".into() }.error_code(),
            "integrity_violation"
        );
    }
}
