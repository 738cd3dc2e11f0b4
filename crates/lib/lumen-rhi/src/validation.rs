//! Reporting channel for API contract violations.
//!
//! Recording errors still return `Err` to the caller; this module additionally
//! makes them loud. Applications can opt in to panicking at the violation
//! site during development, otherwise violations are logged and propagated.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::RhiError;

static PANIC_ON_VIOLATION: AtomicBool = AtomicBool::new(false);

/// When enabled, [`contract_violation`] panics instead of returning the
/// error. Intended for debug runs and fuzzing.
pub fn set_panic_on_violation(enabled: bool) {
    PANIC_ON_VIOLATION.store(enabled, Ordering::Relaxed);
}

/// Report a contract violation and hand the error back for propagation.
#[track_caller]
pub fn contract_violation(err: RhiError) -> RhiError {
    if PANIC_ON_VIOLATION.load(Ordering::Relaxed) {
        panic!("RHI contract violation: {}", err);
    }
    log::error!("RHI contract violation: {}", err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_panic_only_when_opted_in() {
        let err = contract_violation(RhiError::CommandListExpired);
        assert!(matches!(err, RhiError::CommandListExpired));

        set_panic_on_violation(true);
        let caught = std::panic::catch_unwind(|| {
            let _ = contract_violation(RhiError::CommandListExpired);
        });
        set_panic_on_violation(false);
        assert!(caught.is_err());
    }
}
