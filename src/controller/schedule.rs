//! Renewal scheduling
//!
//! Mappings are renewed three quarters of the way through the lease the
//! gateway granted, minus however long the reconcile that obtained it took.

use std::time::Duration;

/// Time after a grant at which the mapping should be renewed
///
/// Whole seconds, truncated: `renew_in(3600)` is 2700s, `renew_in(1)` is 0.
pub fn renew_in(lifetime: u32) -> Duration {
    Duration::from_secs(u64::from(lifetime) * 3 / 4)
}

/// Delay before the next reconcile, never negative
pub fn renew_after(lifetime: u32, elapsed: Duration) -> Duration {
    renew_in(lifetime).saturating_sub(elapsed)
}
