//! Host interface and polling primitives
//!
//! The display core never touches hardware directly: the host driver supplies
//! register access, wired-state probing, and time through [`HostOps`]. All
//! hardware readiness (PLL lock, channel busy, panel power) is awaited by
//! blocking polls built on [`wait_for`]; there are no completion callbacks.
//!
//! [`retry_bounded`] is the single retry loop for every protocol-level
//! recovery site (Defer backoff, submission-busy spacing). Call sites only
//! classify outcomes.

use crate::error::{DisplayError, Result};
use crate::topology::{PipeId, PortId};

/// Collaborator interface supplied by the host driver.
///
/// `read_register`/`write_register` access the display MMIO window.
/// `pipe_preference` reports a pipe assignment already wired up by firmware
/// for a port, if any. Time is a monotonic microsecond tick; `sleep_us` may
/// yield cooperatively but must not return early.
pub trait HostOps {
    fn read_register(&self, addr: u32) -> u32;
    fn write_register(&self, addr: u32, value: u32);
    fn pipe_preference(&self, port: PortId) -> Option<PipeId>;
    fn sleep_us(&self, us: u64);
    fn ticks_us(&self) -> u64;
}

/// Polling granularity for readiness waits.
pub const POLL_STEP_US: u64 = 50;

/// Spin `cond` with a bounded wait. Returns true if the condition asserted
/// within `timeout_us`, false otherwise. The condition is always sampled at
/// least once, so a zero timeout degenerates to a single check.
pub fn wait_for<H: HostOps>(host: &H, timeout_us: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = host.ticks_us().saturating_add(timeout_us);
    loop {
        if cond() {
            return true;
        }
        if host.ticks_us() >= deadline {
            return false;
        }
        host.sleep_us(POLL_STEP_US);
    }
}

/// One attempt's outcome, as classified by the call site.
pub enum Attempt<T> {
    /// Finished; stop retrying.
    Done(T),
    /// Transient condition (Defer, channel busy); back off and go again.
    Again,
    /// Hard failure; surface immediately without consuming the budget.
    Fail(DisplayError),
}

/// Run `op` up to `attempts` times total, sleeping `backoff_us` between
/// attempts. Exhausting the budget surfaces `exhausted`.
pub fn retry_bounded<H: HostOps, T>(
    host: &H,
    attempts: u32,
    backoff_us: u64,
    exhausted: DisplayError,
    mut op: impl FnMut() -> Attempt<T>,
) -> Result<T> {
    for n in 0..attempts {
        match op() {
            Attempt::Done(v) => return Ok(v),
            Attempt::Fail(e) => return Err(e),
            Attempt::Again => {
                if n + 1 < attempts {
                    host.sleep_us(backoff_us);
                }
            }
        }
    }
    Err(exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockHost;

    #[test]
    fn test_wait_for_immediate_condition() {
        let host = MockHost::new();
        assert!(wait_for(&host, 0, || true));
    }

    #[test]
    fn test_wait_for_deadline_expires() {
        let host = MockHost::new();
        let before = host.ticks_us();
        assert!(!wait_for(&host, 500, || false));
        // The virtual clock advanced by at least the budget.
        assert!(host.ticks_us() - before >= 500);
    }

    #[test]
    fn test_wait_for_eventual_condition() {
        let host = MockHost::new();
        let deadline = host.ticks_us() + 200;
        assert!(wait_for(&host, 10_000, || host.ticks_us() >= deadline));
    }

    #[test]
    fn test_retry_exhaustion_count_and_error() {
        let host = MockHost::new();
        let mut calls = 0u32;
        let r: Result<()> = retry_bounded(&host, 7, 400, DisplayError::Timeout, || {
            calls += 1;
            Attempt::Again
        });
        assert_eq!(r, Err(DisplayError::Timeout));
        assert_eq!(calls, 7);
    }

    #[test]
    fn test_retry_succeeds_midway() {
        let host = MockHost::new();
        let mut calls = 0u32;
        let r = retry_bounded(&host, 7, 400, DisplayError::Timeout, || {
            calls += 1;
            if calls == 2 { Attempt::Done(calls) } else { Attempt::Again }
        });
        assert_eq!(r, Ok(2));
    }

    #[test]
    fn test_retry_hard_failure_short_circuits() {
        let host = MockHost::new();
        let mut calls = 0u32;
        let r: Result<()> = retry_bounded(&host, 7, 400, DisplayError::Timeout, || {
            calls += 1;
            Attempt::Fail(DisplayError::TransactionRejected)
        });
        assert_eq!(r, Err(DisplayError::TransactionRejected));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_backoff_spacing() {
        let host = MockHost::new();
        let before = host.ticks_us();
        let _: Result<()> =
            retry_bounded(&host, 3, 1_000, DisplayError::Busy, || Attempt::Again);
        // Two inter-attempt gaps for three attempts.
        assert_eq!(host.ticks_us() - before, 2_000);
    }
}
