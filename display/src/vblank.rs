//! Vertical-blank interrupt plumbing
//!
//! The only asynchronous activity in this core. The interrupt-side handler
//! does exactly two things: clear the pipe's pending bit and bump a counting
//! semaphore. It never touches PLL, port, or AUX state, and never takes the
//! device lock — waiters synchronize purely through the per-pipe atomic
//! counter.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::error::{DisplayError, Result};
use crate::hw::{wait_for, HostOps};
use crate::regs;
use crate::topology::PipeId;
use crate::Device;

/// Upper bound on pipes across every generation.
pub const MAX_PIPES: usize = 4;

/// Per-pipe vblank counters. A released count is consumed by exactly one
/// waiter.
pub struct VblankState {
    counters: [AtomicI32; MAX_PIPES],
}

impl VblankState {
    pub const fn new() -> Self {
        const ZERO: AtomicI32 = AtomicI32::new(0);
        Self { counters: [ZERO; MAX_PIPES] }
    }

    /// Interrupt side: signal one vblank on `pipe`.
    pub fn release(&self, pipe: PipeId) {
        if let Some(counter) = self.counters.get(pipe.0 as usize) {
            counter.fetch_add(1, Ordering::Release);
        }
    }

    /// Waiter side: consume one signaled vblank if available.
    pub fn try_acquire(&self, pipe: PipeId) -> bool {
        let Some(counter) = self.counters.get(pipe.0 as usize) else {
            return false;
        };
        loop {
            let count = counter.load(Ordering::Relaxed);
            if count <= 0 {
                return false;
            }
            if counter
                .compare_exchange_weak(count, count - 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Signals currently pending on `pipe`.
    pub fn pending(&self, pipe: PipeId) -> i32 {
        self.counters
            .get(pipe.0 as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl<H: HostOps> Device<H> {
    /// Interrupt-context entry point: acknowledge the pipe's vblank and wake
    /// one waiter. Safe to call concurrently with a mode-set holding the
    /// device lock.
    pub fn handle_vblank_interrupt(&self, pipe: PipeId) {
        self.host
            .write_register(regs::intr::status(pipe.0), regs::intr::VBLANK_PENDING);
        self.vblank.release(pipe);
    }

    /// Block until the next vblank on `pipe`, bounded by `timeout_us`.
    pub fn wait_for_vblank(&self, pipe: PipeId, timeout_us: u64) -> Result<()> {
        if pipe.0 as usize >= MAX_PIPES {
            return Err(DisplayError::InvalidConfiguration);
        }
        if wait_for(&self.host, timeout_us, || self.vblank.try_acquire(pipe)) {
            Ok(())
        } else {
            Err(DisplayError::HardwareTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Generation;
    use crate::testutil::test_device;

    #[test]
    fn test_wait_consumes_signal() {
        let dev = test_device(Generation::Gen1, 1);
        dev.handle_vblank_interrupt(PipeId(0));
        assert_eq!(dev.vblank.pending(PipeId(0)), 1);
        dev.wait_for_vblank(PipeId(0), 1_000).unwrap();
        assert_eq!(dev.vblank.pending(PipeId(0)), 0);
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let dev = test_device(Generation::Gen1, 1);
        assert_eq!(
            dev.wait_for_vblank(PipeId(0), 1_000),
            Err(DisplayError::HardwareTimeout)
        );
    }

    #[test]
    fn test_counting_semantics() {
        let dev = test_device(Generation::Gen1, 1);
        dev.handle_vblank_interrupt(PipeId(0));
        dev.handle_vblank_interrupt(PipeId(0));
        dev.wait_for_vblank(PipeId(0), 1_000).unwrap();
        dev.wait_for_vblank(PipeId(0), 1_000).unwrap();
        assert_eq!(
            dev.wait_for_vblank(PipeId(0), 1_000),
            Err(DisplayError::HardwareTimeout)
        );
    }

    #[test]
    fn test_signals_are_per_pipe() {
        let dev = test_device(Generation::Gen3, 1);
        dev.handle_vblank_interrupt(PipeId(2));
        assert_eq!(
            dev.wait_for_vblank(PipeId(0), 1_000),
            Err(DisplayError::HardwareTimeout)
        );
        dev.wait_for_vblank(PipeId(2), 1_000).unwrap();
    }

    #[test]
    fn test_handler_acknowledges_pending_bit() {
        let dev = test_device(Generation::Gen1, 1);
        dev.handle_vblank_interrupt(PipeId(1));
        let writes = dev.host.writes_to(regs::intr::status(1));
        assert_eq!(writes, alloc::vec![regs::intr::VBLANK_PENDING]);
    }

    #[test]
    fn test_out_of_range_pipe_rejected() {
        let dev = test_device(Generation::Gen1, 1);
        assert_eq!(
            dev.wait_for_vblank(PipeId(9), 100),
            Err(DisplayError::InvalidConfiguration)
        );
    }
}
