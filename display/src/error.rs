//! Display engine error type
//!
//! One unified error enum for the whole display core. Protocol-level faults
//! (Defer, channel busy) are recovered internally up to fixed bounds and only
//! surface here once those bounds are exhausted; configuration errors surface
//! immediately and are never retried.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    /// Caller error: bad generation/signal-type combination, zero clock,
    /// out-of-range index, or an operation on a port in the wrong state.
    InvalidConfiguration,
    /// Divider search exhausted every center/divider combination without a
    /// candidate inside the tolerance window.
    NoSolutionFound,
    /// A hardware readiness bit (PLL lock, panel power) did not assert
    /// within its polling budget.
    HardwareTimeout,
    /// Channel stayed busy across all submission attempts.
    Busy,
    /// The sink kept answering Defer until the retry bound ran out, or the
    /// channel itself timed out.
    Timeout,
    /// The sink answered Nack. Never retried.
    TransactionRejected,
    /// Receive-error flag set by the channel hardware, or a malformed reply.
    Io,
    /// No unbound pipe was left for this port.
    ResourceExhausted,
    /// Operation requires a port that is bound to a pipe.
    NotBound,
}

impl DisplayError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "Invalid configuration",
            Self::NoSolutionFound => "No divider solution found",
            Self::HardwareTimeout => "Hardware readiness timeout",
            Self::Busy => "Channel busy",
            Self::Timeout => "Transaction timeout",
            Self::TransactionRejected => "Transaction rejected by sink",
            Self::Io => "Channel I/O error",
            Self::ResourceExhausted => "No free pipe",
            Self::NotBound => "Port not bound to a pipe",
        }
    }

    /// Whether a whole-operation retry by the caller can plausibly succeed.
    /// Configuration and search errors are deterministic and will fail the
    /// same way again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::HardwareTimeout | Self::Busy | Self::Timeout | Self::Io
        )
    }
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type Result<T> = core::result::Result<T, DisplayError>;
