//! Fixed durations used by the state handlers.
//!
//! Retries never back off: each state re-arms with its own constant.

use core::time::Duration;

/// Radio timeout for the join frame.
pub const JOIN_RADIO_TIMEOUT: Duration = Duration::from_secs(8);
/// First retry of the join frame.
pub const JOIN_RETRY: Duration = Duration::from_secs(20);
/// Retry interval once the first join retry also went unanswered.
pub const JOIN_BACKOFF: Duration = Duration::from_mins(5);

/// Radio timeout for door and test frames.
pub const RADIO_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a transmit state waits for the bridge to report back.
pub const TX_WAIT: Duration = Duration::from_secs(20);

/// Periodic report interval while idle.
pub const IDLE_REPORT: Duration = Duration::from_mins(5);
/// Both LEDs are shown this long once the node is up.
pub const STARTUP_INDICATOR: Duration = Duration::from_secs(4);
/// Red LED hold after the closure reads high.
pub const CLOSURE_ALERT: Duration = Duration::from_secs(30);

pub const OK_SIGNAL: Duration = Duration::from_secs(10);
pub const OP_RETRY: Duration = Duration::from_secs(10);

pub const TEST_WINDOW: Duration = Duration::from_secs(30);
pub const TEST_TIMEOUT_SIGNAL: Duration = Duration::from_secs(5);
pub const TEST_RETRY_EXHAUSTED: Duration = Duration::from_secs(5);
pub const TEST_ERROR_SIGNAL: Duration = Duration::from_secs(10);
pub const TEST_TRIES_EXHAUSTED: Duration = Duration::from_secs(30);

/// Indicator duration meaning "until cancelled".
pub const UNTIL_CANCELLED: Duration = Duration::ZERO;
