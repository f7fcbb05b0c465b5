//! Application-wide constants for message-relay.
//!
//! This module centralizes timing values and protocol strings so they can
//! be found in one place. Constants are grouped by domain.
//!
//! # Categories
//!
//! - **Shutdown**: close sequence timing and wording
//! - **Reconnection**: backoff bounds for the control socket
//! - **Channels**: in-process queue capacities
//! - **Gateway**: HTTP chat gateway timing

use std::time::Duration;

// ============================================================================
// Shutdown
// ============================================================================

/// Pause between the steps of the close sequence.
///
/// Separates "mark terminating" from "send close frame", and "send close
/// frame" from "close socket", so the read loop sees the terminating flag
/// before the socket error caused by the close reaches it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(10);

/// Reason string carried by the normal-closure close frame.
pub const CLOSE_REASON: &str = "Disconnected by user request";

/// How long shutdown waits for the read loop to exit before giving up on it.
pub const READ_LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Reconnection
// ============================================================================

/// First delay before re-dialing the control API after a disconnect.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the doubling reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// A connection that stays up this long counts as healthy and resets the backoff.
///
/// A `verified` frame from the control API resets it sooner.
pub const STABLE_CONNECTION_PERIOD: Duration = Duration::from_secs(30);

// ============================================================================
// Channels
// ============================================================================

/// Capacity of the broadcast channel carrying inbound chat events.
///
/// Slow subscribers past this many events see a lag notice and skip ahead.
pub const CHAT_EVENT_CAPACITY: usize = 64;

// ============================================================================
// Gateway
// ============================================================================

/// HTTP client request timeout for chat gateway calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between polls of the gateway's inbound event feed.
pub const GATEWAY_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_bounds_are_ordered() {
        assert!(RECONNECT_INITIAL_DELAY <= RECONNECT_MAX_DELAY);
    }

    #[test]
    fn test_stable_period_outlasts_initial_delay() {
        assert!(STABLE_CONNECTION_PERIOD > RECONNECT_INITIAL_DELAY);
    }

    #[test]
    fn test_grace_is_short() {
        assert!(SHUTDOWN_GRACE < Duration::from_secs(1));
    }
}
