//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "StreamClient";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path of the real-time endpoint relative to the server address.
pub const CONNECT_PATH: &str = "connect";

/// Event type of the server health-check message.
pub const HEALTH_CHECK_EVENT_TYPE: &str = "health.check";

/// Default connect (handshake) timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// How long a requested close may wait for the peer's close frame.
pub const CLOSE_HANDSHAKE_TIMEOUT_MS: u64 = 2_000;

/// How long the socket manager waits for an engine to confirm a close.
pub const CLOSE_CONFIRM_TIMEOUT_MS: u64 = 5_000;

/// Interval between heartbeat pings in seconds.
pub const PING_INTERVAL_SECS: u64 = 25;

/// Time allowed for a pong to arrive after a ping, in seconds.
pub const PONG_TIMEOUT_SECS: u64 = 3;

/// Consecutive missed pong deadlines before the connection is dropped.
pub const MAX_MISSED_PONGS: u32 = 2;

/// Window during which incoming events are coalesced into one batch.
pub const EVENT_BATCH_PERIOD_MS: u64 = 500;

/// First reconnection delay in milliseconds.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound for reconnection delays in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 25_000;

/// Fraction of each reconnection delay that may be shaved off as jitter.
pub const RECONNECT_JITTER: f64 = 0.3;

/// How long to wait for the socket to close after the server sent an error.
pub const SERVER_CLOSE_GRACE_MS: u64 = 10_000;

/// WebSocket close code for a normal, requested closure.
pub const NORMAL_CLOSURE_CODE: u16 = 1000;

/// Server error codes signalling an invalid or expired token.
pub const INVALID_TOKEN_ERROR_CODES: std::ops::RangeInclusive<i64> = 40..=43;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_codes() {
        assert!(INVALID_TOKEN_ERROR_CODES.contains(&40));
        assert!(INVALID_TOKEN_ERROR_CODES.contains(&43));
        assert!(!INVALID_TOKEN_ERROR_CODES.contains(&4));
    }

    #[test]
    fn test_heartbeat_fits_in_interval() {
        assert!(PONG_TIMEOUT_SECS < PING_INTERVAL_SECS);
    }

    #[test]
    fn test_transport_gives_up_on_close_before_manager() {
        assert!(CLOSE_HANDSHAKE_TIMEOUT_MS < CLOSE_CONFIRM_TIMEOUT_MS);
    }
}
