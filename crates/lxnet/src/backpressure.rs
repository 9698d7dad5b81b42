//! Per-connection receive and send thresholds.
//!
//! - **Receive critical**: once unconsumed received bytes exceed it, the
//!   reader stops pulling from the socket until the application drains the
//!   backlog. Zero or negative means unlimited.
//! - **Send critical**: a send that would leave more than this many bytes
//!   queued closes the connection. Zero means unlimited.
//!
//! Both may be changed at any time; the next check sees the new value.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

/// Threshold pair for one connection.
#[derive(Debug, Default)]
pub struct Backpressure {
    recv_critical: AtomicI64,
    send_critical: AtomicUsize,
}

impl Backpressure {
    /// Unlimited in both directions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the receive threshold in bytes (`<= 0` disables it).
    pub fn set_recv_critical(&self, bytes: i64) {
        self.recv_critical.store(bytes, Ordering::Relaxed);
    }

    /// Set the send threshold in bytes (`0` disables it).
    pub fn set_send_critical(&self, bytes: usize) {
        self.send_critical.store(bytes, Ordering::Relaxed);
    }

    /// Current receive threshold.
    pub fn recv_critical(&self) -> i64 {
        self.recv_critical.load(Ordering::Relaxed)
    }

    /// Current send threshold.
    pub fn send_critical(&self) -> usize {
        self.send_critical.load(Ordering::Relaxed)
    }

    /// Whether reading should pause with `unconsumed` bytes buffered.
    pub fn recv_is_limit(&self, unconsumed: usize) -> bool {
        let critical = self.recv_critical();
        critical > 0 && unconsumed as u64 > critical as u64
    }

    /// Whether queueing `incoming` more bytes on top of `outstanding` breaks the limit.
    pub fn send_is_limit(&self, outstanding: usize, incoming: usize) -> bool {
        let critical = self.send_critical();
        critical > 0 && outstanding.saturating_add(incoming) > critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unlimited() {
        let bp = Backpressure::new();
        assert!(!bp.recv_is_limit(usize::MAX));
        assert!(!bp.send_is_limit(usize::MAX, 1));
    }

    #[test]
    fn test_send_limit_boundary() {
        let bp = Backpressure::new();
        bp.set_send_critical(100);
        assert!(!bp.send_is_limit(60, 40), "exactly at the limit is allowed");
        assert!(bp.send_is_limit(60, 41));
    }

    #[test]
    fn test_recv_limit_boundary() {
        let bp = Backpressure::new();
        bp.set_recv_critical(1024);
        assert!(!bp.recv_is_limit(1024));
        assert!(bp.recv_is_limit(1025));
    }

    #[test]
    fn test_negative_recv_critical_is_unlimited() {
        let bp = Backpressure::new();
        bp.set_recv_critical(-1);
        assert!(!bp.recv_is_limit(1 << 30));
    }

    #[test]
    fn test_threshold_change_applies_to_next_check() {
        let bp = Backpressure::new();
        bp.set_send_critical(10);
        assert!(bp.send_is_limit(0, 11));
        bp.set_send_critical(0);
        assert!(!bp.send_is_limit(0, 11));
    }
}
