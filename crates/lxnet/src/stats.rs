//! Process-wide traffic statistics: all-time totals, the current one-second
//! window, and per-counter high-water marks.
//!
//! Every completed send/receive bumps `total` and `now`. [`NetStats::tick`]
//! runs at most once per second: each `now` counter is swapped to zero and
//! folded into its `max` counter independently, stamping the wall-clock time
//! whenever the peak is matched or beaten.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Minimum spacing between two window advances.
pub const TICK_INTERVAL: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// One value per tracked quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Messages sent.
    pub send_msg_num: u64,
    /// Messages received.
    pub recv_msg_num: u64,
    /// Bytes sent.
    pub send_bytes: u64,
    /// Bytes received.
    pub recv_bytes: u64,
}

/// Live counters, bumped from any thread without locking.
#[derive(Debug, Default)]
struct Window {
    send_msg_num: AtomicU64,
    recv_msg_num: AtomicU64,
    send_bytes: AtomicU64,
    recv_bytes: AtomicU64,
}

impl Window {
    fn record_send(&self, bytes: u64) {
        self.send_msg_num.fetch_add(1, Ordering::Relaxed);
        self.send_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_recv(&self, bytes: u64) {
        self.recv_msg_num.fetch_add(1, Ordering::Relaxed);
        self.recv_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn load(&self) -> Counters {
        Counters {
            send_msg_num: self.send_msg_num.load(Ordering::Relaxed),
            recv_msg_num: self.recv_msg_num.load(Ordering::Relaxed),
            send_bytes: self.send_bytes.load(Ordering::Relaxed),
            recv_bytes: self.recv_bytes.load(Ordering::Relaxed),
        }
    }

    /// Read and zero every counter. An increment racing the swap lands in
    /// either this window or the next, never nowhere.
    fn take(&self) -> Counters {
        Counters {
            send_msg_num: self.send_msg_num.swap(0, Ordering::Relaxed),
            recv_msg_num: self.recv_msg_num.swap(0, Ordering::Relaxed),
            send_bytes: self.send_bytes.swap(0, Ordering::Relaxed),
            recv_bytes: self.recv_bytes.swap(0, Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Peaks
// ---------------------------------------------------------------------------

/// A high-water mark and when it was last reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Peak {
    /// Highest one-second value seen.
    pub value: u64,
    /// Wall-clock time of the tick that set it; `None` before the first tick.
    pub at: Option<DateTime<Local>>,
}

impl Peak {
    fn fold(&mut self, value: u64, at: DateTime<Local>) {
        if value >= self.value {
            self.value = value;
            self.at = Some(at);
        }
    }
}

/// Independent peaks for each quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeakWindow {
    /// Peak messages sent per second.
    pub send_msg_num: Peak,
    /// Peak messages received per second.
    pub recv_msg_num: Peak,
    /// Peak bytes sent per second.
    pub send_bytes: Peak,
    /// Peak bytes received per second.
    pub recv_bytes: Peak,
}

#[derive(Debug, Default)]
struct TickState {
    last_tick: Option<Instant>,
    max: PeakWindow,
}

// ---------------------------------------------------------------------------
// NetStats
// ---------------------------------------------------------------------------

/// Point-in-time copy of all three windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsReport {
    /// Since initialization.
    pub total: Counters,
    /// Since the last tick.
    pub now: Counters,
    /// Highest per-tick values.
    pub max: PeakWindow,
}

/// Global traffic counters owned by the net context.
#[derive(Debug, Default)]
pub struct NetStats {
    total: Window,
    now: Window,
    tick: Mutex<TickState>,
}

impl NetStats {
    /// Zeroed statistics; the first [`tick`](Self::tick) advances immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outgoing message of `bytes` bytes.
    pub fn on_send(&self, bytes: usize) {
        self.total.record_send(bytes as u64);
        self.now.record_send(bytes as u64);
    }

    /// Count one incoming message of `bytes` bytes.
    pub fn on_recv(&self, bytes: usize) {
        self.total.record_recv(bytes as u64);
        self.now.record_recv(bytes as u64);
    }

    /// Advance the window if a full interval has passed since the last advance.
    ///
    /// Returns whether the window advanced.
    pub fn tick(&self) -> bool {
        self.tick_at(Instant::now(), Local::now())
    }

    /// [`tick`](Self::tick) against explicit clocks.
    ///
    /// `mono` throttles the advance; `wall` stamps any peak it sets.
    pub fn tick_at(&self, mono: Instant, wall: DateTime<Local>) -> bool {
        let mut state = self.tick.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = state.last_tick
            && mono.saturating_duration_since(last) < TICK_INTERVAL
        {
            return false;
        }
        state.last_tick = Some(mono);

        let now = self.now.take();
        state.max.send_msg_num.fold(now.send_msg_num, wall);
        state.max.recv_msg_num.fold(now.recv_msg_num, wall);
        state.max.send_bytes.fold(now.send_bytes, wall);
        state.max.recv_bytes.fold(now.recv_bytes, wall);

        tracing::trace!(
            "Net window: sent={} bytes ({} msgs), recv={} bytes ({} msgs)",
            now.send_bytes,
            now.send_msg_num,
            now.recv_bytes,
            now.recv_msg_num
        );
        true
    }

    /// Copy of all three windows.
    pub fn snapshot(&self) -> StatsReport {
        let max = self
            .tick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .max;
        StatsReport {
            total: self.total.load(),
            now: self.now.load(),
            max,
        }
    }

    /// Human-readable dump of all three windows.
    pub fn report(&self) -> String {
        self.snapshot().to_string()
    }
}

fn stamp(at: Option<DateTime<Local>>) -> String {
    at.map_or_else(
        || "null".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NUM_UNIT: f64 = 1000.0 * 1000.0;
        const BYTES_UNIT: f64 = 1024.0 * 1024.0;
        let (total, now, max) = (&self.total, &self.now, &self.max);

        writeln!(
            f,
            "total: send msg num:{:.6}M, send bytes:{:.6}MB, recv msg num:{:.6}M, recv bytes:{:.6}MB",
            total.send_msg_num as f64 / NUM_UNIT,
            total.send_bytes as f64 / BYTES_UNIT,
            total.recv_msg_num as f64 / NUM_UNIT,
            total.recv_bytes as f64 / BYTES_UNIT,
        )?;
        writeln!(f, "max:")?;
        writeln!(
            f,
            "send msg num:{:.6}, time:{}",
            max.send_msg_num.value as f64,
            stamp(max.send_msg_num.at)
        )?;
        writeln!(
            f,
            "send bytes:{:.6}MB, time:{}",
            max.send_bytes.value as f64 / BYTES_UNIT,
            stamp(max.send_bytes.at)
        )?;
        writeln!(
            f,
            "recv msg num:{:.6}, time:{}",
            max.recv_msg_num.value as f64,
            stamp(max.recv_msg_num.at)
        )?;
        writeln!(
            f,
            "recv bytes:{:.6}MB, time:{}",
            max.recv_bytes.value as f64 / BYTES_UNIT,
            stamp(max.recv_bytes.at)
        )?;
        writeln!(
            f,
            "now: send msg num:{:.6}, send bytes:{:.6}MB, recv msg num:{:.6}, recv bytes:{:.6}MB",
            now.send_msg_num as f64,
            now.send_bytes as f64 / BYTES_UNIT,
            now.recv_msg_num as f64,
            now.recv_bytes as f64 / BYTES_UNIT,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn wall(secs: i64) -> DateTime<Local> {
        Local.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_totals_count_every_call() {
        let stats = NetStats::new();
        for _ in 0..5 {
            stats.on_send(10);
        }
        for _ in 0..3 {
            stats.on_recv(7);
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total.send_msg_num, 5);
        assert_eq!(snap.total.send_bytes, 50);
        assert_eq!(snap.total.recv_msg_num, 3);
        assert_eq!(snap.total.recv_bytes, 21);
        assert_eq!(snap.now, snap.total);
    }

    #[test]
    fn test_tick_resets_now_and_raises_max() {
        let stats = NetStats::new();
        let t0 = Instant::now();
        stats.on_send(100);
        stats.on_recv(40);

        assert!(stats.tick_at(t0, wall(0)));
        let snap = stats.snapshot();
        assert_eq!(snap.now, Counters::default());
        assert_eq!(snap.max.send_bytes.value, 100);
        assert_eq!(snap.max.recv_msg_num.value, 1);
        assert_eq!(snap.max.send_bytes.at, Some(wall(0)));
        assert_eq!(snap.total.send_bytes, 100, "totals survive the tick");
    }

    #[test]
    fn test_tick_is_throttled_to_one_second() {
        let stats = NetStats::new();
        let t0 = Instant::now();
        assert!(stats.tick_at(t0, wall(0)));

        stats.on_send(1);
        assert!(!stats.tick_at(t0 + Duration::from_millis(999), wall(0)));
        assert_eq!(stats.snapshot().now.send_msg_num, 1, "no reset before the interval");

        assert!(stats.tick_at(t0 + Duration::from_millis(1000), wall(1)));
        assert_eq!(stats.snapshot().now.send_msg_num, 0);
    }

    #[test]
    fn test_max_counters_peak_independently() {
        let stats = NetStats::new();
        let t0 = Instant::now();

        // Window 1: many small messages.
        for _ in 0..10 {
            stats.on_send(1);
        }
        stats.tick_at(t0, wall(0));

        // Window 2: one large message.
        stats.on_send(5000);
        stats.tick_at(t0 + TICK_INTERVAL, wall(1));

        let max = stats.snapshot().max;
        assert_eq!(max.send_msg_num.value, 10);
        assert_eq!(max.send_msg_num.at, Some(wall(0)));
        assert_eq!(max.send_bytes.value, 5000);
        assert_eq!(max.send_bytes.at, Some(wall(1)));
    }

    #[test]
    fn test_equal_peak_refreshes_timestamp() {
        let stats = NetStats::new();
        let t0 = Instant::now();
        stats.on_recv(8);
        stats.tick_at(t0, wall(0));
        stats.on_recv(8);
        stats.tick_at(t0 + TICK_INTERVAL, wall(5));

        let max = stats.snapshot().max;
        assert_eq!(max.recv_bytes.value, 8);
        assert_eq!(max.recv_bytes.at, Some(wall(5)));
    }

    #[test]
    fn test_max_is_at_least_window_before_reset() {
        let stats = NetStats::new();
        let t0 = Instant::now();
        for (i, n) in [3u64, 9, 1, 9, 4].into_iter().enumerate() {
            for _ in 0..n {
                stats.on_send(2);
            }
            let before = stats.snapshot().now;
            stats.tick_at(t0 + TICK_INTERVAL * i as u32, wall(i as i64));
            let after = stats.snapshot();
            assert!(after.max.send_msg_num.value >= before.send_msg_num);
            assert!(after.max.send_bytes.value >= before.send_bytes);
            assert_eq!(after.now, Counters::default());
        }
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(NetStats::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.on_send(3);
                    }
                })
            })
            .collect();
        let t0 = Instant::now();
        for i in 0..20 {
            stats.tick_at(t0 + TICK_INTERVAL * i, wall(i as i64));
        }
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(stats.snapshot().total.send_msg_num, 40_000);
        assert_eq!(stats.snapshot().total.send_bytes, 120_000);
    }

    #[test]
    fn test_report_layout() {
        let stats = NetStats::new();
        stats.on_send(1024 * 1024);
        stats.tick_at(Instant::now(), wall(0));

        let text = stats.report();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("total: send msg num:0.000001M, send bytes:1.000000MB"));
        assert_eq!(lines[1], "max:");
        assert!(lines[2].starts_with("send msg num:1.000000, time:"));
        assert!(lines[3].starts_with("send bytes:1.000000MB, time:"));
        assert!(lines[4].starts_with("recv msg num:0.000000, time:"));
        assert!(lines[6].starts_with("now: send msg num:0.000000"));
    }
}
