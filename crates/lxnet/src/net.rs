//! The net context: runtime, handle pools, and statistics in one owner.

use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::Connection;
use crate::error::NetError;
use crate::listener::{Listener, ListenerState};
use crate::msg::{DEFAULT_MAX_MSG_LEN, HEADER_SIZE};
use crate::pool::HandlePool;
use crate::reactor::{Reactor, ReactorConfig};
use crate::socketer::Socketer;
use crate::stats::NetStats;
use crate::transport::SocketOptions;

/// Name of the connection handle pool in reports.
pub const SOCKET_POOL_NAME: &str = "Socketer obj pool";

/// Name of the listener handle pool in reports.
pub const LISTENER_POOL_NAME: &str = "Listen obj pool";

/// Sizing for [`Net::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInit {
    /// Receive buffer size for sockets created with `big = true`.
    pub bigbuf_size: usize,
    /// Number of big receive buffers.
    pub bigbuf_count: usize,
    /// Receive buffer size for other sockets.
    pub smallbuf_size: usize,
    /// Number of small receive buffers.
    pub smallbuf_count: usize,
    /// Listener handle slots.
    pub listener_capacity: usize,
    /// Connection handle slots.
    pub socket_capacity: usize,
    /// I/O worker threads; `<= 0` means one per logical CPU.
    pub thread_count: i32,
    /// Exclusive upper bound on a message, header included.
    pub max_msg_len: usize,
    /// Let pools and buffer classes grow past their configured sizes.
    pub grow_pools: bool,
}

impl Default for NetInit {
    fn default() -> Self {
        Self {
            bigbuf_size: 16 * 1024,
            bigbuf_count: 64,
            smallbuf_size: 4 * 1024,
            smallbuf_count: 1024,
            listener_capacity: 8,
            socket_capacity: 1024,
            thread_count: 0,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            grow_pools: false,
        }
    }
}

impl NetInit {
    /// Sizing in the argument order of the classic `net_init` call.
    pub fn new(
        bigbuf_size: usize,
        bigbuf_count: usize,
        smallbuf_size: usize,
        smallbuf_count: usize,
        listener_capacity: usize,
        socket_capacity: usize,
        thread_count: i32,
    ) -> Self {
        Self {
            bigbuf_size,
            bigbuf_count,
            smallbuf_size,
            smallbuf_count,
            listener_capacity,
            socket_capacity,
            thread_count,
            ..Self::default()
        }
    }
}

/// State shared by the context and every handle it created.
pub(crate) struct NetCore {
    pub(crate) reactor: Reactor,
    pub(crate) sockets: HandlePool<Arc<Connection>>,
    pub(crate) listeners: HandlePool<Arc<ListenerState>>,
    pub(crate) stats: NetStats,
    pub(crate) socket_options: SocketOptions,
    pub(crate) max_msg_len: usize,
    error_log: AtomicBool,
}

impl NetCore {
    pub(crate) fn enable_error_log(&self) -> bool {
        self.error_log.load(Ordering::Relaxed)
    }
}

/// An initialized networking context.
///
/// Handles created from it keep the runtime alive; dropping the context
/// (or calling [`Net::release`]) stops the runtime once the last handle is
/// gone.
pub struct Net {
    core: Arc<NetCore>,
}

impl Net {
    /// Start the runtime and allocate the handle pools.
    pub fn init(init: NetInit) -> Result<Self, NetError> {
        if init.max_msg_len <= HEADER_SIZE + 1 {
            return Err(NetError::InvalidArgument(format!(
                "max_msg_len {} leaves no room for a payload",
                init.max_msg_len
            )));
        }
        if u32::try_from(init.max_msg_len).is_err() {
            return Err(NetError::InvalidArgument(format!(
                "max_msg_len {} does not fit the 4-byte length header",
                init.max_msg_len
            )));
        }
        let reactor = Reactor::new(&ReactorConfig {
            bigbuf_size: init.bigbuf_size,
            bigbuf_count: init.bigbuf_count,
            smallbuf_size: init.smallbuf_size,
            smallbuf_count: init.smallbuf_count,
            thread_count: init.thread_count,
            grow: init.grow_pools,
        })?;

        let core = NetCore {
            sockets: HandlePool::new(SOCKET_POOL_NAME, init.socket_capacity, init.grow_pools),
            listeners: HandlePool::new(
                LISTENER_POOL_NAME,
                init.listener_capacity,
                init.grow_pools,
            ),
            stats: NetStats::new(),
            socket_options: SocketOptions::default(),
            max_msg_len: init.max_msg_len,
            error_log: AtomicBool::new(true),
            reactor,
        };
        tracing::info!(
            "Net initialized: {} sockets, {} listeners, {} I/O threads",
            init.socket_capacity,
            init.listener_capacity,
            core.reactor.threads()
        );
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Advance the statistics window and flush every socket with queued output.
    ///
    /// Call this on a regular cadence.
    pub fn run(&self) {
        self.core.stats.tick();
        for conn in self.core.sockets.live() {
            conn.check_send();
        }
    }

    /// Tear the context down. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }

    /// Usage of both handle pools followed by the receive-buffer classes.
    pub fn memory_info(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", self.core.sockets.info());
        let _ = write!(out, "{}", self.core.listeners.info());
        for info in self.core.reactor.buffer_info() {
            let _ = writeln!(out, "{info}");
        }
        out
    }

    /// Statistics dump in the classic `net_datainfo` layout.
    pub fn data_info(&self) -> String {
        self.core.stats.report()
    }

    pub fn stats(&self) -> &NetStats {
        &self.core.stats
    }

    /// Toggle error logging for connection-level failures; returns the previous setting.
    pub fn set_enable_error_log(&self, enable: bool) -> bool {
        self.core.error_log.swap(enable, Ordering::Relaxed)
    }

    pub fn enable_error_log(&self) -> bool {
        self.core.enable_error_log()
    }

    /// Take a listener slot.
    pub fn listener_create(&self) -> Result<Listener, NetError> {
        let state = Arc::new(ListenerState::default());
        let key = self
            .core
            .listeners
            .acquire(Arc::clone(&state))
            .map_err(|_| NetError::PoolExhausted {
                pool: self.core.listeners.name(),
                capacity: self.core.listeners.capacity(),
            })?;
        Ok(Listener::new(key, state, Arc::clone(&self.core)))
    }

    /// Take a socket slot. `big` selects the large receive-buffer class.
    pub fn socketer_create(&self, big: bool) -> Result<Socketer, NetError> {
        Socketer::create(&self.core, big)
    }

    /// Close a listener and return its slot.
    pub fn listener_release(&self, listener: Listener) {
        drop(listener);
    }

    /// Close a socketer and return its slot.
    pub fn socketer_release(&self, socketer: Socketer) {
        drop(socketer);
    }
}

impl std::fmt::Debug for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Net")
            .field("reactor", &self.core.reactor)
            .field("sockets", &self.core.sockets.info())
            .field("listeners", &self.core.listeners.info())
            .finish_non_exhaustive()
    }
}

impl Drop for Net {
    fn drop(&mut self) {
        tracing::debug!("Net released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Msg;

    fn small() -> NetInit {
        NetInit::new(4096, 4, 1024, 8, 8, 64, 2)
    }

    #[test]
    fn test_init_with_classic_sizing() {
        let net = Net::init(small()).unwrap();
        let info = net.memory_info();
        let lines: Vec<&str> = info.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Socketer obj pool: capacity 64"));
        assert!(lines[1].starts_with("Listen obj pool: capacity 8"));
        assert!(lines[2].starts_with("big buf (4096 bytes)"));
        assert!(lines[3].starts_with("small buf (1024 bytes)"));
    }

    #[test]
    fn test_init_rejects_tiny_max_msg_len() {
        let result = Net::init(NetInit {
            max_msg_len: HEADER_SIZE,
            ..small()
        });
        assert!(matches!(result, Err(NetError::InvalidArgument(_))));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_init_rejects_max_msg_len_past_header_range() {
        let result = Net::init(NetInit {
            max_msg_len: u32::MAX as usize + 1,
            ..small()
        });
        assert!(matches!(result, Err(NetError::InvalidArgument(_))));
    }

    #[test]
    fn test_error_log_toggle_returns_previous() {
        let net = Net::init(small()).unwrap();
        assert!(net.enable_error_log());
        assert!(net.set_enable_error_log(false));
        assert!(!net.enable_error_log());
        assert!(!net.set_enable_error_log(true));
    }

    #[test]
    fn test_run_ticks_statistics() {
        let net = Net::init(small()).unwrap();
        net.stats().on_send(10);
        net.run();
        let report = net.stats().snapshot();
        assert_eq!(report.now.send_msg_num, 0);
        assert_eq!(report.max.send_msg_num.value, 1);
        assert_eq!(report.total.send_bytes, 10);
    }

    #[test]
    fn test_growing_pools() {
        let net = Net::init(NetInit {
            socket_capacity: 1,
            smallbuf_count: 1,
            grow_pools: true,
            ..small()
        })
        .unwrap();
        let a = net.socketer_create(false).unwrap();
        let b = net.socketer_create(false).unwrap();
        assert_ne!(a.key(), b.key());
        assert!(net.memory_info().contains("grown 1"));
    }

    #[test]
    fn test_handles_outlive_context() {
        let net = Net::init(small()).unwrap();
        let socketer = net.socketer_create(false).unwrap();
        net.release();
        assert!(!socketer.is_closed());
        assert!(socketer.send_msg(&Msg::from_payload(b"x"), None).is_ok());
    }
}
