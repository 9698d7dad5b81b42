//! The I/O runtime behind every connection.
//!
//! A [`Reactor`] owns a tokio multi-thread runtime and the accounting for the
//! two receive-buffer classes. Connections hold a [`BufferLease`] for their
//! lifetime; the lease sizes the reader's chunk and returns its slot when
//! dropped.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::NetError;

/// Name of the large receive-buffer class.
pub const BIG_BUF_CLASS: &str = "big buf";

/// Name of the small receive-buffer class.
pub const SMALL_BUF_CLASS: &str = "small buf";

/// One class of receive buffers: a fixed size and a budget of instances.
#[derive(Debug)]
pub struct BufferClass {
    name: &'static str,
    size: usize,
    count: usize,
    grow: bool,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl BufferClass {
    fn new(name: &'static str, size: usize, count: usize, grow: bool) -> Self {
        Self {
            name,
            size,
            count,
            grow,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn lease(self: &Arc<Self>) -> Result<BufferLease, NetError> {
        let taken = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (self.grow || n < self.count).then_some(n + 1)
            });
        match taken {
            Ok(prev) => {
                self.peak.fetch_max(prev + 1, Ordering::Relaxed);
                Ok(BufferLease {
                    class: Arc::clone(self),
                })
            }
            Err(_) => Err(NetError::PoolExhausted {
                pool: self.name,
                capacity: self.count,
            }),
        }
    }

    /// Usage snapshot.
    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            name: self.name,
            size: self.size,
            count: self.count,
            in_use: self.in_use.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
        }
    }
}

/// A claim on one buffer of a [`BufferClass`].
#[derive(Debug)]
pub struct BufferLease {
    class: Arc<BufferClass>,
}

impl BufferLease {
    /// Size of the leased buffer in bytes.
    pub fn size(&self) -> usize {
        self.class.size
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.class.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Usage figures for one buffer class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    /// Class name used in reports.
    pub name: &'static str,
    /// Buffer size in bytes.
    pub size: usize,
    /// Configured number of buffers.
    pub count: usize,
    /// Buffers currently leased.
    pub in_use: usize,
    /// Highest simultaneous lease count seen.
    pub peak: usize,
}

impl fmt::Display for BufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes): in use {}/{}, peak {}",
            self.name, self.size, self.in_use, self.count, self.peak
        )
    }
}

/// Sizing for [`Reactor::new`].
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Size of a big receive buffer.
    pub bigbuf_size: usize,
    /// Number of big receive buffers.
    pub bigbuf_count: usize,
    /// Size of a small receive buffer.
    pub smallbuf_size: usize,
    /// Number of small receive buffers.
    pub smallbuf_count: usize,
    /// Worker threads; `<= 0` means one per logical CPU.
    pub thread_count: i32,
    /// Allow buffer classes to exceed their configured count.
    pub grow: bool,
}

/// Owner of the I/O runtime and the buffer classes.
pub struct Reactor {
    runtime: Option<Runtime>,
    handle: Handle,
    big: Arc<BufferClass>,
    small: Arc<BufferClass>,
    threads: usize,
}

impl Reactor {
    /// Start the runtime and set up the buffer classes.
    pub fn new(config: &ReactorConfig) -> Result<Self, NetError> {
        if config.bigbuf_size == 0 || config.smallbuf_size == 0 {
            return Err(NetError::InvalidArgument(
                "receive buffer sizes must be non-zero".to_string(),
            ));
        }
        let threads = if config.thread_count <= 0 {
            num_cpus::get()
        } else {
            config.thread_count as usize
        };

        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("lxnet-io")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        tracing::debug!("I/O runtime started with {threads} worker threads");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            big: Arc::new(BufferClass::new(
                BIG_BUF_CLASS,
                config.bigbuf_size,
                config.bigbuf_count,
                config.grow,
            )),
            small: Arc::new(BufferClass::new(
                SMALL_BUF_CLASS,
                config.smallbuf_size,
                config.smallbuf_count,
                config.grow,
            )),
            threads,
        })
    }

    /// Handle for spawning onto the runtime.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Lease a receive buffer of the requested class.
    pub fn lease(&self, big: bool) -> Result<BufferLease, NetError> {
        if big {
            self.big.lease()
        } else {
            self.small.lease()
        }
    }

    /// Usage of both buffer classes, big first.
    pub fn buffer_info(&self) -> [BufferInfo; 2] {
        [self.big.info(), self.small.info()]
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("threads", &self.threads)
            .field("big", &self.big)
            .field("small", &self.small)
            .finish_non_exhaustive()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tracing::debug!("I/O runtime stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(grow: bool) -> ReactorConfig {
        ReactorConfig {
            bigbuf_size: 4096,
            bigbuf_count: 2,
            smallbuf_size: 512,
            smallbuf_count: 1,
            thread_count: 1,
            grow,
        }
    }

    #[test]
    fn test_lease_budget_enforced() {
        let reactor = Reactor::new(&config(false)).unwrap();
        let a = reactor.lease(true).unwrap();
        let _b = reactor.lease(true).unwrap();
        assert!(matches!(
            reactor.lease(true),
            Err(NetError::PoolExhausted { pool: BIG_BUF_CLASS, capacity: 2 })
        ));

        drop(a);
        assert!(reactor.lease(true).is_ok());
    }

    #[test]
    fn test_lease_size_matches_class() {
        let reactor = Reactor::new(&config(false)).unwrap();
        assert_eq!(reactor.lease(true).unwrap().size(), 4096);
        assert_eq!(reactor.lease(false).unwrap().size(), 512);
    }

    #[test]
    fn test_growth_allows_overcommit() {
        let reactor = Reactor::new(&config(true)).unwrap();
        let leases: Vec<_> = (0..3).map(|_| reactor.lease(false).unwrap()).collect();
        let [_, small] = reactor.buffer_info();
        assert_eq!(small.in_use, 3);
        assert_eq!(small.peak, 3);
        drop(leases);
        assert_eq!(reactor.buffer_info()[1].in_use, 0);
    }

    #[test]
    fn test_zero_thread_count_uses_all_cpus() {
        let reactor = Reactor::new(&ReactorConfig {
            thread_count: 0,
            ..config(false)
        })
        .unwrap();
        assert_eq!(reactor.threads(), num_cpus::get());
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let result = Reactor::new(&ReactorConfig {
            smallbuf_size: 0,
            ..config(false)
        });
        assert!(matches!(result, Err(NetError::InvalidArgument(_))));
    }

    #[test]
    fn test_runtime_executes_tasks() {
        let reactor = Reactor::new(&config(false)).unwrap();
        let answer = reactor.handle().block_on(async { 6 * 7 });
        assert_eq!(answer, 42);
    }

    #[test]
    fn test_buffer_info_display() {
        let reactor = Reactor::new(&config(false)).unwrap();
        let _lease = reactor.lease(true).unwrap();
        assert_eq!(
            reactor.buffer_info()[0].to_string(),
            "big buf (4096 bytes): in use 1/2, peak 1"
        );
    }
}
