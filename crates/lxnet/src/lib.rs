//! Connection management and message framing for many-connection TCP servers.
//!
//! A [`Net`] context owns the I/O runtime, the handle pools, and the global
//! traffic statistics. Applications create [`Listener`]s and [`Socketer`]s
//! from it, exchange length-prefixed [`Msg`] frames, and call [`Net::run`]
//! on a regular cadence to advance the statistics window and flush output.

pub mod adapters;
pub mod backpressure;
mod connection;
pub mod error;
pub mod framing;
pub mod host;
mod listener;
pub mod msg;
mod net;
pub mod pipeline;
pub mod pool;
pub mod reactor;
mod socketer;
pub mod stats;
pub mod transport;

pub use error::NetError;
pub use framing::FramedView;
pub use host::{host_ip_by_name, host_name};
pub use listener::Listener;
pub use msg::{DEFAULT_MAX_MSG_LEN, HEADER_SIZE, Msg, MsgReader};
pub use net::{LISTENER_POOL_NAME, Net, NetInit, SOCKET_POOL_NAME};
pub use pipeline::{Cipher, Passthrough};
pub use pool::{HandlePool, PoolInfo, SlotKey};
pub use socketer::{CONNECT_TIMEOUT, Socketer};
pub use stats::{Counters, NetStats, Peak, PeakWindow, StatsReport};
