//! Connected socket facade.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters;
use crate::connection::Connection;
use crate::error::NetError;
use crate::framing::validate_send;
use crate::msg::Msg;
use crate::net::NetCore;
use crate::pipeline::Cipher;
use crate::pool::SlotKey;
use crate::transport;

/// How long [`Socketer::connect`] waits for the handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A pooled connection handle.
///
/// Dropping the socketer closes the connection and returns its slot to the
/// pool, so a handle can only be released once.
pub struct Socketer {
    key: SlotKey,
    conn: Arc<Connection>,
    core: Arc<NetCore>,
}

impl Socketer {
    /// Take a socket slot and a receive buffer for a new, unconnected handle.
    pub(crate) fn create(core: &Arc<NetCore>, big: bool) -> Result<Self, NetError> {
        let lease = core.reactor.lease(big)?;
        let conn = Arc::new(Connection::new(
            core.reactor.handle().clone(),
            lease,
            core.max_msg_len,
        ));
        let key = core
            .sockets
            .acquire(Arc::clone(&conn))
            .map_err(|_| NetError::PoolExhausted {
                pool: core.sockets.name(),
                capacity: core.sockets.capacity(),
            })?;
        Ok(Self {
            key,
            conn,
            core: Arc::clone(core),
        })
    }

    pub(crate) fn attach(&self, stream: std::net::TcpStream) -> Result<(), NetError> {
        self.conn.attach(stream)
    }

    /// Pool key of this handle.
    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// Connect to `ip:port`, blocking for at most [`CONNECT_TIMEOUT`].
    pub fn connect(&self, ip: &str, port: u16) -> Result<(), NetError> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| NetError::InvalidArgument(format!("not an IP address: {ip:?}")))?;
        let addr = SocketAddr::new(ip, port);
        let stream = transport::connect_socket(addr, CONNECT_TIMEOUT, &self.core.socket_options)
            .inspect_err(|e| {
                if self.core.enable_error_log() {
                    tracing::error!("connect to {addr} failed: {e}");
                }
            })?;
        self.conn.attach(stream)
    }

    /// Queue `msg`, optionally followed by `trailing`, as one framed unit.
    ///
    /// The message is counted as sent once it passes validation and the
    /// send-critical check, even if queueing then fails.
    pub fn send_msg(&self, msg: &Msg, trailing: Option<&[u8]>) -> Result<(), NetError> {
        let view = validate_send(msg, trailing, self.conn.max_msg_len())
            .inspect_err(|e| self.log_error(e))?;
        self.reserve_send(view.length())?;
        self.core.stats.on_send(view.length());
        self.conn.enqueue(&view)
    }

    /// Send the cross-domain policy document, unframed.
    pub fn send_policy_data(&self) -> Result<(), NetError> {
        let text_len = adapters::POLICY_XML.len();
        self.reserve_send(text_len)?;
        self.core.stats.on_send(text_len + 1);
        self.conn.enqueue_raw(&adapters::policy_bytes())
    }

    /// Send the gateway forwarding header for `domain:port`, unframed.
    ///
    /// The header bytes are recorded as raw data so they stay out of the
    /// send-critical budget of later messages.
    pub fn send_tgw_info(&self, domain: &str, port: u16) -> Result<(), NetError> {
        let header = adapters::tgw_header(domain, port)?;
        let len = header.len();
        self.reserve_send(len)?;
        self.conn.set_raw_datasize(len);
        self.core.stats.on_send(len);
        self.conn.enqueue_raw(header.as_bytes())
    }

    /// Next complete message, or `None` if nothing is ready.
    ///
    /// A malformed frame closes the connection and also yields `None`.
    pub fn get_msg(&self) -> Option<Msg> {
        match self.conn.next_msg() {
            Ok(Some(msg)) => {
                self.core.stats.on_recv(msg.length());
                Some(msg)
            }
            Ok(None) => None,
            Err(e) => {
                self.log_error(&e);
                None
            }
        }
    }

    /// Flush queued output.
    pub fn check_send(&self) {
        self.conn.check_send();
    }

    /// Resume reading if it was paused by the receive threshold.
    pub fn check_recv(&self) {
        self.conn.check_recv();
    }

    /// Close the connection. Calling it again does nothing.
    pub fn close(&self) {
        self.conn.close();
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Address of the remote end, once connected.
    pub fn ip(&self) -> Option<IpAddr> {
        self.conn.peer().map(|addr| addr.ip())
    }

    /// Stop reading while more than `bytes` received bytes are unconsumed (`<= 0` = unlimited).
    pub fn set_recv_critical(&self, bytes: i64) {
        self.conn.backpressure().set_recv_critical(bytes);
        self.conn.check_recv();
    }

    /// Close the connection when queued output would exceed `bytes` (`0` = unlimited).
    pub fn set_send_critical(&self, bytes: usize) {
        self.conn.backpressure().set_send_critical(bytes);
    }

    pub fn use_compress(&self) {
        self.conn.with_pipeline(|p| p.use_compress());
    }

    pub fn use_uncompress(&self) {
        self.conn.with_pipeline(|p| p.use_uncompress());
    }

    /// Install the cipher used by [`Socketer::use_encrypt`] and [`Socketer::use_decrypt`].
    pub fn set_cipher(&self, cipher: Arc<dyn Cipher>) {
        self.conn.with_pipeline(|p| p.set_cipher(cipher));
    }

    pub fn use_encrypt(&self) {
        self.conn.with_pipeline(|p| p.use_encrypt());
    }

    pub fn use_decrypt(&self) {
        self.conn.with_pipeline(|p| p.use_decrypt());
    }

    /// Skip a gateway forwarding header at the start of the incoming stream.
    pub fn use_tgw(&self) {
        self.conn.use_tgw();
    }

    /// Raw bytes sent outside message framing (gateway headers).
    pub fn raw_datasize(&self) -> usize {
        self.conn.raw_datasize()
    }

    fn reserve_send(&self, incoming: usize) -> Result<(), NetError> {
        self.conn.reserve_send(incoming).inspect_err(|e| {
            if self.core.enable_error_log() {
                tracing::warn!("closing socket {:?}: {e}", self.ip());
            }
        })
    }

    fn log_error(&self, err: &NetError) {
        if self.core.enable_error_log() {
            tracing::error!("socket {:?}: {err}", self.ip());
        }
    }
}

impl std::fmt::Debug for Socketer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socketer")
            .field("key", &self.key)
            .field("peer", &self.conn.peer())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Socketer {
    fn drop(&mut self) {
        self.conn.close();
        if let Err(e) = self.core.sockets.release(self.key) {
            tracing::error!("socketer release failed: {e}");
        }
    }
}
