//! Raw socket creation and the fixed option set applied before use.
//!
//! Connected sockets are non-blocking, have Nagle disabled, close abortively
//! (`SO_LINGER` on with a zero timeout, so a close sends RST and frees the
//! port at once), and keep TCP keepalive on. Listening sockets are
//! non-blocking and reuse their address on platforms where that is safe.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};

/// Options applied to every socket.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Reset instead of lingering on close. Default: true.
    pub abortive_close: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive: bool,
    /// Enable `SO_REUSEADDR` on listening sockets. Default: true on Linux/macOS, false on Windows.
    pub reuse_addr: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            abortive_close: true,
            keepalive: true,
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Create a TCP stream socket for the address family of `addr`.
pub fn create_socket(addr: &SocketAddr) -> io::Result<Socket> {
    Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))
}

/// Close a socket. With the abortive linger option this sends RST.
pub fn close_socket(socket: Socket) {
    drop(socket);
}

/// Apply the connected-socket option set.
pub fn configure_for_connect(socket: SockRef<'_>, options: &SocketOptions) -> io::Result<()> {
    socket.set_nonblocking(true)?;
    socket.set_nodelay(options.tcp_nodelay)?;
    if options.abortive_close {
        socket.set_linger(Some(Duration::ZERO))?;
    }
    socket.set_keepalive(options.keepalive)?;
    Ok(())
}

/// Apply the listening-socket option set.
pub fn configure_for_listen(socket: SockRef<'_>, options: &SocketOptions) -> io::Result<()> {
    if options.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)
}

/// Connect to `addr` within `timeout`, returning a configured non-blocking stream.
pub fn connect_socket(
    addr: SocketAddr,
    timeout: Duration,
    options: &SocketOptions,
) -> io::Result<TcpStream> {
    let socket = create_socket(&addr)?;
    if let Err(e) = socket.connect_timeout(&addr.into(), timeout) {
        close_socket(socket);
        return Err(e);
    }
    configure_for_connect(SockRef::from(&socket), options)?;
    Ok(socket.into())
}

/// Bind `0.0.0.0:port` and listen with the given backlog.
pub fn listen_socket(port: u16, backlog: i32, options: &SocketOptions) -> io::Result<TcpListener> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    let socket = create_socket(&addr)?;
    configure_for_listen(SockRef::from(&socket), options)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.max(1))?;
    Ok(socket.into())
}
