//! Listening endpoint facade.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};

use crate::error::{NetError, contract_violation};
use crate::net::NetCore;
use crate::pool::SlotKey;
use crate::socketer::Socketer;
use crate::transport::{self, SocketOptions};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Connections accepted by the background task and not yet claimed by [`Listener::accept`].
struct Acceptor {
    ready: Mutex<VecDeque<std::net::TcpStream>>,
    room: Notify,
    backlog: usize,
    shutdown: watch::Sender<bool>,
    local_addr: SocketAddr,
}

impl Acceptor {
    fn lock(&self) -> MutexGuard<'_, VecDeque<std::net::TcpStream>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<std::net::TcpStream> {
        let stream = self.lock().pop_front();
        if stream.is_some() {
            self.room.notify_one();
        }
        stream
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
        self.room.notify_one();
        self.lock().clear();
    }
}

async fn accept_loop(acceptor: Arc<Acceptor>, listener: TcpListener, options: SocketOptions) {
    let mut shutdown = acceptor.shutdown.subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }
        if acceptor.lock().len() >= acceptor.backlog {
            tokio::select! {
                _ = acceptor.room.notified() => continue,
                _ = shutdown.changed() => break,
            }
        }

        let result = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.changed() => break,
        };
        match result {
            Ok((stream, peer)) => {
                let configured =
                    match transport::configure_for_connect(SockRef::from(&stream), &options) {
                        Ok(()) => stream.into_std(),
                        Err(e) => Err(e),
                    };
                match configured {
                    Ok(stream) => {
                        tracing::debug!("accepted connection from {peer}");
                        acceptor.lock().push_back(stream);
                    }
                    Err(e) => tracing::warn!("dropping connection from {peer}: {e}"),
                }
            }
            Err(e) => {
                tracing::warn!("accept on {} failed: {e}", acceptor.local_addr);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
    tracing::debug!("stopped listening on {}", acceptor.local_addr);
}

/// State stored in the listener pool slot.
#[derive(Default)]
pub(crate) struct ListenerState {
    acceptor: Mutex<Option<Arc<Acceptor>>>,
    closed: AtomicBool,
}

impl ListenerState {
    fn acceptor(&self) -> Option<Arc<Acceptor>> {
        self.acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let acceptor = self
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(acceptor) = acceptor {
            acceptor.stop();
        }
    }
}

/// A pooled listening endpoint.
///
/// Dropping the listener closes it and returns its slot to the pool.
pub struct Listener {
    key: SlotKey,
    state: Arc<ListenerState>,
    core: Arc<NetCore>,
}

impl Listener {
    pub(crate) fn new(key: SlotKey, state: Arc<ListenerState>, core: Arc<NetCore>) -> Self {
        Self { key, state, core }
    }

    /// Pool key of this handle.
    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// Bind `0.0.0.0:port` and start accepting in the background.
    ///
    /// At most `backlog` accepted connections wait for [`Listener::accept`];
    /// beyond that the kernel backlog absorbs new arrivals.
    pub fn listen(&self, port: u16, backlog: i32) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let mut slot = self
            .state
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(contract_violation("listener is already listening"));
        }

        let std_listener = transport::listen_socket(port, backlog, &self.core.socket_options)?;
        let local_addr = std_listener.local_addr()?;
        let handle = self.core.reactor.handle();
        let listener = {
            let _guard = handle.enter();
            TcpListener::from_std(std_listener)?
        };

        let (shutdown, _) = watch::channel(false);
        let acceptor = Arc::new(Acceptor {
            ready: Mutex::new(VecDeque::new()),
            room: Notify::new(),
            backlog: backlog.max(1) as usize,
            shutdown,
            local_addr,
        });
        handle.spawn(accept_loop(
            Arc::clone(&acceptor),
            listener,
            self.core.socket_options.clone(),
        ));
        *slot = Some(acceptor);
        tracing::debug!("listening on {local_addr}");
        Ok(())
    }

    /// Whether an accepted connection is waiting.
    pub fn can_accept(&self) -> bool {
        self.state
            .acceptor()
            .is_some_and(|acceptor| !acceptor.lock().is_empty())
    }

    /// Claim the next accepted connection, if any.
    ///
    /// `big` selects the large receive-buffer class for the new socket. When
    /// no socket slot or buffer is free the pending connection is dropped and
    /// the error returned.
    pub fn accept(&self, big: bool) -> Result<Option<Socketer>, NetError> {
        if self.is_closed() {
            return Ok(None);
        }
        let Some(stream) = self.state.acceptor().and_then(|acceptor| acceptor.pop()) else {
            return Ok(None);
        };
        let socketer = Socketer::create(&self.core, big)?;
        socketer.attach(stream)?;
        Ok(Some(socketer))
    }

    /// Address the listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.acceptor().map(|acceptor| acceptor.local_addr)
    }

    /// Stop listening. Connections not yet accepted are dropped.
    pub fn close(&self) {
        self.state.close();
    }

    /// Whether [`Listener::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("key", &self.key)
            .field("local_addr", &self.local_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.state.close();
        if let Err(e) = self.core.listeners.release(self.key) {
            tracing::error!("listener release failed: {e}");
        }
    }
}
