//! One TCP connection driven by a reader task and a writer task.
//!
//! Outgoing frames accumulate in a send buffer until [`Connection::check_send`]
//! wakes the writer, which drains everything queued so far. The reader keeps
//! appending to the receive buffer until the unconsumed backlog passes the
//! receive-critical threshold, then waits for the application to drain it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};

use crate::backpressure::Backpressure;
use crate::error::{NetError, contract_violation};
use crate::framing::{FrameDecoder, FramedView};
use crate::msg::Msg;
use crate::pipeline::Pipeline;
use crate::reactor::BufferLease;

struct SendQueue {
    pending: BytesMut,
    /// Bytes handed to the writer and not yet confirmed written.
    in_flight: usize,
    /// Raw blobs inside `pending`, kept out of the send-critical budget.
    raw_pending: usize,
}

struct RecvQueue {
    buf: BytesMut,
    decoder: FrameDecoder,
}

struct Shared {
    closed: AtomicBool,
    backpressure: Backpressure,
    send: Mutex<SendQueue>,
    recv: Mutex<RecvQueue>,
    flush: Notify,
    drained: Notify,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn lock_send(&self) -> MutexGuard<'_, SendQueue> {
        self.send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_recv(&self) -> MutexGuard<'_, RecvQueue> {
        self.recv.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark closed, stop both tasks and drop buffered data. Returns false if already closed.
    fn shut(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.send_replace(true);
        self.flush.notify_one();
        self.drained.notify_one();
        {
            let mut q = self.lock_send();
            q.pending.clear();
            q.raw_pending = 0;
        }
        self.lock_recv().buf.clear();
        true
    }
}

/// Lower-layer socket shared between a facade handle and its I/O tasks.
pub(crate) struct Connection {
    shared: Arc<Shared>,
    pipeline: RwLock<Pipeline>,
    peer: OnceLock<SocketAddr>,
    raw_datasize: AtomicUsize,
    max_msg_len: usize,
    lease: BufferLease,
    handle: Handle,
}

impl Connection {
    pub(crate) fn new(handle: Handle, lease: BufferLease, max_msg_len: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                backpressure: Backpressure::new(),
                send: Mutex::new(SendQueue {
                    pending: BytesMut::new(),
                    in_flight: 0,
                    raw_pending: 0,
                }),
                recv: Mutex::new(RecvQueue {
                    buf: BytesMut::with_capacity(lease.size()),
                    decoder: FrameDecoder::new(max_msg_len),
                }),
                flush: Notify::new(),
                drained: Notify::new(),
                shutdown,
            }),
            pipeline: RwLock::new(Pipeline::new()),
            peer: OnceLock::new(),
            raw_datasize: AtomicUsize::new(0),
            max_msg_len,
            lease,
            handle,
        }
    }

    /// Hand a connected, already configured stream to the I/O tasks.
    pub(crate) fn attach(&self, stream: std::net::TcpStream) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let peer = stream.peer_addr()?;
        if self.peer.set(peer).is_err() {
            return Err(contract_violation("connection already attached to a stream"));
        }

        let stream = {
            let _guard = self.handle.enter();
            TcpStream::from_std(stream)?
        };
        let (reader, writer) = stream.into_split();
        self.handle.spawn(read_loop(
            Arc::clone(&self.shared),
            reader,
            self.lease.size(),
        ));
        self.handle.spawn(write_loop(Arc::clone(&self.shared), writer));
        tracing::debug!("connection to {peer} attached");
        Ok(())
    }

    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        self.peer.get().copied()
    }

    pub(crate) fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    pub(crate) fn backpressure(&self) -> &Backpressure {
        &self.shared.backpressure
    }

    /// Framed bytes queued or in flight, raw blobs excluded.
    pub(crate) fn outstanding(&self) -> usize {
        let q = self.shared.lock_send();
        q.pending.len().saturating_sub(q.raw_pending) + q.in_flight
    }

    pub(crate) fn has_pending_output(&self) -> bool {
        !self.shared.lock_send().pending.is_empty()
    }

    /// Check `incoming` more bytes against the send threshold, closing on overflow.
    pub(crate) fn reserve_send(&self, incoming: usize) -> Result<(), NetError> {
        let outstanding = self.outstanding();
        if self.shared.backpressure.send_is_limit(outstanding, incoming) {
            self.close();
            return Err(NetError::SendCritical {
                outstanding,
                incoming,
                critical: self.shared.backpressure.send_critical(),
            });
        }
        Ok(())
    }

    /// Queue a framed message, running it through the send-side pipeline.
    pub(crate) fn enqueue(&self, view: &FramedView<'_>) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let pipeline = self.pipeline.read().unwrap_or_else(PoisonError::into_inner);
        let mut q = self.shared.lock_send();
        pipeline.encode_into(view, &mut q.pending);
        Ok(())
    }

    /// Queue bytes verbatim, bypassing framing and the pipeline.
    pub(crate) fn enqueue_raw(&self, bytes: &[u8]) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let mut q = self.shared.lock_send();
        q.pending.extend_from_slice(bytes);
        q.raw_pending += bytes.len();
        Ok(())
    }

    /// Record `len` raw bytes about to be queued.
    pub(crate) fn set_raw_datasize(&self, len: usize) {
        self.raw_datasize.fetch_add(len, Ordering::Relaxed);
    }

    pub(crate) fn raw_datasize(&self) -> usize {
        self.raw_datasize.load(Ordering::Relaxed)
    }

    /// Wake the writer if anything is queued.
    pub(crate) fn check_send(&self) {
        if self.has_pending_output() {
            self.shared.flush.notify_one();
        }
    }

    /// Wake a reader paused on the receive threshold.
    pub(crate) fn check_recv(&self) {
        self.shared.drained.notify_one();
    }

    /// Pop the next complete message off the receive buffer.
    ///
    /// A malformed frame closes the connection. Nothing is delivered once
    /// the connection is closed.
    pub(crate) fn next_msg(&self) -> Result<Option<Msg>, NetError> {
        if self.is_closed() {
            return Ok(None);
        }
        let mut guard = self.shared.lock_recv();
        let q = &mut *guard;
        let decoded = match q.decoder.decode(&mut q.buf) {
            Ok(Some(frame)) => {
                let pipeline = self.pipeline.read().unwrap_or_else(PoisonError::into_inner);
                pipeline
                    .decode_frame(frame, self.max_msg_len)
                    .map(Some)
                    .map_err(NetError::from)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        drop(guard);

        match decoded {
            Ok(Some(msg)) => {
                self.shared.drained.notify_one();
                Ok(Some(msg))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn recv_backlog(&self) -> usize {
        self.shared.lock_recv().buf.len()
    }

    pub(crate) fn use_tgw(&self) {
        self.shared.lock_recv().decoder.expect_gateway_header();
    }

    pub(crate) fn with_pipeline<R>(&self, f: impl FnOnce(&mut Pipeline) -> R) -> R {
        let mut pipeline = self.pipeline.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut pipeline)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the connection. Queued output and unread input are discarded.
    pub(crate) fn close(&self) {
        if self.shared.shut() {
            tracing::debug!("connection {:?} closed", self.peer());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: OwnedReadHalf, chunk: usize) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        if *shutdown.borrow() {
            break;
        }

        // A partial head frame never pauses the reader, or it could not complete.
        let paused = {
            let q = shared.lock_recv();
            shared.backpressure.recv_is_limit(q.buf.len()) && q.decoder.frame_ready(&q.buf)
        };
        if paused {
            tokio::select! {
                _ = shared.drained.notified() => continue,
                _ = shutdown.changed() => break,
            }
        }

        let result = tokio::select! {
            result = reader.read(&mut buf) => result,
            _ = shutdown.changed() => break,
        };
        match result {
            Ok(0) => {
                tracing::debug!("peer closed the connection");
                shared.shut();
                break;
            }
            Ok(n) => {
                shared.lock_recv().buf.extend_from_slice(&buf[..n]);
                tracing::trace!("received {n} bytes");
            }
            Err(e) => {
                tracing::debug!("read failed: {e}");
                shared.shut();
                break;
            }
        }
    }
}

async fn write_loop(shared: Arc<Shared>, mut writer: OwnedWriteHalf) {
    let mut shutdown = shared.shutdown.subscribe();
    'outer: loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shared.flush.notified() => {}
            _ = shutdown.changed() => break,
        }

        loop {
            let chunk = {
                let mut q = shared.lock_send();
                if q.pending.is_empty() {
                    break;
                }
                let chunk = q.pending.split().freeze();
                q.in_flight = chunk.len().saturating_sub(q.raw_pending);
                q.raw_pending = 0;
                chunk
            };

            let result = tokio::select! {
                result = writer.write_all(&chunk) => result,
                _ = shutdown.changed() => break 'outer,
            };
            shared.lock_send().in_flight = 0;
            if let Err(e) = result {
                tracing::debug!("write failed: {e}");
                shared.shut();
                break 'outer;
            }
        }
    }
}
