//! Managed connection (C5, §3, §4.6).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;

use crate::buffer::{DeferredWriteQueue, ReadBuffer, WritabilityChange};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::{EventKind, EventPayload, InterestEvent};
use crate::filter::{FilterFactory, Message, MessageQueue, OobEvent};
use crate::handler::Handler;
use crate::pipeline::FilterChain;
use crate::selector_thread::Inbox;
use crate::state::{CloseCause, Status};

/// Stable connection identity (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// How a connection should be initialized (§4.6 `init`).
pub enum InitKind {
    Connect(SocketAddr),
    Accept(SocketAddr),
    Register(TcpStream),
}

/// Owner-confined connection state, plus the handful of fields that are
/// touched from outside the owner thread under `ManagedConnection::state`'s
/// lock: `owner` (read during a foreign-thread submit, written during
/// handoff) and `write_queue`/`status` (read and appended to from
/// `send_outbound`).
struct ConnectionState {
    status: Status,
    owner: Option<Inbox>,
    stream: Option<TcpStream>,
    token: Option<mio::Token>,
    read_buf: ReadBuffer,
    write_queue: DeferredWriteQueue,
    filter_chain: Option<FilterChain>,
    error: Option<EngineError>,
    /// Set the first time `begin_closing` runs; distinguishes a
    /// user-initiated `CLOSING` (still draining, still acceptable to
    /// `send_outbound`) from an EOS/error `CLOSING` (send must fail fast
    /// even though `status` alone can't tell the two apart).
    close_cause: Option<CloseCause>,
    init_reply: Option<std::sync::mpsc::SyncSender<Result<()>>>,
}

/// The central entity of the engine: per-connection buffers, deferred
/// writes, selection key, owning thread, status, and the installed
/// filter chain and handler.
pub struct ManagedConnection {
    id: ConnectionId,
    state: Mutex<ConnectionState>,
    handler: Mutex<Box<dyn Handler>>,
    filter_factory: Arc<dyn FilterFactory>,
    config: Arc<EngineConfig>,
}

impl ManagedConnection {
    pub fn new(
        handler: Box<dyn Handler>,
        filter_factory: Arc<dyn FilterFactory>,
        config: Arc<EngineConfig>,
    ) -> Arc<Self> {
        Arc::new(ManagedConnection {
            id: ConnectionId::next(),
            state: Mutex::new(ConnectionState {
                status: Status::Virgin,
                owner: None,
                stream: None,
                token: None,
                read_buf: ReadBuffer::new(config.minimum_buffer_size(), config.maximum_buffer_size()),
                write_queue: DeferredWriteQueue::new(config.write_high_water_mark()),
                filter_chain: None,
                error: None,
                close_cause: None,
                init_reply: None,
            }),
            handler: Mutex::new(handler),
            filter_factory,
            config,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    /// Issues a `CONNECT`/`ACCEPT`/`REGISTER` request to the dispatch
    /// thread and blocks until the connection reaches `ACTIVE` or fails.
    /// Mirrors `init(kind, addr) -> future<self>`; this port's "future"
    /// is a blocking rendezvous on a one-shot reply channel, per Design
    /// Notes §9's "`request(kind)` block[s] on a future" wording.
    pub fn init(self: &Arc<Self>, kind: InitKind, dispatch: Inbox) -> Result<()> {
        let (reply_tx, reply_rx) = sync_channel(1);
        let (event_kind, payload) = match kind {
            InitKind::Connect(addr) => (
                EventKind::Connect,
                EventPayload::Connect { conn: self.clone(), addr },
            ),
            InitKind::Accept(addr) => (
                EventKind::Accept,
                EventPayload::Accept { conn: self.clone(), addr },
            ),
            InitKind::Register(stream) => (
                EventKind::Register,
                EventPayload::Register { conn: self.clone(), stream },
            ),
        };
        {
            let mut state = self.state.lock().unwrap();
            state.owner = Some(dispatch.clone());
            state.init_reply = Some(reply_tx);
        }
        dispatch.submit(InterestEvent::connection(event_kind, self.id, payload))?;
        reply_rx
            .recv()
            .map_err(|_| EngineError::ThreadFailure {
                detail: "dispatch thread dropped before completing init".into(),
            })?
    }

    /// Runs the outbound filter chain under the connection's lock and
    /// appends the produced bytes to the deferred-write queue (§4.6).
    /// Submits an `OP` request to enable `OP_WRITE` if the owner is an
    /// I/O thread and the queue was empty before this call.
    pub fn send_outbound(&self, message: Message) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match (state.status, state.close_cause) {
            (Status::Active, _) => {}
            // §4.6: only a user-initiated close keeps draining; EOS/error
            // closing must fail fast rather than append past the point the
            // peer (or the fault) already ended the channel.
            (Status::Closing, Some(CloseCause::User)) => {}
            _ => return Err(EngineError::Closed),
        }
        let chain = state
            .filter_chain
            .as_mut()
            .ok_or_else(|| EngineError::protocol("send_outbound before filter chain bound"))?;

        let mut input: MessageQueue = std::iter::once(message).collect();
        let mut wire = MessageQueue::new();
        chain.outbound(&mut input, &mut wire)?;

        let mut became_nonempty = false;
        let mut writability_change = WritabilityChange::None;
        for msg in wire {
            let bytes = *msg
                .downcast::<Vec<u8>>()
                .map_err(|_| EngineError::protocol("outbound chain did not terminate in bytes"))?;
            let (empty_to_nonempty, change) = state.write_queue.push(bytes);
            became_nonempty |= empty_to_nonempty;
            if change != WritabilityChange::None {
                writability_change = change;
            }
        }

        if became_nonempty {
            if let Some(owner) = state.owner.clone() {
                owner.submit(InterestEvent::connection(
                    EventKind::Op,
                    self.id,
                    EventPayload::Op { read: true, write: true },
                ))?;
            }
        }
        drop(state);
        if writability_change != WritabilityChange::None {
            self.propagate_oob(OobEvent::Writable(writability_change == WritabilityChange::BecameWritable));
        }
        Ok(())
    }

    /// Submits a `CLOSE` request. Idempotent: once the connection is past
    /// `ACTIVE`/`CONNECT`/`ACCEPT` the request is a no-op.
    pub fn close(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        if matches!(state.status, Status::Closing | Status::Closed) {
            return Ok(());
        }
        let owner = state.owner.clone();
        drop(state);
        if let Some(owner) = owner {
            owner.submit(InterestEvent::connection(EventKind::Close, self.id, EventPayload::Close))?;
        }
        Ok(())
    }

    /// Submits an `ERROR` request, unconditionally transitioning towards
    /// `CLOSING(error)` regardless of the deferred-write queue.
    pub fn error(&self, cause: EngineError) -> Result<()> {
        let state = self.state.lock().unwrap();
        if matches!(state.status, Status::Closed) {
            return Ok(());
        }
        let owner = state.owner.clone();
        drop(state);
        if let Some(owner) = owner {
            owner.submit(InterestEvent::connection(
                EventKind::Error,
                self.id,
                EventPayload::Error(cause),
            ))?;
        }
        Ok(())
    }

    fn propagate_oob(&self, event: OobEvent) {
        let mut state = self.state.lock().unwrap();
        if let Some(chain) = state.filter_chain.as_mut() {
            let _ = chain.propagate_oob(event);
        }
    }

    // ---- owner-thread-only operations below; called from DispatchThread/IoThread ----

    /// Finishes binding the connection once a socket is available:
    /// installs the filter chain, fires `on_bind`, and marks `ACTIVE`.
    /// The selection key itself is assigned later, by whichever I/O
    /// thread this connection is handed off to (§4.3's handoff runs
    /// immediately after this call, before any key is ever registered
    /// for the stream).
    pub(crate) fn do_bind(&self, stream: TcpStream) {
        let chain = FilterChain::new(vec![self.filter_factory.create()]);
        {
            let mut state = self.state.lock().unwrap();
            state.stream = Some(stream);
            state.filter_chain = Some(chain);
            state.status = Status::Active;
        }
        self.handler.lock().unwrap().on_bind();
        self.propagate_oob(OobEvent::Bind);
        self.complete_init(Ok(()));
    }

    pub(crate) fn complete_init(&self, result: Result<()>) {
        let reply = self.state.lock().unwrap().init_reply.take();
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.state.lock().unwrap().status = status;
    }

    pub(crate) fn set_owner(&self, owner: Inbox) {
        self.state.lock().unwrap().owner = Some(owner);
    }

    pub(crate) fn set_error_once(&self, error: EngineError) -> EngineError {
        let mut state = self.state.lock().unwrap();
        if state.error.is_none() {
            state.error = Some(error);
        }
        state.error.clone().unwrap()
    }

    pub(crate) fn take_stream(&self) -> Option<TcpStream> {
        self.state.lock().unwrap().stream.take()
    }

    /// Restores a stream extracted by `take_stream` once the receiving
    /// I/O thread has registered it with its own selector (§4.4).
    pub(crate) fn install_stream(&self, stream: TcpStream) {
        self.state.lock().unwrap().stream = Some(stream);
    }

    pub(crate) fn stream_token(&self) -> Option<mio::Token> {
        self.state.lock().unwrap().token
    }

    pub(crate) fn set_token(&self, token: Option<mio::Token>) {
        self.state.lock().unwrap().token = token;
    }

    pub(crate) fn with_stream<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut TcpStream) -> T,
    {
        let mut state = self.state.lock().unwrap();
        state.stream.as_mut().map(f)
    }

    pub(crate) fn read_into_buffer(&self) -> std::io::Result<(usize, bool)> {
        use std::io::Read;
        let mut state = self.state.lock().unwrap();
        let mut total = 0usize;
        // mio is edge-triggered: a readiness event must be drained by
        // looping until WouldBlock (or EOF), same as the accept loop in
        // `dispatch_thread.rs::handle_accept_ready`. Returning early on a
        // partial read leaves bytes sitting in the socket with no further
        // readable event ever coming to pick them up.
        loop {
            if state.read_buf.is_full() {
                if let Err(e) = state.read_buf.grow() {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
                }
            }
            let stream = state.stream.as_mut().expect("read without bound stream");
            match stream.read(state.read_buf.spare_capacity()) {
                Ok(0) => return Ok((total, true)),
                Ok(n) => {
                    state.read_buf.advance(n);
                    total += n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok((total, false)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs whatever is currently in the read buffer through the inbound
    /// filter chain and delivers the resulting batch to the handler, then
    /// resets the read buffer for the next frame.
    pub(crate) fn drain_inbound(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.read_buf.filled().is_empty() {
            return Ok(());
        }
        let bytes = state.read_buf.filled().to_vec();
        state.read_buf.reset();
        let chain = state
            .filter_chain
            .as_mut()
            .ok_or_else(|| EngineError::protocol("read before filter chain bound"))?;
        let mut input: MessageQueue = std::iter::once(crate::pipeline::bytes_message(bytes)).collect();
        let mut output = MessageQueue::new();
        chain.inbound(&mut input, &mut output)?;
        drop(state);
        if !output.is_empty() {
            self.handler.lock().unwrap().on_receive(output);
        }
        Ok(())
    }

    /// Writes as much of the deferred-write queue as the socket accepts
    /// right now (§4.4 write readiness), propagating an `onWritable` OOB
    /// event if the high-water mark was crossed in either direction.
    /// Returns whether the queue fully drained.
    pub(crate) fn flush_writes(&self) -> std::io::Result<bool> {
        use std::io::Write;
        let (drained, change) = {
            let mut state = self.state.lock().unwrap();
            let ConnectionState { stream, write_queue, .. } = &mut *state;
            let stream = stream.as_mut().expect("flush_writes without bound stream");
            write_queue.write_with(|chunk| stream.write(chunk))?
        };
        if change != WritabilityChange::None {
            self.propagate_oob(OobEvent::Writable(change == WritabilityChange::BecameWritable));
        }
        Ok(drained)
    }

    pub(crate) fn write_queue_is_empty(&self) -> bool {
        self.state.lock().unwrap().write_queue.is_empty()
    }

    /// Fires `on_closing`/`on_error` exactly once per terminal transition
    /// and moves the status to `CLOSING`. Subsequent calls for the same
    /// connection are absorbed (§4.5 tie-break).
    pub(crate) fn begin_closing(&self, cause: CloseCause, error: Option<EngineError>) -> bool {
        let (already_closing, pending) = {
            let mut state = self.state.lock().unwrap();
            if matches!(state.status, Status::Closing | Status::Closed) {
                (true, MessageQueue::new())
            } else {
                state.status = Status::Closing;
                state.close_cause = Some(cause);
                if let Some(err) = &error {
                    if state.error.is_none() {
                        state.error = Some(err.clone());
                    }
                }
                // §4.6: "pending" is whatever was still queued for
                // delivery at the moment the channel started closing.
                let pending = state
                    .write_queue
                    .snapshot_remaining()
                    .into_iter()
                    .map(|bytes| Box::new(bytes) as Message)
                    .collect();
                (false, pending)
            }
        };
        if already_closing {
            return false;
        }
        if let Some(err) = error {
            self.handler.lock().unwrap().on_error(err, None);
        }
        self.propagate_oob(OobEvent::Closing(cause));
        self.handler.lock().unwrap().on_closing(cause, pending);
        self.complete_init(Err(EngineError::Closed));
        true
    }

    /// Closes the channel and fires `on_close` once draining is
    /// satisfied (§4.4 write-readiness / §4.5 `drained`).
    pub(crate) fn finish_close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = Status::Closed;
            state.stream = None;
            state.token = None;
        }
        self.handler.lock().unwrap().on_close();
    }

    pub(crate) fn ready_to_finish_close(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.status == Status::Closing && state.write_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PassThroughFilterFactory;
    use std::sync::Arc;

    struct NullHandler;
    impl Handler for NullHandler {
        fn on_receive(&mut self, _batch: MessageQueue) {}
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let cfg = Arc::new(EngineConfig::builder().build().unwrap());
        let a = ManagedConnection::new(Box::new(NullHandler), Arc::new(PassThroughFilterFactory), cfg.clone());
        let b = ManagedConnection::new(Box::new(NullHandler), Arc::new(PassThroughFilterFactory), cfg);
        assert!(b.id().0 > a.id().0);
    }

    #[test]
    fn close_before_active_is_a_noop() {
        let cfg = Arc::new(EngineConfig::builder().build().unwrap());
        let conn = ManagedConnection::new(Box::new(NullHandler), Arc::new(PassThroughFilterFactory), cfg);
        assert!(conn.close().is_ok());
        assert_eq!(conn.status(), Status::Virgin);
    }
}
