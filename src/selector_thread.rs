//! Selector thread base (C1, §4.1).
//!
//! [`DispatchThread`](crate::dispatch_thread::DispatchThread) and
//! [`IoThread`](crate::io_thread::IoThread) both embed a [`SelectorThread`]
//! and supply the state table and per-key readiness handler that make them
//! a concrete specialization.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use mio::{Events, Poll, Token, Waker};

use crate::connection::ManagedConnection;
use crate::error::{EngineError, Result};
use crate::event::{EventKind, EventPayload, InterestEvent};
use crate::state::{CloseCause, StateTable, Status};

/// The token reserved for the thread's [`Waker`]. Connection tokens are
/// allocated starting from [`FIRST_CONNECTION_TOKEN`].
pub const WAKE_TOKEN: Token = Token(0);
pub const FIRST_CONNECTION_TOKEN: usize = 1;

/// A clonable handle onto a selector thread's inbox: the channel side of
/// `submit(event)` (§4.1), paired with the [`Waker`] that interrupts the
/// thread's `Poll::poll` so a submitted event is observed promptly rather
/// than waiting out `select_timeout_ms`.
#[derive(Clone)]
pub struct Inbox {
    tx: Sender<InterestEvent>,
    waker: Arc<Waker>,
}

impl Inbox {
    pub fn new(tx: Sender<InterestEvent>, waker: Arc<Waker>) -> Self {
        Inbox { tx, waker }
    }

    /// Enqueues `event` and wakes the owning thread's selector.
    pub fn submit(&self, event: InterestEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| EngineError::ThreadFailure {
                detail: "selector thread inbox closed".into(),
            })?;
        self.waker.wake().map_err(EngineError::from)
    }
}

/// Implemented by the two concrete specializations of [`SelectorThread`],
/// supplying everything that differs between a dispatch thread and an I/O
/// thread: its state table, what to do with an already-dispatched `(status,
/// event)` pair, what to do with a ready key, and how to react to shutdown.
pub trait ThreadBody: Send {
    /// Name used in log lines (`"dispatch"`, `"io-2"`, ...).
    fn name(&self) -> &str;

    fn state_table(&self) -> &StateTable;

    /// Handles one already-validated `(status, event)` pair. `conn` is
    /// `None` for thread-internal events (`Shutdown`).
    fn handle_event(&mut self, poll: &mut Poll, conn: Option<&Arc<ManagedConnection>>, event: InterestEvent) -> Result<()>;

    /// Handles readiness reported by the selector for `token`.
    fn handle_ready(&mut self, poll: &mut Poll, token: Token, readable: bool, writable: bool) -> Result<()>;

    /// Every connection currently owned by this thread, for shutdown
    /// draining and `GET_CONNECTIONS`.
    fn owned_connections(&self) -> Vec<Arc<ManagedConnection>>;

    fn lookup(&self, token: Token) -> Option<Arc<ManagedConnection>>;

    /// Releases whatever this body tracks for `conn` (selector
    /// registration, token/map bookkeeping, accept-registry/connecting
    /// entries) and calls `conn.finish_close()`. Called once
    /// `begin_closing` has made the `CLOSING` transition, so every path
    /// that closes a connection — not just a clean user close — reaches
    /// `CLOSED` and fires `on_close` (§4.5).
    fn finish_closed(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>);
}

/// The C1 run loop: drain inbox, block on the selector, dispatch ready
/// keys, repeat, per §4.1.
pub struct SelectorThread<B: ThreadBody> {
    body: B,
    poll: Poll,
    events: Events,
    rx: Receiver<InterestEvent>,
    waker: Arc<Waker>,
    select_timeout: Duration,
    shutting_down: bool,
}

impl<B: ThreadBody> SelectorThread<B> {
    /// `build_body` receives a [`mio::Registry`] cloned from the freshly
    /// created `Poll`, for bodies (like the dispatch thread) that need to
    /// register sources outside the `poll`/`handle_*` call sites.
    pub fn new<F>(select_timeout: Duration, build_body: F) -> std::io::Result<(Self, Inbox)>
    where
        F: FnOnce(mio::Registry) -> std::io::Result<B>,
    {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (tx, rx) = channel();
        let inbox = Inbox::new(tx, waker.clone());
        let body = build_body(poll.registry().try_clone()?)?;
        Ok((
            SelectorThread {
                body,
                poll,
                events: Events::with_capacity(1024),
                rx,
                waker,
                select_timeout,
                shutting_down: false,
            },
            inbox,
        ))
    }

    pub fn poll_mut(&mut self) -> &mut Poll {
        &mut self.poll
    }

    pub fn body_mut(&mut self) -> &mut B {
        &mut self.body
    }

    /// Runs until told to shut down. Step 4 of §4.1: per-event and
    /// per-key faults are caught here and routed to `handleError`
    /// rather than unwinding the loop.
    pub fn run(mut self) {
        trace!("{}: selector thread starting", self.body.name());
        while !self.shutting_down {
            self.drain_inbox();
            if self.shutting_down {
                break;
            }
            if let Err(e) = self.poll.poll(&mut self.events, Some(self.select_timeout)) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                warn!("{}: selector failed: {e}", self.body.name());
                self.fail_thread(EngineError::from(e));
                break;
            }
            self.dispatch_ready();
        }
        trace!("{}: selector thread exiting", self.body.name());
    }

    fn drain_inbox(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if matches!(event.kind, EventKind::Shutdown) {
                self.shutdown(event);
                continue;
            }
            let conn = self.resolve_connection(&event);
            if let Err(e) = self.dispatch_event(conn.as_ref(), event) {
                warn!("{}: event handling failed: {e}", self.body.name());
            }
        }
    }

    fn resolve_connection(&self, event: &InterestEvent) -> Option<Arc<ManagedConnection>> {
        match &event.payload {
            EventPayload::Connect { conn, .. }
            | EventPayload::Accept { conn, .. }
            | EventPayload::Register { conn, .. }
            | EventPayload::Dispatch { conn, .. } => Some(conn.clone()),
            _ => event.source.and_then(|id| {
                self.body
                    .owned_connections()
                    .into_iter()
                    .find(|c| c.id() == id)
            }),
        }
    }

    fn dispatch_event(&mut self, conn: Option<&Arc<ManagedConnection>>, event: InterestEvent) -> Result<()> {
        let status = conn.map(|c| c.status()).unwrap_or(Status::Virgin);
        if !self.body.state_table().allows(status, event.kind) {
            let err = EngineError::protocol(format!(
                "no transition for ({status:?}, {:?}) on {}",
                event.kind,
                self.body.name()
            ));
            if let Some(c) = conn {
                self.handle_error(c, err);
            } else {
                warn!("{}: {err}", self.body.name());
            }
            return Ok(());
        }
        let SelectorThread { poll, body, .. } = self;
        body.handle_event(poll, conn, event)
    }

    fn dispatch_ready(&mut self) {
        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .filter(|e| e.token() != WAKE_TOKEN)
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();
        for (token, readable, writable) in ready {
            let conn = self.body.lookup(token);
            let result = self.body.handle_ready(&mut self.poll, token, readable, writable);
            if let Err(e) = result {
                match conn {
                    Some(c) => self.handle_error(&c, e),
                    None => warn!("{}: ready-key handling failed: {e}", self.body.name()),
                }
            }
        }
    }

    /// §4.1 step 4's `handleError`: captures the fault in the connection's
    /// error slot, begins an error close, and — on the transition that
    /// actually took effect — runs it through to `CLOSED` the same way
    /// `io_thread.rs`'s own error path does, rather than leaving the
    /// connection stuck in `CLOSING` with no `on_close`.
    fn handle_error(&mut self, conn: &Arc<ManagedConnection>, error: EngineError) {
        let captured = conn.set_error_once(error);
        if conn.begin_closing(CloseCause::Error, Some(captured)) {
            self.body.finish_closed(&mut self.poll, conn);
        }
    }

    fn fail_thread(&mut self, cause: EngineError) {
        for conn in self.body.owned_connections() {
            self.handle_error(&conn, cause.clone());
        }
    }

    fn shutdown(&mut self, event: InterestEvent) {
        let cause = match event.payload {
            EventPayload::Shutdown(cause) => cause,
            _ => EngineError::protocol("shutdown event missing cause"),
        };
        debug!("{}: shutting down ({cause})", self.body.name());
        for conn in self.body.owned_connections() {
            self.handle_error(&conn, cause.clone());
        }
        self.shutting_down = true;
    }
}
