//! Connection manager (C7, §4.8).
//!
//! The public entry point: owns one dispatch thread and a configurable
//! pool of I/O threads, and exposes connection creation, enumeration, and
//! shutdown.

use std::net::SocketAddr;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;

use crate::config::EngineConfig;
use crate::connection::{ConnectionId, InitKind, ManagedConnection};
use crate::dispatch_thread::DispatchThread;
use crate::error::{EngineError, Result};
use crate::event::{EventKind, EventPayload, InterestEvent};
use crate::filter::FilterFactory;
use crate::handler::Handler;
use crate::io_thread::IoThread;
use crate::proxy::ConnectionProxy;
use crate::selector_thread::{Inbox, SelectorThread};

/// Owns a dispatch thread and `n_io_threads` I/O threads (§4.8).
pub struct ConnectionManager {
    config: Arc<EngineConfig>,
    dispatch_inbox: Inbox,
    io_inboxes: Vec<Inbox>,
    dispatch_handle: Option<JoinHandle<()>>,
    io_handles: Vec<JoinHandle<()>>,
    closed: bool,
}

impl ConnectionManager {
    /// Spawns the I/O pool, then the dispatch thread, and returns once
    /// every selector is running.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let config = Arc::new(config);
        let select_timeout = Duration::from_millis(config.select_timeout_ms());

        let mut io_inboxes = Vec::with_capacity(config.n_io_threads());
        let mut io_handles = Vec::with_capacity(config.n_io_threads());
        for i in 0..config.n_io_threads() {
            let name = format!("reactor-io-{i}");
            let thread_name = name.clone();
            let (selector, inbox) = SelectorThread::new(select_timeout, move |_registry| Ok(IoThread::new(thread_name)))
                .map_err(EngineError::from)?;
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || selector.run())
                .map_err(|e| EngineError::ThreadFailure { detail: e.to_string() })?;
            io_inboxes.push(inbox);
            io_handles.push(handle);
        }

        let dispatch_name = "reactor-dispatch".to_string();
        let dispatch_config = config.clone();
        let dispatch_io_inboxes = io_inboxes.clone();
        let (selector, dispatch_inbox) = SelectorThread::new(select_timeout, move |registry| {
            Ok(DispatchThread::new(dispatch_name, registry, dispatch_config, dispatch_io_inboxes))
        })
        .map_err(EngineError::from)?;
        let dispatch_handle = thread::Builder::new()
            .name("reactor-dispatch".into())
            .spawn(move || selector.run())
            .map_err(|e| EngineError::ThreadFailure { detail: e.to_string() })?;

        info!("connection manager started with {} I/O thread(s)", config.n_io_threads());

        Ok(ConnectionManager {
            config,
            dispatch_inbox,
            io_inboxes,
            dispatch_handle: Some(dispatch_handle),
            io_handles,
            closed: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates a connection, installs `handler`/`filter_factory`, and
    /// blocks on `init(kind)` until it reaches `ACTIVE` or fails (§4.6).
    pub fn new_connection(
        &self,
        handler: Box<dyn Handler>,
        filter_factory: Arc<dyn FilterFactory>,
        kind: InitKind,
    ) -> Result<ConnectionProxy> {
        let conn = ManagedConnection::new(handler, filter_factory, self.config.clone());
        conn.init(kind, self.dispatch_inbox.clone())?;
        Ok(ConnectionProxy::from(conn))
    }

    /// §4.2 `addresses()`, surfaced through the dispatch thread.
    pub fn bound_addresses(&self) -> Result<Vec<SocketAddr>> {
        let (reply, rx) = sync_channel(1);
        self.dispatch_inbox.submit(InterestEvent::internal(
            EventKind::GetBoundAddresses,
            EventPayload::GetBoundAddresses(reply),
        ))?;
        rx.recv().map_err(|_| EngineError::ThreadFailure {
            detail: "dispatch thread dropped GET_BOUND_ADDRESSES reply".into(),
        })
    }

    /// Every connection id currently known to the dispatch thread (pending
    /// accepts/connects) or any I/O thread (active connections).
    pub fn connections(&self) -> Result<Vec<ConnectionId>> {
        let mut all = Vec::new();
        let (reply, rx) = sync_channel(1);
        self.dispatch_inbox
            .submit(InterestEvent::internal(EventKind::GetConnections, EventPayload::GetConnections(reply)))?;
        all.extend(rx.recv().unwrap_or_default());

        for inbox in &self.io_inboxes {
            let (reply, rx) = sync_channel(1);
            inbox.submit(InterestEvent::internal(EventKind::GetConnections, EventPayload::GetConnections(reply)))?;
            all.extend(rx.recv().unwrap_or_default());
        }
        Ok(all)
    }

    /// §4.8 shutdown ordering: signal the dispatch thread first (it tears
    /// down its own pending accepts/connects as part of its generic
    /// shutdown handling), then every I/O thread, then join all of them.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let cause = EngineError::protocol("connection manager shutdown");

        self.dispatch_inbox.submit(InterestEvent::shutdown(cause.clone()))?;
        if let Some(handle) = self.dispatch_handle.take() {
            let _ = handle.join();
        }

        for inbox in &self.io_inboxes {
            inbox.submit(InterestEvent::shutdown(cause.clone()))?;
        }
        for handle in self.io_handles.drain(..) {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
