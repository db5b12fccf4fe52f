//! Dispatch thread (C3, §4.3).
//!
//! The selector thread specialized to `OP_ACCEPT`/`OP_CONNECT` readiness.
//! Owns the [`AcceptRegistry`] exclusively (§5) and hands every connection
//! it brings to `ACTIVE` off to an I/O thread round-robin.

use std::collections::HashMap;
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Poll, Registry, Token};

use crate::accept_registry::AcceptRegistry;
use crate::config::EngineConfig;
use crate::connection::{ConnectionId, ManagedConnection};
use crate::error::{EngineError, Result};
use crate::event::{EventKind, EventPayload, InterestEvent};
use crate::selector_thread::{Inbox, ThreadBody, FIRST_CONNECTION_TOKEN};
use crate::state::{dispatch_state_table, CloseCause, StateTable, Status};
use std::sync::Arc;

/// Specializes [`crate::selector_thread::SelectorThread`] to the
/// accept/connect role.
pub struct DispatchThread {
    name: String,
    state_table: StateTable,
    registry: Registry,
    config: Arc<EngineConfig>,
    accept_registry: AcceptRegistry,
    connecting: HashMap<Token, (Arc<ManagedConnection>, TcpStream)>,
    connecting_ids: HashMap<ConnectionId, Token>,
    next_token: usize,
    io_inboxes: Vec<Inbox>,
    next_io: usize,
}

impl DispatchThread {
    pub fn new(name: impl Into<String>, registry: Registry, config: Arc<EngineConfig>, io_inboxes: Vec<Inbox>) -> Self {
        assert!(!io_inboxes.is_empty(), "dispatch thread needs at least one I/O thread to hand off to");
        DispatchThread {
            name: name.into(),
            state_table: dispatch_state_table(),
            registry,
            config,
            accept_registry: AcceptRegistry::new(),
            connecting: HashMap::new(),
            connecting_ids: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            io_inboxes,
            next_io: 0,
        }
    }

    pub fn bound_addresses(&self) -> Vec<SocketAddr> {
        self.accept_registry.addresses()
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn next_io_inbox(&mut self) -> Inbox {
        let inbox = self.io_inboxes[self.next_io].clone();
        self.next_io = (self.next_io + 1) % self.io_inboxes.len();
        inbox
    }

    /// §4.3 handoff protocol: deregister from this thread's selector (the
    /// stream was never registered for accept/register paths, only for a
    /// connect still in flight, which is deregistered in
    /// `handle_connect_ready` before this is called), pick the next I/O
    /// thread round-robin, reassign ownership, and submit `DISPATCH`.
    fn bind_and_handoff(&mut self, conn: Arc<ManagedConnection>) -> Result<()> {
        let stream = conn
            .take_stream()
            .ok_or_else(|| EngineError::protocol("handoff attempted without a bound stream"))?;
        let owner = self.next_io_inbox();
        conn.set_owner(owner.clone());
        owner.submit(InterestEvent::connection(
            EventKind::Dispatch,
            conn.id(),
            EventPayload::Dispatch { conn: conn.clone(), stream },
        ))
    }

    fn do_connect(&mut self, poll: &mut Poll, conn: Arc<ManagedConnection>, addr: SocketAddr) -> Result<()> {
        let mut stream = TcpStream::connect(addr)?;
        let token = self.alloc_token();
        poll.registry().register(&mut stream, token, Interest::WRITABLE)?;
        conn.set_status(Status::Connect);
        self.connecting_ids.insert(conn.id(), token);
        self.connecting.insert(token, (conn, stream));
        Ok(())
    }

    fn do_accept_request(&mut self, conn: Arc<ManagedConnection>, addr: SocketAddr) -> Result<()> {
        let token = self.alloc_token();
        self.accept_registry
            .register(&self.registry, conn.clone(), addr, self.config.backlog(), token)?;
        conn.set_status(Status::Accept);
        Ok(())
    }

    fn do_register(&mut self, conn: Arc<ManagedConnection>, stream: TcpStream) -> Result<()> {
        conn.do_bind(stream);
        self.bind_and_handoff(conn)
    }

    fn handle_accept_ready(&mut self, addr: SocketAddr) {
        loop {
            let accept_result = match self.accept_registry.listener(&addr) {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accept_result {
                Ok((stream, _peer)) => match self.accept_registry.accept_next(&self.registry, &addr) {
                    Some(conn) => {
                        conn.do_bind(stream);
                        let _ = self.bind_and_handoff(conn);
                    }
                    None => drop(stream),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    let err = EngineError::from(e);
                    let failed = self.accept_registry.fail_all_pending(&self.registry, &addr);
                    for conn in failed {
                        let captured = conn.set_error_once(err.clone());
                        if conn.begin_closing(CloseCause::Error, Some(captured)) {
                            conn.finish_close();
                        }
                    }
                    return;
                }
            }
        }
    }

    fn handle_connect_ready(&mut self, poll: &mut Poll, token: Token) -> Result<()> {
        let Some((conn, mut stream)) = self.connecting.remove(&token) else {
            return Ok(());
        };
        self.connecting_ids.remove(&conn.id());
        let outcome = stream.take_error();
        let _ = poll.registry().deregister(&mut stream);
        match outcome {
            // §9 open question, decided: a non-blocking connect that
            // settles with no socket error is treated as success; mio
            // never reports the "immediate success" case synchronously,
            // so every connect waits for one writable readiness.
            Ok(None) => {
                conn.do_bind(stream);
                self.bind_and_handoff(conn)
            }
            Ok(Some(e)) | Err(e) => {
                let err = EngineError::from(e);
                let captured = conn.set_error_once(err);
                if conn.begin_closing(CloseCause::Error, Some(captured)) {
                    conn.finish_close();
                }
                Ok(())
            }
        }
    }

    fn teardown_pending(&mut self, conn: &Arc<ManagedConnection>) {
        let _ = self.accept_registry.remove_pending(&self.registry, conn.id());
        if let Some(token) = self.connecting_ids.remove(&conn.id()) {
            if let Some((_, mut stream)) = self.connecting.remove(&token) {
                let _ = self.registry.deregister(&mut stream);
            }
        }
    }
}

impl ThreadBody for DispatchThread {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_table(&self) -> &StateTable {
        &self.state_table
    }

    fn handle_event(&mut self, poll: &mut Poll, conn: Option<&Arc<ManagedConnection>>, event: InterestEvent) -> Result<()> {
        match event.payload {
            EventPayload::Connect { conn, addr } => self.do_connect(poll, conn, addr),
            EventPayload::Accept { conn, addr } => self.do_accept_request(conn, addr),
            EventPayload::Register { conn, stream } => self.do_register(conn, stream),
            EventPayload::Close => {
                if let Some(conn) = conn {
                    if conn.begin_closing(CloseCause::User, None) {
                        self.finish_closed(poll, conn);
                    }
                }
                Ok(())
            }
            EventPayload::Error(e) => {
                if let Some(conn) = conn {
                    let captured = conn.set_error_once(e);
                    if conn.begin_closing(CloseCause::Error, Some(captured)) {
                        self.finish_closed(poll, conn);
                    }
                }
                Ok(())
            }
            EventPayload::Execute(f) => {
                f();
                Ok(())
            }
            EventPayload::GetBoundAddresses(reply) => {
                let _ = reply.send(self.accept_registry.addresses());
                Ok(())
            }
            EventPayload::GetConnections(reply) => {
                let mut ids: Vec<ConnectionId> = self.accept_registry.all_pending().iter().map(|c| c.id()).collect();
                ids.extend(self.connecting.values().map(|(c, _)| c.id()));
                let _ = reply.send(ids);
                Ok(())
            }
            EventPayload::Dispatch { .. } | EventPayload::Op { .. } | EventPayload::Shutdown(_) => Ok(()),
        }
    }

    fn handle_ready(&mut self, poll: &mut Poll, token: Token, _readable: bool, _writable: bool) -> Result<()> {
        if let Some(addr) = self.accept_registry.addr_for_token(token) {
            self.handle_accept_ready(addr);
            return Ok(());
        }
        if self.connecting.contains_key(&token) {
            self.handle_connect_ready(poll, token)?;
        }
        Ok(())
    }

    fn owned_connections(&self) -> Vec<Arc<ManagedConnection>> {
        let mut all = self.accept_registry.all_pending();
        all.extend(self.connecting.values().map(|(c, _)| c.clone()));
        all
    }

    fn lookup(&self, token: Token) -> Option<Arc<ManagedConnection>> {
        self.connecting.get(&token).map(|(c, _)| c.clone())
    }

    fn finish_closed(&mut self, _poll: &mut Poll, conn: &Arc<ManagedConnection>) {
        self.teardown_pending(conn);
        conn.finish_close();
    }
}
