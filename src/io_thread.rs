//! I/O thread (C4, §4.4).
//!
//! The selector thread specialized to `OP_READ`/`OP_WRITE` readiness. Owns
//! every connection handed to it by the dispatch thread until it closes.

use std::collections::HashMap;
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{Interest, Poll, Token};

use crate::connection::{ConnectionId, ManagedConnection};
use crate::error::{EngineError, Result};
use crate::event::{EventPayload, InterestEvent};
use crate::selector_thread::{ThreadBody, FIRST_CONNECTION_TOKEN};
use crate::state::{io_state_table, CloseCause, StateTable};

pub struct IoThread {
    name: String,
    state_table: StateTable,
    connections: HashMap<Token, Arc<ManagedConnection>>,
    tokens: HashMap<ConnectionId, Token>,
    next_token: usize,
}

impl IoThread {
    pub fn new(name: impl Into<String>) -> Self {
        IoThread {
            name: name.into(),
            state_table: io_state_table(),
            connections: HashMap::new(),
            tokens: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
        }
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// §4.4 `DISPATCH`: registers the handed-off stream with `OP_READ`
    /// always enabled, `OP_WRITE` gated on the deferred-write queue not
    /// already being empty, then drains whatever was queued for delivery
    /// before the handoff completed.
    fn handle_dispatch(&mut self, poll: &mut Poll, conn: Arc<ManagedConnection>, mut stream: TcpStream) -> Result<()> {
        let token = self.alloc_token();
        let interest = if conn.write_queue_is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        poll.registry().register(&mut stream, token, interest)?;
        conn.install_stream(stream);
        conn.set_token(Some(token));
        self.connections.insert(token, conn.clone());
        self.tokens.insert(conn.id(), token);
        conn.drain_inbound()
    }

    fn handle_readable(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) -> Result<()> {
        let (_, eof) = conn.read_into_buffer()?;
        conn.drain_inbound()?;
        if eof {
            self.clear_read_interest(poll, conn)?;
            if conn.begin_closing(CloseCause::Eos, None) {
                self.maybe_finish_close(poll, conn);
            }
        }
        Ok(())
    }

    fn handle_writable(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) -> Result<()> {
        let drained = conn.flush_writes()?;
        if drained {
            self.clear_write_interest(poll, conn)?;
            if conn.ready_to_finish_close() {
                self.finish_and_remove(poll, conn);
            }
        }
        Ok(())
    }

    fn handle_close(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) {
        if conn.begin_closing(CloseCause::User, None) {
            self.maybe_finish_close(poll, conn);
        }
    }

    fn handle_error_event(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>, error: EngineError) {
        let captured = conn.set_error_once(error);
        if conn.begin_closing(CloseCause::Error, Some(captured)) {
            // §4.6 `error()`: bypasses the write-drain that a user close
            // waits for.
            self.finish_and_remove(poll, conn);
        }
    }

    fn maybe_finish_close(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) {
        if conn.ready_to_finish_close() {
            self.finish_and_remove(poll, conn);
        }
        // Otherwise the deferred queue still has bytes; `handle_writable`
        // finishes the close once it drains.
    }

    fn finish_and_remove(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) {
        let _ = self.deregister(poll, conn);
        if let Some(token) = self.tokens.remove(&conn.id()) {
            self.connections.remove(&token);
        }
        conn.finish_close();
    }

    fn deregister(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) -> Result<()> {
        match conn.with_stream(|stream| poll.registry().deregister(stream)) {
            Some(r) => r.map_err(EngineError::from),
            None => Ok(()),
        }
    }

    fn set_interest(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>, interest: Interest) -> Result<()> {
        let Some(&token) = self.tokens.get(&conn.id()) else {
            return Ok(());
        };
        match conn.with_stream(|stream| poll.registry().reregister(stream, token, interest)) {
            Some(r) => r.map_err(EngineError::from),
            None => Ok(()),
        }
    }

    fn clear_read_interest(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) -> Result<()> {
        if conn.write_queue_is_empty() {
            self.deregister(poll, conn)
        } else {
            self.set_interest(poll, conn, Interest::WRITABLE)
        }
    }

    fn clear_write_interest(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) -> Result<()> {
        self.set_interest(poll, conn, Interest::READABLE)
    }

    fn enable_write_interest(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) -> Result<()> {
        self.set_interest(poll, conn, Interest::READABLE | Interest::WRITABLE)
    }
}

impl ThreadBody for IoThread {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_table(&self) -> &StateTable {
        &self.state_table
    }

    fn handle_event(&mut self, poll: &mut Poll, conn: Option<&Arc<ManagedConnection>>, event: InterestEvent) -> Result<()> {
        match event.payload {
            EventPayload::Dispatch { conn, stream } => self.handle_dispatch(poll, conn, stream),
            EventPayload::Close => {
                if let Some(conn) = conn {
                    self.handle_close(poll, conn);
                }
                Ok(())
            }
            EventPayload::Error(e) => {
                if let Some(conn) = conn {
                    self.handle_error_event(poll, conn, e);
                }
                Ok(())
            }
            EventPayload::Op { read: _, write } => {
                if let Some(conn) = conn {
                    if write {
                        self.enable_write_interest(poll, conn)?;
                    }
                }
                Ok(())
            }
            EventPayload::Execute(f) => {
                f();
                Ok(())
            }
            EventPayload::GetConnections(reply) => {
                let ids: Vec<ConnectionId> = self.connections.values().map(|c| c.id()).collect();
                let _ = reply.send(ids);
                Ok(())
            }
            EventPayload::Connect { .. }
            | EventPayload::Accept { .. }
            | EventPayload::Register { .. }
            | EventPayload::Shutdown(_)
            | EventPayload::GetBoundAddresses(_) => Ok(()),
        }
    }

    fn handle_ready(&mut self, poll: &mut Poll, token: Token, readable: bool, writable: bool) -> Result<()> {
        let Some(conn) = self.connections.get(&token).cloned() else {
            return Ok(());
        };
        if writable {
            self.handle_writable(poll, &conn)?;
        }
        if readable {
            self.handle_readable(poll, &conn)?;
        }
        Ok(())
    }

    fn owned_connections(&self) -> Vec<Arc<ManagedConnection>> {
        self.connections.values().cloned().collect()
    }

    fn lookup(&self, token: Token) -> Option<Arc<ManagedConnection>> {
        self.connections.get(&token).cloned()
    }

    fn finish_closed(&mut self, poll: &mut Poll, conn: &Arc<ManagedConnection>) {
        self.finish_and_remove(poll, conn);
    }
}

