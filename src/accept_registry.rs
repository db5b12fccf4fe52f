//! Accept registry (C2, §4.2).
//!
//! Coalesces multiple pending accepts onto one shared listening socket per
//! address. Owned exclusively by the dispatch thread (§5); nothing here is
//! `Sync`-shared across threads.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpListener;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Socket, Type};

use crate::connection::{ConnectionId, ManagedConnection};
use crate::error::{EngineError, Result};

struct Entry {
    listener: TcpListener,
    token: Token,
    pending: VecDeque<Arc<ManagedConnection>>,
}

/// Maps listening addresses to shared listening sockets and their ordered
/// pending-accept sets.
#[derive(Default)]
pub struct AcceptRegistry {
    entries: HashMap<SocketAddr, Entry>,
    conn_addr: HashMap<ConnectionId, SocketAddr>,
}

impl AcceptRegistry {
    pub fn new() -> Self {
        AcceptRegistry {
            entries: HashMap::new(),
            conn_addr: HashMap::new(),
        }
    }

    /// §4.2 `register`: binds a new listening socket for `addr` if one
    /// does not already exist, then appends `conn` to its pending set.
    /// Wildcard ports (`addr.port() == 0`) are rejected outright.
    pub fn register(
        &mut self,
        registry: &Registry,
        conn: Arc<ManagedConnection>,
        addr: SocketAddr,
        backlog: u32,
        next_token: Token,
    ) -> Result<()> {
        if addr.port() == 0 {
            return Err(EngineError::InvalidAddress {
                reason: format!("wildcard port not permitted: {addr}"),
            });
        }
        if !self.entries.contains_key(&addr) {
            let mut listener = bind_listener(addr, backlog)?;
            registry.register(&mut listener, next_token, Interest::READABLE)?;
            self.entries.insert(
                addr,
                Entry {
                    listener,
                    token: next_token,
                    pending: VecDeque::new(),
                },
            );
        }
        let entry = self.entries.get_mut(&addr).expect("entry just inserted");
        self.conn_addr.insert(conn.id(), addr);
        entry.pending.push_back(conn);
        Ok(())
    }

    /// §4.2 `removePending`: detaches `conn` from whichever entry it is
    /// queued on. If the entry's pending set becomes empty, the listening
    /// socket is deregistered, cancelled, and dropped.
    pub fn remove_pending(&mut self, registry: &Registry, conn_id: ConnectionId) -> Result<()> {
        let Some(addr) = self.conn_addr.remove(&conn_id) else {
            return Ok(());
        };
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.pending.retain(|c| c.id() != conn_id);
            if entry.pending.is_empty() {
                let mut entry = self.entries.remove(&addr).unwrap();
                registry.deregister(&mut entry.listener)?;
            }
        }
        Ok(())
    }

    /// §4.2 `addresses`: snapshot of bound addresses.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.entries.keys().copied().collect()
    }

    pub fn token_for(&self, addr: &SocketAddr) -> Option<Token> {
        self.entries.get(addr).map(|e| e.token)
    }

    pub fn addr_for_token(&self, token: Token) -> Option<SocketAddr> {
        self.entries
            .iter()
            .find(|(_, e)| e.token == token)
            .map(|(addr, _)| *addr)
    }

    pub fn listener(&self, addr: &SocketAddr) -> Option<&TcpListener> {
        self.entries.get(addr).map(|e| &e.listener)
    }

    /// Every connection currently waiting on an accept, across every
    /// entry; used for `GET_CONNECTIONS` and shutdown draining.
    pub fn all_pending(&self) -> Vec<Arc<ManagedConnection>> {
        self.entries.values().flat_map(|e| e.pending.iter().cloned()).collect()
    }

    /// Pops the head of `addr`'s pending set for a successful `accept()`
    /// (§4.3), applying the same "entry empties -> torn down" rule as
    /// `remove_pending`.
    pub fn accept_next(&mut self, registry: &Registry, addr: &SocketAddr) -> Option<Arc<ManagedConnection>> {
        let conn = self.entries.get_mut(addr)?.pending.pop_front()?;
        self.conn_addr.remove(&conn.id());
        let now_empty = self.entries.get(addr).map(|e| e.pending.is_empty()).unwrap_or(false);
        if now_empty {
            if let Some(mut entry) = self.entries.remove(addr) {
                let _ = registry.deregister(&mut entry.listener);
            }
        }
        Some(conn)
    }

    /// §4.3: "If `accept()` fails, remove all pending connections for
    /// that entry and error each." Returns the connections so the caller
    /// can invoke `error()` on them; tears the entry down afterwards.
    pub fn fail_all_pending(&mut self, registry: &Registry, addr: &SocketAddr) -> Vec<Arc<ManagedConnection>> {
        let Some(mut entry) = self.entries.remove(addr) else {
            return Vec::new();
        };
        let _ = registry.deregister(&mut entry.listener);
        let drained: Vec<_> = entry.pending.drain(..).collect();
        for conn in &drained {
            self.conn_addr.remove(&conn.id());
        }
        drained
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::filter::{MessageQueue, PassThroughFilterFactory};
    use crate::handler::Handler;
    use mio::Poll;

    struct NullHandler;
    impl Handler for NullHandler {
        fn on_receive(&mut self, _batch: MessageQueue) {}
    }

    fn make_conn() -> Arc<ManagedConnection> {
        let cfg = Arc::new(EngineConfig::builder().build().unwrap());
        ManagedConnection::new(Box::new(NullHandler), Arc::new(PassThroughFilterFactory), cfg)
    }

    #[test]
    fn rejects_wildcard_port() {
        let poll = Poll::new().unwrap();
        let mut reg = AcceptRegistry::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let err = reg
            .register(poll.registry(), make_conn(), addr, 16, Token(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAddress { .. }));
    }

    #[test]
    fn coalesces_two_connections_on_one_address() {
        let poll = Poll::new().unwrap();
        let mut reg = AcceptRegistry::new();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        reg.register(poll.registry(), make_conn(), addr, 16, Token(1)).unwrap();
        reg.register(poll.registry(), make_conn(), addr, 16, Token(2)).unwrap();
        assert_eq!(reg.addresses().len(), 1);

        reg.accept_next(poll.registry(), &addr).unwrap();
        assert_eq!(reg.addresses().len(), 1, "second pending connection still holds the address");

        reg.accept_next(poll.registry(), &addr).unwrap();
        assert!(reg.addresses().is_empty());
    }
}
