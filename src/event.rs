//! Interest events (§3): the tagged values delivered to a selector
//! thread's inbox, both from external callers (through a
//! [`crate::proxy::ConnectionProxy`]) and internally between the dispatch
//! thread and an I/O thread.

use std::net::SocketAddr;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use mio::net::TcpStream;

use crate::connection::{ConnectionId, ManagedConnection};
use crate::error::EngineError;

/// The kind half of an [`InterestEvent`]. Used together with a
/// connection's [`crate::state::Status`] to look up a handler in the
/// [`crate::state::StateTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Accept,
    Register,
    Close,
    Error,
    Execute,
    Dispatch,
    Op,
    Shutdown,
    GetConnections,
    GetBoundAddresses,
}

/// Payload carried by an [`InterestEvent`]. Requests that introduce a
/// connection to a thread for the first time (`Connect`/`Accept`/
/// `Register`) or hand one off between threads (`Dispatch`) carry the
/// connection's `Arc` itself; requests against an already-owned
/// connection (`Close`/`Error`/`Op`/`Execute`) are routed by
/// [`InterestEvent::source`] instead.
pub enum EventPayload {
    Connect { conn: Arc<ManagedConnection>, addr: SocketAddr },
    Accept { conn: Arc<ManagedConnection>, addr: SocketAddr },
    Register { conn: Arc<ManagedConnection>, stream: TcpStream },
    Close,
    Error(EngineError),
    Execute(Box<dyn FnOnce() + Send>),
    /// Handoff payload produced by the dispatch thread once a connection
    /// has reached `ACTIVE`.
    Dispatch { conn: Arc<ManagedConnection>, stream: TcpStream },
    Op { read: bool, write: bool },
    Shutdown(EngineError),
    GetConnections(SyncSender<Vec<ConnectionId>>),
    GetBoundAddresses(SyncSender<Vec<SocketAddr>>),
}

impl std::fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPayload::Connect { addr, .. } => write!(f, "Connect({addr})"),
            EventPayload::Accept { addr, .. } => write!(f, "Accept({addr})"),
            EventPayload::Register { .. } => write!(f, "Register(..)"),
            EventPayload::Close => write!(f, "Close"),
            EventPayload::Error(e) => write!(f, "Error({e})"),
            EventPayload::Execute(_) => write!(f, "Execute(..)"),
            EventPayload::Dispatch { .. } => write!(f, "Dispatch(..)"),
            EventPayload::Op { read, write } => write!(f, "Op {{ read: {read}, write: {write} }}"),
            EventPayload::Shutdown(e) => write!(f, "Shutdown({e})"),
            EventPayload::GetConnections(_) => write!(f, "GetConnections(..)"),
            EventPayload::GetBoundAddresses(_) => write!(f, "GetBoundAddresses(..)"),
        }
    }
}

/// A request delivered to a selector thread's inbox.
///
/// `source` identifies the target connection for requests that act on a
/// connection the receiving thread already owns; it is absent for
/// thread-internal requests (`Shutdown`, `GetBoundAddresses`) and for the
/// very first event a connection ever receives (the payload carries the
/// `Arc` directly in that case).
#[derive(Debug)]
pub struct InterestEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub source: Option<ConnectionId>,
}

impl InterestEvent {
    pub fn connection(kind: EventKind, source: ConnectionId, payload: EventPayload) -> Self {
        InterestEvent {
            kind,
            payload,
            source: Some(source),
        }
    }

    pub fn internal(kind: EventKind, payload: EventPayload) -> Self {
        InterestEvent {
            kind,
            payload,
            source: None,
        }
    }

    pub fn shutdown(cause: EngineError) -> Self {
        InterestEvent::internal(EventKind::Shutdown, EventPayload::Shutdown(cause))
    }
}
