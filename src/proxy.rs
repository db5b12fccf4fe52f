//! Connection proxy (§3, §4.6, §9).
//!
//! A [`ConnectionProxy`] is the handle an application holds onto instead of
//! the connection's internals. Because [`ManagedConnection`] already routes
//! every externally-reachable operation through whichever [`Inbox`] is
//! currently installed as its owner, dereferencing a proxy always reaches
//! the connection's *current* owner thread, transparently across a
//! dispatch handoff, exactly as §3 requires of a proxy.

use std::sync::Arc;

use crate::connection::{ConnectionId, ManagedConnection};
use crate::error::{EngineError, Result};
use crate::filter::Message;
use crate::state::Status;

/// A cheap, `Clone`-able external reference to one connection.
#[derive(Clone)]
pub struct ConnectionProxy {
    inner: Arc<ManagedConnection>,
}

impl ConnectionProxy {
    pub(crate) fn new(inner: Arc<ManagedConnection>) -> Self {
        ConnectionProxy { inner }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// Runs the outbound filter chain and queues the result for writing
    /// (§4.6). Fails fast once the connection is closed.
    pub fn send_outbound(&self, message: Message) -> Result<()> {
        self.inner.send_outbound(message)
    }

    /// Idempotent: collapses to a single terminal transition (§5).
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    pub fn error(&self, cause: EngineError) -> Result<()> {
        self.inner.error(cause)
    }
}

impl From<Arc<ManagedConnection>> for ConnectionProxy {
    fn from(inner: Arc<ManagedConnection>) -> Self {
        ConnectionProxy::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::filter::{MessageQueue, PassThroughFilterFactory};
    use crate::handler::Handler;

    struct NullHandler;
    impl Handler for NullHandler {
        fn on_receive(&mut self, _batch: MessageQueue) {}
    }

    #[test]
    fn proxy_reflects_connection_identity() {
        let cfg = Arc::new(EngineConfig::builder().build().unwrap());
        let conn = ManagedConnection::new(Box::new(NullHandler), Arc::new(PassThroughFilterFactory), cfg);
        let proxy = ConnectionProxy::from(conn.clone());
        assert_eq!(proxy.id(), conn.id());
        assert_eq!(proxy.status(), Status::Virgin);
    }
}
