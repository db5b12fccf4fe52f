//! A multi-threaded, selector-driven connection management engine.
//!
//! One dispatch thread accepts and connects stream sockets; a configurable
//! pool of I/O threads reads and writes the connections the dispatch
//! thread hands off to them round-robin. Each connection runs a small
//! state machine (`VIRGIN -> CONNECT|ACCEPT|ACTIVE -> CLOSING -> CLOSED`)
//! and carries a composable, bidirectional filter chain between the
//! socket and the application.
//!
//! ```no_run
//! use std::sync::Arc;
//! use reactor_core::{
//!     ConnectionManager, EngineConfig, Handler, InitKind,
//!     MessageQueue, PassThroughFilterFactory,
//! };
//!
//! struct Echo;
//! impl Handler for Echo {
//!     fn on_receive(&mut self, _batch: MessageQueue) {}
//! }
//!
//! # fn main() -> reactor_core::Result<()> {
//! let manager = ConnectionManager::new(EngineConfig::builder().build()?)?;
//! let addr = "127.0.0.1:0".parse().unwrap();
//! let _proxy = manager.new_connection(
//!     Box::new(Echo),
//!     Arc::new(PassThroughFilterFactory),
//!     InitKind::Accept(addr),
//! )?;
//! # Ok(())
//! # }
//! ```

mod accept_registry;
mod buffer;
mod config;
mod connection;
mod dispatch_thread;
mod error;
mod event;
mod filter;
mod handler;
mod io_thread;
mod manager;
mod pipeline;
mod proxy;
mod selector_thread;
mod state;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use connection::{ConnectionId, InitKind, ManagedConnection};
pub use error::{EngineError, Result};
pub use event::{EventKind, EventPayload, InterestEvent};
pub use filter::{
    BoxedFilter, Filter, FilterFactory, Message, MessageQueue, OobEvent, OobFilter, OobQueue,
    PassThroughFilter, PassThroughFilterFactory,
};
pub use handler::Handler;
pub use manager::ConnectionManager;
pub use pipeline::FilterChain;
pub use proxy::ConnectionProxy;
pub use state::{CloseCause, Status};
