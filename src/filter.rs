//! The filter interface contract (§3, §4.7, §6).
//!
//! Concrete byte→frame→XML→application-event filters are out of scope
//! (§1); this module only specifies the contract the filter chain
//! runtime ([`crate::pipeline::FilterChain`]) composes against.

use std::any::Any;
use std::collections::VecDeque;

use crate::error::Result;
use crate::state::CloseCause;

/// An application-level message flowing through the chain. Filters are
/// free to downcast to whatever concrete type the adjacent filter in the
/// chain agreed to produce/consume; the runtime itself stays generic by
/// erasing to this type, per Design Notes §9.
pub type Message = Box<dyn Any + Send>;

/// A queue of in-flight messages between two filters (or a filter and the
/// outside world).
pub type MessageQueue = VecDeque<Message>;

/// An out-of-band control signal propagated alongside data (§4.7).
#[derive(Debug, Clone, Copy)]
pub enum OobEvent {
    /// The chain has just been constructed for this connection.
    Bind,
    /// The connection is closing, for the given reason.
    Closing(CloseCause),
    /// The deferred-write queue crossed the high-water mark in either
    /// direction; `true` means writable again.
    Writable(bool),
}

pub type OobQueue = VecDeque<OobEvent>;

/// A pure transform between an inbound queue and an outbound queue, in
/// both directions.
pub trait Filter: Send {
    /// Move messages from `input` to `output`, transforming them, for
    /// data flowing from the socket towards the application.
    fn inbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()>;

    /// Move messages from `input` to `output`, transforming them, for
    /// data flowing from the application towards the socket.
    fn outbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()>;
}

/// A [`Filter`] that additionally observes OOB events. Filters that do
/// not need OOB awareness are still traversed (as a pass-through) via
/// [`BoxedFilter::Plain`] in the runtime, rather than by implementing
/// this trait with a no-op body.
pub trait OobFilter: Filter {
    fn inbound_oob(&mut self, input: &mut OobQueue, output: &mut OobQueue);
    fn outbound_oob(&mut self, input: &mut OobQueue, output: &mut OobQueue);
}

/// The erased form a [`FilterFactory`] produces: either a plain data
/// filter (OOB events pass through unchanged) or one that additionally
/// observes OOB traffic.
pub enum BoxedFilter {
    Plain(Box<dyn Filter>),
    Oob(Box<dyn OobFilter>),
}

impl BoxedFilter {
    pub fn inbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()> {
        match self {
            BoxedFilter::Plain(f) => f.inbound(input, output),
            BoxedFilter::Oob(f) => f.inbound(input, output),
        }
    }

    pub fn outbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()> {
        match self {
            BoxedFilter::Plain(f) => f.outbound(input, output),
            BoxedFilter::Oob(f) => f.outbound(input, output),
        }
    }

    pub fn inbound_oob(&mut self, input: &mut OobQueue, output: &mut OobQueue) {
        match self {
            BoxedFilter::Plain(_) => output.extend(input.drain(..)),
            BoxedFilter::Oob(f) => f.inbound_oob(input, output),
        }
    }

    pub fn outbound_oob(&mut self, input: &mut OobQueue, output: &mut OobQueue) {
        match self {
            BoxedFilter::Plain(_) => output.extend(input.drain(..)),
            BoxedFilter::Oob(f) => f.outbound_oob(input, output),
        }
    }
}

/// Produces a [`BoxedFilter`] for a newly-bound connection. Implementors
/// may close over per-connection configuration but must be `Send + Sync`
/// so a single factory can be shared across every connection a
/// [`crate::manager::ConnectionManager`] creates.
pub trait FilterFactory: Send + Sync {
    fn create(&self) -> BoxedFilter;
}

/// A no-op filter that copies messages/events through unchanged. Not a
/// stand-in for the out-of-scope codec filters; used only so the chain
/// runtime and its tests have something trivial to compose (§8.1,
/// scenario 6 uses it as the identity leg of a round trip).
pub struct PassThroughFilter;

impl Filter for PassThroughFilter {
    fn inbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()> {
        output.extend(input.drain(..));
        Ok(())
    }

    fn outbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()> {
        output.extend(input.drain(..));
        Ok(())
    }
}

pub struct PassThroughFilterFactory;

impl FilterFactory for PassThroughFilterFactory {
    fn create(&self) -> BoxedFilter {
        BoxedFilter::Plain(Box::new(PassThroughFilter))
    }
}
