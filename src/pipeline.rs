//! Filter chain runtime (C6, §4.7).
//!
//! Composes the `N` filters produced by a connection's
//! [`crate::filter::FilterFactory`] list, threading `N-1` intermediate
//! message queues and `N-1` intermediate OOB queues per direction between
//! them. `N == 1` short-circuits directly to the single filter, as the
//! spec calls out explicitly.

use crate::filter::{BoxedFilter, Message, MessageQueue, OobEvent, OobQueue};
use crate::error::Result;

/// One connection's instantiated filter stack.
pub struct FilterChain {
    filters: Vec<BoxedFilter>,
    inter_msg: Vec<MessageQueue>,
    inter_oob: Vec<OobQueue>,
}

impl FilterChain {
    /// Builds a chain from `N` already-created filters. `N` must be at
    /// least 1; an empty chain is not a meaningful configuration.
    pub fn new(filters: Vec<BoxedFilter>) -> Self {
        assert!(!filters.is_empty(), "a filter chain needs at least one filter");
        let n = filters.len();
        FilterChain {
            filters,
            inter_msg: (0..n.saturating_sub(1)).map(|_| MessageQueue::new()).collect(),
            inter_oob: (0..n.saturating_sub(1)).map(|_| OobQueue::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Runs bytes/messages arriving from the socket through the chain
    /// towards the application. `ext_in` is drained; results land in
    /// `ext_out`.
    pub fn inbound(&mut self, ext_in: &mut MessageQueue, ext_out: &mut MessageQueue) -> Result<()> {
        let n = self.filters.len();
        if n == 1 {
            return self.filters[0].inbound(ext_in, ext_out);
        }
        self.filters[0].inbound(ext_in, &mut self.inter_msg[0])?;
        for i in 1..n - 1 {
            let (left, right) = self.inter_msg.split_at_mut(i);
            self.filters[i].inbound(&mut left[i - 1], &mut right[0])?;
        }
        self.filters[n - 1].inbound(&mut self.inter_msg[n - 2], ext_out)?;
        Ok(())
    }

    /// Runs messages submitted by the application through the chain
    /// towards the socket, in reverse filter order.
    pub fn outbound(&mut self, ext_in: &mut MessageQueue, ext_out: &mut MessageQueue) -> Result<()> {
        let n = self.filters.len();
        if n == 1 {
            return self.filters[0].outbound(ext_in, ext_out);
        }
        self.filters[n - 1].outbound(ext_in, &mut self.inter_msg[n - 2])?;
        for i in (1..n - 1).rev() {
            let (left, right) = self.inter_msg.split_at_mut(i);
            self.filters[i].outbound(&mut right[0], &mut left[i - 1])?;
        }
        self.filters[0].outbound(&mut self.inter_msg[0], ext_out)?;
        Ok(())
    }

    /// Propagates an OOB event (bind/closing/writable) through the chain
    /// in inbound order (socket-side filter first), matching the data
    /// topology.
    pub fn propagate_oob(&mut self, event: OobEvent) -> Vec<OobEvent> {
        let n = self.filters.len();
        let mut ext_in: OobQueue = std::iter::once(event).collect();
        let mut ext_out = OobQueue::new();
        if n == 1 {
            self.filters[0].inbound_oob(&mut ext_in, &mut ext_out);
            return ext_out.into_iter().collect();
        }
        self.filters[0].inbound_oob(&mut ext_in, &mut self.inter_oob[0]);
        for i in 1..n - 1 {
            let (left, right) = self.inter_oob.split_at_mut(i);
            self.filters[i].inbound_oob(&mut left[i - 1], &mut right[0]);
        }
        self.filters[n - 1].inbound_oob(&mut self.inter_oob[n - 2], &mut ext_out);
        ext_out.into_iter().collect()
    }
}

/// Convenience for wrapping a single raw byte vector as the external
/// input to an inbound traversal.
pub fn bytes_message(bytes: Vec<u8>) -> Message {
    Box::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PassThroughFilterFactory;
    use crate::filter::FilterFactory;

    fn make_chain(n: usize) -> FilterChain {
        let factory = PassThroughFilterFactory;
        FilterChain::new((0..n).map(|_| factory.create()).collect())
    }

    #[test]
    fn single_filter_short_circuits() {
        let mut chain = make_chain(1);
        let mut input: MessageQueue = vec![bytes_message(b"hi".to_vec())].into();
        let mut output = MessageQueue::new();
        chain.inbound(&mut input, &mut output).unwrap();
        assert_eq!(output.len(), 1);
    }

    #[test]
    fn identity_round_trip_preserves_payload() {
        // Scenario 6 stand-in: an identity composition of N pass-through
        // filters must reproduce the original payload byte-for-byte.
        let mut chain = make_chain(3);
        let original = b"hello from the client".to_vec();

        let mut app_in: MessageQueue = vec![bytes_message(original.clone())].into();
        let mut wire = MessageQueue::new();
        chain.outbound(&mut app_in, &mut wire).unwrap();

        let mut app_out = MessageQueue::new();
        chain.inbound(&mut wire, &mut app_out).unwrap();

        assert_eq!(app_out.len(), 1);
        let roundtripped = app_out.pop_front().unwrap().downcast::<Vec<u8>>().unwrap();
        assert_eq!(*roundtripped, original);
    }

    #[test]
    fn oob_event_propagates_through_every_filter() {
        let mut chain = make_chain(4);
        let out = chain.propagate_oob(OobEvent::Bind);
        assert_eq!(out.len(), 1);
    }
}
