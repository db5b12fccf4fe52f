//! Shared test scaffolding: logger init, a recording `Handler`, an
//! ephemeral-port helper, and a minimal length-prefixed framing filter used
//! only to give integration tests message boundaries over a raw TCP stream
//! (§8.1 scenario 6's "bytes -> frames -> bytes" composition, reduced to
//! just the framing leg since codec filters themselves are out of scope).

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Once;

use reactor_core::{BoxedFilter, CloseCause, EngineError, Filter, FilterFactory, Handler, MessageQueue, Result};

static LOGGER: Once = Once::new();

/// Installs `env_logger` once per test binary, matching the teacher's
/// `tests/util/mod.rs::init()` pattern.
pub fn init() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Binds to an ephemeral port, reads back the OS-assigned address, then
/// drops the probe listener so the real test can bind it (SPEC_FULL.md
/// §8.1: every test uses ephemeral ports, never a fixed one).
pub fn free_addr() -> SocketAddr {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    probe.local_addr().expect("local_addr")
}

/// What a [`RecordingHandler`] observed, delivered over channels so test
/// bodies can block on `recv_timeout` rather than polling.
pub struct RecordingHandler {
    pub bound: Sender<()>,
    pub received: Sender<Vec<u8>>,
    pub closing: Sender<CloseCause>,
    pub closed: Sender<()>,
    pub errors: Sender<EngineError>,
}

pub struct Recorder {
    pub bound: Receiver<()>,
    pub received: Receiver<Vec<u8>>,
    pub closing: Receiver<CloseCause>,
    pub closed: Receiver<()>,
    pub errors: Receiver<EngineError>,
}

/// Builds a connected `(Handler, Recorder)` pair: the handler goes to
/// `ConnectionManager::new_connection`, the recorder stays in the test body.
pub fn recording_handler() -> (RecordingHandler, Recorder) {
    let (bound_tx, bound_rx) = channel();
    let (received_tx, received_rx) = channel();
    let (closing_tx, closing_rx) = channel();
    let (closed_tx, closed_rx) = channel();
    let (errors_tx, errors_rx) = channel();
    (
        RecordingHandler {
            bound: bound_tx,
            received: received_tx,
            closing: closing_tx,
            closed: closed_tx,
            errors: errors_tx,
        },
        Recorder {
            bound: bound_rx,
            received: received_rx,
            closing: closing_rx,
            closed: closed_rx,
            errors: errors_rx,
        },
    )
}

impl Handler for RecordingHandler {
    fn on_bind(&mut self) {
        let _ = self.bound.send(());
    }

    fn on_receive(&mut self, mut batch: MessageQueue) {
        while let Some(msg) = batch.pop_front() {
            if let Ok(bytes) = msg.downcast::<Vec<u8>>() {
                let _ = self.received.send(*bytes);
            }
        }
    }

    fn on_closing(&mut self, cause: CloseCause, _pending: MessageQueue) {
        let _ = self.closing.send(cause);
    }

    fn on_close(&mut self) {
        let _ = self.closed.send(());
    }

    fn on_error(&mut self, error: EngineError, _partial: Option<Vec<u8>>) {
        let _ = self.errors.send(error);
    }
}

/// Length-prefixed (4-byte big-endian) framing, so a sequence of
/// `send_outbound` calls over one TCP stream arrives as the same number of
/// `on_receive` batches on the other end. Stateful across `inbound` calls so
/// it can reassemble a frame split across readiness events.
pub struct LengthPrefixedFilter {
    inbound_buf: Vec<u8>,
}

impl LengthPrefixedFilter {
    pub fn new() -> Self {
        LengthPrefixedFilter { inbound_buf: Vec::new() }
    }
}

impl Filter for LengthPrefixedFilter {
    fn inbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()> {
        while let Some(msg) = input.pop_front() {
            let chunk = *msg
                .downcast::<Vec<u8>>()
                .map_err(|_| EngineError::protocol("length-prefixed filter expects raw bytes"))?;
            self.inbound_buf.extend_from_slice(&chunk);
        }
        loop {
            if self.inbound_buf.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes(self.inbound_buf[0..4].try_into().unwrap()) as usize;
            if self.inbound_buf.len() < 4 + len {
                break;
            }
            let frame = self.inbound_buf[4..4 + len].to_vec();
            self.inbound_buf.drain(0..4 + len);
            output.push_back(Box::new(frame));
        }
        Ok(())
    }

    fn outbound(&mut self, input: &mut MessageQueue, output: &mut MessageQueue) -> Result<()> {
        while let Some(msg) = input.pop_front() {
            let payload = *msg
                .downcast::<Vec<u8>>()
                .map_err(|_| EngineError::protocol("length-prefixed filter expects raw bytes"))?;
            let mut framed = Vec::with_capacity(4 + payload.len());
            framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            framed.extend_from_slice(&payload);
            output.push_back(Box::new(framed));
        }
        Ok(())
    }
}

pub struct LengthPrefixedFilterFactory;

impl FilterFactory for LengthPrefixedFilterFactory {
    fn create(&self) -> BoxedFilter {
        BoxedFilter::Plain(Box::new(LengthPrefixedFilter::new()))
    }
}
