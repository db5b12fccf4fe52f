//! The application-facing handler interface (§6).
//!
//! All callbacks are delivered on the connection's owner thread, so a
//! `Handler` implementation is single-threaded with respect to a given
//! connection even though different connections may call into different
//! `Handler` instances concurrently from different I/O threads.

use crate::error::EngineError;
use crate::filter::MessageQueue;
use crate::state::CloseCause;

/// Callbacks an application registers on a connection before calling
/// `init` (§4.6: `setHandler` must be called before `init`).
pub trait Handler: Send {
    /// The filter chain has just been constructed for this connection.
    fn on_bind(&mut self) {}

    /// A nonempty batch of inbound application messages arrived.
    fn on_receive(&mut self, batch: MessageQueue);

    /// The connection is leaving `ACTIVE`/`CONNECT`/`ACCEPT`. `pending` is
    /// whatever was still queued for delivery.
    fn on_closing(&mut self, cause: CloseCause, pending: MessageQueue) {
        let _ = (cause, pending);
    }

    /// The channel has been closed and its key cancelled.
    fn on_close(&mut self) {}

    /// A fault was captured in the connection's error slot.
    fn on_error(&mut self, error: EngineError, partial: Option<Vec<u8>>) {
        let _ = (error, partial);
    }
}
