//! §8.1 scenario 3, reinterpreted for this port: `ManagedConnection::init`
//! is a blocking rendezvous rather than a future a caller can race against,
//! so "50 sends before `init().get()` completes" has no direct analogue —
//! by the time `new_connection` returns, the connection is already `ACTIVE`.
//! What the scenario is really probing is that a burst of sends issued
//! immediately after `ACTIVE`, with no synchronization against the
//! dispatch-to-I/O-thread handoff that is still completing in the
//! background, are still observed by the peer in submission order. That
//! invariant is what this test exercises (see DESIGN.md's Open Question
//! decisions).

mod util;

use std::sync::Arc;
use std::time::Duration;

use reactor_core::{ConnectionManager, EngineConfig, InitKind};

use util::{free_addr, recording_handler, LengthPrefixedFilterFactory};

const TIMEOUT: Duration = Duration::from_secs(5);
const COUNT: u32 = 50;

#[test]
fn burst_immediately_after_connect_arrives_in_order() {
    util::init();
    let addr = free_addr();
    let mut manager = ConnectionManager::new(EngineConfig::builder().n_io_threads(1).build().unwrap()).unwrap();

    let (server_handler, server_rec) = recording_handler();
    manager
        .new_connection(Box::new(server_handler), Arc::new(LengthPrefixedFilterFactory), InitKind::Accept(addr))
        .expect("server side accepts");

    let (client_handler, _client_rec) = recording_handler();
    let client = manager
        .new_connection(Box::new(client_handler), Arc::new(LengthPrefixedFilterFactory), InitKind::Connect(addr))
        .expect("client connects");

    // No synchronization with the handoff to an I/O thread: these 50 sends
    // race the dispatch thread's handoff just like the original scenario's
    // sends raced the future's completion.
    for seq in 0..COUNT {
        client.send_outbound(Box::new(seq.to_be_bytes().to_vec())).unwrap();
    }

    for expected in 0..COUNT {
        let bytes = server_rec.received.recv_timeout(TIMEOUT).expect("message arrives");
        let seq = u32::from_be_bytes(bytes.try_into().expect("4-byte sequence frame"));
        assert_eq!(seq, expected, "burst must be observed in submission order");
    }

    client.close().unwrap();
    manager.close().unwrap();
}
