//! §8.1 scenario 1: client connects, exchanges four framed messages with
//! an accepted peer, and both sides close cleanly.

mod util;

use std::sync::Arc;
use std::time::Duration;

use reactor_core::{ConnectionManager, EngineConfig, InitKind};

use util::{free_addr, recording_handler, LengthPrefixedFilterFactory};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn echoes_four_messages_and_closes_cleanly() {
    util::init();
    let addr = free_addr();
    let mut manager = ConnectionManager::new(EngineConfig::builder().n_io_threads(1).build().unwrap()).unwrap();

    let (server_handler, server_rec) = recording_handler();
    let server = manager
        .new_connection(Box::new(server_handler), Arc::new(LengthPrefixedFilterFactory), InitKind::Accept(addr))
        .expect("server side accepts");

    let (client_handler, client_rec) = recording_handler();
    let client = manager
        .new_connection(Box::new(client_handler), Arc::new(LengthPrefixedFilterFactory), InitKind::Connect(addr))
        .expect("client connects");

    for word in ["hello", "from", "the", "client"] {
        client.send_outbound(Box::new(word.as_bytes().to_vec())).unwrap();
    }
    for expected in ["hello", "from", "the", "client"] {
        let got = server_rec.received.recv_timeout(TIMEOUT).expect("server receives word");
        assert_eq!(got, expected.as_bytes());
    }

    for word in ["hello", "from", "the", "server"] {
        server.send_outbound(Box::new(word.as_bytes().to_vec())).unwrap();
    }
    for expected in ["hello", "from", "the", "server"] {
        let got = client_rec.received.recv_timeout(TIMEOUT).expect("client receives word");
        assert_eq!(got, expected.as_bytes());
    }

    client.close().unwrap();
    server.close().unwrap();

    client_rec.closed.recv_timeout(TIMEOUT).expect("client observes close");
    server_rec.closed.recv_timeout(TIMEOUT).expect("server observes close");

    manager.close().unwrap();
}
