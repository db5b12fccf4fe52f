//! §8.1 scenario 2 (reduced): on each of two independent connections,
//! a burst of sequence-numbered messages sent back to back arrives at the
//! peer strictly in order.

mod util;

use std::sync::Arc;
use std::time::Duration;

use reactor_core::{ConnectionManager, EngineConfig, InitKind};

use util::{free_addr, recording_handler, LengthPrefixedFilterFactory};

const TIMEOUT: Duration = Duration::from_secs(5);
const COUNT: u32 = 100;

fn run_one_pair(manager: &ConnectionManager, start: u32) {
    let addr = free_addr();

    let (server_handler, server_rec) = recording_handler();
    manager
        .new_connection(Box::new(server_handler), Arc::new(LengthPrefixedFilterFactory), InitKind::Accept(addr))
        .expect("server side accepts");

    let (client_handler, _client_rec) = recording_handler();
    let client = manager
        .new_connection(Box::new(client_handler), Arc::new(LengthPrefixedFilterFactory), InitKind::Connect(addr))
        .expect("client connects");

    for seq in start..start + COUNT {
        client.send_outbound(Box::new(seq.to_be_bytes().to_vec())).unwrap();
    }

    let mut last = None;
    for _ in 0..COUNT {
        let bytes = server_rec.received.recv_timeout(TIMEOUT).expect("message arrives");
        let seq = u32::from_be_bytes(bytes.try_into().expect("4-byte sequence frame"));
        if let Some(prev) = last {
            assert_eq!(seq, prev + 1, "messages on one connection must arrive in send order");
        } else {
            assert_eq!(seq, start);
        }
        last = Some(seq);
    }

    client.close().unwrap();
}

#[test]
fn two_connections_each_preserve_send_order() {
    util::init();
    let mut manager = ConnectionManager::new(EngineConfig::builder().n_io_threads(2).build().unwrap()).unwrap();

    run_one_pair(&manager, 1_000);
    run_one_pair(&manager, 50_000);

    manager.close().unwrap();
}
