//! §8.1 scenario 4: two pending accepts on the same address coalesce onto
//! one bound listener; the address disappears from `bound_addresses()` only
//! once both have been consumed.

mod util;

use std::sync::Arc;
use std::time::Duration;

use reactor_core::{ConnectionManager, EngineConfig, InitKind, PassThroughFilterFactory};

use util::{free_addr, recording_handler};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn two_pending_accepts_share_one_listener() {
    util::init();
    let addr = free_addr();
    let mut manager = ConnectionManager::new(EngineConfig::builder().n_io_threads(1).build().unwrap()).unwrap();

    let (server_handler_a, server_rec_a) = recording_handler();
    let server_a = manager
        .new_connection(Box::new(server_handler_a), Arc::new(PassThroughFilterFactory), InitKind::Accept(addr))
        .expect("first pending accept registers");

    let (server_handler_b, server_rec_b) = recording_handler();
    let server_b = manager
        .new_connection(Box::new(server_handler_b), Arc::new(PassThroughFilterFactory), InitKind::Accept(addr))
        .expect("second pending accept coalesces onto the same listener");

    assert_eq!(manager.bound_addresses().unwrap(), vec![addr], "one shared listener for both pending accepts");

    let (client_handler_1, _client_rec_1) = recording_handler();
    let client1 = manager
        .new_connection(Box::new(client_handler_1), Arc::new(PassThroughFilterFactory), InitKind::Connect(addr))
        .expect("first client connects");
    server_rec_a.bound.recv_timeout(TIMEOUT).expect("first accept completes");

    assert_eq!(manager.bound_addresses().unwrap(), vec![addr], "second pending accept still holds the address");

    let (client_handler_2, _client_rec_2) = recording_handler();
    let client2 = manager
        .new_connection(Box::new(client_handler_2), Arc::new(PassThroughFilterFactory), InitKind::Connect(addr))
        .expect("second client connects");
    server_rec_b.bound.recv_timeout(TIMEOUT).expect("second accept completes");

    assert!(manager.bound_addresses().unwrap().is_empty(), "listener torn down once both accepts are consumed");

    client1.close().unwrap();
    client2.close().unwrap();
    server_a.close().unwrap();
    server_b.close().unwrap();

    server_rec_a.closed.recv_timeout(TIMEOUT).expect("server a closes");
    server_rec_b.closed.recv_timeout(TIMEOUT).expect("server b closes");

    manager.close().unwrap();
}
