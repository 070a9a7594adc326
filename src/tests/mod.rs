#![allow(unused_imports)]

use super::{transport::loopback::*, transport::*, type_alias::*, *};
use std::{
    sync::{atomic::*, *},
    thread,
    time::Duration,
};

use simple_logger::SimpleLogger;

mod fast;

/// Every test gets its own fabric, so one device ID suffices.
const DEV: DeviceId = 0;

/// Small enough to keep tests light, large enough for multi-page transfers.
const TEST_CAPS: FastBufferCaps = FastBufferCaps {
    data: 1 << 20,
    ctrl: 64,
};

fn init_logger() {
    let _ = SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init();
}

/// Retry forever, but without the default one-second connect backoff.
fn quick_retry() -> RetryPolicy {
    RetryPolicy::forever().with_connect_retry_interval(Duration::from_millis(5))
}

fn endpoint(drv: &LoopbackDriver, fast_mode: bool) -> Endpoint<LoopbackDriver> {
    endpoint_with(drv, fast_mode, quick_retry())
}

fn endpoint_with(
    drv: &LoopbackDriver,
    fast_mode: bool,
    policy: RetryPolicy,
) -> Endpoint<LoopbackDriver> {
    let mut ep = Endpoint::new(Arc::new(drv.clone()), DEV, fast_mode);
    ep.set_retry_policy(policy);
    ep
}

/// A server and a client endpoint with `count` sessions between them.
/// Sessions with the same index are peers.
struct Pair {
    server: Arc<Endpoint<LoopbackDriver>>,
    client: Arc<Endpoint<LoopbackDriver>>,
    svr_drv: LoopbackDriver,
    cli_drv: LoopbackDriver,
    svr_sess: Vec<SessionHandle>,
    cli_sess: Vec<SessionHandle>,
}

fn connected_pair(count: usize, fast_mode: bool) -> Pair {
    init_logger();

    let fabric = Fabric::new();
    let svr_drv = fabric.driver();
    let cli_drv = fabric.driver();
    let server = Arc::new(endpoint(&svr_drv, fast_mode));
    let client = Arc::new(endpoint(&cli_drv, fast_mode));

    let handle = {
        let server = server.clone();
        thread::spawn(move || server.create_as_server(count, TEST_CAPS).unwrap())
    };
    let cli_sess = client.create_as_client(count, TEST_CAPS).unwrap();
    let svr_sess = handle.join().unwrap();

    Pair {
        server,
        client,
        svr_drv,
        cli_drv,
        svr_sess,
        cli_sess,
    }
}

/// Deterministic, position-dependent test payload.
fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
