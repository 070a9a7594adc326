use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use hdcomm::{transport::loopback::*, *};
use std::{sync::Arc, thread, time::Duration};

const DEV: type_alias::DeviceId = 0;
const NORMAL_LEN: usize = 64;
const FAST_LEN: usize = 1 << 20;

pub fn criterion_benchmark(c: &mut Criterion) {
    let fabric = Fabric::new();
    let policy = RetryPolicy::forever().with_connect_retry_interval(Duration::from_millis(1));
    let caps = FastBufferCaps {
        data: FAST_LEN,
        ..Default::default()
    };

    let mut server = Endpoint::new(Arc::new(fabric.driver()), DEV, true);
    server.set_retry_policy(policy);
    let server = Arc::new(server);
    let mut client = Endpoint::new(Arc::new(fabric.driver()), DEV, true);
    client.set_retry_policy(policy);

    let handle = {
        let server = server.clone();
        thread::spawn(move || server.create_as_server(2, caps).unwrap())
    };
    let cli = client.create_as_client(2, caps).unwrap();
    let svr = handle.join().unwrap();

    // Session 0 echoes normal messages, session 1 sinks fast transfers.
    // Both loops end when the client tears down.
    let echo = {
        let server = server.clone();
        let sess = svr[0];
        thread::spawn(move || {
            while let Ok(msg) = server.recv(sess) {
                if server.send(sess, &msg).is_err() {
                    break;
                }
            }
        })
    };
    let sink = {
        let server = server.clone();
        let sess = svr[1];
        thread::spawn(move || while server.fast_recv(sess).is_ok() {})
    };

    let payload = vec![0x5Au8; NORMAL_LEN];
    c.bench_function("normal-pingpong-64B", |b| {
        b.iter(|| {
            client.send(cli[0], &payload).unwrap();
            client.recv(cli[0]).unwrap()
        })
    });

    client
        .fast_buffers(cli[1], FAST_LEN, 0, |data, _| data.fill(0xA5))
        .unwrap();
    let mut group = c.benchmark_group("fast");
    group.throughput(Throughput::Bytes(FAST_LEN as u64));
    group.bench_function("fast-send-1MiB", |b| {
        b.iter(|| client.fast_send(cli[1], FAST_LEN, 0).unwrap())
    });
    group.finish();

    client.teardown();
    echo.join().unwrap();
    sink.join().unwrap();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
