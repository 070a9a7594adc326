//! Fast-path rendezvous.

use super::*;

/// Receive one transfer on another thread.
fn spawn_recv(
    ep: &Arc<Endpoint<LoopbackDriver>>,
    sess: SessionHandle,
) -> thread::JoinHandle<Result<FastRecv>> {
    let ep = ep.clone();
    thread::spawn(move || ep.fast_recv_with_ctrl(sess))
}

/// Test a data-only round trip filled in place.
#[test]
fn round_trip() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);
    let data = pattern(300_000, 7);

    let receiver = {
        let server = p.server.clone();
        thread::spawn(move || server.fast_recv(svr).unwrap())
    };

    p.client
        .fast_buffers(cli, data.len(), 0, |buf, ctrl| {
            assert!(ctrl.is_empty());
            buf.copy_from_slice(&data);
        })
        .unwrap();
    p.client.fast_send(cli, data.len(), 0).unwrap();

    let received = receiver.join().unwrap();
    assert_eq!(received.len(), data.len());
    assert!(received.capacity() >= data.len());
    assert_eq!(received.as_slice(), &data[..]);
    assert_eq!(p.cli_drv.transfers(), 1);

    // Offer and completion on one companion, grant on the same one from the other end.
    assert_eq!(p.cli_drv.messages_sent(), 1);
    assert_eq!(p.svr_drv.messages_sent(), 2);
}

/// Test a transfer carrying control bytes.
#[test]
fn round_trip_with_ctrl() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);
    let data = pattern(4096, 1);
    let ctrl = pattern(TEST_CAPS.ctrl, 2);

    let receiver = spawn_recv(&p.server, svr);
    p.client.fast_send_copy(cli, &data, &ctrl).unwrap();

    let FastRecv {
        data: got_data,
        ctrl: got_ctrl,
    } = receiver.join().unwrap().unwrap();
    assert_eq!(got_data.as_slice(), &data[..]);
    assert_eq!(got_ctrl.as_slice(), &ctrl[..]);
}

/// Test that short control payloads get a minimum-size buffer.
#[test]
fn short_ctrl_buffer() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);

    let receiver = spawn_recv(&p.server, svr);
    p.client.fast_send_copy(cli, b"payload", b"ok").unwrap();

    let got = receiver.join().unwrap().unwrap();
    assert_eq!(got.ctrl.as_slice(), b"ok");
    assert!(got.ctrl.capacity() >= RECV_CTRL_MIN_LEN);

    let receiver = spawn_recv(&p.server, svr);
    p.client.fast_send_copy(cli, b"payload", b"").unwrap();

    let got = receiver.join().unwrap().unwrap();
    assert!(got.ctrl.is_empty());
    assert!(got.ctrl.capacity() >= RECV_CTRL_MIN_LEN);
}

/// Test that oversized transfers are rejected before any companion traffic.
#[test]
fn out_of_range() {
    let p = connected_pair(1, true);
    let cli = p.cli_sess[0];

    assert_eq!(
        p.client.fast_send(cli, TEST_CAPS.data + 1, 0),
        Err(Error::OutOfRange {
            requested: TEST_CAPS.data + 1,
            capacity: TEST_CAPS.data,
        })
    );
    assert_eq!(
        p.client.fast_send(cli, 1, TEST_CAPS.ctrl + 1),
        Err(Error::OutOfRange {
            requested: TEST_CAPS.ctrl + 1,
            capacity: TEST_CAPS.ctrl,
        })
    );
    assert!(matches!(
        p.client
            .fast_send_copy(cli, &vec![0; TEST_CAPS.data + 1], b""),
        Err(Error::OutOfRange { .. })
    ));
    assert!(matches!(
        p.client.fast_buffers(cli, TEST_CAPS.data + 1, 0, |_, _| ()),
        Err(Error::OutOfRange { .. })
    ));

    assert_eq!(p.cli_drv.messages_sent(), 0);
    assert_eq!(p.cli_drv.transfers(), 0);
}

/// Test that empty transfers are rejected.
#[test]
fn zero_length() {
    let p = connected_pair(1, true);
    let cli = p.cli_sess[0];

    assert!(matches!(
        p.client.fast_send(cli, 0, 4),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        p.client.fast_send_copy(cli, b"", b"ctrl"),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(p.cli_drv.messages_sent(), 0);
}

/// Test that the registered buffer survives a transfer and can be reused.
#[test]
fn registered_buffer_reuse() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);

    for round in 0..5u8 {
        let data = pattern(10_000 + round as usize * 1000, round);

        let receiver = spawn_recv(&p.server, svr);
        p.client.fast_send_copy(cli, &data, &[round]).unwrap();
        let got = receiver.join().unwrap().unwrap();
        assert_eq!(got.data.as_slice(), &data[..]);
        assert_eq!(got.ctrl.as_slice(), &[round]);

        let kept = p
            .client
            .fast_buffers(cli, data.len(), 1, |buf, ctrl| (buf.to_vec(), ctrl[0]))
            .unwrap();
        assert_eq!(kept, (data, round));
    }
    assert_eq!(p.cli_drv.transfers(), 5);
    assert_eq!(p.cli_drv.live().buffers, 2);
}

/// Test that receive buffers go back to the pool when the last handle drops.
#[test]
fn receive_buffers_are_freed() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);
    assert_eq!(p.svr_drv.live().buffers, 2);

    let receiver = spawn_recv(&p.server, svr);
    p.client.fast_send_copy(cli, b"data", b"ctrl").unwrap();
    let got = receiver.join().unwrap().unwrap();
    assert_eq!(p.svr_drv.live().buffers, 4);

    let data = got.data.clone();
    drop(got);
    assert_eq!(p.svr_drv.live().buffers, 3);
    assert_eq!(data.as_slice(), b"data");
    drop(data);
    assert_eq!(p.svr_drv.live().buffers, 2);
}

/// Test that the data-only receive keeps the control buffer with the session.
#[test]
fn default_ctrl_buffer() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);
    assert!(p.server.recv_ctrl_buffer(svr).unwrap().is_none());

    for ctrl in [&b"first"[..], &b"second"[..]] {
        let receiver = {
            let server = p.server.clone();
            thread::spawn(move || server.fast_recv(svr).unwrap())
        };
        p.client.fast_send_copy(cli, b"data", ctrl).unwrap();
        assert_eq!(receiver.join().unwrap().as_slice(), b"data");

        let stored = p.server.recv_ctrl_buffer(svr).unwrap().unwrap();
        assert_eq!(stored.as_slice(), ctrl);
    }

    // Only the latest control buffer is kept.
    assert_eq!(p.svr_drv.live().buffers, 3);
}

/// Test that the fast path is unavailable without fast mode.
#[test]
fn fast_mode_disabled() {
    let p = connected_pair(1, false);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);

    assert!(matches!(
        p.client.fast_send(cli, 8, 0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        p.server.fast_recv(svr),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        p.client.fast_buffers(cli, 8, 0, |_, _| ()),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(p.cli_drv.live().buffers, 0);
}

/// Test that a receiver waiting for an offer observes the peer closing.
#[test]
fn peer_close_unblocks_fast_recv() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);

    let receiver = spawn_recv(&p.server, svr);
    thread::sleep(Duration::from_millis(10));
    p.client.close(cli).unwrap();

    assert_eq!(receiver.join().unwrap().unwrap_err(), Error::ConnectionClosed);
    assert_eq!(p.svr_drv.live().buffers, 2);
}

/// Test transfers in both directions over the same session pair.
#[test]
fn both_directions() {
    let p = connected_pair(2, true);

    for (&svr, &cli) in p.svr_sess.iter().zip(&p.cli_sess) {
        let up = pattern(50_000, 3);
        let receiver = spawn_recv(&p.server, svr);
        p.client.fast_send_copy(cli, &up, b"up").unwrap();
        assert_eq!(receiver.join().unwrap().unwrap().data.as_slice(), &up[..]);

        let down = pattern(70_000, 4);
        let receiver = spawn_recv(&p.client, cli);
        p.server.fast_send_copy(svr, &down, b"down").unwrap();
        let got = receiver.join().unwrap().unwrap();
        assert_eq!(got.data.as_slice(), &down[..]);
        assert_eq!(got.ctrl.as_slice(), b"down");
    }

    assert_eq!(p.cli_drv.transfers(), 2);
    assert_eq!(p.svr_drv.transfers(), 2);
}

/// Test that normal and fast traffic on one session do not interfere.
#[test]
fn mixed_with_normal() {
    let p = connected_pair(1, true);
    let (svr, cli) = (p.svr_sess[0], p.cli_sess[0]);

    p.client.send(cli, b"before").unwrap();
    let receiver = spawn_recv(&p.server, svr);
    p.client.fast_send_copy(cli, b"bulk", b"").unwrap();
    p.client.send(cli, b"after").unwrap();

    assert_eq!(receiver.join().unwrap().unwrap().data.as_slice(), b"bulk");
    assert_eq!(p.server.recv(svr).unwrap(), b"before");
    assert_eq!(p.server.recv(svr).unwrap(), b"after");
}
