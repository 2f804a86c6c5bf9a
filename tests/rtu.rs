// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end RTU transactions against a scripted peer.

#![cfg(feature = "rtu")]

mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use modbus_master::client::{rtu, RequestOptions};
use modbus_master::codec::rtu::{maybe_truncated, RtuFramer};
use modbus_master::device::{scan_devices, DeviceProbe};
use modbus_master::{Error, Exception, SlaveId};

use support::{rtu_frame, RawReq, RawResp};

#[tokio::test]
async fn read_holding_registers_happy_path() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        assert_eq!(req, [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);

        let resp = rtu_frame(0x11, &[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]);
        peer.write_all(&resp).await.unwrap();
        peer
    });

    let mut regs = [0u16; 3];
    network
        .device(0x11)
        .read_holding_registers(0x006B, &mut regs, &RequestOptions::new())
        .await?;
    assert_eq!(regs, [0x022B, 0x0000, 0x0064]);
    assert_eq!(network.stats().all, 1);
    assert_eq!(network.stats().invalid, 0);

    server.await?;
    Ok(())
}

#[tokio::test]
async fn exception_response() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        assert_eq!(&req[..6], &[0x11, 0x01, 0x00, 0x13, 0x00, 0x25]);

        peer.write_all(&rtu_frame(0x11, &[0x81, 0x02])).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x13, 0x00, 0x25]);
    let mut resp = RawResp::default();
    let err = network
        .request(0x11, 0x01, Some(&req), Some(&mut resp), &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Exception(Exception::IllegalDataAddress)
    ));
    assert_eq!(resp.decode_calls, 0);
    assert_eq!(network.stats().exception, 1);

    server.await?;
    Ok(())
}

#[tokio::test]
async fn crc_error_counts_as_invalid() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let framer = RtuFramer::new(io).with_interframe_timeout(Duration::from_millis(5));
    let mut network = rtu::attach_framer(framer);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();

        let mut resp = rtu_frame(0x11, &[0x01, 0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B]);
        let last = resp.len() - 1;
        resp[last] ^= 0xFF; // corrupt the CRC
        peer.write_all(&resp).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x13, 0x00, 0x25]);
    let mut resp = RawResp::default();
    let err = network
        .request(
            0x11,
            0x01,
            Some(&req),
            Some(&mut resp),
            &RequestOptions::new().expected_resp_len(7),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Crc));
    assert_eq!(resp.decode_calls, 0);
    assert_eq!(network.stats().invalid, 1);

    server.await?;
    Ok(())
}

#[tokio::test]
async fn retry_on_invalid_reply_makes_one_more_attempt() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let framer = RtuFramer::new(io).with_interframe_timeout(Duration::from_millis(5));
    let mut network = rtu::attach_framer(framer);

    let server = tokio::spawn(async move {
        let good = rtu_frame(0x11, &[0x01, 0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B]);

        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        let mut bad = good.clone();
        bad[3] ^= 0x01; // breaks the CRC
        peer.write_all(&bad).await.unwrap();

        // the retry re-sends the request
        peer.read_exact(&mut req).await.unwrap();
        peer.write_all(&good).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x13, 0x00, 0x25]);
    let mut resp = RawResp::default();
    network
        .request(
            0x11,
            0x01,
            Some(&req),
            Some(&mut resp),
            &RequestOptions::new()
                .expected_resp_len(7)
                .retry_on_invalid_reply(1, Duration::ZERO),
        )
        .await?;
    assert_eq!(resp.data, vec![0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B]);
    assert_eq!(resp.decode_calls, 1);

    server.await?;
    Ok(())
}

#[tokio::test]
async fn local_echo_is_stripped() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let framer = RtuFramer::new(io).with_local_echo(true);
    let mut network = rtu::attach_framer(framer);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        // echo the request, then respond
        peer.write_all(&req).await.unwrap();
        let resp = rtu_frame(0x11, &[0x03, 0x02, 0x12, 0x34]);
        peer.write_all(&resp).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let mut resp = RawResp::default();
    network
        .request(
            0x11,
            0x03,
            Some(&req),
            Some(&mut resp),
            &RequestOptions::new().expected_resp_len(4),
        )
        .await?;
    assert_eq!(resp.data, vec![0x02, 0x12, 0x34]);

    server.await?;
    Ok(())
}

#[tokio::test]
async fn corrupted_echo_is_detected() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let framer = RtuFramer::new(io).with_local_echo(true);
    let mut network = rtu::attach_framer(framer);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        req[2] ^= 0xFF;
        peer.write_all(&req).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let err = network
        .request(0x11, 0x03, Some(&req), None, &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EchoMismatch));

    server.await?;
    Ok(())
}

#[tokio::test]
async fn unexpected_echo_without_response() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let framer = RtuFramer::new(io).with_interframe_timeout(Duration::from_millis(5));
    let mut network = rtu::attach_framer(framer);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        // a loopback: the request comes back, nothing else
        peer.write_all(&req).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let err = network
        .request(
            0x11,
            0x03,
            Some(&req),
            None,
            &RequestOptions::new().expected_resp_len(6),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedEcho));

    server.await?;
    Ok(())
}

#[tokio::test]
async fn mismatched_function_code() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        peer.write_all(&rtu_frame(0x11, &[0x04, 0x02, 0x00, 0x01]))
            .await
            .unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let err = network
        .request(
            0x11,
            0x03,
            Some(&req),
            None,
            &RequestOptions::new().expected_resp_len(4),
        )
        .await
        .unwrap_err();
    match err {
        Error::Mismatch(e) => {
            assert_eq!(e.req.fn_code, 0x03);
            assert_eq!(e.resp.fn_code, 0x04);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(network.stats().invalid, 1);

    server.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn truncated_response_widens_interframe_timeout() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (io, mut peer) = tokio::io::duplex(512);
    let widened = Arc::new(AtomicBool::new(false));
    let widened_flag = Arc::clone(&widened);
    let framer = RtuFramer::new(io)
        .with_interframe_timeout(Duration::from_millis(5))
        .with_on_receive_error(Box::new(move |err| {
            if maybe_truncated(err) {
                widened_flag.store(true, Ordering::SeqCst);
                Some(Duration::from_millis(200))
            } else {
                None
            }
        }));
    let mut network = rtu::attach_framer(framer);

    let server = tokio::spawn(async move {
        let resp = rtu_frame(0x11, &[0x03, 0x02, 0x12, 0x34]);

        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        // all but the last byte; the tail never comes
        peer.write_all(&resp[..resp.len() - 1]).await.unwrap();

        peer.read_exact(&mut req).await.unwrap();
        // this time the tail is just slow
        peer.write_all(&resp[..4]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.write_all(&resp[4..]).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let opts = RequestOptions::new().expected_resp_len(4);

    let err = network
        .request(0x11, 0x03, Some(&req), None, &opts)
        .await
        .unwrap_err();
    assert!(maybe_truncated(&err), "unexpected error: {err:?}");
    assert!(widened.load(Ordering::SeqCst));

    let mut resp = RawResp::default();
    network
        .request(0x11, 0x03, Some(&req), Some(&mut resp), &opts)
        .await?;
    assert_eq!(resp.data, vec![0x02, 0x12, 0x34]);

    server.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn broadcast_sleeps_turnaround_delay() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);
    network.turnaround_delay = Duration::from_millis(40);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        assert_eq!(req[0], 0x00);
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let t0 = Instant::now();
    network
        .request(0x00, 0x06, Some(&req), None, &RequestOptions::new())
        .await?;
    assert!(Instant::now() - t0 >= Duration::from_millis(40));
    assert_eq!(network.stats().all, 1);

    server.await?;
    Ok(())
}

#[tokio::test]
async fn oversized_request_is_rejected() -> anyhow::Result<()> {
    let (io, _peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let req = RawReq(vec![0u8; 253]);
    let err = network
        .request(0x11, 0x10, Some(&req), None, &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MaxReqLenExceeded));
    Ok(())
}

#[tokio::test]
async fn max_sized_request_goes_out() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = vec![0u8; 256];
        peer.read_exact(&mut req).await.unwrap();
        peer.write_all(&rtu_frame(0x11, &[0x90, 0x04])).await.unwrap();
        peer
    });

    let req = RawReq(vec![0u8; 252]);
    let err = network
        .request(0x11, 0x10, Some(&req), None, &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Exception(Exception::DeviceFailure)
    ));

    server.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_on_timeout_grows_timeout_and_counts() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut n = 0;
        let mut req = [0u8; 8];
        while n < 3 && peer.read_exact(&mut req).await.is_ok() {
            n += 1;
        }
        (peer, n)
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let t0 = Instant::now();
    let err = network
        .request(
            0x11,
            0x03,
            Some(&req),
            None,
            &RequestOptions::new()
                .with_timeout(Duration::from_millis(100))
                .retry_on_timeout(2, Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
    // 100ms + 150ms + 200ms
    assert!(Instant::now() - t0 >= Duration::from_millis(450));
    assert_eq!(network.stats().timeout, 1);

    let (_peer, n) = server.await?;
    assert_eq!(n, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn wait_full_holds_the_bus() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        peer.write_all(&rtu_frame(0x11, &[0x03, 0x02, 0x00, 0x01]))
            .await
            .unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let t0 = Instant::now();
    network
        .request(
            0x11,
            0x03,
            Some(&req),
            None,
            &RequestOptions::new()
                .expected_resp_len(4)
                .wait_full(Duration::from_millis(500)),
        )
        .await?;
    assert!(Instant::now() - t0 >= Duration::from_millis(500));

    server.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn long_turnaround_admission_control() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        // two requests reach the wire, none is answered
        peer.read_exact(&mut req).await.unwrap();
        peer.read_exact(&mut req).await.unwrap();
        peer
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let opts = RequestOptions::new()
        .with_timeout(Duration::from_millis(100))
        .limit_long_turnaround(Duration::from_secs(1), Duration::from_millis(50));

    // the slow (unanswered) request arms the tracker
    let err = network
        .request(0x05, 0x03, Some(&req), None, &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));

    // inside the window: same and other addresses are rejected
    let err = network.request(0x05, 0x03, Some(&req), None, &opts).await.unwrap_err();
    assert!(matches!(err, Error::Rejected));
    let err = network.request(0x07, 0x03, Some(&req), None, &opts).await.unwrap_err();
    assert!(matches!(err, Error::Rejected));

    tokio::time::sleep(Duration::from_secs(2)).await;

    // one fairness rejection, then dispatch resumes
    let err = network.request(0x05, 0x03, Some(&req), None, &opts).await.unwrap_err();
    assert!(matches!(err, Error::Rejected));
    let err = network.request(0x05, 0x03, Some(&req), None, &opts).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));

    server.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_reception() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        peer.read_exact(&mut req).await.unwrap();
        peer
    });

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let req = RawReq(vec![0x00, 0x6B, 0x00, 0x01]);
    let t0 = Instant::now();
    let err = network
        .request(
            0x11,
            0x03,
            Some(&req),
            None,
            &RequestOptions::new()
                .with_timeout(Duration::from_secs(10))
                .with_cancel(cancel),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert!(Instant::now() - t0 < Duration::from_secs(1));

    server.await?;
    Ok(())
}

#[tokio::test]
async fn read_device_identification() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 7];
        peer.read_exact(&mut req).await.unwrap();
        assert_eq!(req.to_vec(), rtu_frame(0x11, &[0x2B, 0x0E, 0x04, 0x00]));

        let resp = rtu_frame(
            0x11,
            &[
                0x2B, 0x0E, 0x04, 0x83, 0x00, 0x00, 0x01, // header, one object
                0x00, 0x06, b'V', b'e', b'n', b'd', b'o', b'r',
            ],
        );
        // deliver in two parts; completion is detected in-band
        peer.write_all(&resp[..5]).await.unwrap();
        peer.write_all(&resp[5..]).await.unwrap();
        peer
    });

    let mut reader = modbus_master::did::Reader::new(network.device(0x11));
    let object = reader
        .read_object(modbus_master::did::ObjectId::VENDOR_NAME, &RequestOptions::new())
        .await?;
    assert_eq!(object.id.name(), Some("VendorName"));
    assert_eq!(object.as_str(), Some("Vendor"));

    server.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scan_finds_responding_devices() -> anyhow::Result<()> {
    let (io, mut peer) = tokio::io::duplex(512);
    let mut network = rtu::attach(io);

    let server = tokio::spawn(async move {
        let mut req = [0u8; 8];
        for _ in 0..3 {
            peer.read_exact(&mut req).await.unwrap();
            if req[0] == 0x02 {
                peer.write_all(&rtu_frame(0x02, &[0x03, 0x02, 0x00, 0x2A]))
                    .await
                    .unwrap();
            }
        }
        peer
    });

    struct Probe {
        found: Vec<SlaveId>,
    }

    #[async_trait]
    impl DeviceProbe for Probe {
        async fn probe(
            &mut self,
            slave: SlaveId,
            device: &mut modbus_master::device::Device<'_>,
        ) -> Result<(), Error> {
            let mut regs = [0u16; 1];
            let opts = RequestOptions::new().with_timeout(Duration::from_millis(50));
            device.read_holding_registers(0x0000, &mut regs, &opts).await?;
            self.found.push(slave);
            Ok(())
        }
    }

    let mut probe = Probe { found: Vec::new() };
    scan_devices(&mut network, 1, 3, &mut probe).await?;
    assert_eq!(probe.found, vec![2]);

    server.await?;
    Ok(())
}
