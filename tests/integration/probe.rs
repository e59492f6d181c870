use std::time::Duration;

use rtt_core::wire::{ACK_BYTE, DECOY_MARKER};

use crate::*;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_primary_session_writes_one_record() {
    let stack = Stack::start().await.unwrap();

    assert_eq!(probe_handshake(stack.probe_addr).await.unwrap(), ACK_BYTE);
    let record = stack.wait_for_record("127.0.0.1", WAIT).await.unwrap();

    assert!(record.kernel_rtt_us > 0 || record.kernel_rttvar_us > 0);
    assert_eq!(record.kernel_rtt_ms, f64::from(record.kernel_rtt_us) / 1000.0);
    // Frankfurt to Las Vegas.
    assert!(
        (8_500.0..9_500.0).contains(&record.distance_to_server_km),
        "distance {}",
        record.distance_to_server_km
    );

    assert_eq!(record.path.measurement_id, "it-1");
    // Upper middle of [30, 40].
    assert_eq!(record.path.path_rtt_ms, 40.0);
    assert_eq!(record.path.probes.len(), 2);
    assert_eq!(record.path.probes[0].hop_count, 2);
    assert_eq!(record.path.raw_outputs.len(), 2);
    assert_eq!(stack.cache.len(), 1);
}

#[tokio::test]
async fn test_ladder_widens_from_city_to_region() {
    let stack = Stack::start().await.unwrap();

    probe_handshake(stack.probe_addr).await.unwrap();
    stack.wait_for_record("127.0.0.1", WAIT).await.unwrap();

    let subs = stack.globalping.submissions();
    assert_eq!(subs.len(), 2, "{subs:?}");
    assert_eq!(subs[0]["locations"][0]["city"], "Frankfurt am Main");
    assert_eq!(subs[1]["locations"][0]["magic"], "Hesse");
    for sub in &subs {
        assert_eq!(sub["type"], "traceroute");
        assert_eq!(sub["target"], TARGET);
        assert_eq!(sub["limit"], 3);
        assert_eq!(sub["measurementOptions"]["protocol"], "TCP");
        assert_eq!(sub["measurementOptions"]["port"], 9000);
    }
}

#[tokio::test]
async fn test_repeat_session_inside_cooldown_reuses_measurement() {
    let stack = Stack::start().await.unwrap();

    probe_handshake(stack.probe_addr).await.unwrap();
    let first = stack.wait_for_record("127.0.0.1", WAIT).await.unwrap();

    probe_handshake(stack.probe_addr).await.unwrap();
    let deadline = tokio::time::Instant::now() + WAIT;
    let second = loop {
        let rec = stack.cache.get("127.0.0.1").unwrap();
        if rec.updated_at > first.updated_at {
            break rec;
        }
        assert!(tokio::time::Instant::now() < deadline, "second record never written");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(second.path, first.path);
    assert_eq!(stack.globalping.submissions().len(), 2);
    assert_eq!(stack.cache.len(), 1);
}

#[tokio::test]
async fn test_mux_decoy_is_echoed() {
    let stack = Stack::start().await.unwrap();

    let reply = send_and_drain(stack.mux_addr, DECOY_MARKER).await.unwrap();
    assert_eq!(reply, vec![DECOY_MARKER]);

    tokio::time::sleep(CLASSIFY * 2).await;
    assert!(stack.cache.is_empty());
    assert!(stack.globalping.submissions().is_empty());
}

#[tokio::test]
async fn test_mux_silent_client_becomes_probe() {
    let stack = Stack::start().await.unwrap();

    let mut stream = TcpStream::connect(stack.mux_addr).await.unwrap();
    tokio::time::sleep(CLASSIFY * 2).await;
    stream.write_all(&[0x07]).await.unwrap();
    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], ACK_BYTE);

    let record = stack.wait_for_record("127.0.0.1", WAIT).await.unwrap();
    assert_eq!(record.path.measurement_id, "it-1");
}

#[tokio::test]
async fn test_mux_rejects_other_first_byte() {
    let stack = Stack::start().await.unwrap();

    let reply = send_and_drain(stack.mux_addr, 0x16).await.unwrap();
    assert!(reply.is_empty());

    tokio::time::sleep(CLASSIFY * 2).await;
    assert!(stack.cache.is_empty());
}
