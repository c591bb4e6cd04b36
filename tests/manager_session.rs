//! Integration tests against a scripted in-process manager server.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use asterisk_manager_tokio::{
    wait_for_hangup, ActivityState, AmiError, ChannelName, DialActivity, HoldActivity,
    ManagerAction, ManagerClient, ManagerConnectOptions, ManagerEventStream, ParkActivity,
};

const BANNER: &str = "Asterisk Call Manager/5.0.4\r\n";

/// Scripted peer side of one manager session.
struct ServerConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ServerConn {
    async fn write(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
    }

    /// Read one action block, returning its fields keyed by lowercase name.
    async fn read_action(&mut self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await.unwrap();
            assert!(n > 0, "client closed mid-action");
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                return fields;
            }
            let (key, value) = line.split_once(':').expect("key: value line");
            fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    /// Read one action block and assert its name.
    async fn expect_action(&mut self, name: &str) -> HashMap<String, String> {
        let fields = self.read_action().await;
        assert_eq!(
            fields.get("action").map(|s| s.as_str()),
            Some(name),
            "unexpected action: {:?}",
            fields
        );
        fields
    }

    async fn send_block(&mut self, lines: &[&str]) {
        let mut block = String::new();
        for line in lines {
            block.push_str(line);
            block.push_str("\r\n");
        }
        block.push_str("\r\n");
        self.write(block.as_bytes()).await;
    }

    async fn send_success(&mut self, action_id: &str, extra: &[&str]) {
        let id_line = format!("ActionID: {}", action_id);
        let mut lines = vec!["Response: Success", id_line.as_str()];
        lines.extend_from_slice(extra);
        self.send_block(&lines).await;
    }

    /// Banner + login exchange.
    async fn handshake(&mut self) {
        self.write(BANNER.as_bytes()).await;
        let login = self.expect_action("Login").await;
        assert_eq!(login.get("username").map(|s| s.as_str()), Some("admin"));
        let id = login.get("actionid").cloned().unwrap();
        self.send_success(&id, &["Message: Authentication accepted"])
            .await;
    }
}

/// Spawn a scripted server; returns its port and the join handle so test
/// assertions inside the script propagate.
async fn spawn_server<F, Fut>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(ServerConn) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let conn = ServerConn {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        script(conn).await;
    });
    (port, handle)
}

fn test_options() -> ManagerConnectOptions {
    ManagerConnectOptions {
        action_timeout: Duration::from_secs(2),
        ..ManagerConnectOptions::default()
    }
}

async fn connect(port: u16) -> (ManagerClient, ManagerEventStream) {
    ManagerClient::connect_with_options("127.0.0.1", port, "admin", "secret", test_options())
        .await
        .expect("connect failed")
}

#[tokio::test]
async fn connect_login_and_ping() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        let ping = conn.expect_action("Ping").await;
        let id = ping.get("actionid").cloned().unwrap();
        conn.send_success(&id, &["Ping: Pong"]).await;
    })
    .await;

    let (client, _events) = connect(port).await;
    assert!(client.is_connected());
    assert_eq!(
        client.banner().map(|b| b.version().to_string()),
        Some("5.0.4".to_string())
    );
    client.ping().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn login_rejection_surfaces_as_auth_failure() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.write(BANNER.as_bytes()).await;
        let login = conn.expect_action("Login").await;
        let id = login.get("actionid").cloned().unwrap();
        conn.send_block(&[
            "Response: Error",
            &format!("ActionID: {}", id),
            "Message: Authentication failed",
        ])
        .await;
    })
    .await;

    let err = ManagerClient::connect_with_options(
        "127.0.0.1",
        port,
        "admin",
        "wrong",
        test_options(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AmiError::AuthenticationFailed { .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn hold_activity_reaches_succeeded() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        let hold = conn.expect_action("Hold").await;
        assert_eq!(hold.get("channel").map(|s| s.as_str()), Some("SIP/100-1"));
        let id = hold.get("actionid").cloned().unwrap();
        conn.send_success(&id, &[]).await;
    })
    .await;

    let (client, _events) = connect(port).await;

    let hold = HoldActivity::new("SIP/100-1");
    assert_eq!(hold.state(), ActivityState::Created);

    let response = hold.run(&client, Duration::from_secs(2)).await.unwrap();
    assert!(response.is_success());
    assert_eq!(hold.state(), ActivityState::Succeeded);
    server.await.unwrap();
}

#[tokio::test]
async fn hold_failure_reaches_failed() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        let hold = conn.expect_action("Hold").await;
        let id = hold.get("actionid").cloned().unwrap();
        conn.send_block(&[
            "Response: Error",
            &format!("ActionID: {}", id),
            "Message: No such channel",
        ])
        .await;
    })
    .await;

    let (client, _events) = connect(port).await;
    let hold = HoldActivity::new("SIP/999-1");
    let err = hold.run(&client, Duration::from_secs(2)).await.unwrap_err();
    assert!(matches!(err, AmiError::ActivityFailed { .. }));
    assert_eq!(hold.state(), ActivityState::Failed);
    server.await.unwrap();
}

#[tokio::test]
async fn park_activity_waits_for_parked_call_event() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        let park = conn.expect_action("Park").await;
        assert_eq!(park.get("channel").map(|s| s.as_str()), Some("SIP/100-1"));
        assert_eq!(park.get("timeout").map(|s| s.as_str()), Some("45000"));
        let id = park.get("actionid").cloned().unwrap();
        conn.send_success(&id, &[]).await;

        // An unrelated park first, then ours.
        conn.send_block(&[
            "Event: ParkedCall",
            "ParkeeChannel: SIP/999-7",
            "ParkingSpace: 700",
        ])
        .await;
        conn.send_block(&[
            "Event: ParkedCall",
            "ParkeeChannel: SIP/100-1",
            "ParkingSpace: 701",
        ])
        .await;
    })
    .await;

    let (client, _events) = connect(port).await;
    let park = ParkActivity::new("SIP/100-1").park_timeout(45_000);
    let event = park.run(&client, Duration::from_secs(2)).await.unwrap();
    assert_eq!(event.field("ParkingSpace"), Some("701"));
    assert_eq!(park.state(), ActivityState::Succeeded);
    server.await.unwrap();
}

async fn run_bridge_list(declared: usize) -> asterisk_manager_tokio::EventList {
    let (port, server) = spawn_server(move |mut conn| async move {
        conn.handshake().await;
        let action = conn.expect_action("BridgeList").await;
        let id = action.get("actionid").cloned().unwrap();
        conn.send_success(&id, &["EventList: start", "Message: Bridges will follow"])
            .await;
        for n in 0..3 {
            conn.send_block(&[
                "Event: BridgeListItem",
                &format!("ActionID: {}", id),
                &format!("BridgeUniqueid: bridge-{}", n),
                "BridgeNumChannels: 2",
            ])
            .await;
        }
        conn.send_block(&[
            "Event: BridgeListComplete",
            &format!("ActionID: {}", id),
            "EventList: Complete",
            &format!("ListItems: {}", declared),
        ])
        .await;
    })
    .await;

    let (client, _events) = connect(port).await;
    let list = client
        .send_list_action(ManagerAction::bridge_list(None))
        .await
        .unwrap();
    server.await.unwrap();
    list
}

#[tokio::test]
async fn bridge_list_collects_items_in_order() {
    let list = run_bridge_list(3).await;
    assert_eq!(list.items.len(), 3);
    assert_eq!(list.declared, Some(3));
    assert!(list.count_mismatch().is_none());
    for (n, item) in list.items.iter().enumerate() {
        assert_eq!(
            item.field("BridgeUniqueid"),
            Some(format!("bridge-{}", n).as_str())
        );
    }
}

#[tokio::test]
async fn list_count_mismatch_still_delivers_items() {
    let list = run_bridge_list(2).await;
    // All three items are returned; the inconsistency is reported, not
    // fatal.
    assert_eq!(list.items.len(), 3);
    assert_eq!(list.declared, Some(2));
    assert!(matches!(
        list.count_mismatch(),
        Some(AmiError::ListCountMismatch {
            declared: 2,
            received: 3
        })
    ));
}

#[tokio::test]
async fn execute_consults_the_registry_shape() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        let action = conn.expect_action("ParkedCalls").await;
        let id = action.get("actionid").cloned().unwrap();
        conn.send_success(&id, &["EventList: start"]).await;
        conn.send_block(&[
            "Event: ParkedCall",
            &format!("ActionID: {}", id),
            "ParkeeChannel: SIP/100-1",
            "ParkingSpace: 701",
        ])
        .await;
        conn.send_block(&[
            "Event: ParkedCallsComplete",
            &format!("ActionID: {}", id),
            "EventList: Complete",
            "ListItems: 1",
        ])
        .await;
    })
    .await;

    let (client, _events) = connect(port).await;
    // ParkedCalls is registered as a list action by default; execute picks
    // the shape up from the registry.
    let outcome = client
        .execute(ManagerAction::parked_calls())
        .await
        .unwrap();
    let asterisk_manager_tokio::ActionOutcome::List(list) = outcome else {
        panic!("expected a list outcome");
    };
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].field("ParkingSpace"), Some("701"));
    server.await.unwrap();
}

#[tokio::test]
async fn dial_unwinds_first_leg_when_second_fails() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;

        // Leg A comes up.
        let first = conn.expect_action("Originate").await;
        assert_eq!(first.get("channel").map(|s| s.as_str()), Some("SIP/100"));
        let id_a = first.get("actionid").cloned().unwrap();
        conn.send_success(&id_a, &[]).await;
        conn.send_block(&[
            "Event: OriginateResponse",
            &format!("ActionID: {}", id_a),
            "Response: Success",
            "Channel: SIP/100-00000001",
            "Uniqueid: 111.1",
        ])
        .await;

        // Leg B fails to originate.
        let second = conn.expect_action("Originate").await;
        assert_eq!(second.get("channel").map(|s| s.as_str()), Some("SIP/200"));
        let id_b = second.get("actionid").cloned().unwrap();
        conn.send_success(&id_b, &[]).await;
        conn.send_block(&[
            "Event: OriginateResponse",
            &format!("ActionID: {}", id_b),
            "Response: Failure",
            "Reason: 3",
        ])
        .await;

        // The activity must tear leg A down before reporting failure.
        let hangup = conn.expect_action("Hangup").await;
        assert_eq!(
            hangup.get("channel").map(|s| s.as_str()),
            Some("SIP/100-00000001")
        );
        let id_h = hangup.get("actionid").cloned().unwrap();
        conn.send_success(&id_h, &[]).await;
    })
    .await;

    let (client, _events) = connect(port).await;

    let dial = DialActivity::new("SIP/100", "SIP/200", "internal", "dial", 1);
    let err = dial.run(&client, Duration::from_secs(5)).await.unwrap_err();
    assert!(
        matches!(err, AmiError::ActivityFailed { .. }),
        "got {:?}",
        err
    );
    assert_eq!(dial.state(), ActivityState::Failed);
    server.await.unwrap();
}

#[tokio::test]
async fn dial_succeeds_with_both_legs() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        for (channel, unique_id) in [("SIP/100-00000001", "111.1"), ("SIP/200-00000002", "222.2")] {
            let action = conn.expect_action("Originate").await;
            let id = action.get("actionid").cloned().unwrap();
            conn.send_success(&id, &[]).await;
            conn.send_block(&[
                "Event: OriginateResponse",
                &format!("ActionID: {}", id),
                "Response: Success",
                &format!("Channel: {}", channel),
                &format!("Uniqueid: {}", unique_id),
            ])
            .await;
        }
    })
    .await;

    let (client, _events) = connect(port).await;
    let dial = DialActivity::new("SIP/100", "SIP/200", "internal", "dial", 1);
    let result = dial.run(&client, Duration::from_secs(5)).await.unwrap();
    assert_eq!(dial.state(), ActivityState::Succeeded);
    assert_eq!(result.legs.len(), 2);
    assert_eq!(result.legs[0].channel.as_str(), "SIP/100-00000001");
    assert_eq!(result.legs[1].unique_id.as_deref(), Some("222.2"));
    server.await.unwrap();
}

#[tokio::test]
async fn timed_out_activity_leaves_no_listener_behind() {
    let (port, _server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        // Never send the hangup; keep the socket open long enough for the
        // activity to time out.
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;

    let (client, _events) = connect(port).await;
    // Baseline: the passive event stream's own wildcard listener.
    let baseline = client.dispatcher().len();

    let err = wait_for_hangup(
        &client,
        &ChannelName::new("SIP/100-1"),
        Duration::from_millis(100),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AmiError::ActivityTimedOut { .. }));

    // The registration must be gone from the dispatcher.
    assert_eq!(client.dispatcher().len(), baseline);
}

#[tokio::test]
async fn events_flow_to_stream_in_wire_order() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        for n in 0..5 {
            conn.send_block(&["Event: Newchannel", &format!("Channel: SIP/{}-1", n)])
                .await;
        }
    })
    .await;

    let (_client, mut events) = connect(port).await;
    for n in 0..5 {
        let event = events.recv().await.unwrap();
        assert_eq!(event.name(), "Newchannel");
        assert_eq!(
            event.field("Channel"),
            Some(format!("SIP/{}-1", n).as_str())
        );
    }
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_block_does_not_kill_session() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        // A block that opens with neither Response nor Event.
        conn.send_block(&["Bogus: nonsense", "More: junk"]).await;
        conn.send_block(&["Event: FullyBooted"]).await;
        let ping = conn.expect_action("Ping").await;
        let id = ping.get("actionid").cloned().unwrap();
        conn.send_success(&id, &["Ping: Pong"]).await;
    })
    .await;

    let (client, mut events) = connect(port).await;
    let event = events.recv().await.unwrap();
    assert_eq!(event.name(), "FullyBooted");
    client.ping().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn compression_switch_preserves_event_flow() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        let action = conn.expect_action("ProxyCompression").await;
        assert_eq!(action.get("type").map(|s| s.as_str()), Some("gzip"));
        let id = action.get("actionid").cloned().unwrap();

        // Everything after the success response is gzip. Ship the response
        // and the head of the compressed stream in one write so the switch
        // has buffered-but-unconsumed bytes to rescue.
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(
                b"Event: Newchannel\r\nChannel: SIP/100-1\r\n\r\n\
                  Event: Hangup\r\nChannel: SIP/100-1\r\nCause: 16\r\n\r\n",
            )
            .unwrap();
        let compressed = encoder.finish().unwrap();
        let (head, tail) = compressed.split_at(compressed.len() / 2);

        let mut first = format!("Response: Success\r\nActionID: {}\r\n\r\n", id).into_bytes();
        first.extend_from_slice(head);
        conn.write(&first).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.write(tail).await;
    })
    .await;

    let (client, mut events) = connect(port).await;
    client.activate_compression().await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.name(), "Newchannel");
    let event = events.recv().await.unwrap();
    assert_eq!(event.name(), "Hangup");
    assert_eq!(event.field("Cause"), Some("16"));
    server.await.unwrap();
}

#[tokio::test]
async fn connection_loss_fails_pending_and_waiting() {
    let (port, server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        // Swallow one action, then drop the connection without replying.
        let _ = conn.read_action().await;
    })
    .await;

    let (client, mut events) = connect(port).await;

    let waiting_client = client.clone();
    let waiter = tokio::spawn(async move {
        wait_for_hangup(
            &waiting_client,
            &ChannelName::new("SIP/100-1"),
            Duration::from_secs(30),
        )
        .await
    });
    // Let the waiter register before the connection goes down.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, AmiError::ConnectionClosed));

    // The waiting activity is released by the synthetic Disconnect event —
    // long before its 30 second deadline.
    let err = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, AmiError::ConnectionClosed));

    // The stream sees the synthetic Disconnect last, then ends.
    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }
    assert_eq!(last.map(|e| e.name().to_string()), Some("Disconnect".into()));
    assert!(!client.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn action_timeout_removes_pending_entry() {
    let (port, _server) = spawn_server(|mut conn| async move {
        conn.handshake().await;
        // Swallow the action and never answer.
        let _ = conn.read_action().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;

    let options = ManagerConnectOptions {
        action_timeout: Duration::from_millis(100),
        ..ManagerConnectOptions::default()
    };
    let (client, _events) =
        ManagerClient::connect_with_options("127.0.0.1", port, "admin", "secret", options)
            .await
            .unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(
        err,
        AmiError::ActionTimeout { timeout_ms: 100, .. }
    ));
    // Still connected: an action timeout is local to that action.
    assert!(client.is_connected());
}
