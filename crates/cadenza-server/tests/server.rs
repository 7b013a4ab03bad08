//! End-to-end tests: a real server on a loopback socket, driven by
//! scripted clients speaking the binary protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cadenza_protocol::{
    read_message, write_message, ClientCommand, ClientRoomState, CompactPos, Message, RoomState,
    ServerCommand, TouchFrame, UserInfo,
};
use cadenza_server::{
    AuthInfo, Chart, Language, Lookup, LookupError, Record, Server, ServerConfig, ServerState,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =========================================================================
// Test lookup
// =========================================================================

/// Tokens look like `t<id>`; names are A, B, C, ... by id. Chart 404 does
/// not exist; records are deterministic per player.
#[derive(Debug, Clone, Copy, Default)]
struct TestLookup;

fn name_for(id: i32) -> String {
    char::from_u32('A' as u32 + (id - 1).max(0) as u32 % 26)
        .unwrap()
        .to_string()
}

impl Lookup for TestLookup {
    async fn authenticate(&self, token: &str) -> Result<AuthInfo, LookupError> {
        let id: i32 = token
            .strip_prefix('t')
            .and_then(|rest| rest.parse().ok())
            .ok_or_else(|| LookupError::Rejected("invalid token".into()))?;
        Ok(AuthInfo {
            id,
            name: name_for(id),
            lang: Language::default(),
        })
    }

    async fn chart(&self, id: i32) -> Result<Chart, LookupError> {
        if id == 404 {
            return Err(LookupError::Rejected("bad-chart".into()));
        }
        Ok(Chart {
            id,
            name: format!("Song{id}"),
        })
    }

    async fn record(&self, chart: i32, player: i32) -> Result<Record, LookupError> {
        Ok(Record {
            player,
            chart,
            score: 900_000 + player,
            perfect: 800,
            good: 40,
            bad: 5,
            miss: 3,
            max_combo: 512,
            accuracy: 0.95,
            full_combo: false,
            std_dev: 21.5,
            std_score: 912_345.0,
        })
    }
}

// =========================================================================
// Harness
// =========================================================================

async fn start_server(config: ServerConfig) -> (SocketAddr, Arc<ServerState<TestLookup>>) {
    let server = Server::bind(("127.0.0.1", 0), config, TestLookup)
        .await
        .expect("bind");
    let addr = server.local_addr().expect("local addr");
    let state = server.state();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, state)
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connects and sends the protocol version byte.
    async fn connect(addr: SocketAddr) -> Self {
        use tokio::io::AsyncWriteExt;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        stream.write_all(&[1]).await.expect("version byte");
        Self { stream }
    }

    async fn send(&mut self, command: &ClientCommand) {
        write_message(&mut self.stream, command).await.expect("send");
    }

    /// Next command, skipping keep-alive pongs.
    async fn recv(&mut self) -> ServerCommand {
        loop {
            let command = timeout(RECV_TIMEOUT, read_message(&mut self.stream))
                .await
                .expect("recv timed out")
                .expect("protocol error")
                .expect("connection closed");
            if command != ServerCommand::Pong {
                return command;
            }
        }
    }

    /// Reads until `pred` matches, returning everything read including the
    /// matching command.
    async fn recv_until(&mut self, pred: impl Fn(&ServerCommand) -> bool) -> Vec<ServerCommand> {
        let mut seen = Vec::new();
        loop {
            let command = self.recv().await;
            let done = pred(&command);
            seen.push(command);
            if done {
                return seen;
            }
        }
    }

    /// Asserts that nothing (beyond keep-alive) arrives within `window`.
    async fn expect_silence(&mut self, window: Duration) {
        match timeout(window, read_message::<_, ServerCommand>(&mut self.stream)).await {
            Err(_) => {}
            Ok(Ok(Some(ServerCommand::Pong))) => {}
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }

    /// Asserts the server closed this connection.
    async fn expect_closed(&mut self) {
        loop {
            match timeout(RECV_TIMEOUT, read_message::<_, ServerCommand>(&mut self.stream))
                .await
                .expect("close timed out")
            {
                Ok(Some(ServerCommand::Pong)) => continue,
                Ok(Some(other)) => panic!("expected close, got {other:?}"),
                Ok(None) | Err(_) => return,
            }
        }
    }

    async fn authenticate(&mut self, token: &str) -> (UserInfo, Option<ClientRoomState>) {
        self.send(&ClientCommand::Authenticate {
            token: token.into(),
        })
        .await;
        match self.recv().await {
            ServerCommand::Authenticate(Ok(reply)) => reply,
            other => panic!("authentication failed: {other:?}"),
        }
    }
}

fn assert_before(
    seen: &[ServerCommand],
    first: impl Fn(&ServerCommand) -> bool,
    second: impl Fn(&ServerCommand) -> bool,
    what: &str,
) {
    let a = seen.iter().position(first).unwrap_or_else(|| panic!("missing first event: {what}"));
    let b = seen
        .iter()
        .position(second)
        .unwrap_or_else(|| panic!("missing second event: {what}"));
    assert!(a < b, "wrong order: {what}");
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn test_happy_path_create_and_play() {
    let (addr, _state) = start_server(ServerConfig::default()).await;

    let mut c1 = TestClient::connect(addr).await;
    let (info, room) = c1.authenticate("t1").await;
    assert_eq!(info.id, 1);
    assert_eq!(info.name, "A");
    assert!(room.is_none());

    c1.send(&ClientCommand::CreateRoom { id: "R1".parse().unwrap() }).await;
    assert_eq!(c1.recv().await, ServerCommand::CreateRoom(Ok(())));
    assert_eq!(
        c1.recv().await,
        ServerCommand::Message(Message::CreateRoom { user: 1 })
    );

    let mut c2 = TestClient::connect(addr).await;
    let (info2, _) = c2.authenticate("t2").await;
    assert_eq!(info2.id, 2);
    c2.send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: false }).await;
    match c2.recv().await {
        ServerCommand::JoinRoom(Ok(response)) => {
            assert_eq!(response.state, RoomState::SelectChart(None));
            assert_eq!(response.users.len(), 2);
        }
        other => panic!("expected join ok, got {other:?}"),
    }
    // The creator observes the join.
    let seen = c1
        .recv_until(|c| matches!(c, ServerCommand::Message(Message::JoinRoom { user: 2, .. })))
        .await;
    assert!(seen.iter().any(|c| matches!(c, ServerCommand::OnJoinRoom(u) if u.id == 2)));

    // Host selects the chart; everyone sees the selection then the state.
    c1.send(&ClientCommand::SelectChart { id: 42 }).await;
    let seen = c1
        .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42)))))
        .await;
    assert_eq!(seen[0], ServerCommand::SelectChart(Ok(())), "ack first");
    assert_before(
        &seen,
        |c| matches!(c, ServerCommand::Message(Message::SelectChart { id: 42, .. })),
        |c| matches!(c, ServerCommand::ChangeState(_)),
        "chart message before state",
    );
    c2.recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42)))))
        .await;

    // Host requests the start.
    c1.send(&ClientCommand::RequestStart).await;
    let seen = c1
        .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::WaitingForReady)))
        .await;
    assert_eq!(seen[0], ServerCommand::RequestStart(Ok(())));
    assert_before(
        &seen,
        |c| matches!(c, ServerCommand::Message(Message::GameStart { user: 1 })),
        |c| matches!(c, ServerCommand::ChangeState(_)),
        "game start before state",
    );
    c2.recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::WaitingForReady)))
        .await;

    // Both ready up; the second Ready tips the room into Playing. The
    // second client sees the first one's Ready broadcast before its own
    // ack, so both scan rather than expect an exact next command.
    c1.send(&ClientCommand::Ready).await;
    assert_eq!(c1.recv().await, ServerCommand::Ready(Ok(())));
    c2.send(&ClientCommand::Ready).await;
    let seen = c2
        .recv_until(|c| matches!(c, ServerCommand::Ready(_)))
        .await;
    assert!(matches!(seen.last(), Some(ServerCommand::Ready(Ok(())))));

    for client in [&mut c1, &mut c2] {
        let seen = client
            .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::Playing)))
            .await;
        assert_before(
            &seen,
            |c| matches!(c, ServerCommand::Message(Message::StartPlaying)),
            |c| matches!(c, ServerCommand::ChangeState(RoomState::Playing)),
            "start playing before playing state",
        );
    }

    // Both report their runs; the game ends back in chart selection with
    // the chart retained.
    c1.send(&ClientCommand::Played { id: 42 }).await;
    assert_eq!(c1.recv().await, ServerCommand::Played(Ok(())));
    c2.send(&ClientCommand::Played { id: 42 }).await;
    let seen = c2
        .recv_until(|c| matches!(c, ServerCommand::Played(_)))
        .await;
    assert!(matches!(seen.last(), Some(ServerCommand::Played(Ok(())))));
    assert!(seen.iter().any(|c| matches!(
        c,
        ServerCommand::Message(Message::Played { user: 1, score: 900_001, .. })
    )));

    let seen = c1
        .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42)))))
        .await;
    assert_before(
        &seen,
        |c| matches!(c, ServerCommand::Message(Message::GameEnd)),
        |c| matches!(c, ServerCommand::ChangeState(_)),
        "game end before selection state",
    );
    assert!(seen.iter().any(|c| matches!(
        c,
        ServerCommand::Message(Message::Played { user: 2, score: 900_002, .. })
    )));

    let seen = c2
        .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42)))))
        .await;
    assert_before(
        &seen,
        |c| matches!(c, ServerCommand::Message(Message::GameEnd)),
        |c| matches!(c, ServerCommand::ChangeState(_)),
        "game end before selection state",
    );
}

#[tokio::test]
async fn test_room_full_rejects_ninth_member() {
    let (addr, _state) = start_server(ServerConfig::default()).await;

    let mut host = TestClient::connect(addr).await;
    host.authenticate("t1").await;
    host.send(&ClientCommand::CreateRoom { id: "R1".parse().unwrap() }).await;
    assert_eq!(host.recv().await, ServerCommand::CreateRoom(Ok(())));

    let mut members = Vec::new();
    for id in 2..=8 {
        let mut client = TestClient::connect(addr).await;
        client.authenticate(&format!("t{id}")).await;
        client
            .send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: false })
            .await;
        assert!(
            matches!(client.recv().await, ServerCommand::JoinRoom(Ok(_))),
            "member {id} should fit"
        );
        members.push(client);
    }

    let mut ninth = TestClient::connect(addr).await;
    ninth.authenticate("t9").await;
    ninth
        .send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: false })
        .await;
    match ninth.recv().await {
        ServerCommand::JoinRoom(Err(error)) => assert_eq!(error, "room-full"),
        other => panic!("expected room-full, got {other:?}"),
    }
}

#[tokio::test]
async fn test_host_disconnect_mid_play() {
    let config = ServerConfig {
        dangle_grace_secs: 0,
        ..ServerConfig::default()
    };
    let (addr, _state) = start_server(config).await;

    let mut c1 = TestClient::connect(addr).await;
    c1.authenticate("t1").await;
    c1.send(&ClientCommand::CreateRoom { id: "R1".parse().unwrap() }).await;
    let mut c2 = TestClient::connect(addr).await;
    c2.authenticate("t2").await;
    c2.send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: false }).await;
    let mut c3 = TestClient::connect(addr).await;
    c3.authenticate("t3").await;
    c3.send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: false }).await;

    c1.send(&ClientCommand::SelectChart { id: 7 }).await;
    c1.send(&ClientCommand::RequestStart).await;
    for client in [&mut c1, &mut c2, &mut c3] {
        client.send(&ClientCommand::Ready).await;
    }
    for client in [&mut c1, &mut c2, &mut c3] {
        client
            .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::Playing)))
            .await;
    }

    // The host's socket dies mid-game.
    drop(c1);

    // The survivors observe the departure and a host handover.
    let mut new_host_id = None;
    for client in [&mut c2, &mut c3] {
        let seen = client
            .recv_until(|c| matches!(c, ServerCommand::Message(Message::NewHost { .. })))
            .await;
        assert!(seen.iter().any(|c| matches!(
            c,
            ServerCommand::Message(Message::LeaveRoom { user: 1, .. })
        )));
        if let Some(ServerCommand::Message(Message::NewHost { user })) = seen.last() {
            new_host_id = Some(*user);
        }
    }
    let new_host_id = new_host_id.expect("new host announced");
    assert!(new_host_id == 2 || new_host_id == 3);
    let elected = if new_host_id == 2 { &mut c2 } else { &mut c3 };
    assert_eq!(elected.recv().await, ServerCommand::ChangeHost(true));

    // The remaining members finish; the round ends without the host.
    c2.send(&ClientCommand::Played { id: 7 }).await;
    c3.send(&ClientCommand::Abort).await;
    for client in [&mut c2, &mut c3] {
        let seen = client
            .recv_until(|c| {
                matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(7))))
            })
            .await;
        assert!(seen.iter().any(|c| matches!(c, ServerCommand::Message(Message::GameEnd))));
    }
}

#[tokio::test]
async fn test_oversized_frame_kills_session() {
    use tokio::io::AsyncWriteExt;
    let (addr, state) = start_server(ServerConfig::default()).await;

    let mut client = TestClient::connect(addr).await;
    client.authenticate("t1").await;
    assert_eq!(state.sessions.read().await.len(), 1);

    // A length prefix far above the cap, with no payload behind it.
    client
        .stream
        .write_all(&(8 * 1024 * 1024u32).to_le_bytes())
        .await
        .expect("write prefix");

    client.expect_closed().await;
    // One reaper cycle later the registry entry is gone.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(state.sessions.read().await.is_empty());
}

#[tokio::test]
async fn test_reconnect_preserves_room() {
    let (addr, _state) = start_server(ServerConfig::default()).await;

    let mut c7 = TestClient::connect(addr).await;
    c7.authenticate("t7").await;
    c7.send(&ClientCommand::CreateRoom { id: "R1".parse().unwrap() }).await;
    assert_eq!(c7.recv().await, ServerCommand::CreateRoom(Ok(())));

    // The socket dies without a LeaveRoom.
    drop(c7);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Reconnecting with the same token restores the membership snapshot.
    let mut again = TestClient::connect(addr).await;
    let (info, snapshot) = again.authenticate("t7").await;
    assert_eq!(info.id, 7);
    let snapshot = snapshot.expect("room snapshot on reconnect");
    assert_eq!(snapshot.id, "R1".parse().unwrap());
    assert!(snapshot.is_host);
    assert_eq!(snapshot.state, RoomState::SelectChart(None));
    assert!(snapshot.users.contains_key(&7));
}

#[tokio::test]
async fn test_touch_stream_reaches_monitors_only() {
    let config = ServerConfig {
        monitors: vec![3],
        ..ServerConfig::default()
    };
    let (addr, _state) = start_server(config).await;

    let mut c1 = TestClient::connect(addr).await;
    c1.authenticate("t1").await;
    c1.send(&ClientCommand::CreateRoom { id: "R1".parse().unwrap() }).await;
    let mut c2 = TestClient::connect(addr).await;
    c2.authenticate("t2").await;
    c2.send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: false }).await;
    let mut c3 = TestClient::connect(addr).await;
    c3.authenticate("t3").await;
    c3.send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: true }).await;
    assert!(matches!(c3.recv().await, ServerCommand::JoinRoom(Ok(_))));

    // Into Playing: everyone (monitor included) must ready up.
    c1.send(&ClientCommand::SelectChart { id: 42 }).await;
    c1.send(&ClientCommand::RequestStart).await;
    for client in [&mut c1, &mut c2, &mut c3] {
        client.send(&ClientCommand::Ready).await;
    }
    for client in [&mut c1, &mut c2, &mut c3] {
        client
            .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::Playing)))
            .await;
    }

    let frames = vec![
        TouchFrame {
            time: 0.5,
            points: vec![(0, CompactPos::new(0.25, 0.75))],
        },
        TouchFrame {
            time: 0.55,
            points: vec![(0, CompactPos::new(0.3, 0.7)), (1, CompactPos::new(-0.5, 0.0))],
        },
    ];
    c1.send(&ClientCommand::Touches { frames: frames.clone() }).await;

    // The monitor receives the tagged relay.
    match c3.recv().await {
        ServerCommand::Touches { player, frames: relayed } => {
            assert_eq!(player, 1);
            assert_eq!(relayed, frames);
        }
        other => panic!("expected touch relay, got {other:?}"),
    }
    // The co-player and the sender receive nothing.
    c2.expect_silence(Duration::from_millis(300)).await;
    c1.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_chart_lookup_failure_is_reported_not_fatal() {
    let (addr, _state) = start_server(ServerConfig::default()).await;
    let mut c1 = TestClient::connect(addr).await;
    c1.authenticate("t1").await;
    c1.send(&ClientCommand::CreateRoom { id: "R1".parse().unwrap() }).await;
    c1.recv_until(|c| matches!(c, ServerCommand::Message(Message::CreateRoom { .. })))
        .await;

    c1.send(&ClientCommand::SelectChart { id: 404 }).await;
    match c1.recv().await {
        ServerCommand::SelectChart(Err(error)) => assert_eq!(error, "bad-chart"),
        other => panic!("expected lookup failure, got {other:?}"),
    }

    // The session survives and the room state is untouched.
    c1.send(&ClientCommand::SelectChart { id: 42 }).await;
    assert_eq!(c1.recv().await, ServerCommand::SelectChart(Ok(())));
}

#[tokio::test]
async fn test_bad_auth_token_closes_connection() {
    let (addr, _state) = start_server(ServerConfig::default()).await;
    let mut client = TestClient::connect(addr).await;
    client
        .send(&ClientCommand::Authenticate { token: "garbage".into() })
        .await;
    match client.recv().await {
        ServerCommand::Authenticate(Err(error)) => assert_eq!(error, "invalid token"),
        other => panic!("expected rejection, got {other:?}"),
    }
    client.expect_closed().await;
}

#[tokio::test]
async fn test_command_before_auth_closes_connection() {
    let (addr, state) = start_server(ServerConfig::default()).await;
    let mut client = TestClient::connect(addr).await;
    client.send(&ClientCommand::Ping).await;
    client.expect_closed().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(state.sessions.read().await.is_empty());
}

#[tokio::test]
async fn test_cycle_mode_rotates_host_after_game() {
    let (addr, _state) = start_server(ServerConfig::default()).await;

    let mut c1 = TestClient::connect(addr).await;
    c1.authenticate("t1").await;
    c1.send(&ClientCommand::CreateRoom { id: "R1".parse().unwrap() }).await;
    let mut c2 = TestClient::connect(addr).await;
    c2.authenticate("t2").await;
    c2.send(&ClientCommand::JoinRoom { id: "R1".parse().unwrap(), monitor: false }).await;

    c1.send(&ClientCommand::CycleRoom { cycle: true }).await;
    c1.send(&ClientCommand::SelectChart { id: 42 }).await;
    c1.send(&ClientCommand::RequestStart).await;
    for client in [&mut c1, &mut c2] {
        client.send(&ClientCommand::Ready).await;
    }
    for client in [&mut c1, &mut c2] {
        client
            .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::Playing)))
            .await;
    }
    c1.send(&ClientCommand::Played { id: 42 }).await;
    c2.send(&ClientCommand::Played { id: 42 }).await;

    // After the round the host role moves from 1 to 2, announced before
    // the return to chart selection.
    let seen = c1
        .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42)))))
        .await;
    assert_before(
        &seen,
        |c| matches!(c, ServerCommand::Message(Message::NewHost { user: 2 })),
        |c| matches!(c, ServerCommand::ChangeState(_)),
        "host rotation before selection state",
    );
    assert!(seen.contains(&ServerCommand::ChangeHost(false)));

    let seen = c2
        .recv_until(|c| matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42)))))
        .await;
    assert!(seen.contains(&ServerCommand::ChangeHost(true)));

    // The rotated host can now select a chart; the old host cannot.
    c2.send(&ClientCommand::SelectChart { id: 43 }).await;
    assert_eq!(c2.recv().await, ServerCommand::SelectChart(Ok(())));
    c1.send(&ClientCommand::SelectChart { id: 44 }).await;
    let seen = c1
        .recv_until(|c| matches!(c, ServerCommand::SelectChart(_)))
        .await;
    assert!(matches!(
        seen.last(),
        Some(ServerCommand::SelectChart(Err(e))) if e == "not-host"
    ));
}
