//! End-to-end tests over real TCP sockets
//!
//! A server is bound to an ephemeral loopback port and driven with raw
//! framed clients.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use stompframe_proto::{Command, Frame, StompCodec, headers};
use stompframe_server::{ConnectionRegistry, Server, ServerConfig};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_util::codec::Framed;

const STEP: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    _shutdown: oneshot::Sender<()>,
}

async fn start_server(config: ServerConfig) -> TestServer {
    let server = Server::bind(ServerConfig { bind_address: "127.0.0.1:0".to_string(), ..config })
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    TestServer { addr, registry, _shutdown: tx }
}

struct Client {
    framed: Framed<TcpStream, StompCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self { framed: Framed::new(stream, StompCodec::new()) }
    }

    async fn login(addr: SocketAddr, username: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send(
                Frame::new(Command::Connect, "")
                    .with_header(headers::LOGIN, username)
                    .with_header(headers::PASSCODE, "pw"),
            )
            .await;
        let reply = client.recv().await;
        assert_eq!(reply.command_enum(), Some(Command::Connected), "{reply:?}");
        client
    }

    async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.unwrap();
    }

    async fn recv(&mut self) -> Frame {
        timeout(STEP, self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap()
    }

    async fn assert_closed(&mut self) {
        let next = timeout(STEP, self.framed.next()).await.expect("timed out waiting for close");
        assert!(next.is_none(), "expected EOF, got {next:?}");
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(STEP, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn publish_subscribe_session_over_tcp() {
    let server = start_server(ServerConfig::default()).await;

    let mut alice = Client::login(server.addr, "alice").await;
    let mut bob = Client::login(server.addr, "bob").await;

    for (client, id) in [(&mut alice, "1"), (&mut bob, "2")] {
        client
            .send(
                Frame::new(Command::Subscribe, "")
                    .with_header(headers::DESTINATION, "/topic/chat")
                    .with_header(headers::ID, id)
                    .with_header(headers::RECEIPT, format!("sub-{id}")),
            )
            .await;
        let receipt = client.recv().await;
        assert_eq!(receipt.header(headers::RECEIPT_ID), Some(format!("sub-{id}").as_str()));
    }

    alice
        .send(Frame::new(Command::Send, "hello bob").with_header(headers::DESTINATION, "/topic/chat"))
        .await;

    let to_alice = alice.recv().await;
    let to_bob = bob.recv().await;
    assert_eq!(to_bob.command_enum(), Some(Command::Message));
    assert_eq!(to_bob.body(), "hello bob");
    assert_eq!(to_bob.header(headers::SUBSCRIPTION), Some("2"));
    assert_eq!(to_alice.header(headers::SUBSCRIPTION), Some("1"));
    assert_ne!(to_alice.header(headers::MESSAGE_ID), to_bob.header(headers::MESSAGE_ID));

    bob.send(Frame::new(Command::Disconnect, "").with_header(headers::RECEIPT, "bye")).await;
    let receipt = bob.recv().await;
    assert_eq!(receipt.command_enum(), Some(Command::Receipt));
    assert_eq!(receipt.header(headers::RECEIPT_ID), Some("bye"));
    bob.assert_closed().await;

    assert!(!server.registry.is_logged_in("bob"));
    assert_eq!(server.registry.subscriber_count("/topic/chat"), 1);
}

#[tokio::test]
async fn undecodable_input_gets_error_then_close() {
    let server = start_server(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream.write_all(b"SEND\nno-separator-here\n\nbody\0").await.unwrap();

    let mut client = Client { framed: Framed::new(stream, StompCodec::new()) };
    let error = client.recv().await;
    assert_eq!(error.command_enum(), Some(Command::Error));
    assert_eq!(error.header(headers::MESSAGE), Some("malformed frame received"));
    assert!(error.body().contains("no-separator-here"));
    client.assert_closed().await;
}

#[tokio::test]
async fn fatal_login_error_closes_socket() {
    let server = start_server(ServerConfig::default()).await;
    let _alice = Client::login(server.addr, "alice").await;

    let mut impostor = Client::connect(server.addr).await;
    impostor
        .send(
            Frame::new(Command::Connect, "")
                .with_header(headers::LOGIN, "alice")
                .with_header(headers::PASSCODE, "pw"),
        )
        .await;

    let error = impostor.recv().await;
    assert_eq!(error.header(headers::MESSAGE), Some("user already logged in"));
    impostor.assert_closed().await;
    assert!(server.registry.is_logged_in("alice"));
}

#[tokio::test]
async fn peer_loss_releases_login_and_subscriptions() {
    let server = start_server(ServerConfig::default()).await;

    let mut alice = Client::login(server.addr, "alice").await;
    alice
        .send(
            Frame::new(Command::Subscribe, "")
                .with_header(headers::DESTINATION, "/topic/a")
                .with_header(headers::ID, "1")
                .with_header(headers::RECEIPT, "r1"),
        )
        .await;
    alice.recv().await;
    drop(alice);

    let registry = Arc::clone(&server.registry);
    wait_until(|| !registry.is_logged_in("alice")).await;
    assert_eq!(registry.channel_count(), 0);

    // Same credentials work again
    let _again = Client::login(server.addr, "alice").await;
}

#[tokio::test]
async fn connections_over_limit_are_refused() {
    let server = start_server(ServerConfig { max_connections: 1, ..ServerConfig::default() }).await;

    let _first = Client::login(server.addr, "alice").await;

    let mut second = Client::connect(server.addr).await;
    let error = second.recv().await;
    assert_eq!(error.command_enum(), Some(Command::Error));
    assert_eq!(error.header(headers::MESSAGE), Some("too many connections"));
    second.assert_closed().await;
}

#[tokio::test]
async fn connection_limit_holds_when_sockets_open_before_login() {
    let server = start_server(ServerConfig { max_connections: 1, ..ServerConfig::default() }).await;

    // Every socket is accepted before any of them has registered
    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(Client::connect(server.addr).await);
    }

    let mut accepted = 0;
    for (i, client) in clients.iter_mut().enumerate() {
        let login = Frame::new(Command::Connect, "")
            .with_header(headers::LOGIN, format!("user-{i}"))
            .with_header(headers::PASSCODE, "pw");
        // Refused sockets may already be gone
        let _ = client.framed.send(login).await;

        match timeout(STEP, client.framed.next()).await.expect("timed out waiting for a reply") {
            Some(Ok(frame)) if frame.command_enum() == Some(Command::Connected) => accepted += 1,
            Some(Ok(frame)) => {
                assert_eq!(frame.header(headers::MESSAGE), Some("too many connections"));
            },
            Some(Err(_)) | None => {},
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(server.registry.connection_count(), 1);
}

#[tokio::test]
async fn subscriber_that_stops_reading_is_dropped() {
    let server = start_server(ServerConfig { outbound_capacity: 8, ..ServerConfig::default() }).await;

    let mut publisher = Client::login(server.addr, "pub").await;
    let mut slow = Client::login(server.addr, "slow").await;
    for (client, id) in [(&mut publisher, "1"), (&mut slow, "2")] {
        client
            .send(
                Frame::new(Command::Subscribe, "")
                    .with_header(headers::DESTINATION, "/topic/firehose")
                    .with_header(headers::ID, id)
                    .with_header(headers::RECEIPT, "sub"),
            )
            .await;
        client.recv().await;
    }

    // The slow client never reads again; socket buffers fill, then its queue
    let body = "x".repeat(32 * 1024);
    for _ in 0..2_000 {
        if !server.registry.is_logged_in("slow") {
            break;
        }
        publisher
            .send(
                Frame::new(Command::Send, body.as_str())
                    .with_header(headers::DESTINATION, "/topic/firehose"),
            )
            .await;
        let copy = publisher.recv().await;
        assert_eq!(copy.command_enum(), Some(Command::Message));
    }

    let registry = Arc::clone(&server.registry);
    wait_until(|| !registry.is_logged_in("slow")).await;
    assert!(registry.is_logged_in("pub"));
    assert_eq!(registry.subscriber_count("/topic/firehose"), 1);
    drop(slow);
}
