//! Shared helpers for dispatcher-level tests.
//!
//! A [`TestClient`] is a dispatcher wired to a real [`ChannelHandler`] whose
//! receiving end the test drains instead of a socket writer.

#![allow(dead_code)]

use std::sync::Arc;

use stompframe_proto::{Command, Frame, headers};
use stompframe_server::{
    ChannelHandler, CommandDispatcher, ConnectionId, ConnectionRegistry, DispatcherConfig,
    Outbound,
};
use tokio::sync::mpsc::Receiver;

/// One simulated connection.
pub struct TestClient {
    pub dispatcher: CommandDispatcher<ConnectionRegistry>,
    handler: Arc<ChannelHandler>,
    outbound: Receiver<Outbound>,
}

impl TestClient {
    /// Connection with the default dispatcher policy.
    pub fn new(registry: &Arc<ConnectionRegistry>, connection_id: ConnectionId) -> Self {
        Self::with_config(registry, connection_id, DispatcherConfig::default())
    }

    pub fn with_config(
        registry: &Arc<ConnectionRegistry>,
        connection_id: ConnectionId,
        config: DispatcherConfig,
    ) -> Self {
        let (handler, outbound) = ChannelHandler::new(connection_id);
        let handler = Arc::new(handler);
        let dispatcher =
            CommandDispatcher::start(connection_id, Arc::clone(registry), handler.clone(), config)
                .unwrap();

        Self { dispatcher, handler, outbound }
    }

    /// Connection logged in as `username`, with its CONNECTED reply drained.
    pub fn logged_in(
        registry: &Arc<ConnectionRegistry>,
        connection_id: ConnectionId,
        username: &str,
    ) -> Self {
        let mut client = Self::new(registry, connection_id);
        client.process(connect(username, "secret"));
        let replies = client.frames();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].command_enum(), Some(Command::Connected));
        client
    }

    pub fn process(&mut self, frame: Frame) {
        self.dispatcher.process(frame);
    }

    /// Everything enqueued since the last drain, close markers included.
    pub fn outbound(&mut self) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = self.outbound.try_recv() {
            items.push(item);
        }
        items
    }

    /// Frames enqueued since the last drain.
    pub fn frames(&mut self) -> Vec<Frame> {
        self.outbound()
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Frame(frame) => Some(frame),
                Outbound::Close => None,
            })
            .collect()
    }

    /// Exactly one frame must be pending; return it.
    pub fn single_frame(&mut self) -> Frame {
        let mut frames = self.frames();
        assert_eq!(frames.len(), 1, "expected one frame, got {frames:?}");
        frames.remove(0)
    }

    pub fn is_closed(&self) -> bool {
        self.handler.is_closed()
    }
}

pub fn connect(login: &str, passcode: &str) -> Frame {
    Frame::new(Command::Connect, "")
        .with_header(headers::LOGIN, login)
        .with_header(headers::PASSCODE, passcode)
        .with_header("accept-version", "1.2")
}

pub fn subscribe(destination: &str, id: &str, receipt: &str) -> Frame {
    Frame::new(Command::Subscribe, "")
        .with_header(headers::DESTINATION, destination)
        .with_header(headers::ID, id)
        .with_header(headers::RECEIPT, receipt)
}

pub fn unsubscribe(id: &str, receipt: &str) -> Frame {
    Frame::new(Command::Unsubscribe, "")
        .with_header(headers::ID, id)
        .with_header(headers::RECEIPT, receipt)
}

pub fn send(destination: &str, body: &str) -> Frame {
    Frame::new(Command::Send, body).with_header(headers::DESTINATION, destination)
}

pub fn disconnect(receipt: &str) -> Frame {
    Frame::new(Command::Disconnect, "").with_header(headers::RECEIPT, receipt)
}

/// Assert `frame` is an ERROR whose `message` header is `message`.
pub fn assert_error(frame: &Frame, message: &str) {
    assert_eq!(frame.command_enum(), Some(Command::Error), "not an ERROR: {frame:?}");
    assert_eq!(frame.header(headers::MESSAGE), Some(message));
}

/// Assert `frame` is a RECEIPT for `receipt`.
pub fn assert_receipt(frame: &Frame, receipt: &str) {
    assert_eq!(frame.command_enum(), Some(Command::Receipt), "not a RECEIPT: {frame:?}");
    assert_eq!(frame.header(headers::RECEIPT_ID), Some(receipt));
}
