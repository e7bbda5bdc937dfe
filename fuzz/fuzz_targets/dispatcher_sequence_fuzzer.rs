//! Fuzz target for CommandDispatcher sequences
//!
//! A handful of connections share one registry and process arbitrary
//! command sequences, valid or not.
//!
//! # Invariants
//!
//! - Processing never panics
//! - A terminated dispatcher is no longer registered and writes nothing more
//! - No message id is ever handed out twice
//! - Every MESSAGE carries destination, subscription and message-id headers

#![no_main]

use std::{collections::HashSet, sync::Arc};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stompframe_proto::{Command, Frame, headers};
use stompframe_server::{
    ChannelHandler, CommandDispatcher, ConnectionRegistry, DispatcherConfig, Outbound,
};

const CONNECTIONS: usize = 3;
const USERS: [&str; 2] = ["alice", "bob"];
const CHANNELS: [&str; 2] = ["/topic/a", "/topic/b"];

#[derive(Debug, Arbitrary)]
struct Scenario {
    require_login: bool,
    reject_unknown_commands: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Arbitrary)]
struct Step {
    connection: u8,
    action: Action,
    receipt: Option<u8>,
}

#[derive(Debug, Arbitrary)]
enum Action {
    Connect { user: u8, password: u8, omit_passcode: bool },
    Subscribe { channel: u8, id: IdChoice },
    Unsubscribe { id: IdChoice },
    Send { channel: Option<u8>, body: String },
    Disconnect,
    Raw { command: String, headers: Vec<(String, String)> },
    PeerLost,
}

#[derive(Debug, Arbitrary)]
enum IdChoice {
    Numeric(u8),
    Missing,
    Garbage(String),
}

fn with_id(frame: Frame, id: &IdChoice) -> Frame {
    match id {
        IdChoice::Numeric(n) => frame.with_header(headers::ID, n.to_string()),
        IdChoice::Missing => frame,
        IdChoice::Garbage(text) => frame.with_header(headers::ID, text.as_str()),
    }
}

fn build(action: &Action) -> Option<Frame> {
    let frame = match action {
        Action::Connect { user, password, omit_passcode } => {
            let frame = Frame::new(Command::Connect, "")
                .with_header(headers::LOGIN, USERS[usize::from(*user) % USERS.len()]);
            if *omit_passcode {
                frame
            } else {
                frame.with_header(headers::PASSCODE, format!("pw{}", password % 2))
            }
        },
        Action::Subscribe { channel, id } => with_id(
            Frame::new(Command::Subscribe, "")
                .with_header(headers::DESTINATION, CHANNELS[usize::from(*channel) % CHANNELS.len()]),
            id,
        ),
        Action::Unsubscribe { id } => with_id(Frame::new(Command::Unsubscribe, ""), id),
        Action::Send { channel, body } => {
            let frame = Frame::new(Command::Send, body.as_str());
            match channel {
                Some(c) => frame
                    .with_header(headers::DESTINATION, CHANNELS[usize::from(*c) % CHANNELS.len()]),
                None => frame,
            }
        },
        Action::Disconnect => Frame::new(Command::Disconnect, ""),
        Action::Raw { command, headers } => {
            let mut frame = Frame::new(command.as_str(), "");
            for (name, value) in headers {
                frame.add_header(name.as_str(), value.as_str());
            }
            frame
        },
        Action::PeerLost => return None,
    };
    Some(frame)
}

fuzz_target!(|scenario: Scenario| {
    let registry = Arc::new(ConnectionRegistry::new());
    let config = DispatcherConfig {
        require_login: scenario.require_login,
        reject_unknown_commands: scenario.reject_unknown_commands,
    };

    let mut connections: Vec<_> = (1..=CONNECTIONS as u64)
        .map(|id| {
            let (handler, rx) = ChannelHandler::new(id);
            let dispatcher = CommandDispatcher::start(
                id,
                Arc::clone(&registry),
                Arc::new(handler),
                config.clone(),
            )
            .unwrap();
            (dispatcher, rx)
        })
        .collect();

    let mut message_ids = HashSet::new();

    for step in &scenario.steps {
        let index = usize::from(step.connection) % CONNECTIONS;
        let (dispatcher, _) = &mut connections[index];
        let was_terminated = dispatcher.should_terminate();

        match build(&step.action) {
            Some(mut frame) => {
                if let Some(receipt) = step.receipt {
                    frame.add_header(headers::RECEIPT, receipt.to_string());
                }
                dispatcher.process(frame);
            },
            None => dispatcher.terminate(),
        }

        if dispatcher.should_terminate() {
            assert!(!registry.has_connection(dispatcher.connection_id()));
        }

        for (i, (dispatcher, rx)) in connections.iter_mut().enumerate() {
            let mut closed = false;
            while let Ok(item) = rx.try_recv() {
                match item {
                    Outbound::Close => closed = true,
                    Outbound::Frame(frame) => {
                        assert!(!closed, "frame written after close");
                        if i == index {
                            assert!(!was_terminated, "terminated dispatcher replied");
                        }
                        if frame.command_enum() == Some(Command::Message) {
                            assert!(frame.header(headers::DESTINATION).is_some());
                            assert!(frame.header(headers::SUBSCRIPTION).is_some());
                            let id = frame.header(headers::MESSAGE_ID).unwrap().to_string();
                            assert!(message_ids.insert(id), "message id reused");
                        }
                    },
                }
            }
            if closed {
                assert!(dispatcher.should_terminate());
            }
        }
    }
});
