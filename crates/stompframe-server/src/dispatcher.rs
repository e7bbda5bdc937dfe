//! Per-connection command dispatcher.
//!
//! One [`CommandDispatcher`] is bound to one connection. The runtime hands it
//! decoded frames one at a time; it validates each frame against the session
//! state, calls into the shared [`Connections`] registry and emits replies
//! before [`CommandDispatcher::process`] returns. It never suspends and never
//! touches the socket directly: every outbound frame goes through the
//! registry or through the handler the registry returns on disconnect.

use std::sync::Arc;

use stompframe_proto::{Command, Frame, headers};

use crate::{
    command_error::CommandError,
    handler::ConnectionHandler,
    registry::{
        ConnectionId, Connections, LoginOutcome, MessageId, RegistryError, SendOutcome,
        SubscribeOutcome, SubscriptionId,
    },
    session::SessionState,
};

/// Dispatcher policy knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Reject SUBSCRIBE, UNSUBSCRIBE and SEND before a successful CONNECT
    pub require_login: bool,
    /// Answer unrecognized commands with an ERROR instead of ignoring them
    pub reject_unknown_commands: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { require_login: true, reject_unknown_commands: false }
    }
}

/// Command dispatcher for a single connection.
pub struct CommandDispatcher<C: Connections> {
    connection_id: ConnectionId,
    connections: Arc<C>,
    state: SessionState,
    config: DispatcherConfig,
}

impl<C: Connections> CommandDispatcher<C> {
    /// Bind a dispatcher to `connection_id` and register `handler` so the
    /// connection can receive fan-out deliveries.
    pub fn start(
        connection_id: ConnectionId,
        connections: Arc<C>,
        handler: Arc<dyn ConnectionHandler>,
        config: DispatcherConfig,
    ) -> Result<Self, RegistryError> {
        connections.connect(connection_id, handler)?;
        tracing::debug!(connection_id, "dispatcher started");

        Ok(Self { connection_id, connections, state: SessionState::Unauthenticated, config })
    }

    /// Connection this dispatcher serves.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether the session is over and the connection should be closed.
    pub fn should_terminate(&self) -> bool {
        self.state.is_terminated()
    }

    /// Handle one frame from the peer.
    ///
    /// All replies are sent before this returns. Frames arriving after the
    /// session terminated are dropped.
    pub fn process(&mut self, frame: Frame) {
        let connection_id = self.connection_id;

        if self.state.is_terminated() {
            tracing::debug!(connection_id, command = frame.command(), "frame after termination dropped");
            return;
        }

        let command = match frame.command_enum() {
            Some(
                command @ (Command::Connect
                | Command::Disconnect
                | Command::Subscribe
                | Command::Unsubscribe
                | Command::Send),
            ) => command,
            // Unrecognized, or a server-to-client command sent by a client
            _ => {
                self.handle_unknown(&frame);
                return;
            },
        };

        if !self.state.permits(command, self.config.require_login) {
            self.reject(&frame, CommandError::NotLoggedIn);
            return;
        }

        let result = match command {
            Command::Connect => self.handle_connect(&frame),
            Command::Disconnect => {
                self.handle_disconnect(&frame);
                Ok(())
            },
            Command::Subscribe => self.handle_subscribe(&frame),
            Command::Unsubscribe => self.handle_unsubscribe(&frame),
            Command::Send => self.handle_send(&frame),
            Command::Connected | Command::Message | Command::Receipt | Command::Error => Ok(()),
        };

        if let Err(err) = result {
            self.reject(&frame, err);
        }
    }

    /// Tear the session down without a receipt.
    ///
    /// Used when the peer goes away without sending DISCONNECT. Idempotent.
    pub fn terminate(&mut self) {
        if self.state.is_terminated() {
            return;
        }

        tracing::info!(
            connection_id = self.connection_id,
            username = self.state.username(),
            "connection lost"
        );
        self.force_disconnect();
    }

    fn handle_connect(&mut self, frame: &Frame) -> Result<(), CommandError> {
        let username = required_header(frame, headers::LOGIN)?;
        let password = required_header(frame, headers::PASSCODE)?;

        match self.connections.login(self.connection_id, username, password) {
            Ok(LoginOutcome::Accepted) => {
                tracing::info!(connection_id = self.connection_id, username, "login accepted");
                self.state = SessionState::Authenticated { username: username.to_string() };
                self.reply(
                    Frame::new(Command::Connected, "")
                        .with_header(headers::VERSION, headers::PROTOCOL_VERSION),
                );
                Ok(())
            },
            Ok(LoginOutcome::WrongPassword) => Err(CommandError::WrongPassword),
            Ok(LoginOutcome::AlreadyLoggedIn) => Err(CommandError::AlreadyLoggedIn),
            Err(err) => {
                self.lost(&err);
                Ok(())
            },
        }
    }

    /// Deregister first, then flush the receipt through the returned handle.
    fn handle_disconnect(&mut self, frame: &Frame) {
        let connection_id = self.connection_id;
        let handler = self.connections.disconnect(connection_id);
        let state = std::mem::replace(&mut self.state, SessionState::Terminated);
        let username = state.username();

        let Some(handler) = handler else {
            tracing::warn!(connection_id, username, "DISCONNECT for unregistered connection");
            return;
        };

        if let Some(receipt) = frame.header(headers::RECEIPT) {
            if let Err(err) = handler.send(receipt_frame(receipt)) {
                tracing::warn!(connection_id, "final receipt not delivered: {}", err);
            }
        }

        handler.close();
        tracing::info!(connection_id, username, "client disconnected");
    }

    fn handle_subscribe(&mut self, frame: &Frame) -> Result<(), CommandError> {
        let channel = required_header(frame, headers::DESTINATION)?;
        let subscription_id = subscription_id(frame)?;

        match self.connections.subscribe(channel, subscription_id, self.connection_id) {
            Ok(SubscribeOutcome::Subscribed) => {
                tracing::debug!(
                    connection_id = self.connection_id,
                    username = self.state.username(),
                    channel,
                    subscription_id,
                    "subscribed"
                );
                self.acknowledge(frame);
                Ok(())
            },
            Ok(SubscribeOutcome::DuplicateSubscription) => Err(CommandError::DuplicateSubscription),
            Err(err) => {
                self.lost(&err);
                Ok(())
            },
        }
    }

    fn handle_unsubscribe(&mut self, frame: &Frame) -> Result<(), CommandError> {
        let subscription_id = subscription_id(frame)?;

        self.connections.unsubscribe(self.connection_id, subscription_id);
        tracing::debug!(connection_id = self.connection_id, subscription_id, "unsubscribed");

        self.acknowledge(frame);
        Ok(())
    }

    fn handle_send(&mut self, frame: &Frame) -> Result<(), CommandError> {
        let channel = required_header(frame, headers::DESTINATION)?;

        match self.connections.send(channel, frame, &message_for, self.connection_id) {
            Ok(SendOutcome::Delivered { recipients }) => {
                tracing::debug!(
                    connection_id = self.connection_id,
                    username = self.state.username(),
                    channel,
                    recipients,
                    "published"
                );
                Ok(())
            },
            Ok(SendOutcome::NotSubscribed) => {
                Err(CommandError::NotSubscribed { destination: channel.to_string() })
            },
            Err(err) => {
                self.lost(&err);
                Ok(())
            },
        }
    }

    fn handle_unknown(&mut self, frame: &Frame) {
        if self.config.reject_unknown_commands {
            self.reject(frame, CommandError::UnknownCommand(frame.command().to_string()));
        } else {
            tracing::debug!(
                connection_id = self.connection_id,
                command = frame.command(),
                "ignoring unsupported command"
            );
        }
    }

    /// Send `RECEIPT` if the frame asked for one.
    fn acknowledge(&self, frame: &Frame) {
        if let Some(receipt) = frame.header(headers::RECEIPT) {
            self.reply(receipt_frame(receipt));
        }
    }

    fn reply(&self, frame: Frame) {
        if let Err(err) = self.connections.send_to(self.connection_id, frame) {
            tracing::warn!(connection_id = self.connection_id, "reply not delivered: {}", err);
        }
    }

    fn reject(&mut self, frame: &Frame, err: CommandError) {
        tracing::warn!(
            connection_id = self.connection_id,
            username = self.state.username(),
            command = frame.command(),
            "rejecting frame: {}",
            err
        );

        self.reply(err.to_frame(frame));

        if err.is_fatal() {
            self.force_disconnect();
        }
    }

    fn force_disconnect(&mut self) {
        if let Some(handler) = self.connections.disconnect(self.connection_id) {
            handler.close();
        }
        self.state = SessionState::Terminated;
    }

    /// The registry no longer knows this connection; nothing more can be
    /// delivered to it.
    fn lost(&mut self, err: &RegistryError) {
        tracing::warn!(connection_id = self.connection_id, "registry rejected operation: {}", err);
        self.state = SessionState::Terminated;
    }
}

impl<C: Connections> std::fmt::Debug for CommandDispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("connection_id", &self.connection_id)
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

/// Per-subscriber `MESSAGE` built from a published `SEND`.
pub fn message_for(original: &Frame, subscription_id: SubscriptionId, message_id: MessageId) -> Frame {
    let mut message = Frame::new(Command::Message, original.body())
        .with_header(headers::MESSAGE_ID, message_id.to_string())
        .with_header(headers::SUBSCRIPTION, subscription_id.to_string());

    if let Some(destination) = original.header(headers::DESTINATION) {
        message.add_header(headers::DESTINATION, destination);
    }

    message
}

fn receipt_frame(receipt: &str) -> Frame {
    Frame::new(Command::Receipt, "").with_header(headers::RECEIPT_ID, receipt)
}

fn required_header<'a>(frame: &'a Frame, name: &str) -> Result<&'a str, CommandError> {
    frame.header(name).ok_or_else(|| CommandError::Malformed {
        reason: format!("Did not contain a {name} header,\nwhich is REQUIRED for {}.", frame.command()),
    })
}

fn subscription_id(frame: &Frame) -> Result<SubscriptionId, CommandError> {
    let raw = required_header(frame, headers::ID)?;
    raw.parse().map_err(|_| CommandError::Malformed {
        reason: format!("Subscription id {raw:?} is not a non-negative integer."),
    })
}
