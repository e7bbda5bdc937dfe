//! Connection registry for logins and channel subscriptions.
//!
//! The registry is the only state shared between connections. It maintains
//! bidirectional mappings: channel → subscribers (for fan-out) and
//! connection → channels (for cleanup on disconnect), plus the username →
//! connection index that enforces one login per user.
//!
//! Channels are implicit. A channel appears with its first subscription and
//! disappears with its last.
//!
//! Every operation takes one coarse lock for its whole duration, fan-out
//! included. That gives each channel and username a single total order and
//! makes a fan-out's subscriber snapshot consistent with concurrent
//! subscribe, unsubscribe and disconnect calls.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use stompframe_proto::Frame;
use thiserror::Error;

use crate::handler::{ConnectionHandler, DeliveryError};

/// Runtime-assigned connection identifier.
pub type ConnectionId = u64;

/// Client-chosen subscription identifier, unique within its connection.
pub type SubscriptionId = u64;

/// Registry-assigned identifier of one delivered message.
pub type MessageId = u64;

/// Builds the frame delivered to one subscriber from the published frame,
/// the subscriber's subscription id and a fresh message id.
pub type MessageBuilder<'a> = &'a dyn Fn(&Frame, SubscriptionId, MessageId) -> Frame;

/// Result of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Session established
    Accepted,
    /// Username is known with a different password
    WrongPassword,
    /// Username is held by a live session, or this connection already has one
    AlreadyLoggedIn,
}

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Subscription recorded
    Subscribed,
    /// The connection already subscribes to this channel
    DuplicateSubscription,
}

/// Result of a publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Fan-out ran; `recipients` handlers accepted their copy
    Delivered {
        /// Number of successful deliveries
        recipients: usize,
    },
    /// The sender does not subscribe to the channel; nothing was delivered
    NotSubscribed,
}

/// Errors from registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Connection id is not (or no longer) registered.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    /// Connection id is already in use.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    /// The connection's handler refused the frame.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Operations the dispatcher needs from the shared registry.
///
/// Each method is atomic with respect to every other method.
pub trait Connections: Send + Sync {
    /// Register a newly accepted connection before any of its frames are
    /// processed.
    fn connect(
        &self,
        connection_id: ConnectionId,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), RegistryError>;

    /// Attach `username` to the connection.
    fn login(
        &self,
        connection_id: ConnectionId,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, RegistryError>;

    /// Remove the connection, its login and all its subscriptions.
    ///
    /// Returns the handler so a final frame can still be written. `None` if
    /// the connection was not registered.
    fn disconnect(&self, connection_id: ConnectionId) -> Option<Arc<dyn ConnectionHandler>>;

    /// Subscribe the connection to `channel` under `subscription_id`.
    fn subscribe(
        &self,
        channel: &str,
        subscription_id: SubscriptionId,
        connection_id: ConnectionId,
    ) -> Result<SubscribeOutcome, RegistryError>;

    /// Drop every subscription of the connection carrying `subscription_id`.
    ///
    /// Idempotent; unknown connections and ids are ignored.
    fn unsubscribe(&self, connection_id: ConnectionId, subscription_id: SubscriptionId);

    /// Fan `frame` out to every current subscriber of `channel`.
    ///
    /// `build` runs once per subscriber. Only connections subscribed to the
    /// channel may publish to it.
    fn send(
        &self,
        channel: &str,
        frame: &Frame,
        build: MessageBuilder<'_>,
        sender: ConnectionId,
    ) -> Result<SendOutcome, RegistryError>;

    /// Deliver one frame to one connection.
    fn send_to(&self, connection_id: ConnectionId, frame: Frame) -> Result<(), RegistryError>;
}

/// Registry state of one connection.
struct ConnectionEntry {
    handler: Arc<dyn ConnectionHandler>,
    /// Logged-in user, if any
    username: Option<String>,
    /// Channel → subscription id
    subscriptions: HashMap<String, SubscriptionId>,
}

#[derive(Default)]
struct RegistryState {
    /// Connection ID → connection entry
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Channel → subscribed connection IDs with their subscription ids.
    /// Ordered so fan-out visits subscribers deterministically.
    channels: HashMap<String, BTreeMap<ConnectionId, SubscriptionId>>,
    /// Username → connection ID. Enforces one session per user
    sessions: HashMap<String, ConnectionId>,
    /// Username → password, recorded on a user's first login
    credentials: HashMap<String, String>,
    /// Last message id handed out
    last_message_id: MessageId,
}

/// In-memory [`Connections`] implementation behind a single mutex.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutation completes its bookkeeping before anything that could
    /// panic (the message builder, handlers), so a poisoned lock still guards
    /// consistent maps.
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state().connections.len()
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.state().channels.len()
    }

    /// Number of subscribers of a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state().channels.get(channel).map_or(0, BTreeMap::len)
    }

    /// Whether a live session holds `username`.
    pub fn is_logged_in(&self, username: &str) -> bool {
        self.state().sessions.contains_key(username)
    }

    /// Whether the connection is registered.
    pub fn has_connection(&self, connection_id: ConnectionId) -> bool {
        self.state().connections.contains_key(&connection_id)
    }

    /// Username logged in on a connection.
    pub fn username(&self, connection_id: ConnectionId) -> Option<String> {
        self.state().connections.get(&connection_id).and_then(|entry| entry.username.clone())
    }

    /// Last message id handed out, 0 before the first delivery.
    pub fn last_message_id(&self) -> MessageId {
        self.state().last_message_id
    }

    /// Subscription id the connection holds for `channel`, if subscribed.
    pub fn subscription(&self, connection_id: ConnectionId, channel: &str) -> Option<SubscriptionId> {
        self.state()
            .connections
            .get(&connection_id)
            .and_then(|entry| entry.subscriptions.get(channel).copied())
    }
}

impl Connections for ConnectionRegistry {
    fn connect(
        &self,
        connection_id: ConnectionId,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), RegistryError> {
        let mut state = self.state();
        if state.connections.contains_key(&connection_id) {
            return Err(RegistryError::AlreadyRegistered(connection_id));
        }

        state.connections.insert(connection_id, ConnectionEntry {
            handler,
            username: None,
            subscriptions: HashMap::new(),
        });
        Ok(())
    }

    fn login(
        &self,
        connection_id: ConnectionId,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, RegistryError> {
        let mut guard = self.state();
        let state = &mut *guard;

        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;

        // Checked before the password so the answer for a live user does not
        // depend on the guess.
        if entry.username.is_some() || state.sessions.contains_key(username) {
            return Ok(LoginOutcome::AlreadyLoggedIn);
        }

        match state.credentials.get(username) {
            Some(expected) if expected != password => return Ok(LoginOutcome::WrongPassword),
            Some(_) => {},
            None => {
                state.credentials.insert(username.to_string(), password.to_string());
            },
        }

        state.sessions.insert(username.to_string(), connection_id);
        entry.username = Some(username.to_string());
        Ok(LoginOutcome::Accepted)
    }

    fn disconnect(&self, connection_id: ConnectionId) -> Option<Arc<dyn ConnectionHandler>> {
        let mut guard = self.state();
        let state = &mut *guard;

        let entry = state.connections.remove(&connection_id)?;

        if let Some(username) = &entry.username {
            state.sessions.remove(username);
        }

        for channel in entry.subscriptions.keys() {
            remove_subscriber(&mut state.channels, channel, connection_id);
        }

        Some(entry.handler)
    }

    fn subscribe(
        &self,
        channel: &str,
        subscription_id: SubscriptionId,
        connection_id: ConnectionId,
    ) -> Result<SubscribeOutcome, RegistryError> {
        let mut guard = self.state();
        let state = &mut *guard;

        let entry = state
            .connections
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;

        if entry.subscriptions.contains_key(channel) {
            return Ok(SubscribeOutcome::DuplicateSubscription);
        }

        entry.subscriptions.insert(channel.to_string(), subscription_id);
        state.channels.entry(channel.to_string()).or_default().insert(connection_id, subscription_id);
        Ok(SubscribeOutcome::Subscribed)
    }

    fn unsubscribe(&self, connection_id: ConnectionId, subscription_id: SubscriptionId) {
        let mut guard = self.state();
        let state = &mut *guard;

        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return;
        };

        let mut removed = Vec::new();
        entry.subscriptions.retain(|channel, id| {
            if *id == subscription_id {
                removed.push(channel.clone());
                false
            } else {
                true
            }
        });

        for channel in &removed {
            remove_subscriber(&mut state.channels, channel, connection_id);
        }
    }

    fn send(
        &self,
        channel: &str,
        frame: &Frame,
        build: MessageBuilder<'_>,
        sender: ConnectionId,
    ) -> Result<SendOutcome, RegistryError> {
        let mut guard = self.state();
        let state = &mut *guard;

        let publisher =
            state.connections.get(&sender).ok_or(RegistryError::UnknownConnection(sender))?;
        if !publisher.subscriptions.contains_key(channel) {
            return Ok(SendOutcome::NotSubscribed);
        }

        let Some(subscribers) = state.channels.get(channel) else {
            return Ok(SendOutcome::NotSubscribed);
        };

        let mut recipients = 0;
        for (&connection_id, &subscription_id) in subscribers {
            // INVARIANT: disconnect removes a connection from every channel
            // it subscribes to, under the same lock.
            let Some(entry) = state.connections.get(&connection_id) else {
                continue;
            };

            state.last_message_id += 1;
            let message = build(frame, subscription_id, state.last_message_id);

            match entry.handler.send(message) {
                Ok(()) => recipients += 1,
                Err(DeliveryError::Full(_)) => {
                    tracing::warn!(connection_id, channel, "slow subscriber dropped from fan-out");
                },
                Err(err) => {
                    tracing::warn!(connection_id, channel, "fan-out delivery failed: {}", err);
                },
            }
        }

        Ok(SendOutcome::Delivered { recipients })
    }

    fn send_to(&self, connection_id: ConnectionId, frame: Frame) -> Result<(), RegistryError> {
        let state = self.state();
        let entry = state
            .connections
            .get(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;

        entry.handler.send(frame)?;
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &state.connections.len())
            .field("channel_count", &state.channels.len())
            .field("session_count", &state.sessions.len())
            .finish()
    }
}

/// Remove one subscriber from a channel, dropping the channel once empty.
fn remove_subscriber(
    channels: &mut HashMap<String, BTreeMap<ConnectionId, SubscriptionId>>,
    channel: &str,
    connection_id: ConnectionId,
) {
    if let Some(subscribers) = channels.get_mut(channel) {
        subscribers.remove(&connection_id);
        if subscribers.is_empty() {
            channels.remove(channel);
        }
    }
}
