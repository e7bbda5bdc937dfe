//! Protocol commands.
//!
//! Frames carry their command as a plain string so that unknown commands
//! survive decoding and reach the dispatcher, which decides what to do with
//! them. [`Command`] is the typed view of the commands the server speaks.

use std::{fmt, str::FromStr};

/// Commands understood by the server, client-to-server and server-to-client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client authenticates and opens a session.
    Connect,
    /// Server accepts a `CONNECT`.
    Connected,
    /// Client closes its session.
    Disconnect,
    /// Client registers interest in a channel.
    Subscribe,
    /// Client drops a subscription.
    Unsubscribe,
    /// Client publishes to a channel.
    Send,
    /// Server delivers a published frame to a subscriber.
    Message,
    /// Server confirms a client request that carried a `receipt` header.
    Receipt,
    /// Server reports a failed request.
    Error,
}

impl Command {
    /// Every known command, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Connect,
        Self::Connected,
        Self::Disconnect,
        Self::Subscribe,
        Self::Unsubscribe,
        Self::Send,
        Self::Message,
        Self::Receipt,
        Self::Error,
    ];

    /// Wire name of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Disconnect => "DISCONNECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a wire name. Matching is exact; commands are upper case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.as_str() == name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown command: {s}"))
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.as_str().to_string()
    }
}
