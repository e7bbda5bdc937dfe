//! Errors produced while handling a client command.
//!
//! Every variant becomes an `ERROR` frame addressed to the offending
//! connection only. The `Display` text is the frame's `message` header.

use stompframe_proto::{Command, Frame, headers};
use thiserror::Error;

/// Why a client frame was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Username is known with a different password.
    ///
    /// Fatal: the connection is torn down after the reply.
    #[error("wrong password")]
    WrongPassword,

    /// Username is held by another live session, or this connection already
    /// logged in.
    ///
    /// Fatal: the connection is torn down after the reply.
    #[error("user already logged in")]
    AlreadyLoggedIn,

    /// The connection already subscribes to the requested channel.
    #[error("User already subscribed to this channel")]
    DuplicateSubscription,

    /// A required header is missing or unparseable.
    ///
    /// The reply body echoes the offending frame.
    #[error("malformed frame received")]
    Malformed {
        /// What was wrong with the frame
        reason: String,
    },

    /// Publishing to a channel the sender does not subscribe to.
    #[error("Cannot send message")]
    NotSubscribed {
        /// Channel the client tried to publish to
        destination: String,
    },

    /// Command needs a logged-in session.
    #[error("not logged in")]
    NotLoggedIn,

    /// Command the server does not handle.
    #[error("unknown command")]
    UnknownCommand(String),
}

impl CommandError {
    /// Whether the connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WrongPassword | Self::AlreadyLoggedIn)
    }

    /// `ERROR` frame reporting this error for `offending`.
    ///
    /// Carries `receipt-id` when the offending frame asked for a receipt.
    pub fn to_frame(&self, offending: &Frame) -> Frame {
        let mut frame =
            Frame::new(Command::Error, self.details(offending)).with_header(headers::MESSAGE, self.to_string());

        if let Some(receipt) = offending.header(headers::RECEIPT) {
            frame.add_header(headers::RECEIPT_ID, receipt);
        }

        frame
    }

    fn details(&self, offending: &Frame) -> String {
        match self {
            Self::Malformed { reason } => {
                format!("The message:\n-----\n{offending}\n-----\n{reason}")
            },
            Self::NotSubscribed { destination } => {
                format!("The client is not subscribed to {destination}")
            },
            Self::NotLoggedIn => {
                format!("{} requires a successful CONNECT first", offending.command())
            },
            Self::UnknownCommand(command) => format!("{command} is not supported"),
            Self::WrongPassword | Self::AlreadyLoggedIn | Self::DuplicateSubscription => {
                String::new()
            },
        }
    }
}
