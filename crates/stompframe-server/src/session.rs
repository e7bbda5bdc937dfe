//! Per-connection session state.
//!
//! ```text
//! ┌─────────────────┐  CONNECT accepted  ┌───────────────┐
//! │ Unauthenticated │───────────────────>│ Authenticated │
//! └─────────────────┘                    └───────────────┘
//!          │ DISCONNECT / login failure /        │ DISCONNECT /
//!          │ peer lost                           │ peer lost
//!          ↓                                     ↓
//!     ┌────────────┐                       ┌────────────┐
//!     │ Terminated │<──────────────────────│ Terminated │
//!     └────────────┘                       └────────────┘
//! ```

use stompframe_proto::Command;

/// Where a connection's session stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No successful CONNECT yet
    Unauthenticated,
    /// Logged in as `username`
    Authenticated {
        /// User the registry attached to this connection
        username: String,
    },
    /// Session is over; no further frames are processed
    Terminated,
}

impl SessionState {
    /// Whether a CONNECT has been accepted and the session is still live.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// Whether the session has ended.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Logged-in user, if any.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Authenticated { username } => Some(username),
            _ => None,
        }
    }

    /// Whether `command` may run in this state.
    ///
    /// With `require_login` unset an unauthenticated session may subscribe,
    /// unsubscribe and publish.
    pub fn permits(&self, command: Command, require_login: bool) -> bool {
        match self {
            Self::Terminated => false,
            Self::Authenticated { .. } => true,
            Self::Unauthenticated => {
                !require_login
                    || !matches!(command, Command::Subscribe | Command::Unsubscribe | Command::Send)
            },
        }
    }
}
