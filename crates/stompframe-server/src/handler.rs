//! Outbound transport handles.
//!
//! A [`ConnectionHandler`] is how the registry and the dispatcher reach a
//! peer. Delivery never blocks: [`ChannelHandler`] only enqueues onto a
//! bounded channel that the connection's writer task drains into the socket.
//! A peer that stops reading fills its queue; the next delivery fails with
//! [`DeliveryError::Full`] and the handler closes itself.

use std::sync::atomic::{AtomicBool, Ordering};

use stompframe_proto::Frame;
use thiserror::Error;
use tokio::sync::{Notify, mpsc, mpsc::error::TrySendError};

use crate::registry::ConnectionId;

/// Errors from handing a frame to a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The handle was closed or its writer has gone away.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The outbound queue is full. The handler closed itself.
    #[error("outbound queue of connection {0} is full")]
    Full(ConnectionId),
}

/// Frames a connection may have queued before it counts as a slow consumer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Outbound side of one connection.
pub trait ConnectionHandler: Send + Sync {
    /// Enqueue a frame for the peer.
    ///
    /// Fails once [`ConnectionHandler::close`] has been called.
    fn send(&self, frame: Frame) -> Result<(), DeliveryError>;

    /// Flush what is already queued, then close the transport.
    ///
    /// Idempotent.
    fn close(&self);
}

/// Items consumed by a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this frame to the socket
    Frame(Frame),
    /// Stop writing and shut the socket down
    Close,
}

/// [`ConnectionHandler`] backed by a bounded tokio channel.
///
/// The channel holds one slot more than `capacity`. Frames never take the
/// last slot, so [`Outbound::Close`] still fits behind a full queue.
#[derive(Debug)]
pub struct ChannelHandler {
    connection_id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
    overflowed: AtomicBool,
    shutdown: Notify,
}

impl ChannelHandler {
    /// Create a handler holding up to [`DEFAULT_OUTBOUND_CAPACITY`] frames,
    /// and the receiver its writer task should drain.
    pub fn new(connection_id: ConnectionId) -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(connection_id, DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Create a handler holding up to `capacity` undelivered frames.
    pub fn with_capacity(
        connection_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1) + 1);
        let handler = Self {
            connection_id,
            tx,
            closed: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
            shutdown: Notify::new(),
        };
        (handler, rx)
    }

    /// Connection this handler writes to.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Whether [`ConnectionHandler::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the handler closed itself because its queue filled up.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    /// Completes once the handler is closed.
    pub async fn closed(&self) {
        let notified = self.shutdown.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    fn overflow(&self) -> DeliveryError {
        self.overflowed.store(true, Ordering::Release);
        tracing::warn!(
            connection_id = self.connection_id,
            "outbound queue full, closing slow connection"
        );
        self.close();
        DeliveryError::Full(self.connection_id)
    }
}

impl ConnectionHandler for ChannelHandler {
    fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.is_closed() || self.tx.is_closed() {
            return Err(DeliveryError::Closed(self.connection_id));
        }

        // Last slot belongs to Outbound::Close
        if self.tx.capacity() <= 1 {
            return Err(self.overflow());
        }

        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(self.overflow()),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed(self.connection_id)),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.tx.try_send(Outbound::Close) {
            tracing::trace!(connection_id = self.connection_id, "close marker not queued: {}", e);
        }
        self.shutdown.notify_one();
    }
}
