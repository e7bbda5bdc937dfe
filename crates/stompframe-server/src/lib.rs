//! Stompframe publish/subscribe server.
//!
//! Clients log in with CONNECT, subscribe to named channels and publish with
//! SEND; every current subscriber of a channel receives a MESSAGE copy.
//!
//! # Architecture
//!
//! The protocol logic is synchronous. A [`CommandDispatcher`] consumes one
//! decoded frame at a time and talks to the shared [`ConnectionRegistry`]
//! through the [`Connections`] trait; replies and fan-out deliveries go
//! through [`ConnectionHandler`]s that only enqueue. [`Server`] provides the
//! I/O around it: a tokio TCP listener, one task per connection reading
//! frames through [`StompCodec`], and one writer task per connection draining
//! its [`ChannelHandler`] queue into the socket.
//!
//! # Components
//!
//! - [`CommandDispatcher`]: per-connection command handling
//! - [`ConnectionRegistry`]: logins, subscriptions and fan-out
//! - [`ChannelHandler`]: non-blocking outbound queue for one connection
//! - [`Server`]: TCP runtime
//!
//! [`StompCodec`]: stompframe_proto::StompCodec

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod command_error;
mod dispatcher;
mod error;
mod handler;
mod registry;
mod session;

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub use command_error::CommandError;
pub use dispatcher::{CommandDispatcher, DispatcherConfig, message_for};
pub use error::ServerError;
use futures::{SinkExt, StreamExt};
pub use handler::{
    ChannelHandler, ConnectionHandler, DEFAULT_OUTBOUND_CAPACITY, DeliveryError, Outbound,
};
pub use registry::{
    ConnectionId, ConnectionRegistry, Connections, LoginOutcome, MessageBuilder, MessageId,
    RegistryError, SendOutcome, SubscribeOutcome, SubscriptionId,
};
pub use session::SessionState;
use stompframe_proto::{Command, DEFAULT_MAX_FRAME_SIZE, Frame, ProtocolError, StompCodec, headers};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Semaphore, mpsc},
};
use tokio_util::codec::{FramedRead, FramedWrite};

/// Server configuration for the TCP runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:7777")
    pub bind_address: String,
    /// Connections beyond this count are refused
    pub max_connections: usize,
    /// Largest accepted frame in bytes
    pub max_frame_size: usize,
    /// Frames queued for one peer before it is dropped as a slow consumer
    pub outbound_capacity: usize,
    /// Per-connection command handling policy
    pub dispatcher: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7777".to_string(),
            max_connections: 10_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// Production stompframe server.
pub struct Server {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
    /// One permit per connection slot, taken at accept
    connection_slots: Arc<Semaphore>,
    next_connection_id: AtomicU64,
}

impl Server {
    /// Validate `config` and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        if config.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".to_string()));
        }
        if config.max_frame_size == 0 {
            return Err(ServerError::Config("max_frame_size must be at least 1".to_string()));
        }
        if config.outbound_capacity == 0 {
            return Err(ServerError::Config("outbound_capacity must be at least 1".to_string()));
        }
        if config.max_connections > Semaphore::MAX_PERMITS {
            return Err(ServerError::Config(format!(
                "max_connections must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Transport(format!("failed to bind {}: {e}", config.bind_address))
        })?;

        Ok(Self {
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
            connection_slots: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Registry shared by every connection of this server.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    },
                },
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let config = Arc::clone(&self.config);

        // Held until the connection task ends
        let slot = match Arc::clone(&self.connection_slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(_) => {
                tracing::warn!(connection_id, %peer, "connection limit reached, refusing");
                tokio::spawn(async move {
                    if let Err(e) = refuse_connection(stream, config.max_frame_size).await {
                        tracing::debug!(connection_id, "refusal not delivered: {}", e);
                    }
                });
                return;
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(connection_id, "failed to set TCP_NODELAY: {}", e);
        }

        tracing::info!(connection_id, %peer, "connection accepted");

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, connection_id, registry, &config).await {
                tracing::warn!(connection_id, "connection error: {}", e);
            }
            drop(slot);
            tracing::info!(connection_id, "connection closed");
        });
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Drive one connection from accept to teardown.
async fn handle_connection(
    stream: TcpStream,
    connection_id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    config: &ServerConfig,
) -> Result<(), ServerError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader: FramedRead<OwnedReadHalf, StompCodec> =
        FramedRead::new(read_half, StompCodec::with_max_frame_size(config.max_frame_size));
    let writer = FramedWrite::new(write_half, StompCodec::with_max_frame_size(config.max_frame_size));

    let (handler, outbound) = ChannelHandler::with_capacity(connection_id, config.outbound_capacity);
    let handler = Arc::new(handler);
    let writer_task = tokio::spawn(write_outbound(connection_id, writer, outbound));

    let mut dispatcher = match CommandDispatcher::start(
        connection_id,
        registry,
        Arc::clone(&handler) as Arc<dyn ConnectionHandler>,
        config.dispatcher.clone(),
    ) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            handler.close();
            return Err(e.into());
        },
    };

    while !dispatcher.should_terminate() {
        let next = tokio::select! {
            next = reader.next() => next,
            () = handler.closed() => {
                tracing::debug!(connection_id, "outbound side closed, ending session");
                dispatcher.terminate();
                break;
            },
        };

        match next {
            Some(Ok(frame)) => {
                tracing::debug!(connection_id, command = frame.command(), "frame received");
                dispatcher.process(frame);
            },
            Some(Err(e)) => {
                tracing::warn!(connection_id, "undecodable input: {}", e);
                let reply = Frame::new(Command::Error, e.to_string())
                    .with_header(headers::MESSAGE, "malformed frame received");
                if let Err(err) = handler.send(reply) {
                    tracing::debug!(connection_id, "decode error reply not delivered: {}", err);
                }
                dispatcher.terminate();
            },
            None => {
                tracing::debug!(connection_id, "peer closed the stream");
                dispatcher.terminate();
            },
        }
    }

    // Covers sessions the registry already dropped without closing the handle
    handler.close();
    drop(dispatcher);

    // A slow consumer is not waited for; its writer may be stuck on a full socket
    if handler.is_overflowed() {
        writer_task.abort();
        return Err(ServerError::Transport("peer too slow, outbound queue overflowed".to_string()));
    }
    drop(handler);

    match writer_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(ServerError::Internal(format!("writer task failed: {e}"))),
    }
}

/// Drain a connection's outbound queue into its socket.
async fn write_outbound(
    connection_id: ConnectionId,
    mut writer: FramedWrite<OwnedWriteHalf, StompCodec>,
    mut outbound: mpsc::Receiver<Outbound>,
) -> Result<(), ProtocolError> {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => writer.send(frame).await?,
            Outbound::Close => break,
        }
    }

    tracing::trace!(connection_id, "writer closing");
    writer.close().await
}

/// Tell an over-limit client why it is being dropped, then close.
async fn refuse_connection(stream: TcpStream, max_frame_size: usize) -> Result<(), ProtocolError> {
    let mut writer = FramedWrite::new(stream, StompCodec::with_max_frame_size(max_frame_size));
    writer
        .send(Frame::new(Command::Error, "").with_header(headers::MESSAGE, "too many connections"))
        .await?;
    writer.close().await
}
