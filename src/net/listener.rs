//! Bounded TCP listener.
//!
//! # Responsibilities
//! - Bind the server address
//! - Stop accepting while `max_connections` connections are open
//! - Skip connections that fail between the SYN and `accept`
//!
//! # Design Decisions
//! - The connection slot is taken before `accept`, so excess clients wait
//!   in the kernel backlog instead of in memory

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::net::connection::{ConnectionSlot, ConnectionTracker};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("listener closed")]
    Closed,
}

/// A connection that made it through `accept`.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub remote: SocketAddr,
    pub slot: ConnectionSlot,
}

pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    tracker: ConnectionTracker,
}

/// Errors that concern a single connection rather than the listener.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

impl Listener {
    /// Bind `host:port`. Port 0 picks a free port.
    pub async fn bind(host: &str, port: u16, max_connections: usize) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind((host, port))
            .await
            .map_err(|source| ListenerError::Bind {
                addr: format!("{}:{}", host, port),
                source,
            })?;

        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Live-connection count shared with every slot this listener hands out.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Wait for a free slot, then for a connection.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        loop {
            match self.inner.accept().await {
                Ok((stream, remote)) => {
                    let slot = self.tracker.open(permit);
                    tracing::trace!(
                        connection_id = %slot.id(),
                        peer_addr = %remote,
                        free_slots = self.slots.available_permits(),
                        "Connection accepted"
                    );
                    return Ok(Accepted {
                        stream,
                        remote,
                        slot,
                    });
                }
                Err(err) if is_connection_error(&err) => {
                    tracing::debug!(error = %err, "Connection failed before accept");
                }
                Err(err) => return Err(ListenerError::Accept(err)),
            }
        }
    }
}
