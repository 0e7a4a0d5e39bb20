//! Abstract client and server transports for the hub.
//!
//! The WebSocket client, the in-process channel client and the TCP upstream
//! connection all implement these traits. The hub never sees a concrete type.

use crate::error::RelayResult;
use crate::message::Message;
use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A downstream client connection.
///
/// Methods take `&self` because the hub sends on a connection while that
/// connection's listener task is parked in `receive_message`. Implementations
/// split their read and write sides internally.
pub trait IrcClient: Send + Sync {
    /// Deliver one line to the client. An error means the client is gone.
    fn send_message<'a>(&'a self, msg: &'a Message) -> BoxFuture<'a, RelayResult<()>>;

    /// Wait for the next line from the client.
    ///
    /// Must be cancel-safe: the listener drops this future when it is told
    /// to stop.
    fn receive_message(&self) -> BoxFuture<'_, RelayResult<Message>>;

    /// Close the connection. Errors are swallowed; the client is being
    /// discarded either way.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Human-readable peer description for logs (e.g. a remote address).
    fn peer_label(&self) -> Option<String> {
        None
    }
}

/// Read half of the upstream IRC connection.
pub trait ServerReader: Send {
    /// Wait for the next line from the server. Must be cancel-safe.
    fn read(&mut self) -> BoxFuture<'_, RelayResult<Message>>;
}

/// Write half of the upstream IRC connection.
pub trait ServerWriter: Send + Sync {
    /// Write one line to the server.
    fn write<'a>(&'a mut self, msg: &'a Message) -> BoxFuture<'a, RelayResult<()>>;
}
