//! In-process transports backed by tokio channels.
//!
//! `ChannelClient` lets an embedder attach a client to the hub without a
//! socket, and `channel_server` stands in for the upstream connection.

use crate::error::{RelayError, RelayResult};
use crate::message::Message;
use crate::transport::{BoxFuture, IrcClient, ServerReader, ServerWriter};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};

/// A client whose other end is a pair of channels held by the caller.
pub struct ChannelClient {
    /// Hub -> peer. Taken on close so the peer observes EOF.
    outbound: StdMutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Peer -> hub.
    inbound: Mutex<mpsc::UnboundedReceiver<Message>>,
}

/// The caller's end of a [`ChannelClient`].
pub struct ChannelPeer {
    /// Lines sent here are received by the hub as if typed by the client.
    pub tx: mpsc::UnboundedSender<Message>,
    /// Lines the hub delivered to the client. Yields `None` once the client
    /// has been closed.
    pub rx: mpsc::UnboundedReceiver<Message>,
}

/// Create a connected client/peer pair.
pub fn channel_client() -> (ChannelClient, ChannelPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let client = ChannelClient {
        outbound: StdMutex::new(Some(out_tx)),
        inbound: Mutex::new(in_rx),
    };
    (client, ChannelPeer { tx: in_tx, rx: out_rx })
}

impl ChannelClient {
    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.outbound
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }
}

impl IrcClient for ChannelClient {
    fn send_message<'a>(&'a self, msg: &'a Message) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            let guard = self
                .outbound
                .lock()
                .map_err(|_| RelayError::Channel("client lock poisoned".into()))?;
            match guard.as_ref() {
                Some(tx) => tx.send(msg.clone()).map_err(|_| RelayError::ConnectionClosed),
                None => Err(RelayError::ConnectionClosed),
            }
        })
    }

    fn receive_message(&self) -> BoxFuture<'_, RelayResult<Message>> {
        Box::pin(async move {
            let mut rx = self.inbound.lock().await;
            rx.recv().await.ok_or(RelayError::ConnectionClosed)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Ok(mut guard) = self.outbound.lock() {
                guard.take();
            }
        })
    }
}

/// Read half of an in-memory upstream.
pub struct ChannelServerReader {
    rx: mpsc::UnboundedReceiver<Message>,
}

/// Write half of an in-memory upstream.
pub struct ChannelServerWriter {
    tx: mpsc::UnboundedSender<Message>,
}

/// The caller's end of an in-memory upstream.
pub struct ChannelUpstream {
    /// Lines sent here are read by the hub as if sent by the IRC server.
    /// Dropping it makes the next read fail, like a lost connection.
    pub to_hub: mpsc::UnboundedSender<Message>,
    /// Lines the hub wrote to the server.
    pub from_hub: mpsc::UnboundedReceiver<Message>,
}

/// Create an in-memory upstream connection.
pub fn channel_server() -> (ChannelServerReader, ChannelServerWriter, ChannelUpstream) {
    let (to_hub, rx) = mpsc::unbounded_channel();
    let (tx, from_hub) = mpsc::unbounded_channel();
    (
        ChannelServerReader { rx },
        ChannelServerWriter { tx },
        ChannelUpstream { to_hub, from_hub },
    )
}

impl ServerReader for ChannelServerReader {
    fn read(&mut self) -> BoxFuture<'_, RelayResult<Message>> {
        Box::pin(async move { self.rx.recv().await.ok_or(RelayError::ConnectionClosed) })
    }
}

impl ServerWriter for ChannelServerWriter {
    fn write<'a>(&'a mut self, msg: &'a Message) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            self.tx
                .send(msg.clone())
                .map_err(|_| RelayError::ConnectionClosed)
        })
    }
}
