//! Background listener tasks and their cancellation handles.
//!
//! One task reads from the upstream connection, one task per client reads
//! from that client. Both only push into hub queues; neither touches hub
//! state.

use super::ClientId;
use crate::error::RelayError;
use crate::message::Message;
use crate::transport::{IrcClient, ServerReader};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cancellation signal plus join handle for one listener task.
pub(crate) struct ListenerHandle {
    quit: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Ask the task to stop. Never blocks, even if the task already exited.
    pub fn stop(self) -> JoinHandle<()> {
        let _ = self.quit.send(());
        self.task
    }
}

/// Hub-local map from client id to that client's listener.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: HashMap<ClientId, ListenerHandle>,
}

impl ListenerSet {
    pub fn insert(&mut self, id: ClientId, handle: ListenerHandle) {
        let previous = self.listeners.insert(id, handle);
        debug_assert!(previous.is_none(), "client ids are never reused");
    }

    /// Signal the client's listener and forget it.
    pub fn stop(&mut self, id: ClientId) -> Option<JoinHandle<()>> {
        self.listeners.remove(&id).map(ListenerHandle::stop)
    }

    #[cfg(test)]
    pub fn contains(&self, id: ClientId) -> bool {
        self.listeners.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

/// Start the listener for one client.
///
/// Lines go to `to_hub`. A read error ends the task quietly: the hub learns
/// the client is gone the next time a send to it fails.
pub(crate) fn spawn_client_listener(
    id: ClientId,
    client: Arc<dyn IrcClient>,
    to_hub: mpsc::Sender<Message>,
) -> ListenerHandle {
    let (quit, mut quit_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = &mut quit_rx => {
                    debug!(client_id = %id, "client listener stopped");
                    return;
                }
                result = client.receive_message() => match result {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(client_id = %id, error = %e, "client listener read failed, exiting");
                        return;
                    }
                },
            };

            tokio::select! {
                _ = &mut quit_rx => return,
                sent = to_hub.send(msg) => {
                    if sent.is_err() {
                        debug!(client_id = %id, "hub queue closed, client listener exiting");
                        return;
                    }
                }
            }
        }
    });

    ListenerHandle { quit, task }
}

/// Start the upstream listener.
///
/// A read error is reported once on `errors` and ends the task; there is
/// no retry.
pub(crate) fn spawn_server_listener(
    mut reader: Box<dyn ServerReader>,
    to_hub: mpsc::Sender<Message>,
    errors: oneshot::Sender<RelayError>,
) -> ListenerHandle {
    let (quit, mut quit_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        debug!("server listener started");
        let error = loop {
            let msg = tokio::select! {
                _ = &mut quit_rx => {
                    debug!("server listener stopped");
                    return;
                }
                result = reader.read() => match result {
                    Ok(msg) => msg,
                    Err(e) => break e,
                },
            };

            tokio::select! {
                _ = &mut quit_rx => return,
                sent = to_hub.send(msg) => {
                    if sent.is_err() {
                        debug!("hub queue closed, server listener exiting");
                        return;
                    }
                }
            }
        };

        warn!(error = %error, "server read failed, server listener exiting");
        let _ = errors.send(error);
    });

    ListenerHandle { quit, task }
}
