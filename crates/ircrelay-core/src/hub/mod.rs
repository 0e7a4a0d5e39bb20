//! The hub coordination loop.
//!
//! A single task owns the client registry, the listener map and the server
//! write half. Listener tasks feed it through queues; every registry change
//! and routing decision happens here, one event at a time.

mod listener;
mod registry;

use crate::error::{RelayError, RelayResult};
use crate::message::Message;
use crate::transport::{IrcClient, ServerReader, ServerWriter};
use listener::{spawn_client_listener, spawn_server_listener, ListenerHandle, ListenerSet};
use registry::{ClientHandle, ClientRegistry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stable identifier the hub issues to each client at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue sizes and client time limits for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the from-server and from-clients queues.
    pub queue_capacity: usize,
    /// Capacity of the new-client registration queue.
    pub registration_capacity: usize,
    /// Longest a single client send or close may take. A send that runs
    /// over counts as failed and the client is dropped.
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            registration_capacity: 64,
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Why the hub loop ended.
#[derive(Debug)]
pub enum HubExit {
    /// A shutdown was requested through a [`HubHandle`].
    Shutdown,
    /// The upstream connection failed on read.
    UpstreamLost(RelayError),
}

/// Cloneable handle for feeding and stopping a running hub.
#[derive(Clone)]
pub struct HubHandle {
    registrations: mpsc::Sender<Arc<dyn IrcClient>>,
    shutdown: mpsc::Sender<()>,
    client_count: watch::Receiver<usize>,
}

impl HubHandle {
    /// Hand a newly accepted client to the hub.
    pub async fn register(&self, client: Arc<dyn IrcClient>) -> RelayResult<()> {
        self.registrations
            .send(client)
            .await
            .map_err(|_| RelayError::Channel("hub is not running".into()))
    }

    /// Ask the hub to notify and close every client, then exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(()).await;
    }

    /// Number of clients currently registered.
    pub fn client_count(&self) -> usize {
        *self.client_count.borrow()
    }

    /// Wait until exactly `n` clients are registered.
    pub async fn wait_for_client_count(&self, n: usize) -> RelayResult<()> {
        let mut rx = self.client_count.clone();
        rx.wait_for(|&count| count == n)
            .await
            .map(|_| ())
            .map_err(|_| RelayError::Channel("hub is not running".into()))
    }
}

/// Build a hub over an upstream connection and run it on its own task.
pub fn spawn_hub<R, W>(reader: R, writer: W, config: HubConfig) -> (HubHandle, JoinHandle<HubExit>)
where
    R: ServerReader + 'static,
    W: ServerWriter + 'static,
{
    let (hub, handle) = Hub::new(Box::new(reader), Box::new(writer), config);
    (handle, tokio::spawn(hub.run()))
}

/// State owned by the coordination loop.
pub struct Hub {
    writer: Box<dyn ServerWriter>,
    registry: ClientRegistry,
    listeners: ListenerSet,
    server_listener: Option<ListenerHandle>,
    from_server: mpsc::Receiver<Message>,
    from_clients_tx: mpsc::Sender<Message>,
    from_clients: mpsc::Receiver<Message>,
    upstream_errors: oneshot::Receiver<RelayError>,
    registrations: mpsc::Receiver<Arc<dyn IrcClient>>,
    accepting: bool,
    shutdown: mpsc::Receiver<()>,
    stoppable: bool,
    client_count: watch::Sender<usize>,
    send_timeout: Duration,
}

impl Hub {
    /// Create the hub and start the upstream listener.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        reader: Box<dyn ServerReader>,
        writer: Box<dyn ServerWriter>,
        config: HubConfig,
    ) -> (Self, HubHandle) {
        let (server_tx, from_server) = mpsc::channel(config.queue_capacity);
        let (from_clients_tx, from_clients) = mpsc::channel(config.queue_capacity);
        let (registrations_tx, registrations) = mpsc::channel(config.registration_capacity);
        let (shutdown_tx, shutdown) = mpsc::channel(1);
        let (err_tx, upstream_errors) = oneshot::channel();
        let (count_tx, count_rx) = watch::channel(0);

        let server_listener = spawn_server_listener(reader, server_tx, err_tx);

        let hub = Self {
            writer,
            registry: ClientRegistry::new(),
            listeners: ListenerSet::default(),
            server_listener: Some(server_listener),
            from_server,
            from_clients_tx,
            from_clients,
            upstream_errors,
            registrations,
            accepting: true,
            shutdown,
            stoppable: true,
            client_count: count_tx,
            send_timeout: config.send_timeout,
        };
        let handle = HubHandle {
            registrations: registrations_tx,
            shutdown: shutdown_tx,
            client_count: count_rx,
        };
        (hub, handle)
    }

    /// Run until shutdown is requested or the upstream connection is lost.
    pub async fn run(mut self) -> HubExit {
        info!("hub started");

        let exit = loop {
            tokio::select! {
                Some(msg) = self.from_server.recv() => {
                    self.on_server_message(msg).await;
                }
                Some(msg) = self.from_clients.recv() => {
                    self.on_client_message(msg).await;
                }
                client = self.registrations.recv(), if self.accepting => match client {
                    Some(client) => self.register(client),
                    None => {
                        debug!("registration queue closed, no longer accepting clients");
                        self.accepting = false;
                    }
                },
                result = &mut self.upstream_errors => {
                    let error = result.unwrap_or(RelayError::ConnectionClosed);
                    // Relay whatever the server sent before it went away.
                    while let Ok(msg) = self.from_server.try_recv() {
                        self.on_server_message(msg).await;
                    }
                    break HubExit::UpstreamLost(error);
                }
                request = self.shutdown.recv(), if self.stoppable => match request {
                    Some(()) => break HubExit::Shutdown,
                    None => self.stoppable = false,
                },
            }
        };

        let reason = match &exit {
            HubExit::Shutdown => "hub shutting down".to_string(),
            HubExit::UpstreamLost(e) => format!("upstream connection lost ({e})"),
        };
        self.teardown(&reason).await;

        info!(?exit, "hub stopped");
        exit
    }

    /// Answer keepalives, then fan the line out to every client.
    async fn on_server_message(&mut self, msg: Message) {
        debug!(command = msg.command().unwrap_or("-"), line = %msg, "from server");

        if let Some(pong) = msg.pong_reply() {
            if let Err(e) = self.writer.write(&pong).await {
                warn!(error = %e, "failed to answer server PING");
            }
        }

        self.broadcast(&msg).await;
    }

    /// Send to every client, dropping the ones whose send fails.
    async fn broadcast(&mut self, msg: &Message) {
        let mut k = 0;
        while let Some(handle) = self.registry.get(k) {
            let client = handle.client.clone();
            match self.send_to(&client, msg).await {
                Ok(()) => k += 1,
                Err(e) => {
                    // Slot k now holds the former last entry; visit it next.
                    let handle = self.registry.swap_remove(k);
                    self.disconnect(handle, &e).await;
                }
            }
        }
    }

    /// One client send, bounded by `send_timeout`.
    async fn send_to(&self, client: &Arc<dyn IrcClient>, msg: &Message) -> RelayResult<()> {
        tokio::time::timeout(self.send_timeout, client.send_message(msg))
            .await
            .map_err(|_| RelayError::Timeout)?
    }

    /// Close a client, giving up after `send_timeout`.
    async fn close_client(&self, handle: &ClientHandle) {
        if tokio::time::timeout(self.send_timeout, handle.client.close())
            .await
            .is_err()
        {
            debug!(client_id = %handle.id, "client close timed out");
        }
    }

    async fn on_client_message(&mut self, msg: Message) {
        debug!(command = msg.command().unwrap_or("-"), "from client");
        if let Err(e) = self.writer.write(&msg).await {
            warn!(error = %e, "error writing to server");
        }
    }

    fn register(&mut self, client: Arc<dyn IrcClient>) {
        if self.registry.contains_connection(&client) {
            warn!(peer = ?client.peer_label(), "connection already registered, ignoring");
            return;
        }

        let peer = client.peer_label();
        let id = self.registry.insert(client.clone());
        let listener = spawn_client_listener(id, client, self.from_clients_tx.clone());
        self.listeners.insert(id, listener);
        self.publish_count();

        info!(client_id = %id, peer = ?peer, clients = self.registry.len(), "accepted client connection");
    }

    async fn disconnect(&mut self, handle: ClientHandle, error: &RelayError) {
        self.listeners.stop(handle.id);
        self.close_client(&handle).await;
        self.publish_count();

        info!(
            client_id = %handle.id,
            error = %error,
            remaining = self.registry.len(),
            listeners = self.listeners.len(),
            "disconnected client"
        );
    }

    /// Stop every listener, tell each client why, and close it.
    async fn teardown(&mut self, reason: &str) {
        let mut tasks = Vec::new();
        if let Some(server) = self.server_listener.take() {
            tasks.push(server.stop());
        }

        let notice = Message::error_notice(reason);
        for handle in self.registry.take_all() {
            if let Some(task) = self.listeners.stop(handle.id) {
                tasks.push(task);
            }
            if let Err(e) = self.send_to(&handle.client, &notice).await {
                debug!(client_id = %handle.id, error = %e, "could not deliver closing notice");
            }
            self.close_client(&handle).await;
        }
        self.publish_count();

        for task in tasks {
            let _ = task.await;
        }
    }

    fn publish_count(&self) {
        self.client_count.send_replace(self.registry.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{channel_client, channel_server, ChannelPeer, ChannelUpstream};
    use crate::transport::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    /// Client with scriptable send failures that records everything.
    struct MockClient {
        received: StdMutex<Vec<Message>>,
        fail_sends: AtomicBool,
        closes: AtomicUsize,
        inbound: Mutex<mpsc::UnboundedReceiver<Message>>,
    }

    impl MockClient {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Message>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let client = Arc::new(Self {
                received: StdMutex::new(Vec::new()),
                fail_sends: AtomicBool::new(false),
                closes: AtomicUsize::new(0),
                inbound: Mutex::new(rx),
            });
            (client, tx)
        }

        fn failing() -> Arc<Self> {
            let (client, _tx) = Self::new();
            client.fail_sends.store(true, Ordering::SeqCst);
            client
        }

        fn received(&self) -> Vec<String> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.as_str().to_string())
                .collect()
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    impl IrcClient for MockClient {
        fn send_message<'a>(&'a self, msg: &'a Message) -> BoxFuture<'a, RelayResult<()>> {
            Box::pin(async move {
                if self.fail_sends.load(Ordering::SeqCst) {
                    return Err(RelayError::Transport("broken pipe".into()));
                }
                self.received.lock().unwrap().push(msg.clone());
                Ok(())
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
                self.closes.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    /// Writer that rejects every line.
    struct BrokenWriter;

    impl ServerWriter for BrokenWriter {
        fn write<'a>(&'a mut self, _msg: &'a Message) -> BoxFuture<'a, RelayResult<()>> {
            Box::pin(async { Err(RelayError::Transport("upstream write failed".into())) })
        }
    }

    /// Client whose sends and close never complete, like a peer that stopped
    /// reading with a full socket buffer.
    struct StuckClient;

    impl IrcClient for StuckClient {
        fn send_message<'a>(&'a self, _msg: &'a Message) -> BoxFuture<'a, RelayResult<()>> {
            Box::pin(std::future::pending())
        }

        fn receive_message(&self) -> BoxFuture<'_, RelayResult<Message>> {
            Box::pin(std::future::pending())
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(std::future::pending())
        }
    }

    fn short_timeouts() -> HubConfig {
        HubConfig {
            send_timeout: Duration::from_millis(50),
            ..HubConfig::default()
        }
    }

    fn test_hub() -> (Hub, HubHandle, ChannelUpstream) {
        let (reader, writer, upstream) = channel_server();
        let (hub, handle) = Hub::new(Box::new(reader), Box::new(writer), HubConfig::default());
        (hub, handle, upstream)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client_in_order() {
        let (mut hub, _handle, _upstream) = test_hub();
        let clients: Vec<_> = (0..5).map(|_| MockClient::new()).collect();
        for (client, _) in &clients {
            hub.register(client.clone());
        }

        for line in [":srv 001 me :hi", ":srv 002 me :host", ":srv 003 me :made"] {
            hub.on_server_message(Message::from(line)).await;
        }

        for (client, _) in &clients {
            assert_eq!(
                client.received(),
                vec![":srv 001 me :hi", ":srv 002 me :host", ":srv 003 me :made"]
            );
        }
    }

    #[tokio::test]
    async fn ping_is_answered_once_and_still_broadcast() {
        let (mut hub, _handle, mut upstream) = test_hub();
        let (a, _) = MockClient::new();
        let (b, _) = MockClient::new();
        hub.register(a.clone());
        hub.register(b.clone());

        hub.on_server_message(Message::from("PING :token123")).await;

        assert_eq!(upstream.from_hub.recv().await.unwrap().as_str(), "PONG :token123");
        assert!(upstream.from_hub.try_recv().is_err());
        assert_eq!(a.received(), vec!["PING :token123"]);
        assert_eq!(b.received(), vec!["PING :token123"]);
    }

    #[tokio::test]
    async fn non_ping_is_not_answered() {
        let (mut hub, _handle, mut upstream) = test_hub();
        hub.on_server_message(Message::from(":srv NOTICE * :PING me")).await;
        assert!(upstream.from_hub.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_send_removes_and_closes_once() {
        let (mut hub, handle, _upstream) = test_hub();
        let (good, _) = MockClient::new();
        let (bad, _) = MockClient::new();
        hub.register(good.clone());
        hub.register(bad.clone());
        assert_eq!(handle.client_count(), 2);

        bad.fail_sends.store(true, Ordering::SeqCst);
        hub.on_server_message(Message::from("first")).await;

        assert_eq!(hub.registry.len(), 1);
        assert_eq!(bad.closes(), 1);
        assert_eq!(handle.client_count(), 1);

        hub.on_server_message(Message::from("second")).await;
        assert_eq!(bad.closes(), 1);
        assert_eq!(good.received(), vec!["first", "second"]);
        assert_eq!(good.closes(), 0);
    }

    #[tokio::test]
    async fn removal_mid_pass_skips_nobody() {
        let (mut hub, _handle, _upstream) = test_hub();
        let (a, _) = MockClient::new();
        let b = MockClient::failing();
        let c = MockClient::failing();
        let (d, _) = MockClient::new();
        let ids: Vec<_> = [a.clone(), b.clone(), c.clone(), d.clone()]
            .into_iter()
            .map(|client| {
                hub.register(client);
                hub.registry.ids().last().copied().unwrap()
            })
            .collect();

        hub.on_server_message(Message::from("hello")).await;

        let mut remaining = hub.registry.ids();
        remaining.sort();
        assert_eq!(remaining, vec![ids[0], ids[3]]);
        assert_eq!(a.received(), vec!["hello"]);
        assert_eq!(d.received(), vec!["hello"]);
        assert_eq!(b.closes(), 1);
        assert_eq!(c.closes(), 1);
        assert!(!hub.listeners.contains(ids[1]));
        assert!(!hub.listeners.contains(ids[2]));
        assert_eq!(hub.listeners.len(), 2);
    }

    #[tokio::test]
    async fn all_clients_failing_empties_registry() {
        let (mut hub, _handle, _upstream) = test_hub();
        let clients: Vec<_> = (0..3).map(|_| MockClient::failing()).collect();
        for client in &clients {
            hub.register(client.clone());
        }

        hub.on_server_message(Message::from("x")).await;

        assert_eq!(hub.registry.len(), 0);
        assert!(clients.iter().all(|c| c.closes() == 1));
    }

    #[tokio::test]
    async fn client_message_written_verbatim() {
        let (mut hub, _handle, mut upstream) = test_hub();
        for _ in 0..3 {
            hub.register(MockClient::new().0);
        }

        hub.on_client_message(Message::from("PRIVMSG #rust :hello all")).await;

        assert_eq!(
            upstream.from_hub.recv().await.unwrap().as_str(),
            "PRIVMSG #rust :hello all"
        );
        assert!(upstream.from_hub.try_recv().is_err());
    }

    #[tokio::test]
    async fn upstream_write_failure_keeps_clients() {
        let (reader, _writer, _upstream) = channel_server();
        let (mut hub, _handle) = Hub::new(Box::new(reader), Box::new(BrokenWriter), HubConfig::default());
        let (client, _) = MockClient::new();
        hub.register(client.clone());

        hub.on_client_message(Message::from("PRIVMSG #a :x")).await;
        hub.on_server_message(Message::from("PING :still-here")).await;

        assert_eq!(hub.registry.len(), 1);
        assert_eq!(client.closes(), 0);
        assert_eq!(client.received(), vec!["PING :still-here"]);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (mut hub, _handle, _upstream) = test_hub();
        let (client, _) = MockClient::new();
        hub.register(client.clone());
        hub.register(client.clone());

        assert_eq!(hub.registry.len(), 1);
        assert_eq!(hub.listeners.len(), 1);

        hub.on_server_message(Message::from("once")).await;
        assert_eq!(client.received(), vec!["once"]);
    }

    #[tokio::test]
    async fn registration_starts_one_listener() {
        let (mut hub, _handle, _upstream) = test_hub();
        let (client, _) = MockClient::new();

        hub.register(client);

        let ids = hub.registry.ids();
        assert_eq!(ids.len(), 1);
        assert!(hub.listeners.contains(ids[0]));
        assert_eq!(hub.listeners.len(), 1);
    }

    #[tokio::test]
    async fn dead_reader_lingers_until_send_fails() {
        let (mut hub, _handle, _upstream) = test_hub();
        let (client, inbound) = MockClient::new();
        hub.register(client.clone());

        // Inbound side fails; the listener exits without telling the hub.
        drop(inbound);
        tokio::task::yield_now().await;
        hub.on_server_message(Message::from("one")).await;
        assert_eq!(hub.registry.len(), 1);
        assert_eq!(client.received(), vec!["one"]);

        // The first broadcast after the outbound side fails removes it.
        client.fail_sends.store(true, Ordering::SeqCst);
        hub.on_server_message(Message::from("two")).await;
        assert_eq!(hub.registry.len(), 0);
        assert_eq!(client.closes(), 1);
    }

    #[tokio::test]
    async fn stuck_send_times_out_and_removes_client() {
        let (reader, writer, _upstream) = channel_server();
        let (mut hub, handle) = Hub::new(Box::new(reader), Box::new(writer), short_timeouts());
        let (good, _) = MockClient::new();
        hub.register(Arc::new(StuckClient));
        hub.register(good.clone());
        assert_eq!(handle.client_count(), 2);

        hub.on_server_message(Message::from("hello")).await;

        assert_eq!(hub.registry.len(), 1);
        assert_eq!(hub.listeners.len(), 1);
        assert_eq!(handle.client_count(), 1);
        assert_eq!(good.received(), vec!["hello"]);
    }

    async fn register_channel_client(handle: &HubHandle, n: usize) -> ChannelPeer {
        let (client, peer) = channel_client();
        handle.register(Arc::new(client)).await.unwrap();
        handle.wait_for_client_count(n).await.unwrap();
        peer
    }

    #[tokio::test]
    async fn running_hub_relays_both_ways() {
        let (reader, writer, mut upstream) = channel_server();
        let (handle, task) = spawn_hub(reader, writer, HubConfig::default());

        let mut peers = Vec::new();
        for n in 1..=3 {
            peers.push(register_channel_client(&handle, n).await);
        }

        upstream.to_hub.send(Message::from(":srv 001 me :hi")).unwrap();
        upstream.to_hub.send(Message::from("PING :abc")).unwrap();
        for peer in &mut peers {
            assert_eq!(peer.rx.recv().await.unwrap().as_str(), ":srv 001 me :hi");
            assert_eq!(peer.rx.recv().await.unwrap().as_str(), "PING :abc");
        }
        assert_eq!(upstream.from_hub.recv().await.unwrap().as_str(), "PONG :abc");

        peers[1].tx.send(Message::from("JOIN #rust")).unwrap();
        peers[1].tx.send(Message::from("PRIVMSG #rust :hi")).unwrap();
        assert_eq!(upstream.from_hub.recv().await.unwrap().as_str(), "JOIN #rust");
        assert_eq!(
            upstream.from_hub.recv().await.unwrap().as_str(),
            "PRIVMSG #rust :hi"
        );

        handle.shutdown().await;
        assert!(matches!(task.await.unwrap(), HubExit::Shutdown));
    }

    #[tokio::test]
    async fn stuck_client_does_not_freeze_the_hub() {
        let (reader, writer, mut upstream) = channel_server();
        let (handle, task) = spawn_hub(reader, writer, short_timeouts());
        handle.register(Arc::new(StuckClient)).await.unwrap();
        handle.wait_for_client_count(1).await.unwrap();
        let mut peer = register_channel_client(&handle, 2).await;

        upstream.to_hub.send(Message::from("PING :a")).unwrap();
        upstream.to_hub.send(Message::from("hello")).unwrap();

        let limit = Duration::from_secs(2);
        assert_eq!(upstream.from_hub.recv().await.unwrap().as_str(), "PONG :a");
        for line in ["PING :a", "hello"] {
            let got = tokio::time::timeout(limit, peer.rx.recv()).await.unwrap().unwrap();
            assert_eq!(got.as_str(), line);
        }
        tokio::time::timeout(limit, handle.wait_for_client_count(1))
            .await
            .unwrap()
            .unwrap();

        peer.tx.send(Message::from("PRIVMSG #a :still here")).unwrap();
        let relayed = tokio::time::timeout(limit, upstream.from_hub.recv()).await.unwrap().unwrap();
        assert_eq!(relayed.as_str(), "PRIVMSG #a :still here");

        handle.shutdown().await;
        let exit = tokio::time::timeout(limit, task).await.unwrap().unwrap();
        assert!(matches!(exit, HubExit::Shutdown));
    }

    #[tokio::test]
    async fn stuck_client_does_not_block_teardown() {
        let (reader, writer, _upstream) = channel_server();
        let (handle, task) = spawn_hub(reader, writer, short_timeouts());
        handle.register(Arc::new(StuckClient)).await.unwrap();
        handle.wait_for_client_count(1).await.unwrap();
        let mut peer = register_channel_client(&handle, 2).await;

        handle.shutdown().await;
        let exit = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(exit, HubExit::Shutdown));
        assert_eq!(
            peer.rx.recv().await.unwrap().as_str(),
            "ERROR :Closing Link: hub shutting down"
        );
        assert!(peer.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn late_client_gets_later_broadcasts() {
        let (reader, writer, upstream) = channel_server();
        let (handle, task) = spawn_hub(reader, writer, HubConfig::default());

        let mut early = register_channel_client(&handle, 1).await;
        upstream.to_hub.send(Message::from("before")).unwrap();
        assert_eq!(early.rx.recv().await.unwrap().as_str(), "before");

        let mut late = register_channel_client(&handle, 2).await;
        upstream.to_hub.send(Message::from("after")).unwrap();
        assert_eq!(early.rx.recv().await.unwrap().as_str(), "after");
        assert_eq!(late.rx.recv().await.unwrap().as_str(), "after");

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_notifies_and_closes_clients() {
        let (reader, writer, _upstream) = channel_server();
        let (handle, task) = spawn_hub(reader, writer, HubConfig::default());
        let mut peer = register_channel_client(&handle, 1).await;

        handle.shutdown().await;
        assert!(matches!(task.await.unwrap(), HubExit::Shutdown));

        assert_eq!(
            peer.rx.recv().await.unwrap().as_str(),
            "ERROR :Closing Link: hub shutting down"
        );
        assert!(peer.rx.recv().await.is_none());
        assert_eq!(handle.client_count(), 0);
        assert!(handle.register(Arc::new(channel_client().0)).await.is_err());
    }

    #[tokio::test]
    async fn upstream_loss_ends_hub_after_flushing() {
        let (reader, writer, upstream) = channel_server();
        let (handle, task) = spawn_hub(reader, writer, HubConfig::default());
        let mut peer = register_channel_client(&handle, 1).await;

        upstream.to_hub.send(Message::from(":srv NOTICE * :bye")).unwrap();
        drop(upstream);

        let exit = task.await.unwrap();
        assert!(matches!(exit, HubExit::UpstreamLost(RelayError::ConnectionClosed)));

        assert_eq!(peer.rx.recv().await.unwrap().as_str(), ":srv NOTICE * :bye");
        let notice = peer.rx.recv().await.unwrap();
        assert!(notice.as_str().starts_with("ERROR :Closing Link: upstream connection lost"));
        assert!(peer.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn hub_outlives_dropped_handles() {
        let (reader, writer, mut upstream) = channel_server();
        let (handle, task) = spawn_hub(reader, writer, HubConfig::default());
        let peer = register_channel_client(&handle, 1).await;
        drop(handle);

        peer.tx.send(Message::from("PRIVMSG #a :still relaying")).unwrap();
        assert_eq!(
            upstream.from_hub.recv().await.unwrap().as_str(),
            "PRIVMSG #a :still relaying"
        );

        drop(upstream.to_hub);
        assert!(matches!(task.await.unwrap(), HubExit::UpstreamLost(_)));
    }
}
