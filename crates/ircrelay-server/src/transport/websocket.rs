//! WebSocket listener using tokio-tungstenite.
//!
//! Each accepted socket becomes a [`WebSocketClient`]: one text frame
//! carries one IRC line in each direction.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ircrelay_core::transport::{BoxFuture, IrcClient};
use ircrelay_core::{Message, RelayError, RelayResult, MAX_LINE_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<TcpStream>;

/// A browser connected over WebSocket.
pub struct WebSocketClient {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    stream: Mutex<SplitStream<WsStream>>,
    remote_addr: SocketAddr,
}

impl WebSocketClient {
    pub fn new(ws_stream: WsStream, remote_addr: SocketAddr) -> Self {
        let (sink, stream) = ws_stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            remote_addr,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Start the WebSocket listener.
///
/// Returns the bound address and a receiver that yields upgraded clients.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> RelayResult<(SocketAddr, mpsc::Receiver<WebSocketClient>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketClient>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                if tx.send(WebSocketClient::new(ws_stream, addr)).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                    // Out of descriptors and the like; let some connections close.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
            if tx.is_closed() {
                debug!("nobody is taking WebSocket clients, listener exiting");
                return;
            }
        }
    });

    Ok((local_addr, rx))
}

/// Drop the line terminator a client may have left on a frame.
fn strip_line_ending(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
}

impl IrcClient for WebSocketClient {
    fn send_message<'a>(&'a self, msg: &'a Message) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            sink.send(WsMessage::Text(msg.as_str().to_owned().into()))
                .await
                .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
        })
    }

    fn receive_message(&self) -> BoxFuture<'_, RelayResult<Message>> {
        Box::pin(async move {
            let mut stream = self.stream.lock().await;
            loop {
                let text = match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => text.to_string(),
                    Some(Ok(WsMessage::Binary(data))) => {
                        String::from_utf8_lossy(&data).into_owned()
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err(RelayError::ConnectionClosed)
                    }
                    // Ping/pong replies are queued by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(RelayError::Transport(format!("WS recv failed: {e}")))
                    }
                };

                let line = strip_line_ending(&text);
                if line.is_empty() {
                    continue;
                }
                if line.len() > MAX_LINE_LEN {
                    warn!(
                        remote = %self.remote_addr,
                        len = line.len(),
                        "dropping oversize frame from client"
                    );
                    continue;
                }
                return Ok(Message::new(line));
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.close().await {
                debug!(remote = %self.remote_addr, error = %e, "WS close failed");
            }
        })
    }

    fn peer_label(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }
}
