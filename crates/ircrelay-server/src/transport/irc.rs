//! Upstream IRC connection over plain TCP.
//!
//! The socket is split so the hub's server listener owns the read half and
//! the hub loop owns the write half.

use crate::config::UpstreamConfig;
use ircrelay_core::transport::{BoxFuture, ServerReader, ServerWriter};
use ircrelay_core::{line_encode, LineDecoder, Message, RelayError, RelayResult};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Socket read size.
const READ_CHUNK: usize = 4096;

/// Read half of the upstream connection.
pub struct IrcReader {
    stream: OwnedReadHalf,
    decoder: LineDecoder,
    buf: Box<[u8; READ_CHUNK]>,
}

/// Write half of the upstream connection.
pub struct IrcWriter {
    stream: OwnedWriteHalf,
}

/// Connect to the IRC server and send the login lines, if configured.
pub async fn connect(config: &UpstreamConfig) -> RelayResult<(IrcReader, IrcWriter)> {
    let addr = format!("{}:{}", config.host, config.port);
    let timeout = Duration::from_secs(config.connect_timeout_secs);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| RelayError::Transport(format!("connect to {addr} timed out")))?
        .map_err(|e| RelayError::Transport(format!("connect to {addr} failed: {e}")))?;
    stream.set_nodelay(true)?;

    info!(addr = %addr, "connected to IRC server");

    let (read, write) = stream.into_split();
    let reader = IrcReader {
        stream: read,
        decoder: LineDecoder::new(),
        buf: Box::new([0; READ_CHUNK]),
    };
    let mut writer = IrcWriter { stream: write };

    for line in login_lines(config) {
        writer.write(&line).await?;
    }

    Ok((reader, writer))
}

/// `PASS`/`NICK`/`USER` lines for registering with the server.
///
/// Empty when no nick is configured: the first client is then expected to
/// register itself.
fn login_lines(config: &UpstreamConfig) -> Vec<Message> {
    let Some(nick) = config.nick.as_deref() else {
        return Vec::new();
    };

    let mut lines = Vec::with_capacity(3);
    if let Some(password) = config.password.as_deref() {
        lines.push(Message::new(format!("PASS {password}")));
    }
    lines.push(Message::new(format!("NICK {nick}")));
    let username = config.username.as_deref().unwrap_or(nick);
    let realname = config.realname.as_deref().unwrap_or(nick);
    lines.push(Message::new(format!("USER {username} 0 * :{realname}")));
    lines
}

impl ServerReader for IrcReader {
    fn read(&mut self) -> BoxFuture<'_, RelayResult<Message>> {
        Box::pin(async move {
            loop {
                if let Some(line) = self.decoder.next_line()? {
                    return Ok(line);
                }

                let n = self.stream.read(&mut self.buf[..]).await?;
                if n == 0 {
                    debug!(pending = self.decoder.pending(), "IRC server closed the connection");
                    return Err(RelayError::ConnectionClosed);
                }
                self.decoder.feed(&self.buf[..n]);
            }
        })
    }
}

impl ServerWriter for IrcWriter {
    fn write<'a>(&'a mut self, msg: &'a Message) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            let frame = line_encode(msg)?;
            self.stream.write_all(&frame).await?;
            Ok(())
        })
    }
}
