//! Opaque IRC protocol lines.
//!
//! The hub treats every line as atomic. The only inspection it performs is
//! the `PING` keepalive check and pulling out the command verb for logs.

use std::fmt;

/// Literal prefix of a server keepalive request.
const PING: &str = "PING";
/// Literal prefix of the keepalive reply.
const PONG: &str = "PONG";

/// A single IRC protocol line, without the trailing CRLF.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message(String);

impl Message {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether this line is a keepalive request (starts with `PING`).
    pub fn is_ping(&self) -> bool {
        self.0.starts_with(PING)
    }

    /// Build the reply to a keepalive request.
    ///
    /// Everything after the `PING` token is carried over unchanged, so
    /// `PING :token123` becomes `PONG :token123`. Returns `None` for any
    /// other line.
    pub fn pong_reply(&self) -> Option<Message> {
        self.0
            .strip_prefix(PING)
            .map(|tail| Message(format!("{PONG}{tail}")))
    }

    /// The command verb (`PRIVMSG`, `001`, ...), skipping IRCv3 tags and
    /// the source prefix.
    pub fn command(&self) -> Option<&str> {
        let mut rest = self.0.as_str();
        if rest.starts_with('@') {
            rest = rest.split_once(' ').map(|(_, r)| r)?;
        }
        rest = rest.trim_start_matches(' ');
        if rest.starts_with(':') {
            rest = rest.split_once(' ').map(|(_, r)| r)?;
        }
        rest.trim_start_matches(' ')
            .split(' ')
            .next()
            .filter(|verb| !verb.is_empty())
    }

    /// An `ERROR` line telling a client its link is being closed.
    pub fn error_notice(reason: &str) -> Message {
        Message(format!("ERROR :Closing Link: {reason}"))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Message {
    fn from(line: String) -> Self {
        Self(line)
    }
}

impl From<&str> for Message {
    fn from(line: &str) -> Self {
        Self(line.to_string())
    }
}

impl AsRef<str> for Message {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
