//! ircrelay-core: hub engine for relaying one IRC server session to many
//! downstream web clients.
//!
//! Provides the message type, IRC line codec, abstract client/server
//! transport traits, an in-process channel transport and the hub
//! coordination loop.

pub mod channel;
pub mod codec;
pub mod error;
pub mod hub;
pub mod message;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{line_encode, LineDecoder, MAX_LINE_LEN};
pub use error::{RelayError, RelayResult};
pub use hub::{spawn_hub, ClientId, HubConfig, HubExit, HubHandle};
pub use message::Message;
pub use transport::{BoxFuture, IrcClient, ServerReader, ServerWriter};
