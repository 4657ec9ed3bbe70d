pub mod handshake;
pub(crate) mod message_stream;

pub use message_stream::{WebsocketStream, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR};
