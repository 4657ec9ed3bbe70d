use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Object-safe duplex byte stream, used wherever the listener, the WebSocket
/// layer, and the tunnel engine hand a connection to each other.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl AsyncStream for TcpStream {}

impl<T: ?Sized + AsyncStream + Unpin> AsyncStream for Box<T> {}
impl<T: ?Sized + AsyncStream + Unpin> AsyncStream for &mut T {}

#[cfg(test)]
impl AsyncStream for tokio::io::DuplexStream {}
