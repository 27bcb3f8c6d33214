//! WebSocket binding for the message transport.
//!
//! One protocol message travels as one binary WebSocket message. The socket
//! is split into a [`MessageSink`] and a [`MessageSource`] so a session task
//! can wait on inbound data while writing from its timers.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;

use super::error::{TransportError, TransportResult};

/// Upper bound on a graceful close before the socket is simply dropped.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Stream type of a camera-side (accepted) connection.
pub type AcceptedStream = TcpStream;

/// Stream type of a client-side (dialed) connection.
pub type DialedStream = MaybeTlsStream<TcpStream>;

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct MessageSink<S> {
    inner: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> MessageSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send one protocol message as a binary WebSocket message.
    pub async fn send(&mut self, bytes: Vec<u8>) -> TransportResult<()> {
        self.inner.send(WsMessage::Binary(bytes)).await?;
        Ok(())
    }

    /// Send several messages, flushing once.
    pub async fn send_all(&mut self, batch: Vec<Vec<u8>>) -> TransportResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for bytes in batch {
            self.inner.feed(WsMessage::Binary(bytes)).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the connection. Errors are irrelevant at this point.
    pub async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.inner.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(error = %e, "close after failure"),
            Err(_) => trace!("close timed out"),
        }
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct MessageSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

impl<S> MessageSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wait for the next binary message.
    ///
    /// Ping and pong are handled by the WebSocket layer. A text message is a
    /// protocol violation; a close frame or end of stream yields
    /// [`TransportError::Closed`].
    pub async fn recv(&mut self) -> TransportResult<Vec<u8>> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(bytes),
                Some(Ok(WsMessage::Text(_))) => return Err(TransportError::NonBinary),
                Some(Ok(WsMessage::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Split an established WebSocket into its halves.
pub fn split<S>(ws: WebSocketStream<S>) -> (MessageSink<S>, MessageSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (MessageSink { inner: sink }, MessageSource { inner: stream })
}

/// Complete the WebSocket handshake on an accepted TCP stream.
pub async fn accept(
    stream: TcpStream,
) -> TransportResult<(MessageSink<AcceptedStream>, MessageSource<AcceptedStream>)> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    Ok(split(ws))
}

/// Dial a camera at a `ws://host:port` address.
pub async fn connect(
    address: &str,
) -> TransportResult<(MessageSink<DialedStream>, MessageSource<DialedStream>)> {
    let (ws, _response) = tokio_tungstenite::connect_async(address).await?;
    Ok(split(ws))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (
        (MessageSink<AcceptedStream>, MessageSource<AcceptedStream>),
        (MessageSink<DialedStream>, MessageSource<DialedStream>),
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept(stream).await.unwrap()
        });
        let client = connect(&format!("ws://{addr}")).await.unwrap();
        (server.await.unwrap(), client)
    }

    #[tokio::test]
    async fn test_binary_messages_pass_through() {
        let ((_server_tx, mut server_rx), (mut client_tx, _client_rx)) = pair().await;

        client_tx
            .send_all(vec![vec![1, 2, 3], vec![4]])
            .await
            .unwrap();
        assert_eq!(server_rx.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(server_rx.recv().await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_text_message_is_rejected() {
        let ((_server_tx, mut server_rx), (mut client_tx, _client_rx)) = pair().await;

        client_tx
            .inner
            .send(WsMessage::Text("hello".into()))
            .await
            .unwrap();
        assert!(matches!(
            server_rx.recv().await,
            Err(TransportError::NonBinary)
        ));
    }

    #[tokio::test]
    async fn test_close_is_reported() {
        let ((mut server_tx, _server_rx), (_client_tx, mut client_rx)) = pair().await;

        server_tx.close().await;
        let err = client_rx.recv().await.unwrap_err();
        assert!(err.is_close());
    }
}
