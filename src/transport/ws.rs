//! WebSocket transport, the one `Transport` this crate ships. Each
//! `Frame` is framed as a single `Message::Text` JSON document. Generic
//! over the underlying stream so the same type serves the server side
//! (plain `TcpStream`, from `accept_async`) and the client side
//! (`MaybeTlsStream<TcpStream>`, from `connect_async`).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{MeshError, MeshResult};
use crate::frame::Frame;

use super::Transport;

pub struct WebSocketTransport<S> {
    inner: WebSocketStream<S>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(inner: WebSocketStream<S>) -> Self {
        WebSocketTransport { inner }
    }
}

impl WebSocketTransport<MaybeTlsStream<TcpStream>> {
    pub async fn connect(addr: &str) -> MeshResult<Self> {
        let url = format!("ws://{addr}");
        let (stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| MeshError::ConnectionFailed {
                reason: e.to_string(),
            })?;
        Ok(WebSocketTransport { inner: stream })
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Frame) -> MeshResult<()> {
        let text = frame.encode()?;
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| MeshError::ConnectionFailed {
                reason: e.to_string(),
            })
    }

    async fn recv(&mut self) -> MeshResult<Option<Frame>> {
        loop {
            let Some(msg) = self.inner.next().await else {
                return Ok(None);
            };
            let msg = msg.map_err(|e| MeshError::ConnectionFailed {
                reason: e.to_string(),
            })?;
            match msg {
                Message::Text(text) => return Frame::decode(&text).map(Some),
                Message::Close(_) => return Ok(None),
                // Ping/Pong/Binary/Frame carry no protocol meaning here.
                _ => continue,
            }
        }
    }

    async fn close(&mut self) -> MeshResult<()> {
        self.inner
            .close(None)
            .await
            .map_err(|e| MeshError::ConnectionFailed {
                reason: e.to_string(),
            })
    }
}
