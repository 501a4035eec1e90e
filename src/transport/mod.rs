//! Transport boundary. The crate depends only on [`Transport`]; `ws` is
//! the one concrete implementation it ships.

pub mod ws;

use async_trait::async_trait;

use crate::error::MeshResult;
use crate::frame::Frame;

/// One full-duplex, frame-oriented connection. Both sides of the crate
/// (`server::Connection` and `client::Client`) are generic over this
/// trait, same shape as `AuthProvider` in the auth layer: a thin
/// `#[async_trait]` seam so tests can swap in an in-process double.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Frame) -> MeshResult<()>;

    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn recv(&mut self) -> MeshResult<Option<Frame>>;

    async fn close(&mut self) -> MeshResult<()>;
}
