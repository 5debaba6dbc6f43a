use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::errors::Result;

use super::frame::{FrameReader, MAX_REQUEST_BYTES, write_frame};
use super::protocol::ExportRequest;

/// Produces the snapshot file bytes for one request.
#[async_trait]
pub trait RequestHandler: Send {
    async fn handle(&mut self, request: ExportRequest) -> Result<Vec<u8>>;
}

/// Answer requests until the parent closes the stream.
///
/// A failing request ends the loop with its error; the parent then sees the
/// stream close without a separator.
pub async fn serve<R, W, H>(reader: R, mut writer: W, handler: &mut H) -> Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: RequestHandler + ?Sized,
{
    let mut frames = FrameReader::new(reader);
    let mut served = 0;

    while let Some(payload) = frames.read_frame(MAX_REQUEST_BYTES).await? {
        let request = ExportRequest::decode(&payload)?;
        debug!(entity = %request.entity, strategy = %request.strategy, "serving export request");
        let response = handler.handle(request).await?;
        write_frame(&mut writer, &response).await?;
        served += 1;
    }

    Ok(served)
}
