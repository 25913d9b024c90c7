use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use peerdrop_peer_link::{ChannelError, ReadyChannel};
use peerdrop_protocol::{FileMetadata, TransferFrame};

use crate::digest::StreamDigest;
use crate::progress::ProgressReporter;
use crate::{OutgoingFile, SenderConfig, TransferError, TransferProgress};

/// Outcome of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub metadata: FileMetadata,
    pub bytes_sent: u64,
    pub chunks: u64,
    /// Hex SHA-256 of the content as streamed.
    pub sha256: String,
}

/// Streams one file per call over a ready data channel.
#[derive(Debug, Clone, Default)]
pub struct ChunkedSender {
    config: SenderConfig,
}

impl ChunkedSender {
    pub fn new(config: SenderConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Sends `file` as metadata, chunks and close, then closes the channel.
    ///
    /// Before every frame the channel buffer is checked against the high
    /// water mark; above it, sending pauses until the buffer drains to the
    /// low water mark. Progress goes to `progress` without blocking.
    pub async fn send(
        &self,
        file: OutgoingFile,
        link: &ReadyChannel,
        progress: Option<mpsc::Sender<TransferProgress>>,
    ) -> Result<SendReport, TransferError> {
        if link.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if !link.channel().is_open() {
            return Err(TransferError::ChannelNotOpen);
        }

        let (metadata, reader) = file.into_parts();
        info!(
            name = %metadata.name,
            size = metadata.size,
            chunk_size = self.config.chunk_size,
            "sending file"
        );

        let result = self.stream(&metadata, reader, link, progress).await;
        // Closed on failure too, so the peer's receive ends.
        if let Err(e) = link.channel().close().await {
            debug!(error = %e, "closing channel after transfer");
        }
        let (sent, chunks, sha256) = result?;

        info!(name = %metadata.name, bytes = sent, chunks, %sha256, "file sent");
        Ok(SendReport {
            metadata,
            bytes_sent: sent,
            chunks,
            sha256,
        })
    }

    /// Emits every frame and waits for the close frame to leave the buffer.
    /// Returns bytes sent, chunk count and the content digest.
    async fn stream(
        &self,
        metadata: &FileMetadata,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        link: &ReadyChannel,
        progress: Option<mpsc::Sender<TransferProgress>>,
    ) -> Result<(u64, u64, String), TransferError> {
        self.emit(link, TransferFrame::Metadata(metadata.clone()))
            .await?;

        let mut reporter = ProgressReporter::new(progress, metadata.size);
        let mut digest = StreamDigest::default();
        let mut sent = 0u64;
        let mut chunks = 0u64;

        while sent < metadata.size {
            self.wait_for_room(link).await?;

            let len = (metadata.size - sent).min(self.config.chunk_size as u64) as usize;
            let mut chunk = BytesMut::zeroed(len);
            tokio::select! {
                biased;
                _ = link.cancellation().cancelled() => return Err(TransferError::Cancelled),
                read = reader.read_exact(&mut chunk) => {
                    read?;
                }
            }
            digest.update(&chunk);
            self.emit(link, TransferFrame::Chunk(chunk.freeze())).await?;

            sent += len as u64;
            chunks += 1;
            reporter.report(sent, len);
        }
        if metadata.size == 0 {
            reporter.report(0, 0);
        }

        self.wait_for_room(link).await?;
        self.emit(link, TransferFrame::Close).await?;
        match self.wait_buffered(link, 0).await {
            Ok(()) => {}
            // The receiver closes the channel once it has the close frame.
            Err(TransferError::Channel(ChannelError::Closed)) => {
                let buffered = link.channel().buffered_amount().await;
                if buffered > 0 {
                    return Err(ChannelError::Closed.into());
                }
                debug!("channel closed by peer after close frame drained");
            }
            Err(e) => return Err(e),
        }

        Ok((sent, chunks, digest.finish()))
    }

    async fn emit(&self, link: &ReadyChannel, frame: TransferFrame) -> Result<(), TransferError> {
        let msg = frame.encode()?;
        let result = tokio::select! {
            biased;
            _ = link.cancellation().cancelled() => return Err(TransferError::Cancelled),
            result = link.channel().send(msg) => result,
        };
        match result {
            Ok(()) => Ok(()),
            Err(_) if link.is_cancelled() => Err(TransferError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    /// Pauses while the channel buffers more than the high water mark.
    async fn wait_for_room(&self, link: &ReadyChannel) -> Result<(), TransferError> {
        let buffered = link.channel().buffered_amount().await;
        if buffered <= self.config.high_water_mark {
            return Ok(());
        }
        debug!(
            buffered,
            low = self.config.low_water_mark,
            "channel buffer full, pausing"
        );
        self.wait_buffered(link, self.config.low_water_mark).await?;
        debug!("channel buffer drained, resuming");
        Ok(())
    }

    async fn wait_buffered(&self, link: &ReadyChannel, threshold: usize) -> Result<(), TransferError> {
        let result = tokio::select! {
            biased;
            _ = link.cancellation().cancelled() => return Err(TransferError::Cancelled),
            result = link.channel().wait_buffered_low(threshold) => result,
        };
        match result {
            Ok(()) => Ok(()),
            Err(_) if link.is_cancelled() => Err(TransferError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }
}
