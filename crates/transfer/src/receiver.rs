use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use peerdrop_peer_link::ReadyChannel;
use peerdrop_protocol::{FileMetadata, TransferFrame};

use crate::digest::checksum_bytes;
use crate::progress::ProgressReporter;
use crate::{TransferError, TransferProgress};

/// Upper bound on memory reserved up front from a declared size.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub metadata: FileMetadata,
    pub data: Bytes,
    /// Hex SHA-256 of `data`.
    pub sha256: String,
}

/// Accumulation state of one incoming transfer.
///
/// Frames are applied strictly in arrival order; the channel is ordered so
/// chunks need no sequence numbers.
#[derive(Debug, Default)]
pub struct TransferSession {
    metadata: Option<FileMetadata>,
    buffer: BytesMut,
    chunks: u64,
    complete: bool,
}

impl TransferSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    /// Bytes accumulated so far.
    pub fn received(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Applies one frame. Returns the file once the close frame arrives.
    ///
    /// Frames after completion are ignored.
    pub fn apply(&mut self, frame: TransferFrame) -> Result<Option<ReceivedFile>, TransferError> {
        if self.complete {
            debug!("ignoring frame after close");
            return Ok(None);
        }

        match frame {
            TransferFrame::Metadata(meta) => {
                if self.metadata.is_some() {
                    return Err(TransferError::UnexpectedMetadata);
                }
                self.buffer.reserve(meta.size.min(MAX_PREALLOCATION) as usize);
                self.metadata = Some(meta);
                Ok(None)
            }
            TransferFrame::Chunk(bytes) => {
                let meta = self.metadata.as_ref().ok_or(TransferError::MissingMetadata)?;
                let actual = self.received() + bytes.len() as u64;
                if actual > meta.size {
                    return Err(TransferError::SizeMismatch {
                        expected: meta.size,
                        actual,
                    });
                }
                self.buffer.extend_from_slice(&bytes);
                self.chunks += 1;
                Ok(None)
            }
            TransferFrame::Close => {
                let metadata = self.metadata.take().ok_or(TransferError::MissingMetadata)?;
                let actual = self.received();
                if actual != metadata.size {
                    return Err(TransferError::SizeMismatch {
                        expected: metadata.size,
                        actual,
                    });
                }
                self.complete = true;
                let data = std::mem::take(&mut self.buffer).freeze();
                let sha256 = checksum_bytes(&data);
                Ok(Some(ReceivedFile {
                    metadata,
                    data,
                    sha256,
                }))
            }
        }
    }
}

/// Receives one file per call from a ready data channel.
#[derive(Debug, Clone, Default)]
pub struct ChunkedReceiver;

impl ChunkedReceiver {
    pub fn new() -> Self {
        Self
    }

    /// Reads frames until the close frame and returns the reassembled file.
    ///
    /// Text frames that are not valid control frames are logged and
    /// skipped. The channel is closed once this returns, whether or not the
    /// transfer succeeded.
    pub async fn receive(
        &self,
        link: &ReadyChannel,
        progress: Option<mpsc::Sender<TransferProgress>>,
    ) -> Result<ReceivedFile, TransferError> {
        if link.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let result = self.collect(link, progress).await;
        if let Err(e) = link.channel().close().await {
            debug!(error = %e, "closing channel after transfer");
        }
        let file = result?;
        info!(
            name = %file.metadata.name,
            bytes = file.data.len(),
            sha256 = %file.sha256,
            "file received"
        );
        Ok(file)
    }

    async fn collect(
        &self,
        link: &ReadyChannel,
        progress: Option<mpsc::Sender<TransferProgress>>,
    ) -> Result<ReceivedFile, TransferError> {
        let channel = link.channel();
        let mut session = TransferSession::new();
        let mut progress = progress;
        let mut reporter: Option<ProgressReporter> = None;

        loop {
            let msg = tokio::select! {
                biased;
                _ = link.cancellation().cancelled() => return Err(TransferError::Cancelled),
                msg = channel.recv() => msg,
            };
            let Some(msg) = msg else {
                warn!(
                    received = session.received(),
                    chunks = session.chunks(),
                    "channel ended mid-transfer"
                );
                return Err(TransferError::Incomplete);
            };

            let frame = match TransferFrame::decode(msg) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "skipping unrecognised frame");
                    continue;
                }
            };
            let chunk_len = match &frame {
                TransferFrame::Chunk(bytes) => bytes.len(),
                _ => 0,
            };
            let is_metadata = matches!(frame, TransferFrame::Metadata(_));

            if let Some(file) = session.apply(frame)? {
                if file.metadata.size == 0 {
                    if let Some(r) = reporter.as_mut() {
                        r.report(0, 0);
                    }
                }
                return Ok(file);
            }

            if is_metadata {
                if let Some(meta) = session.metadata() {
                    info!(name = %meta.name, mime = %meta.mime_type, size = meta.size, "incoming file");
                    reporter = Some(ProgressReporter::new(progress.take(), meta.size));
                }
            } else if chunk_len > 0 {
                if let Some(r) = reporter.as_mut() {
                    r.report(session.received(), chunk_len);
                }
            }
        }
    }
}
