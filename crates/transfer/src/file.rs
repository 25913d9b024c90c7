use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use tokio::io::AsyncRead;

use peerdrop_protocol::{FALLBACK_MIME_TYPE, FileMetadata};

use crate::TransferError;

/// A file about to be sent: its metadata and a reader for its content.
///
/// The reader must yield at least `metadata.size` bytes; nothing past that
/// is read.
pub struct OutgoingFile {
    metadata: FileMetadata,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl OutgoingFile {
    /// Opens a file from disk. The MIME type is guessed from the extension.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?
            .to_string();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());

        Ok(Self::from_reader(
            FileMetadata {
                name,
                mime_type,
                size,
            },
            file,
        ))
    }

    pub fn from_reader(metadata: FileMetadata, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            metadata,
            reader: Box::new(reader),
        }
    }

    /// Wraps in-memory content.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        let metadata = FileMetadata {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
        };
        Self::from_reader(metadata, Cursor::new(data))
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub(crate) fn into_parts(self) -> (FileMetadata, Box<dyn AsyncRead + Send + Unpin>) {
        (self.metadata, self.reader)
    }
}
