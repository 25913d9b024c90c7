use sha2::{Digest, Sha256};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Incremental SHA-256 over a streamed file.
#[derive(Default)]
pub(crate) struct StreamDigest(Sha256);

impl StreamDigest {
    pub(crate) fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub(crate) fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}
