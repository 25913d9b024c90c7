use peerdrop_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK};

use crate::TransferError;

/// Chunking and flow-control settings for a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// Maximum bytes per chunk frame.
    pub chunk_size: usize,
    /// Pause sending while the channel buffers more than this.
    pub high_water_mark: usize,
    /// Resume once the buffer has drained to this.
    pub low_water_mark: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.low_water_mark > self.high_water_mark {
            return Err(TransferError::InvalidConfig(format!(
                "low water mark {} exceeds high water mark {}",
                self.low_water_mark, self.high_water_mark
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SenderConfig::default();
        assert_eq!(config.chunk_size, 16384);
        assert_eq!(config.high_water_mark, 1 << 20);
        assert_eq!(config.low_water_mark, 256 << 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_chunk() {
        let config = SenderConfig {
            chunk_size: 0,
            ..SenderConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_inverted_marks() {
        let config = SenderConfig {
            high_water_mark: 10,
            low_water_mark: 20,
            ..SenderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
