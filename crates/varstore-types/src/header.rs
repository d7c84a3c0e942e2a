//! Database file header: `{page_size: u32, buffer_pool_len: u32}`,
//! little-endian, fixed for the lifetime of the database.

use varstore_error::{Result, StoreError};

/// Size of the on-disk header in bytes.
pub const DB_HEADER_LEN: u64 = 8;

const MIN_PAGE_SIZE: u32 = 512;
const MAX_PAGE_SIZE: u32 = 65536;
const MIN_POOL_LEN: u32 = 2;

/// Decoded database header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHeader {
    /// Page size in bytes; a power of two in `[512, 65536]`.
    pub page_size: u32,
    /// Number of buffer-pool frames.
    pub buffer_pool_len: u32,
}

impl DbHeader {
    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(StoreError::invalid_argument(format!(
                "page size {} must be a power of two in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]",
                self.page_size
            )));
        }
        if self.buffer_pool_len < MIN_POOL_LEN {
            return Err(StoreError::invalid_argument(format!(
                "buffer pool length {} must be at least {MIN_POOL_LEN}",
                self.buffer_pool_len
            )));
        }
        Ok(())
    }

    /// Encode to the 8 header bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0_u8; 8];
        out[0..4].copy_from_slice(&self.page_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.buffer_pool_len.to_le_bytes());
        out
    }

    /// Decode and validate the 8 header bytes.
    pub fn decode(bytes: [u8; 8]) -> Result<Self> {
        let header = Self {
            page_size: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            buffer_pool_len: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        };
        header.validate().map_err(|_| {
            StoreError::invalid_state(format!(
                "corrupt header: page_size={} buffer_pool_len={}",
                header.page_size, header.buffer_pool_len
            ))
        })?;
        Ok(header)
    }
}

impl Default for DbHeader {
    fn default() -> Self {
        Self {
            page_size: 4096,
            buffer_pool_len: 256,
        }
    }
}
