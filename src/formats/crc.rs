///! CRC-64-ISO checksums for the binary artifacts

use crc::{Crc, CRC_64_GO_ISO};

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// One-shot CRC-64 of a byte slice
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Incremental CRC-64 digest for streamed writes
pub struct Digest {
    inner: crc::Digest<'static, u64>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            inner: CRC64.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> u64 {
        self.inner.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}
