//! Image checksum.
//!
//! Images carry a CRC-32 computed by the image generator.  The parameters are
//! part of the image format and have to agree with that tool bit for bit, so
//! the algorithm is chosen once, when the engine is built.

use crc::{Crc, Digest, CRC_32_ISO_HDLC};

/// The checksum used by the dual image generator: the common CRC-32 (reflected
/// 0x04c11db7, initial and final value 0xffffffff).
pub static IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Streaming CRC-32 over data that arrives in pieces.
#[derive(Clone, Copy)]
pub struct Crc32Engine {
    crc: &'static Crc<u32>,
}

impl Default for Crc32Engine {
    fn default() -> Self {
        Crc32Engine { crc: &IMAGE_CRC }
    }
}

impl Crc32Engine {
    /// Use a different CRC-32 variant, for images from another generator.
    pub const fn new(crc: &'static Crc<u32>) -> Self {
        Crc32Engine { crc }
    }

    pub fn init(&self) -> Crc32State {
        Crc32State {
            digest: self.crc.digest(),
        }
    }

    /// Checksum of a single buffer.
    pub fn checksum(&self, bytes: &[u8]) -> u32 {
        self.init().feed(bytes).finalize()
    }
}

/// A checksum in progress.
pub struct Crc32State {
    digest: Digest<'static, u32>,
}

impl Crc32State {
    pub fn feed(mut self, bytes: &[u8]) -> Self {
        self.update(bytes);
        self
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crc::CRC_32_MPEG_2;

    static MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

    #[test]
    fn check_values() {
        assert_eq!(Crc32Engine::default().checksum(b"123456789"), 0xcbf4_3926);
        assert_eq!(Crc32Engine::new(&MPEG2).checksum(b"123456789"), 0x0376_e6e7);
    }

    #[test]
    fn chunking_does_not_matter() {
        let data: [u8; 300] = core::array::from_fn(|i| (i * 7 + 3) as u8);
        let engine = Crc32Engine::default();
        let whole = engine.checksum(&data);

        for chunk in [1, 3, 64, 128, 299] {
            let mut state = engine.init();
            for piece in data.chunks(chunk) {
                state = state.feed(piece);
            }
            assert_eq!(state.finalize(), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn empty_feeds() {
        let engine = Crc32Engine::default();
        let state = engine.init().feed(&[]).feed(b"1234").feed(&[]).feed(b"56789");
        assert_eq!(state.finalize(), 0xcbf4_3926);
    }
}
