//! Image generation.
//!
//! Builds dual-image firmware the way the image signing tool lays it out:
//!
//! ```text
//! 0x00            vector table (initial stack pointer, reset vector, ...)
//! 0x24            dual image marker 0x0ffeb6b6
//! 0x28            header pointer, as a load address
//! header_offset   image header, six words
//! ...             payload
//! img_len         checksum word, repeated after the image
//! ```
//!
//! The checksum covers everything from the start of the image up to
//! `img_len`, except the checksum field of the header itself.

use std::{fs, path::Path};

use anyhow::{anyhow, Result};
use crc::{Algorithm, Crc, CRC_32_ISO_HDLC};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub const DUAL_IMAGE_MARKER: u32 = 0x0ffe_b6b6;
pub const HEADER_MARKER: u32 = 0xfeed_a5a5;
pub const MARKER_OFFSET: usize = 0x24;
pub const HEADER_SIZE: usize = 24;
const CRC_FIELD: usize = 16;

pub struct GeneratedImage {
    /// The image followed by its trailing checksum word.
    pub data: Vec<u8>,
    /// Offset of the header from the start of the image.
    pub header_offset: usize,
    /// The checksum stored in the header.
    pub crc: u32,
}

impl GeneratedImage {
    /// Length covered by the checksum, as recorded in the header.
    pub fn img_len(&self) -> usize {
        self.data.len() - 4
    }

    /// Flip every bit of one byte.
    pub fn corrupt(&mut self, offset: usize) {
        self.data[offset] ^= 0xff;
    }

    /// Overwrite one of the header words.
    pub fn set_header_word(&mut self, index: usize, value: u32) {
        let pos = self.header_offset + 4 * index;
        self.data[pos..pos + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Save the image as a binary file, ready for the update tool.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }
}

pub struct GenBuilder {
    /// Length of the image, which is the length covered by the checksum.
    size: usize,
    /// Seed for the PRNG
    seed: u64,
    version: u32,
    img_type: u32,
    /// Where the header lives, relative to the start of the image.
    header_offset: usize,
    /// The address the image is linked to run at.
    load_addr: u32,
    algorithm: &'static Algorithm<u32>,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            size: 12 * 1024,
            seed: 1,
            version: 1,
            img_type: 0,
            header_offset: 0x140,
            load_addr: 0x0001_0000,
            algorithm: &CRC_32_ISO_HDLC,
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    pub fn img_type(&mut self, img_type: u32) -> &mut Self {
        self.img_type = img_type;
        self
    }

    pub fn header_offset(&mut self, offset: usize) -> &mut Self {
        self.header_offset = offset;
        self
    }

    pub fn load_addr(&mut self, addr: u32) -> &mut Self {
        self.load_addr = addr;
        self
    }

    pub fn algorithm(&mut self, algorithm: &'static Algorithm<u32>) -> &mut Self {
        self.algorithm = algorithm;
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        let header_offset = self.header_offset;
        if header_offset < MARKER_OFFSET + 8 || header_offset % 4 != 0 {
            return Err(anyhow!("Header offset {:#x} overlaps the marker or is unaligned",
                               header_offset));
        }
        if header_offset + HEADER_SIZE > self.size {
            return Err(anyhow!("Image of {} bytes cannot hold its header", self.size));
        }
        let header_ptr = u32::try_from(header_offset)
            .ok()
            .and_then(|off| self.load_addr.checked_add(off))
            .ok_or_else(|| anyhow!("Header pointer overflows"))?;

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let mut data = vec![0u8; self.size + 4];
        rng.fill_bytes(&mut data[..self.size]);

        let mut put = |pos: usize, value: u32| {
            data[pos..pos + 4].copy_from_slice(&value.to_ne_bytes());
        };

        // Initial stack pointer and a thumb reset vector into the image.
        put(0, 0x2000_8000);
        put(4, self.load_addr.wrapping_add(0x101));
        put(MARKER_OFFSET, DUAL_IMAGE_MARKER);
        put(MARKER_OFFSET + 4, header_ptr);

        put(header_offset, HEADER_MARKER);
        put(header_offset + 4, self.img_type);
        put(header_offset + 8, 0);
        put(header_offset + 12, self.size as u32);
        put(header_offset + 20, self.version);

        let crc_pos = header_offset + CRC_FIELD;
        let engine = Crc::<u32>::new(self.algorithm);
        let mut digest = engine.digest();
        digest.update(&data[..crc_pos]);
        digest.update(&data[crc_pos + 4..self.size]);
        let crc = digest.finalize();

        data[crc_pos..crc_pos + 4].copy_from_slice(&crc.to_ne_bytes());
        let tail = self.size;
        data[tail..tail + 4].copy_from_slice(&crc.to_ne_bytes());

        Ok(GeneratedImage { data, header_offset, crc })
    }
}
