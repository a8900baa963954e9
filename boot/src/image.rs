//! Dual image support
//!
//! An image starts with its vector table.  At a fixed offset into the image,
//! past the core vectors, sits the dual image marker followed by a pointer to
//! the image header.  The pointer is an address in the space the image is
//! linked for, so it has to be translated back to a flash offset using the
//! address the image is loaded at.
//!
//! The header gives the image type, the length covered by the checksum, the
//! checksum itself and a version.  The checksum runs from the start of the
//! image up to `img_len`, skipping the four bytes of the checksum field.

use core::{cell::RefCell, mem::{offset_of, size_of}};

use asraw::{AsMutRaw, AsRaw};
use heapless::Vec;
use storage::Flash;

use crate::{
    checksum::{Crc32Engine, Crc32State},
    flash::FlashStore,
    layout::{FlashRegion, DEFAULT_SCAN_LEN},
    log, Error, Result,
};

/// Marks a dual image, at `DUAL_IMAGE_MARKER_OFFSET` into the image.
pub const DUAL_IMAGE_MARKER: u32 = 0x0ffe_b6b6;

/// The first word of every image header.
pub const HEADER_MARKER: u32 = 0xfeed_a5a5;

pub const DUAL_IMAGE_MARKER_OFFSET: usize = 0x24;

/// The header pointer follows the marker.
pub const HEADER_POINTER_OFFSET: usize = DUAL_IMAGE_MARKER_OFFSET + 4;

/// Chunk size used to stream an image through the checksum.
const CHUNK: usize = 128;

/// The image header, as laid out by the image generator.  All fields are
/// words in the byte order of the target.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
#[repr(C)]
pub struct ImageHeader {
    pub header_marker: u32,
    /// 0 for a checksummed image, 1 for an image that is never checked.
    pub img_type: u32,
    /// Written as zero.  Not checked.
    pub reserved: u32,
    /// Length covered by the checksum, from the start of the image.
    pub img_len: u32,
    pub crc_value: u32,
    /// Higher versions replace lower ones.
    pub version: u32,
}

impl AsRaw for ImageHeader {}
unsafe impl AsMutRaw for ImageHeader {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImageType {
    Checked,
    Unchecked,
    Unknown(u32),
}

impl ImageHeader {
    pub const SIZE: usize = size_of::<ImageHeader>();

    /// Offset of the checksum field within the header.
    pub const CRC_FIELD_OFFSET: usize = offset_of!(ImageHeader, crc_value);

    pub fn is_present(&self) -> bool {
        self.header_marker == HEADER_MARKER
    }

    pub fn image_type(&self) -> ImageType {
        match self.img_type {
            0 => ImageType::Checked,
            1 => ImageType::Unchecked,
            other => ImageType::Unknown(other),
        }
    }

    /// How many bytes promoting this image copies out of a region of
    /// `region_len` bytes.  Unchecked images have no length of their own, so
    /// the whole region goes.  Checked images are followed by a copy of their
    /// checksum, which is kept with them.
    pub fn copy_len(&self, region_len: usize) -> usize {
        match self.image_type() {
            ImageType::Unchecked => region_len,
            _ => self.img_len as usize + 4,
        }
    }

    /// Write the header out, a field per line.
    pub fn dump(&self) {
        log::info!("{:<16}: {:#010x}", "header_marker", self.header_marker);
        log::info!("{:<16}: {:#010x}", "img_type", self.img_type);
        log::info!("{:<16}: {:#010x}", "reserved", self.reserved);
        log::info!("{:<16}: {}", "img_len", self.img_len);
        log::info!("{:<16}: {:#010x}", "crc_value", self.crc_value);
        log::info!("{:<16}: {:#010x}", "version", self.version);
    }
}

/// An image located by a scan.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FoundImage {
    /// Flash offset of the start of the image.
    pub base: usize,
    /// Flash offset of the header.
    pub header_offset: usize,
    pub header: ImageHeader,
}

/// Locates and checks images in flash.  Holds a RefCell to the flash store so
/// several users can share the one device.
pub struct ImageCatalog<'f, F> {
    flash: &'f RefCell<FlashStore<F>>,
    crc: Crc32Engine,
    scan_len: usize,
}

impl<'f, F: Flash> ImageCatalog<'f, F> {
    pub fn new(flash: &'f RefCell<FlashStore<F>>) -> Self {
        ImageCatalog {
            flash,
            crc: Crc32Engine::default(),
            scan_len: DEFAULT_SCAN_LEN,
        }
    }

    /// Limit how far into a region `scan` looks for the marker.
    pub fn with_scan_len(mut self, scan_len: usize) -> Self {
        self.scan_len = scan_len;
        self
    }

    pub fn with_crc(mut self, crc: Crc32Engine) -> Self {
        self.crc = crc;
        self
    }

    /// Read the header of the image at `base`, linked to run at `load`.
    /// Returns the flash offset of the header along with it, or `None` when
    /// the header pointer leads nowhere or there is no header there.
    pub fn header(&self, base: usize, load: usize) -> Result<Option<(usize, ImageHeader)>> {
        let mut flash = self.flash.borrow_mut();
        let ptr = flash.read_u32(base + HEADER_POINTER_OFFSET)? as usize;
        let offset = match translate(ptr, load, base) {
            Some(offset) => offset,
            None => return Ok(None),
        };
        let header = read_header(&mut flash, offset)?;
        if !header.is_present() {
            return Ok(None);
        }
        Ok(Some((offset, header)))
    }

    /// Check the image at `base`.  Images of type 1 are accepted without
    /// looking at their contents, images of type 0 must match their checksum.
    /// Anything that can't be read is not a valid image.
    pub fn validate(&self, base: usize, load: usize) -> bool {
        match self.check(base, load) {
            Ok(valid) => valid,
            Err(e) => {
                log::warn!("image at {:#x} unreadable: {:?}", base, e);
                false
            }
        }
    }

    fn check(&self, base: usize, load: usize) -> Result<bool> {
        let (offset, header) = match self.header(base, load)? {
            Some(found) => found,
            None => return Ok(false),
        };

        let crc_offset = match (offset - base).checked_add(ImageHeader::CRC_FIELD_OFFSET) {
            Some(crc_offset) => crc_offset,
            None => return Ok(false),
        };
        let img_len = header.img_len as usize;
        if crc_offset > img_len {
            log::debug!("checksum field {:#x} past image length {:#x}", crc_offset, img_len);
            return Ok(false);
        }

        match header.image_type() {
            ImageType::Unchecked => Ok(true),
            ImageType::Checked => {
                let mut state = self.crc.init();
                self.feed(&mut state, base, crc_offset)?;
                let after = crc_offset + 4;
                self.feed(&mut state, base + after, img_len.saturating_sub(after))?;
                let crc = state.finalize();
                if crc != header.crc_value {
                    log::debug!("checksum {:#010x}, header has {:#010x}", crc, header.crc_value);
                }
                Ok(crc == header.crc_value)
            }
            ImageType::Unknown(kind) => {
                log::debug!("unknown image type {}", kind);
                Ok(false)
            }
        }
    }

    /// Stream `len` bytes at `pos` through the checksum.
    fn feed(&self, state: &mut Crc32State, mut pos: usize, len: usize) -> Result<()> {
        let mut buffer = [0u8; CHUNK];
        let end = pos.checked_add(len).ok_or(Error::Bounds)?;
        let mut flash = self.flash.borrow_mut();
        while pos < end {
            let todo = (end - pos).min(buffer.len());
            let buf = &mut buffer[..todo];
            flash.read(pos, buf)?;
            state.update(buf);
            pos += todo;
        }
        Ok(())
    }

    /// Look through the start of `region` for valid images linked to run at
    /// `load`, returning at most `max` of them in the order found.  Markers
    /// that don't lead to a valid image are skipped.
    pub fn scan<const N: usize>(
        &self,
        region: FlashRegion,
        load: usize,
        max: usize,
    ) -> Result<Vec<FoundImage, N>> {
        let mut found = Vec::new();
        let max = max.min(N);
        if max == 0 {
            return Ok(found);
        }

        let limit = self.scan_len.min(region.length);
        for pos in (region.start..region.start + limit).step_by(4) {
            let marker = match self.flash.borrow_mut().read_u32(pos) {
                Ok(marker) => marker,
                // Erased flash can't hold a marker.
                Err(Error::Io(storage::Error::NotWritten)) => continue,
                Err(e) => return Err(e),
            };
            if marker != DUAL_IMAGE_MARKER {
                continue;
            }
            let base = match pos.checked_sub(DUAL_IMAGE_MARKER_OFFSET) {
                Some(base) if base >= region.start => base,
                _ => continue,
            };

            if !self.marked_header(region, pos, load) {
                continue;
            }
            // The image itself is described by the header as found from its
            // base, which is what validation checks.
            let (header_offset, header) = match self.header(base, load) {
                Ok(Some(found)) => found,
                _ => continue,
            };
            // Everything promotion would copy, trailing checksum included,
            // has to be in the region.
            if !region.contains_range(base, header.copy_len(region.end() - base)) {
                log::debug!("image at {:#x} runs past its region", base);
                continue;
            }
            if !self.validate(base, load) {
                log::info!("image at {:#x} failed its check", base);
                continue;
            }
            // Can't fail, max is no more than N.
            let _ = found.push(FoundImage {
                base,
                header_offset,
                header,
            });
            if found.len() >= max {
                break;
            }
        }
        Ok(found)
    }

    /// Does the marker at `pos` lead to a header?  The header pointer is
    /// taken relative to the region start here.
    fn marked_header(&self, region: FlashRegion, pos: usize, load: usize) -> bool {
        let mut flash = self.flash.borrow_mut();
        let ptr = match flash.read_u32(pos + 4) {
            Ok(ptr) => ptr as usize,
            Err(_) => return false,
        };
        match translate(ptr, load, region.start) {
            Some(offset) if region.contains_range(offset, ImageHeader::SIZE) => {
                read_header(&mut flash, offset).map_or(false, |header| header.is_present())
            }
            _ => false,
        }
    }
}

/// `ptr - load + start`, if it doesn't wrap.
fn translate(ptr: usize, load: usize, start: usize) -> Option<usize> {
    ptr.checked_sub(load)?.checked_add(start)
}

fn read_header<F: Flash>(flash: &mut FlashStore<F>, offset: usize) -> Result<ImageHeader> {
    let mut header = ImageHeader::default();
    flash.read(offset, header.as_mut_raw())?;
    Ok(header)
}
