//! Flash access.
//!
//! All reads, erases and programs done by the bootloader go through a
//! `FlashStore`, which owns the platform driver and holds the rules about
//! alignment and the protected area above the write ceiling.
//!
//! Programming is done in whole pages.  A write that is shorter than a page
//! still programs the full page, with the remainder of the page filled with
//! the erased value, so the tail of a partially written page never holds
//! anything but 0xff.  A page cannot be programmed twice without an erase in
//! between, so data sharing a page with a short write is lost.
//!
//! Copies run a page at a time: read the source page, erase the destination
//! if the page starts an erase unit, program the page.  Nothing is staged, so
//! a reset during a copy leaves the destination with a mix of old and new
//! pages.

use storage::{Flash, MappedFlash};

use crate::{layout::FlashRegion, log, Error, Result};

/// Largest page size a `FlashStore` can program.
pub const MAX_PAGE_SIZE: usize = 512;

/// Value of erased flash, and the fill for partial pages.
pub const ERASED: u8 = 0xff;

pub struct FlashStore<F> {
    flash: F,
    page_size: usize,
    erase_size: usize,
    ceiling: usize,
}

impl<F: Flash> FlashStore<F> {
    /// Take ownership of the platform flash.  The page size is the device's
    /// write size and the sector size is its erase size.  Nothing will be
    /// written at or above `write_ceiling`.
    pub fn new(flash: F, write_ceiling: usize) -> Result<Self> {
        let page_size = flash.write_size();
        let erase_size = flash.erase_size();
        if !page_size.is_power_of_two()
            || !erase_size.is_power_of_two()
            || page_size > MAX_PAGE_SIZE
        {
            return Err(Error::Alignment);
        }
        let ceiling = write_ceiling.min(flash.capacity());
        Ok(FlashStore {
            flash,
            page_size,
            erase_size,
            ceiling,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn erase_size(&self) -> usize {
        self.erase_size
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn capacity(&self) -> usize {
        self.flash.capacity()
    }

    pub fn inner(&self) -> &F {
        &self.flash
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Read any number of bytes from any offset.
    pub fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<()> {
        self.check_device(addr, buf.len())?;
        self.flash.read(addr, buf)?;
        Ok(())
    }

    /// Read one word in the native byte order.
    pub fn read_u32(&mut self, addr: usize) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_ne_bytes(word))
    }

    /// Erase `len` bytes at `addr`, both of which must be whole sectors.
    pub fn erase(&mut self, addr: usize, len: usize) -> Result<()> {
        if addr % self.erase_size != 0 || len % self.erase_size != 0 {
            return Err(Error::Alignment);
        }
        let end = self.check_ceiling(addr, len)?;
        if len == 0 {
            return Ok(());
        }
        self.flash.erase(addr, end)?;
        Ok(())
    }

    /// Program `bytes` at the page aligned `addr`.  The pages must already be
    /// erased.  The last page is programmed in full, padded with `ERASED`.
    pub fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        if addr % self.page_size != 0 {
            return Err(Error::Alignment);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_ceiling(addr, self.round_up(bytes.len()))?;

        let page_size = self.page_size;
        for (i, chunk) in bytes.chunks(page_size).enumerate() {
            let mut page = [ERASED; MAX_PAGE_SIZE];
            page[..chunk.len()].copy_from_slice(chunk);
            self.flash.write(addr + i * page_size, &page[..page_size])?;
        }
        Ok(())
    }

    /// Copy `len` bytes from `from` to `to`, rounded up to whole pages.
    ///
    /// Source pages that read back as never programmed leave the destination
    /// page erased.  Nothing is checked against the sources contents beyond
    /// that; on any failure the destination is left partially copied.
    pub fn copy(&mut self, to: usize, from: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        if to % self.page_size != 0 || to % self.erase_size != 0 {
            return Err(Error::Alignment);
        }
        let span = self.round_up(len);
        self.check_ceiling(to, span)?;
        self.check_device(from, len)?;
        if FlashRegion::new(to, span).overlaps(&FlashRegion::new(from, len)) {
            return Err(Error::Bounds);
        }

        let page_size = self.page_size;
        let mut pos = 0;
        while pos < len {
            let todo = (len - pos).min(page_size);
            let mut page = [ERASED; MAX_PAGE_SIZE];
            let source = self.flash.read(from + pos, &mut page[..todo]);
            if let Err(e) = source {
                if e != storage::Error::NotWritten {
                    return Err(e.into());
                }
            }

            let dest = to + pos;
            if dest % self.erase_size == 0 {
                self.erase(dest, self.erase_size.max(page_size))?;
            }
            match source {
                Ok(()) => self.flash.write(dest, &page[..page_size])?,
                Err(_) => log::debug!("copy: {:#x} not programmed, left erased", from + pos),
            }
            pos += todo;
        }
        Ok(())
    }

    /// Exercise a range of flash: erase each sector, program a pattern into
    /// every page, then read it all back.  Returns the number of bytes that
    /// did not read back as written.  Destroys the contents of the range.
    pub fn self_test(&mut self, region: FlashRegion) -> Result<usize> {
        let erase_size = self.erase_size;
        let page_size = self.page_size;
        if region.start % erase_size != 0 || region.length % erase_size != 0 {
            return Err(Error::Alignment);
        }
        let mut pattern = [0u8; MAX_PAGE_SIZE];
        for (i, b) in pattern[..page_size].iter_mut().enumerate() {
            *b = (i % 0xff) as u8;
        }

        let mut mismatches = 0;
        for sector in (region.start..region.end()).step_by(erase_size) {
            log::info!("flash test: {:#x}", sector);
            self.erase(sector, erase_size)?;
            for page in (sector..sector + erase_size).step_by(page_size) {
                self.write(page, &pattern[..page_size])?;
            }

            let mut buf = [0u8; MAX_PAGE_SIZE];
            for page in (sector..sector + erase_size).step_by(page_size) {
                self.read(page, &mut buf[..page_size])?;
                mismatches += buf[..page_size]
                    .iter()
                    .zip(&pattern[..page_size])
                    .filter(|(a, b)| a != b)
                    .count();
            }
        }
        if mismatches != 0 {
            log::error!("flash test: {} bytes differ", mismatches);
        }
        Ok(mismatches)
    }

    fn round_up(&self, len: usize) -> usize {
        len.div_ceil(self.page_size) * self.page_size
    }

    /// Returns the end of the range if it stays under the ceiling.
    fn check_ceiling(&self, addr: usize, len: usize) -> Result<usize> {
        match addr.checked_add(len) {
            Some(end) if end <= self.ceiling => Ok(end),
            _ => Err(Error::Bounds),
        }
    }

    fn check_device(&self, addr: usize, len: usize) -> Result<()> {
        match addr.checked_add(len) {
            Some(end) if end <= self.flash.capacity() => Ok(()),
            _ => Err(Error::Bounds),
        }
    }
}

impl<F: MappedFlash> FlashStore<F> {
    /// The address an offset in this flash executes from.
    pub fn mapped_address(&self, offset: usize) -> usize {
        self.flash.get_base() + offset
    }
}
