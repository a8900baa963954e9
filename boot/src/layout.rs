//! Flash layout and boot configuration.
//!
//! The flash is split into four contiguous areas, in address order:
//!
//! ```text
//! +----------------+ 0
//! | bootloader     |
//! +----------------+
//! | state          | update state record
//! +----------------+
//! | golden         | image that is booted
//! +----------------+
//! | backup         | candidate image, written by the update protocol
//! +----------------+
//! |   ...          |
//! +----------------+ write ceiling
//! | protected      | never programmed by the bootloader
//! +----------------+
//! ```

use crate::{Error, Result};

/// A range of flash, given as offsets from the start of the device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FlashRegion {
    pub start: usize,
    pub length: usize,
}

impl FlashRegion {
    pub const fn new(start: usize, length: usize) -> Self {
        FlashRegion { start, length }
    }

    pub const fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn contains(&self, addr: usize) -> bool {
        (self.start..self.end()).contains(&addr)
    }

    /// Does `[addr, addr + len)` lie entirely within this region?
    pub fn contains_range(&self, addr: usize, len: usize) -> bool {
        addr >= self.start
            && addr
                .checked_add(len)
                .map_or(false, |end| end <= self.end())
    }

    pub fn overlaps(&self, other: &FlashRegion) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FlashLayout {
    pub bootloader: FlashRegion,
    /// Sector holding the update state.
    pub state: FlashRegion,
    pub golden: FlashRegion,
    pub backup: FlashRegion,
    /// No write may end beyond this offset.
    pub write_ceiling: usize,
}

impl FlashLayout {
    /// Check the layout against a device erase size.  Every region has to be
    /// made of whole erase units, the regions must be in order without
    /// overlap, and everything the bootloader writes must be under the
    /// ceiling.  The golden region must be able to hold the whole backup
    /// region, which is what gets promoted for unchecked images.
    pub fn check(&self, erase_size: usize) -> Result<()> {
        let regions = [self.bootloader, self.state, self.golden, self.backup];
        for region in &regions {
            if region.length == 0
                || region.start % erase_size != 0
                || region.length % erase_size != 0
            {
                return Err(Error::Alignment);
            }
        }
        if regions.windows(2).any(|pair| pair[0].end() > pair[1].start) {
            return Err(Error::Bounds);
        }
        if self.backup.end() > self.write_ceiling {
            return Err(Error::Bounds);
        }
        if self.golden.length < self.backup.length {
            return Err(Error::Bounds);
        }
        Ok(())
    }
}

/// The LPC55S36 layout.  Its flash erases and programs in 512 byte pages.
pub const LPC55S36: FlashLayout = FlashLayout {
    bootloader: FlashRegion::new(0, 60 * 1024),
    state: FlashRegion::new(60 * 1024, 4 * 1024),
    golden: FlashRegion::new(64 * 1024, 64 * 1024),
    backup: FlashRegion::new(128 * 1024, 64 * 1024),
    write_ceiling: 512 * 1024,
};

/// How far into each region to look for the dual image marker.  Images start
/// at the beginning of their region, so the marker is always near the start.
pub const DEFAULT_SCAN_LEN: usize = 512;

/// Number of resets an update request forces update mode for.
pub const MAX_RETRY: u32 = 3;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BootConfig {
    pub layout: FlashLayout,
    pub scan_len: usize,
    pub max_retry: u32,
}

impl BootConfig {
    pub const fn new(layout: FlashLayout) -> Self {
        BootConfig {
            layout,
            scan_len: DEFAULT_SCAN_LEN,
            max_retry: MAX_RETRY,
        }
    }

    pub const fn with_scan_len(mut self, scan_len: usize) -> Self {
        self.scan_len = scan_len;
        self
    }

    pub const fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }
}
