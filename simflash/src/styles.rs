//! Flash styles
//!
//! Various microcontrollers have various types of flash memories available to
//! them.  Each style here describes a whole internal flash device, as the
//! bootloader sees it: its own code, its state sector, and the two image
//! regions all live in the same part.

use crate::Result;
use crate::SimFlash;

/// The configuration of a simulated flash device.
pub struct AreaLayout {
    pub read_size: usize,
    pub write_size: usize,
    pub erase_size: usize,
    pub sectors: usize,
    /// Reads of erased pages fault.
    pub strict_reads: bool,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        Ok(SimFlash::new(
            self.read_size,
            self.write_size,
            self.erase_size,
            self.sectors,
        )?
        .with_strict_reads(self.strict_reads))
    }

    pub fn capacity(&self) -> usize {
        self.erase_size * self.sectors
    }
}

/// Page-style device, the LPC55S36.  256KiB in 512 byte pages, which are both
/// the erase and program unit.  Reading a page that has been erased but not
/// programmed raises an ECC fault.
pub static LPC55S36: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 512,
    strict_reads: true,
};

/// K64-style.  Small uniform sectors and a small write size.  Erased flash
/// reads back as 0xff.
pub static K64: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 4 * 1024,
    sectors: 64,
    strict_reads: false,
};

/// Sectors much larger than the program unit, so that an erase during a copy
/// covers many pages.
pub static LARGE_SECTOR: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 256,
    erase_size: 32 * 1024,
    sectors: 8,
    strict_reads: false,
};

/// All of the flash devices.
pub static ALL_FLASHES: [&AreaLayout; 3] = [&LPC55S36, &K64, &LARGE_SECTOR];

/// An iterator that builds each of the devices in turn.
pub fn all_flashes() -> impl Iterator<Item = Result<SimFlash>> {
    ALL_FLASHES.iter().map(|layout| layout.build())
}
